//! The versioned REST surface.
//!
//! - `POST /api/v1/chat/stream`: submit a query, receive the turn as an
//!   SSE stream, one event per frame, the event name being the frame
//!   type and the data its JSON body.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event as SseEvent, Sse};
use axum::response::Json;
use axum::routing::post;
use axum::Router;
use serde::{Deserialize, Serialize};
use sqlsage_core::message::ThreadId;
use std::convert::Infallible;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tracing::info;

use crate::SharedState;

/// Build the v1 API router. Nest this under "/api/v1" in the main router.
pub fn v1_router(state: SharedState) -> Router {
    Router::new()
        .route("/chat/stream", post(chat_stream_handler))
        .with_state(state)
}

#[derive(Deserialize)]
struct ChatRequest {
    /// The user's natural-language request.
    #[serde(default)]
    query: String,

    /// Existing thread to continue; omit to start a new one.
    #[serde(default)]
    thread_id: Option<String>,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// `POST /api/v1/chat/stream`: run one turn, streamed as SSE.
async fn chat_stream_handler(
    State(state): State<SharedState>,
    Json(payload): Json<ChatRequest>,
) -> Result<
    Sse<impl futures::Stream<Item = Result<SseEvent, Infallible>>>,
    (StatusCode, Json<ErrorResponse>),
> {
    // Rejected here, before any turn state exists.
    if payload.query.trim().is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: "query must not be empty".into(),
            }),
        ));
    }

    let thread_id = match payload.thread_id.filter(|id| !id.trim().is_empty()) {
        Some(id) => ThreadId(id),
        None => ThreadId::new(),
    };
    info!(thread_id = %thread_id, "Chat stream request");

    let turn = state.runner.start(thread_id, payload.query);
    let stream = ReceiverStream::new(turn.events).map(|event| {
        let name = event.event_type();
        let data = serde_json::to_string(&event).unwrap_or_default();
        Ok(SseEvent::default().event(name).data(data))
    });

    Ok(Sse::new(stream))
}
