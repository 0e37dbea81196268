//! HTTP gateway for SqlSage.
//!
//! Exposes the chat streaming endpoint plus health and status routes,
//! and owns startup wiring: open the conversation store, select the
//! model provider, spawn the tool-host process and hand everything to a
//! [`TurnRunner`].
//!
//! Built on Axum.

pub mod api_v1;

use axum::extract::{DefaultBodyLimit, State};
use axum::response::Json;
use axum::routing::get;
use axum::Router;
use serde::Serialize;
use sqlsage_agent::{TurnOptions, TurnRunner};
use sqlsage_config::AppConfig;
use sqlsage_tools::McpClient;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tracing::info;

/// Shared application state, built once at startup.
pub struct AppState {
    pub runner: TurnRunner,
    pub provider_name: String,
    pub model: String,
    pub store_backend: String,
    pub tool_names: Vec<String>,
    pub started_at: chrono::DateTime<chrono::Utc>,
}

pub type SharedState = Arc<AppState>;

/// Build the full router: status, health and the versioned API.
pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/", get(status_handler))
        .route("/health", get(health_handler))
        .with_state(state.clone())
        .nest("/api/v1", api_v1::v1_router(state))
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .layer(CorsLayer::permissive())
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

/// Start the gateway HTTP server.
///
/// Everything that can fail at startup fails here: store backend,
/// provider selection, tool-host spawn and discovery.
pub async fn start(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.server.host, config.server.port);

    let store = sqlsage_store::open_store(&config.store.backend, &config.store.path).await?;
    let selected = sqlsage_providers::from_config(&config)?;
    let provider_name = selected.provider.name().to_string();

    // The tool-host gets the database URI as its final argument, the
    // same way an operator would start it by hand.
    let mut args = config.toolhost.args.clone();
    if let Some(url) = &config.toolhost.database_url {
        args.push(url.clone());
    }
    let client = Arc::new(
        McpClient::spawn(
            &config.toolhost.command,
            &args,
            Duration::from_secs(config.toolhost.request_timeout_secs),
        )
        .await?,
    );
    let tools = Arc::new(sqlsage_tools::discover_registry(&client).await?);
    let tool_names = tools.names().iter().map(|n| n.to_string()).collect();

    let options = TurnOptions {
        model: selected.model.clone(),
        temperature: config.temperature,
        max_tokens: config.max_tokens,
        max_iterations: config.agent.max_iterations,
        model_retries: config.agent.model_retries,
        model_timeout: Duration::from_secs(config.agent.model_timeout_secs),
        tool_timeout: Duration::from_secs(config.agent.tool_timeout_secs),
        system_prompt: config.agent.system_prompt.clone(),
    };

    let state = Arc::new(AppState {
        runner: TurnRunner::new(selected.provider, store.clone(), tools, options),
        provider_name,
        model: selected.model,
        store_backend: store.name().to_string(),
        tool_names,
        started_at: chrono::Utc::now(),
    });

    let app = build_router(state);

    info!(addr = %addr, "Gateway starting");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// --- Handlers ---

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Serialize)]
struct StatusResponse {
    status: String,
    version: String,
    uptime_secs: u64,
    provider: String,
    model: String,
    store: String,
    tools: Vec<String>,
}

async fn status_handler(State(state): State<SharedState>) -> Json<StatusResponse> {
    let uptime = chrono::Utc::now()
        .signed_duration_since(state.started_at)
        .num_seconds() as u64;

    Json(StatusResponse {
        status: "SqlSage API is running".into(),
        version: env!("CARGO_PKG_VERSION").into(),
        uptime_secs: uptime,
        provider: state.provider_name.clone(),
        model: state.model.clone(),
        store: state.store_backend.clone(),
        tools: state.tool_names.clone(),
    })
}
