//! Turn-level streaming events.
//!
//! `TurnEvent` is the typed frame sequence a turn produces for its client.
//! The gateway forwards each frame as one SSE event whose event name is
//! the frame type and whose data is the frame's JSON.

use serde::{Deserialize, Serialize};

/// Events emitted while a turn runs.
///
/// Every stream opens with `thread` and ends with exactly one terminal
/// frame, `final` or `error`:
/// - `thread`:      the thread identifier for this conversation
/// - `token`:       partial answer text from the model
/// - `tool_call`:   the agent is invoking a tool
/// - `tool_result`: tool invocation completed (output or error, never both)
/// - `final`:       the complete answer; the turn succeeded
/// - `error`:       the turn failed; `kind` is machine-readable
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    /// The thread this turn belongs to (caller-supplied or generated).
    Thread { thread_id: String },

    /// Partial answer text from the model.
    Token { text: String },

    /// The agent is calling a tool.
    ToolCall {
        id: String,
        name: String,
        input: serde_json::Value,
    },

    /// Tool invocation completed.
    ToolResult {
        id: String,
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    /// The complete final answer.
    Final { text: String },

    /// The turn failed with a classified reason.
    Error { kind: String, message: String },
}

impl TurnEvent {
    /// SSE event name for this frame type.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Thread { .. } => "thread",
            Self::Token { .. } => "token",
            Self::ToolCall { .. } => "tool_call",
            Self::ToolResult { .. } => "tool_result",
            Self::Final { .. } => "final",
            Self::Error { .. } => "error",
        }
    }

    /// Whether this frame ends the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Final { .. } | Self::Error { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thread_frame_serialization() {
        let event = TurnEvent::Thread {
            thread_id: "abc-123".into(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"thread""#));
        assert!(json.contains(r#""thread_id":"abc-123""#));
    }

    #[test]
    fn token_frame_serialization() {
        let event = TurnEvent::Token {
            text: "The database".into(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"token""#));
        assert!(json.contains(r#""text":"The database""#));
    }

    #[test]
    fn tool_call_frame_serialization() {
        let event = TurnEvent::ToolCall {
            id: "call_1".into(),
            name: "sql_db_query".into(),
            input: serde_json::json!({"query": "select 1"}),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"tool_call""#));
        assert!(json.contains(r#""name":"sql_db_query""#));
    }

    #[test]
    fn tool_result_frame_omits_absent_side() {
        let ok = TurnEvent::ToolResult {
            id: "call_1".into(),
            name: "sql_db_query".into(),
            output: Some("3 rows".into()),
            error: None,
        };
        let json = serde_json::to_string(&ok).unwrap();
        assert!(json.contains(r#""output":"3 rows""#));
        assert!(!json.contains("error"));

        let failed = TurnEvent::ToolResult {
            id: "call_2".into(),
            name: "sql_db_query".into(),
            output: None,
            error: Some("relation does not exist".into()),
        };
        let json = serde_json::to_string(&failed).unwrap();
        assert!(json.contains(r#""error":"relation does not exist""#));
        assert!(!json.contains("output"));
    }

    #[test]
    fn error_frame_carries_kind() {
        let event = TurnEvent::Error {
            kind: "iteration_limit_exceeded".into(),
            message: "No final answer after 10 tool round-trips".into(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""kind":"iteration_limit_exceeded""#));
    }

    #[test]
    fn event_type_names() {
        assert_eq!(
            TurnEvent::Thread {
                thread_id: "t".into()
            }
            .event_type(),
            "thread"
        );
        assert_eq!(TurnEvent::Token { text: "x".into() }.event_type(), "token");
        assert_eq!(
            TurnEvent::ToolCall {
                id: "a".into(),
                name: "b".into(),
                input: serde_json::Value::Null
            }
            .event_type(),
            "tool_call"
        );
        assert_eq!(
            TurnEvent::ToolResult {
                id: "a".into(),
                name: "b".into(),
                output: Some("c".into()),
                error: None
            }
            .event_type(),
            "tool_result"
        );
        assert_eq!(TurnEvent::Final { text: "x".into() }.event_type(), "final");
        assert_eq!(
            TurnEvent::Error {
                kind: "model_error".into(),
                message: "x".into()
            }
            .event_type(),
            "error"
        );
    }

    #[test]
    fn terminal_frames() {
        assert!(TurnEvent::Final { text: "x".into() }.is_terminal());
        assert!(
            TurnEvent::Error {
                kind: "model_error".into(),
                message: "x".into()
            }
            .is_terminal()
        );
        assert!(!TurnEvent::Token { text: "x".into() }.is_terminal());
        assert!(
            !TurnEvent::Thread {
                thread_id: "t".into()
            }
            .is_terminal()
        );
    }

    #[test]
    fn event_deserialization() {
        let json = r#"{"type":"token","text":"hi"}"#;
        let event: TurnEvent = serde_json::from_str(json).unwrap();
        match event {
            TurnEvent::Token { text } => assert_eq!(text, "hi"),
            _ => panic!("Wrong variant"),
        }
    }
}
