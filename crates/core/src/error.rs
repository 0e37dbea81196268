//! Error types for the SqlSage domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum; `TurnError` collects the
//! failures that end a turn and carry a machine-readable kind on the wire.

use thiserror::Error;

/// The top-level error type for all SqlSage operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Conversation store errors ---
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

/// Conversation store failures.
///
/// `WriteFailure` is fatal for the turn that hit it: the loop must not
/// continue on state it could not persist.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Write failed: {0}")]
    WriteFailure(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    #[error("Connection failed: {0}")]
    Connection(String),
}

/// Tool invocation failures.
///
/// All of these are recoverable from the turn's point of view: the loop
/// serializes them into a tool-result message and lets the model decide
/// what to do next. `UnknownTool` and `InvalidInput` are detected locally,
/// before the tool-execution process is contacted.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Invalid input for {tool}: {reason}")]
    InvalidInput { tool: String, reason: String },

    #[error("Tool execution failed: {tool}: {reason}")]
    ExecutionFailed { tool: String, reason: String },

    #[error("Tool timed out: {tool} after {timeout_secs}s")]
    Timeout { tool: String, timeout_secs: u64 },

    #[error("Tool transport error: {0}")]
    Transport(String),
}

/// Failures that terminate a turn.
///
/// Recoverable failures (`ToolError`, a model call that still has retry
/// budget) never appear here; they are folded back into the conversation.
#[derive(Debug, Error)]
pub enum TurnError {
    #[error("Model call failed: {0}")]
    Model(#[from] ProviderError),

    #[error("No final answer after {limit} tool round-trips")]
    IterationLimitExceeded { limit: u32 },

    #[error("Conversation write failed: {0}")]
    WriteFailure(#[from] StoreError),

    #[error("Model output unrecognized: {0}")]
    MalformedModelOutput(String),
}

impl TurnError {
    /// The classified kind carried by the outbound `error` frame.
    pub fn kind(&self) -> &'static str {
        match self {
            TurnError::Model(_) => "model_error",
            TurnError::IterationLimitExceeded { .. } => "iteration_limit_exceeded",
            TurnError::WriteFailure(_) => "write_failure",
            TurnError::MalformedModelOutput(_) => "malformed_model_output",
        }
    }
}
