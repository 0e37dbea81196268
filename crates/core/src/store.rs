//! Conversation store trait: durable per-thread message history.
//!
//! A store is an append-only log keyed by thread id. Implementations live
//! in the store crate (SQLite for durability, in-memory for tests).

use crate::error::StoreError;
use crate::message::{Message, ThreadId};
use async_trait::async_trait;

/// Durable, append-only message history keyed by thread id.
///
/// Guarantees every backend must uphold:
/// - `append` is atomic: the message is durably recorded or the call fails
///   with `StoreError::WriteFailure` and no partial record exists.
/// - `history` returns messages in append order, every time.
/// - An unknown thread id yields an empty history, never an error.
/// - Appends to the same thread never interleave partially; the backend
///   serializes them.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// A short name identifying the backend ("sqlite", "memory").
    fn name(&self) -> &str;

    /// Append one message to a thread's history.
    async fn append(
        &self,
        thread_id: &ThreadId,
        message: &Message,
    ) -> std::result::Result<(), StoreError>;

    /// The full ordered history of a thread. Empty if the thread is unknown.
    async fn history(
        &self,
        thread_id: &ThreadId,
    ) -> std::result::Result<Vec<Message>, StoreError>;
}
