//! # SqlSage Core
//!
//! Domain types, traits, and error definitions for the SqlSage
//! conversational database agent. Every subsystem the agent touches
//! (model providers, conversation storage, tools) is defined as a trait
//! here; implementations live in their own crates and depend inward on
//! this one. The only runtime type this crate reaches for is the tokio
//! channel used to carry stream chunks.
//!
//! Keeping the seams here means a provider, store, or tool can be
//! swapped via configuration, and tests can substitute stubs without
//! pulling in HTTP or database machinery.

pub mod error;
pub mod message;
pub mod provider;
pub mod schema;
pub mod store;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{Error, ProviderError, Result, StoreError, ToolError, TurnError};
pub use message::{Message, MessageToolCall, Role, ThreadId};
pub use provider::{Provider, ProviderRequest, ProviderResponse, StreamChunk, Usage};
pub use store::ConversationStore;
pub use tool::{Tool, ToolCall, ToolDescriptor, ToolRegistry};
