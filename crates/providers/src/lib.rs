//! LLM provider implementations for SqlSage.
//!
//! All providers implement the `sqlsage_core::Provider` trait. Most
//! hosted backends (OpenAI, Gemini, Groq, DeepSeek) are reached through
//! the OpenAI-compatible wire protocol; Anthropic uses its native
//! Messages API. [`factory::from_config`] selects the one provider the
//! service runs with.

pub mod anthropic;
pub mod factory;
mod http;
pub mod openai_compat;

pub use anthropic::AnthropicProvider;
pub use factory::{SelectedProvider, from_config};
pub use openai_compat::OpenAiCompatProvider;
