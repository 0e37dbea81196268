//! Provider selection from configuration.
//!
//! One provider serves the whole process, chosen at startup from
//! `default_provider`. Most backends speak the OpenAI-compatible wire
//! protocol through [`OpenAiCompatProvider`]; Anthropic gets its native
//! client. A missing API key or an unknown provider name fails here,
//! before the service accepts a request.

use crate::anthropic::AnthropicProvider;
use crate::openai_compat::OpenAiCompatProvider;
use sqlsage_config::AppConfig;
use sqlsage_core::Provider;
use sqlsage_core::error::ProviderError;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Providers this service knows how to reach.
pub const KNOWN_PROVIDERS: &[&str] = &["openai", "anthropic", "gemini", "groq", "deepseek"];

/// The provider picked at startup, paired with the model it will run.
pub struct SelectedProvider {
    pub provider: Arc<dyn Provider>,
    pub model: String,
}

impl std::fmt::Debug for SelectedProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SelectedProvider")
            .field("provider", &self.provider.name())
            .field("model", &self.model)
            .finish()
    }
}

/// Build the configured provider.
///
/// Resolution order for the model: global `model` override, then the
/// provider's `default_model` entry, then the built-in default.
pub fn from_config(config: &AppConfig) -> Result<SelectedProvider, ProviderError> {
    let name = config.default_provider.as_str();

    let Some(builtin_model) = default_model(name) else {
        return Err(ProviderError::NotConfigured(format!(
            "unknown provider \"{name}\" (expected one of: {})",
            KNOWN_PROVIDERS.join(", ")
        )));
    };

    let api_key = config.api_key_for(name).ok_or_else(|| {
        ProviderError::NotConfigured(format!(
            "no API key configured for provider \"{name}\"; set {} or providers.{name}.api_key",
            key_env_var(name)
        ))
    })?;

    let api_url = config
        .providers
        .get(name)
        .and_then(|p| p.api_url.as_deref());
    let timeout = Duration::from_secs(config.agent.model_timeout_secs);

    let provider: Arc<dyn Provider> = if name == "anthropic" {
        let mut p = AnthropicProvider::new(&api_key, timeout);
        if let Some(url) = api_url {
            p = p.with_base_url(url);
        }
        Arc::new(p)
    } else {
        let base_url = resolve_base_url(name, api_url);
        Arc::new(OpenAiCompatProvider::new(name, base_url, &api_key, timeout))
    };

    let model = config
        .model_for(name)
        .unwrap_or_else(|| builtin_model.to_string());

    info!(provider = name, model = %model, "Selected LLM provider");

    Ok(SelectedProvider { provider, model })
}

/// The model used when neither the global nor the per-provider config
/// names one. Returns `None` for providers this service does not know.
pub fn default_model(provider: &str) -> Option<&'static str> {
    match provider {
        "openai" => Some("gpt-4o"),
        "anthropic" => Some("claude-3-5-sonnet-20240620"),
        "gemini" => Some("gemini-1.5-flash"),
        "groq" => Some("llama3-70b-8192"),
        "deepseek" => Some("deepseek-chat"),
        _ => None,
    }
}

/// OpenAI-compatible endpoint for a provider, with config override.
fn resolve_base_url(provider: &str, override_url: Option<&str>) -> String {
    if let Some(url) = override_url {
        return url.to_string();
    }
    match provider {
        "openai" => "https://api.openai.com/v1".into(),
        // Gemini exposes an OpenAI-compatible surface under /openai
        "gemini" => "https://generativelanguage.googleapis.com/v1beta/openai".into(),
        "groq" => "https://api.groq.com/openai/v1".into(),
        "deepseek" => "https://api.deepseek.com/v1".into(),
        other => format!("https://api.{other}.com/v1"),
    }
}

/// Environment variable that carries the provider's key, for error messages.
fn key_env_var(provider: &str) -> String {
    format!("{}_API_KEY", provider.to_uppercase())
}
