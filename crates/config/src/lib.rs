//! Configuration loading and validation for SqlSage.
//!
//! Loads `sqlsage.toml` from the working directory (or the path in
//! `SQLSAGE_CONFIG`) with environment variable overrides for secrets and
//! deploy-varying values. Validates all settings at startup so a
//! misconfigured service fails before it accepts a request.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `sqlsage.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key fallback (can be overridden per-provider)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Which LLM provider answers model calls
    #[serde(default = "default_provider")]
    pub default_provider: String,

    /// Model override; when absent each provider picks its own default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens per model response
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Conversation store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Tool-execution process configuration
    #[serde(default)]
    pub toolhost: ToolhostConfig,

    /// Agent loop configuration
    #[serde(default)]
    pub agent: AgentConfig,

    /// Provider-specific configurations
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
}

fn default_provider() -> String {
    "openai".into()
}
fn default_temperature() -> f32 {
    0.0
}

/// Redact a secret for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("default_provider", &self.default_provider)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("server", &self.server)
            .field("store", &self.store)
            .field("toolhost", &self.toolhost)
            .field("agent", &self.agent)
            .field("providers", &self.providers)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_port() -> u16 {
    8000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Backend: "sqlite" (durable) or "memory" (ephemeral)
    #[serde(default = "default_store_backend")]
    pub backend: String,

    /// SQLite database path
    #[serde(default = "default_store_path")]
    pub path: String,
}

fn default_store_backend() -> String {
    "sqlite".into()
}
fn default_store_path() -> String {
    "sqlsage.db".into()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_store_backend(),
            path: default_store_path(),
        }
    }
}

/// How to reach the external tool-execution process.
///
/// The process is spawned as a child speaking JSON-RPC over stdio. The
/// PostgreSQL URI is appended as its final argument; the tools it exposes
/// decide what they do with that database. Nothing in this service opens
/// the database directly.
#[derive(Clone, Serialize, Deserialize)]
pub struct ToolhostConfig {
    /// Command to spawn
    #[serde(default = "default_toolhost_command")]
    pub command: String,

    /// Arguments before the database URI
    #[serde(default = "default_toolhost_args")]
    pub args: Vec<String>,

    /// PostgreSQL connection URI handed to the tool process
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_url: Option<String>,

    /// Per-request timeout in seconds
    #[serde(default = "default_toolhost_timeout")]
    pub request_timeout_secs: u64,
}

fn default_toolhost_command() -> String {
    "python3".into()
}
fn default_toolhost_args() -> Vec<String> {
    vec!["sql_mcp_server.py".into()]
}
fn default_toolhost_timeout() -> u64 {
    30
}

impl Default for ToolhostConfig {
    fn default() -> Self {
        Self {
            command: default_toolhost_command(),
            args: default_toolhost_args(),
            database_url: None,
            request_timeout_secs: default_toolhost_timeout(),
        }
    }
}

impl std::fmt::Debug for ToolhostConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolhostConfig")
            .field("command", &self.command)
            .field("args", &self.args)
            .field("database_url", &redact(&self.database_url))
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Maximum tool round-trips per turn before the turn fails
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Model call retries before a turn-fatal model error
    #[serde(default = "default_model_retries")]
    pub model_retries: u32,

    /// Model call timeout in seconds
    #[serde(default = "default_model_timeout")]
    pub model_timeout_secs: u64,

    /// Tool invocation timeout in seconds
    #[serde(default = "default_tool_timeout")]
    pub tool_timeout_secs: u64,

    /// Override the built-in system prompt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

fn default_max_iterations() -> u32 {
    10
}
fn default_model_retries() -> u32 {
    2
}
fn default_model_timeout() -> u64 {
    120
}
fn default_tool_timeout() -> u64 {
    30
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            model_retries: default_model_retries(),
            model_timeout_secs: default_model_timeout(),
            tool_timeout_secs: default_tool_timeout(),
            system_prompt: None,
        }
    }
}

#[derive(Clone, Serialize, Deserialize, Default)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("default_model", &self.default_model)
            .finish()
    }
}

/// Environment variables that carry per-provider API keys.
const PROVIDER_KEY_ENV: &[(&str, &str)] = &[
    ("openai", "OPENAI_API_KEY"),
    ("anthropic", "ANTHROPIC_API_KEY"),
    ("gemini", "GEMINI_API_KEY"),
    ("groq", "GROQ_API_KEY"),
    ("deepseek", "DEEPSEEK_API_KEY"),
];

impl AppConfig {
    /// Load configuration from `sqlsage.toml` (or `SQLSAGE_CONFIG`).
    ///
    /// Environment overrides applied afterwards:
    /// - `LLM_PROVIDER`: default provider
    /// - `POSTGRES_URI`: database URI handed to the tool process
    /// - `SQLSAGE_PORT`: HTTP port
    /// - `OPENAI_API_KEY`, `ANTHROPIC_API_KEY`, `GEMINI_API_KEY`,
    ///   `GROQ_API_KEY`, `DEEPSEEK_API_KEY`: per-provider keys
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("SQLSAGE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("sqlsage.toml"));
        let mut config = Self::load_from(&path)?;

        if let Ok(provider) = std::env::var("LLM_PROVIDER") {
            config.default_provider = provider;
        }

        if let Ok(uri) = std::env::var("POSTGRES_URI") {
            config.toolhost.database_url = Some(uri);
        }

        if let Ok(port) = std::env::var("SQLSAGE_PORT") {
            config.server.port = port.parse().map_err(|_| {
                ConfigError::ValidationError(format!("SQLSAGE_PORT is not a port number: {port}"))
            })?;
        }

        for (provider, var) in PROVIDER_KEY_ENV {
            if let Ok(key) = std::env::var(var) {
                let entry = config.providers.entry((*provider).into()).or_default();
                if entry.api_key.is_none() {
                    entry.api_key = Some(key);
                }
            }
        }

        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.temperature < 0.0 || self.temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.agent.max_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_iterations must be at least 1".into(),
            ));
        }

        if self.agent.model_timeout_secs == 0 || self.agent.tool_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "agent timeouts must be non-zero".into(),
            ));
        }

        match self.store.backend.as_str() {
            "sqlite" | "memory" => {}
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "unknown store backend: {other} (expected \"sqlite\" or \"memory\")"
                )));
            }
        }

        Ok(())
    }

    /// The API key for a provider: its own entry first, then the fallback.
    pub fn api_key_for(&self, provider: &str) -> Option<String> {
        self.providers
            .get(provider)
            .and_then(|p| p.api_key.clone())
            .or_else(|| self.api_key.clone())
    }

    /// The model to use for a provider, if one is configured anywhere.
    pub fn model_for(&self, provider: &str) -> Option<String> {
        self.model.clone().or_else(|| {
            self.providers
                .get(provider)
                .and_then(|p| p.default_model.clone())
        })
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            default_provider: default_provider(),
            model: None,
            temperature: default_temperature(),
            max_tokens: None,
            server: ServerConfig::default(),
            store: StoreConfig::default(),
            toolhost: ToolhostConfig::default(),
            agent: AgentConfig::default(),
            providers: HashMap::new(),
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
