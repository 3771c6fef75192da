use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{FlowbotError, Result};

/// Top-level Flowbot configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    /// Model backing `ai` nodes. Without it every ai node answers with the fallback reply.
    #[serde(default)]
    pub model: Option<ModelConfig>,
    #[serde(default)]
    pub fallback_models: Vec<ModelConfig>,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Upper bound on node visits per inbound message.
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
    /// How many times a run is retried after losing a session write race.
    #[serde(default = "default_session_retries")]
    pub session_retries: usize,
    /// Sent when a run produced no output at all.
    #[serde(default = "default_fallback_reply")]
    pub fallback_reply: String,
    /// Sent when the graph has no trigger node.
    #[serde(default = "default_not_configured_reply")]
    pub not_configured_reply: String,
    /// Prepended to the button prompt when a reply matches no option.
    #[serde(default = "default_invalid_selection_reply")]
    pub invalid_selection_reply: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            session_retries: default_session_retries(),
            fallback_reply: default_fallback_reply(),
            not_configured_reply: default_not_configured_reply(),
            invalid_selection_reply: default_invalid_selection_reply(),
        }
    }
}

fn default_max_steps() -> usize { 50 }
fn default_session_retries() -> usize { 3 }
fn default_fallback_reply() -> String { "Sorry, I have nothing to say to that yet.".to_string() }
fn default_not_configured_reply() -> String { "This bot is not configured yet.".to_string() }
fn default_invalid_selection_reply() -> String { "Please choose one of the options below.".to_string() }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    pub model_id: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Reply used when the provider fails or returns garbage.
    #[serde(default = "default_model_fallback_reply")]
    pub fallback_reply: String,
    #[serde(default)]
    pub retry: Option<RetryConfig>,
}

fn default_provider() -> String { "openai".to_string() }
fn default_max_tokens() -> u32 { 1024 }
fn default_temperature() -> f32 { 0.0 }
fn default_timeout_secs() -> u64 { 30 }
fn default_model_fallback_reply() -> String { "Sorry, I couldn't process that right now.".to_string() }

/// Retry configuration for LLM requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
        }
    }
}

fn default_max_retries() -> u32 { 3 }
fn default_initial_backoff() -> u64 { 1000 }
fn default_max_backoff() -> u64 { 30000 }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String { "127.0.0.1:18790".to_string() }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_database")]
    pub database: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database: default_database(),
        }
    }
}

fn default_database() -> String { "~/.flowbot/flowbot.db".to_string() }

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| FlowbotError::ConfigNotFound(path.display().to_string()))?;

        // Expand ${ENV_VAR} references
        let expanded = expand_env_vars(&content);

        toml::from_str(&expanded).map_err(|e| FlowbotError::Config(e.to_string()))
    }

    /// Like [`AppConfig::load`], but a missing file yields the defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load(path)
    }

    /// Resolve the SQLite database path (expand ~).
    pub fn database_path(&self) -> PathBuf {
        expand_home(&self.storage.database)
    }
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs_home() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next();
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                // Leave unset variables in place so the error is visible downstream
                Err(_) => result.push_str(&format!("${{{}}}", var_name)),
            }
        } else {
            result.push(c);
        }
    }
    result
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}
