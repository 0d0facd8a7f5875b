//! Configuration for the geo-analysis agent.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::AgentError;

/// Environment variable for the reasoning collaborator credential.
const API_KEY_ENV: &str = "GEOAGENT_API_KEY";
/// Fallback credential variable, kept for compatibility with older deploys.
const API_KEY_FALLBACK_ENV: &str = "DEEPSEEK_API_KEY";
/// Environment variable for a custom reasoning endpoint base URL.
const API_BASE_ENV: &str = "GEOAGENT_API_BASE";
/// Environment variable for the server port.
const PORT_ENV: &str = "GEOAGENT_PORT";

/// Default reasoning endpoint (OpenAI-compatible chat completions).
const DEFAULT_API_BASE: &str = "https://api.deepseek.com/v1";
/// Default reasoning model.
const DEFAULT_MODEL: &str = "deepseek-chat";
/// Default server port.
pub const DEFAULT_PORT: u16 = 8000;

/// Configuration for the agent core.
#[derive(Clone, Debug)]
pub struct AgentConfig {
    /// Credential for the reasoning collaborator.
    pub api_key: String,
    /// Base URL of the reasoning endpoint.
    pub api_base_url: String,
    /// Model name sent with every completion request.
    pub model: String,
    /// Timeout for a single reasoning round-trip.
    pub request_timeout: Duration,
    /// How many recent turns are replayed to the interpreter.
    pub history_window: usize,
    /// Root directory for uploads and generated artifacts.
    pub output_dir: PathBuf,
    /// Public base URL under which `/outputs/` is served.
    pub public_base_url: String,
    /// Base URL of the external visualization collaborator, if configured.
    pub renderer_base_url: Option<String>,
    /// Conversation store limits.
    pub store: StoreConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_base_url: DEFAULT_API_BASE.to_string(),
            model: DEFAULT_MODEL.to_string(),
            request_timeout: Duration::from_secs(60),
            history_window: 8,
            output_dir: PathBuf::from("outputs"),
            public_base_url: format!("http://localhost:{DEFAULT_PORT}"),
            renderer_base_url: None,
            store: StoreConfig::default(),
        }
    }
}

impl AgentConfig {
    /// Load configuration from the environment.
    ///
    /// # Errors
    /// Returns `AgentError::Configuration` if no credential is present; the
    /// interpreter fails closed rather than limping along without one.
    pub fn from_env() -> Result<Self, AgentError> {
        let api_key = std::env::var(API_KEY_ENV)
            .or_else(|_| std::env::var(API_KEY_FALLBACK_ENV))
            .map_err(|_| {
                AgentError::Configuration(format!(
                    "missing reasoning credential: set {API_KEY_ENV} or {API_KEY_FALLBACK_ENV}"
                ))
            })?;

        let mut config = Self {
            api_key,
            ..Self::default()
        };
        if let Ok(base) = std::env::var(API_BASE_ENV) {
            url::Url::parse(&base)
                .map_err(|e| AgentError::Configuration(format!("invalid {API_BASE_ENV}: {e}")))?;
            config.api_base_url = base;
        }
        Ok(config)
    }

    /// Set the reasoning credential.
    #[must_use]
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = key.into();
        self
    }

    /// Set the reasoning model.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set the reasoning request timeout.
    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the artifact output root.
    #[must_use]
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    /// Set the public base URL used when composing artifact links.
    #[must_use]
    pub fn with_public_base_url(mut self, base: impl Into<String>) -> Self {
        self.public_base_url = base.into();
        self
    }

    /// Set the visualization collaborator endpoint.
    #[must_use]
    pub fn with_renderer_base_url(mut self, base: impl Into<String>) -> Self {
        self.renderer_base_url = Some(base.into());
        self
    }
}

/// Limits for the in-memory conversation store.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Maximum number of live conversations before the oldest are evicted.
    pub max_conversations: usize,
    /// Conversations idle longer than this are eligible for eviction (seconds).
    pub idle_ttl_seconds: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_conversations: 1000,
            idle_ttl_seconds: 6 * 3600,
        }
    }
}

/// Get the configured server port.
#[must_use]
pub fn get_port() -> u16 {
    std::env::var(PORT_ENV)
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(DEFAULT_PORT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AgentConfig::default();
        assert_eq!(config.model, DEFAULT_MODEL);
        assert_eq!(config.history_window, 8);
        assert_eq!(config.store.max_conversations, 1000);
    }

    #[test]
    fn test_config_builder() {
        let config = AgentConfig::default()
            .with_api_key("test-key")
            .with_model("test-model")
            .with_output_dir("/tmp/out")
            .with_renderer_base_url("http://localhost:9000");

        assert_eq!(config.api_key, "test-key");
        assert_eq!(config.model, "test-model");
        assert_eq!(config.output_dir, PathBuf::from("/tmp/out"));
        assert_eq!(
            config.renderer_base_url.as_deref(),
            Some("http://localhost:9000")
        );
    }
}
