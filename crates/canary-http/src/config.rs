//! # Environment-Based Configuration
//!
//! Loads the service configuration from environment variables so a
//! deployment can be tuned without rebuilding. Command-line flags override
//! individual values through the builder setters.
//!
//! ## Environment Variables
//!
//! ### Service
//! - `CANARY_BIND_ADDR` - HTTP listen address (default: 127.0.0.1:8080)
//! - `CANARY_SERVERS_FILE` - External registry location (default: ./mcp-servers.json)
//! - `CANARY_ENABLE_CORS` - Permissive CORS layer (default: true)
//!
//! ### Model
//! - `CANARY_MODEL_BASE_URL` - OpenAI-compatible endpoint
//! - `CANARY_MODEL_NAME` - Model id (default: glm-4-flash)
//! - `CANARY_MODEL_API_KEY` - Bearer token
//! - `CANARY_MODEL_TEMPERATURE` - Sampling temperature 0.0-2.0 (default: 0.6)
//! - `CANARY_MODEL_MAX_TOKENS` - Completion cap (default: 2048)
//! - `CANARY_MODEL_TIMEOUT_SECS` - Per model call timeout (default: 120)
//!
//! ### Tool servers
//! - `CANARY_TOOL_TIMEOUT_SECS` - Per tool invocation timeout (default: 20)
//! - `CANARY_HANDSHAKE_TIMEOUT_SECS` - Per handshake attempt timeout (default: 10)
//! - `CANARY_HANDSHAKE_ATTEMPTS` - Retry budget per connect cycle (default: 4)
//! - `CANARY_HANDSHAKE_BACKOFF_MS` - Initial backoff, doubled per attempt (default: 250)
//! - `CANARY_NOTIFICATION_BUFFER` - Per-connection notification channel (default: 128)
//!
//! ### Runs
//! - `CANARY_MAX_TOOL_ROUNDS` - Model to tool round trips per run (default: 8)
//! - `CANARY_EVENT_BUFFER` - Per-run event channel capacity (default: 64)
//! - `CANARY_DELIVERY_TIMEOUT_MS` - Blocked event write treated as disconnect (default: 5000)

use canary_chat::{ModelConfig, OrchestratorConfig};
use canary_mcp::ConnectionPolicy;
use canary_registry::DEFAULT_SERVERS_FILE;
use std::{env, net::SocketAddr, path::PathBuf, time::Duration};

pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8080";

/// Error type for configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid environment variable '{key}': {message}")]
    InvalidEnvVar { key: String, message: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

/// Complete service configuration
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub servers_file: PathBuf,
    pub enable_cors: bool,
    pub model: ModelConfig,
    pub connection: ConnectionPolicy,
    pub orchestrator: OrchestratorConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            servers_file: PathBuf::from(DEFAULT_SERVERS_FILE),
            enable_cors: true,
            model: ModelConfig::default(),
            connection: ConnectionPolicy::default(),
            orchestrator: OrchestratorConfig::default(),
        }
    }
}

/// Builder for [`AppConfig`]
#[derive(Debug, Clone, Default)]
pub struct AppConfigBuilder {
    config: AppConfig,
}

impl AppConfigBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from `CANARY_*` environment variables.
    ///
    /// Unset variables keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if any environment variable has an invalid value
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = AppConfig::default();

        if let Some(addr) = get_env_string("CANARY_BIND_ADDR") {
            config.bind_addr = addr.parse().map_err(|e| ConfigError::InvalidEnvVar {
                key: "CANARY_BIND_ADDR".to_string(),
                message: format!("invalid socket address '{addr}': {e}"),
            })?;
        }
        if let Some(path) = get_env_string("CANARY_SERVERS_FILE") {
            config.servers_file = PathBuf::from(path);
        }
        if let Some(enabled) = get_env_bool("CANARY_ENABLE_CORS")? {
            config.enable_cors = enabled;
        }

        if let Some(url) = get_env_string("CANARY_MODEL_BASE_URL") {
            config.model.base_url = url;
        }
        if let Some(name) = get_env_string("CANARY_MODEL_NAME") {
            config.model.model = name;
        }
        if let Some(key) = get_env_string("CANARY_MODEL_API_KEY") {
            config.model.api_key = Some(key);
        }
        if let Some(temperature) = get_env_f64("CANARY_MODEL_TEMPERATURE")? {
            config.model.temperature = temperature;
        }
        if let Some(max_tokens) = get_env_u32("CANARY_MODEL_MAX_TOKENS")? {
            config.model.max_tokens = max_tokens;
        }
        if let Some(secs) = get_env_u64("CANARY_MODEL_TIMEOUT_SECS")? {
            config.orchestrator.model_timeout = Duration::from_secs(secs);
        }

        if let Some(secs) = get_env_u64("CANARY_TOOL_TIMEOUT_SECS")? {
            config.orchestrator.tool_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = get_env_u64("CANARY_HANDSHAKE_TIMEOUT_SECS")? {
            config.connection.handshake_timeout = Duration::from_secs(secs);
        }
        if let Some(attempts) = get_env_u32("CANARY_HANDSHAKE_ATTEMPTS")? {
            config.connection.max_attempts = attempts;
        }
        if let Some(ms) = get_env_u64("CANARY_HANDSHAKE_BACKOFF_MS")? {
            config.connection.initial_backoff = Duration::from_millis(ms);
        }
        if let Some(buffer) = get_env_usize("CANARY_NOTIFICATION_BUFFER")? {
            config.connection.notification_buffer = buffer;
        }

        if let Some(rounds) = get_env_usize("CANARY_MAX_TOOL_ROUNDS")? {
            config.orchestrator.max_tool_rounds = rounds;
        }
        if let Some(buffer) = get_env_usize("CANARY_EVENT_BUFFER")? {
            config.orchestrator.event_buffer = buffer;
        }
        if let Some(ms) = get_env_u64("CANARY_DELIVERY_TIMEOUT_MS")? {
            config.orchestrator.delivery_timeout = Duration::from_millis(ms);
        }

        Ok(Self { config })
    }

    #[must_use]
    pub fn bind_addr(mut self, addr: SocketAddr) -> Self {
        self.config.bind_addr = addr;
        self
    }

    #[must_use]
    pub fn servers_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.servers_file = path.into();
        self
    }

    #[must_use]
    pub fn enable_cors(mut self, enabled: bool) -> Self {
        self.config.enable_cors = enabled;
        self
    }

    #[must_use]
    pub fn model(mut self, model: ModelConfig) -> Self {
        self.config.model = model;
        self
    }

    #[must_use]
    pub fn connection(mut self, policy: ConnectionPolicy) -> Self {
        self.config.connection = policy;
        self
    }

    #[must_use]
    pub fn orchestrator(mut self, orchestrator: OrchestratorConfig) -> Self {
        self.config.orchestrator = orchestrator;
        self
    }

    /// Build the configuration
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if the configuration is invalid.
    pub fn build(self) -> Result<AppConfig, ConfigError> {
        self.validate()?;
        Ok(self.config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let config = &self.config;

        if config.servers_file.as_os_str().is_empty() {
            return Err(ConfigError::ValidationError(
                "servers_file must not be empty".to_string(),
            ));
        }
        if config.model.base_url.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "model base_url must not be empty".to_string(),
            ));
        }
        if config.model.model.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "model name must not be empty".to_string(),
            ));
        }
        if !(0.0..=2.0).contains(&config.model.temperature) {
            return Err(ConfigError::ValidationError(format!(
                "model temperature must be between 0.0 and 2.0, got {}",
                config.model.temperature
            )));
        }
        if config.model.max_tokens == 0 {
            return Err(ConfigError::ValidationError(
                "model max_tokens must be greater than 0".to_string(),
            ));
        }

        if config.orchestrator.model_timeout.is_zero() {
            return Err(ConfigError::ValidationError(
                "model timeout must be greater than 0".to_string(),
            ));
        }
        if config.orchestrator.tool_timeout.is_zero() {
            return Err(ConfigError::ValidationError(
                "tool timeout must be greater than 0".to_string(),
            ));
        }
        if config.orchestrator.max_tool_rounds == 0 {
            return Err(ConfigError::ValidationError(
                "max_tool_rounds must be greater than 0".to_string(),
            ));
        }
        if config.orchestrator.event_buffer == 0 {
            return Err(ConfigError::ValidationError(
                "event_buffer must be greater than 0".to_string(),
            ));
        }
        if config.orchestrator.delivery_timeout.is_zero() {
            return Err(ConfigError::ValidationError(
                "delivery timeout must be greater than 0".to_string(),
            ));
        }

        if config.connection.handshake_timeout.is_zero() {
            return Err(ConfigError::ValidationError(
                "handshake timeout must be greater than 0".to_string(),
            ));
        }
        if config.connection.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "handshake attempts must be greater than 0".to_string(),
            ));
        }
        if config.connection.notification_buffer == 0 {
            return Err(ConfigError::ValidationError(
                "notification_buffer must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

fn get_env_string(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

fn get_env_bool(key: &str) -> Result<Option<bool>, ConfigError> {
    match env::var(key) {
        Ok(val) => match val.to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(Some(true)),
            "false" | "0" | "no" | "off" => Ok(Some(false)),
            _ => Err(ConfigError::InvalidEnvVar {
                key: key.to_string(),
                message: format!(
                    "invalid boolean value '{val}', expected true/false/1/0/yes/no/on/off"
                ),
            }),
        },
        Err(_) => Ok(None),
    }
}

fn get_env_u64(key: &str) -> Result<Option<u64>, ConfigError> {
    match env::var(key) {
        Ok(val) => val
            .parse::<u64>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidEnvVar {
                key: key.to_string(),
                message: format!("invalid u64 value '{val}': {e}"),
            }),
        Err(_) => Ok(None),
    }
}

fn get_env_u32(key: &str) -> Result<Option<u32>, ConfigError> {
    match env::var(key) {
        Ok(val) => val
            .parse::<u32>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidEnvVar {
                key: key.to_string(),
                message: format!("invalid u32 value '{val}': {e}"),
            }),
        Err(_) => Ok(None),
    }
}

fn get_env_usize(key: &str) -> Result<Option<usize>, ConfigError> {
    match env::var(key) {
        Ok(val) => val
            .parse::<usize>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidEnvVar {
                key: key.to_string(),
                message: format!("invalid usize value '{val}': {e}"),
            }),
        Err(_) => Ok(None),
    }
}

fn get_env_f64(key: &str) -> Result<Option<f64>, ConfigError> {
    match env::var(key) {
        Ok(val) => val
            .parse::<f64>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidEnvVar {
                key: key.to_string(),
                message: format!("invalid f64 value '{val}': {e}"),
            }),
        Err(_) => Ok(None),
    }
}
