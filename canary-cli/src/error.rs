//! CLI error type

use canary_chat::ChatError;
use canary_http::{ConfigError, ServeError};
use canary_mcp::McpError;
use canary_registry::RegistryError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Serve(#[from] ServeError),

    #[error(transparent)]
    Chat(#[from] ChatError),

    #[error(transparent)]
    Mcp(#[from] McpError),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Output error: {0}")]
    Output(#[from] serde_json::Error),
}
