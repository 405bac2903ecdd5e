//! Chat run error types

use std::time::Duration;
use thiserror::Error;

/// Chat operation result type
pub type ChatResult<T> = Result<T, ChatError>;

/// Errors that end a chat run or reject a request
#[derive(Debug, Error)]
pub enum ChatError {
    /// The model call failed; fatal to the current run only
    #[error("Model call failed: {0}")]
    ModelCallFailed(String),

    /// The model did not finish within its deadline
    #[error("Model call timed out after {}ms", .0.as_millis())]
    ModelTimeout(Duration),

    /// The client went away; triggers cancellation, never reported to it
    #[error("Client disconnected")]
    ClientDisconnected,

    /// The request was rejected before a run started
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Unexpected internal failure
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ChatError {
    /// Stable machine-readable code carried by the terminal error event
    pub fn code(&self) -> &'static str {
        match self {
            ChatError::ModelCallFailed(_) => "model_call_failed",
            ChatError::ModelTimeout(_) => "model_timeout",
            ChatError::ClientDisconnected => "client_disconnected",
            ChatError::InvalidRequest(_) => "invalid_request",
            ChatError::Internal(_) => "internal_error",
        }
    }

    pub fn is_client_error(&self) -> bool {
        matches!(self, ChatError::InvalidRequest(_))
    }
}

impl From<reqwest::Error> for ChatError {
    fn from(err: reqwest::Error) -> Self {
        ChatError::ModelCallFailed(err.to_string())
    }
}
