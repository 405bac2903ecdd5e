//! HTTP error mapping
//!
//! Every handler returns `Result<_, ApiError>`. Errors from the lower crates
//! keep their stable codes and are mapped onto a status code here.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use canary_chat::ChatError;
use canary_mcp::McpError;
use canary_registry::RegistryError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Structured error response for HTTP APIs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Machine-readable error code
    pub error: String,
    /// Human-readable error message
    pub message: String,
    /// Optional additional context
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Handler error
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Chat(#[from] ChatError),

    #[error(transparent)]
    Mcp(#[from] McpError),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Registry(e) => e.code(),
            ApiError::Chat(e) => e.code(),
            ApiError::Mcp(e) => e.code(),
            ApiError::NotFound(_) => "not_found",
            ApiError::BadRequest(_) => "invalid_request",
            ApiError::Internal(_) => "internal_error",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Registry(e) if e.is_client_error() => StatusCode::BAD_REQUEST,
            ApiError::Registry(RegistryError::Malformed { .. }) => StatusCode::BAD_REQUEST,
            ApiError::Registry(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Chat(ChatError::InvalidRequest(_)) => StatusCode::BAD_REQUEST,
            ApiError::Chat(ChatError::ModelTimeout(_)) => StatusCode::GATEWAY_TIMEOUT,
            ApiError::Chat(ChatError::ModelCallFailed(_)) => StatusCode::BAD_GATEWAY,
            ApiError::Chat(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Mcp(McpError::ManagerClosed) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Mcp(McpError::ToolNotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Mcp(_) => StatusCode::BAD_GATEWAY,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn to_error_response(&self) -> ErrorResponse {
        let details = match self {
            ApiError::Registry(RegistryError::InvalidDefinition { id, .. }) => {
                Some(serde_json::json!({ "id": id }))
            }
            _ => None,
        };
        ErrorResponse {
            error: self.code().to_string(),
            message: self.to_string(),
            details,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status_code = self.status_code();
        if status_code.is_server_error() {
            tracing::error!(
                error_code = self.code(),
                status_code = %status_code,
                error_message = %self,
                "Request failed"
            );
        } else {
            tracing::debug!(
                error_code = self.code(),
                status_code = %status_code,
                error_message = %self,
                "Request rejected"
            );
        }
        (status_code, Json(self.to_error_response())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_status_mapping() {
        let invalid = ApiError::from(RegistryError::InvalidDefinition {
            id: "x".into(),
            reason: "blank command".into(),
        });
        assert_eq!(invalid.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(invalid.code(), "invalid_definition");

        let timeout = ApiError::from(ChatError::ModelTimeout(Duration::from_secs(1)));
        assert_eq!(timeout.status_code(), StatusCode::GATEWAY_TIMEOUT);

        let closed = ApiError::from(McpError::ManagerClosed);
        assert_eq!(closed.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(closed.code(), "manager_closed");
    }

    #[test]
    fn test_error_response_carries_definition_id() {
        let err = ApiError::from(RegistryError::InvalidDefinition {
            id: "neo4j".into(),
            reason: "no transport configured".into(),
        });
        let body = err.to_error_response();
        assert_eq!(body.error, "invalid_definition");
        assert_eq!(body.details, Some(serde_json::json!({"id": "neo4j"})));
        assert!(body.message.contains("no transport configured"));
    }
}
