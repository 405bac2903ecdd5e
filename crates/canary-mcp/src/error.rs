//! MCP error types
//!
//! Errors raised by tool-server connections and tool invocations, including
//! the mapping from rmcp error messages. None of these are fatal to the
//! process; they are contained to one connection or one call.

use std::time::Duration;
use thiserror::Error;

/// MCP operation result type
pub type McpResult<T> = Result<T, McpError>;

/// Errors that can occur during MCP operations
#[derive(Debug, Error)]
pub enum McpError {
    /// Session setup or catalog exchange failed
    #[error("Handshake with '{server_id}' failed: {reason}")]
    HandshakeFailed { server_id: String, reason: String },

    /// The server process could not be launched
    #[error("Failed to launch '{server_id}': {source}")]
    SpawnFailed {
        server_id: String,
        #[source]
        source: std::io::Error,
    },

    /// The transport went away while the session was live
    #[error("Transport lost: {0}")]
    TransportLost(String),

    /// No tool with this name in the current catalog
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// The tool's owning connection is no longer healthy
    #[error("Tool '{tool}' is unavailable: server '{server_id}' is not ready")]
    ToolUnavailable { tool: String, server_id: String },

    /// The server executed the tool and reported an error
    #[error("Tool invocation failed: {0}")]
    ToolInvocationFailed(String),

    /// Invalid tool parameters
    #[error("Invalid tool parameters: {0}")]
    InvalidParameters(String),

    /// An operation exceeded its deadline
    #[error("{operation} timed out after {}", humantime::format_duration(*.after))]
    Timeout { operation: String, after: Duration },

    /// MCP protocol error
    #[error("MCP protocol error: {0}")]
    ProtocolError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Connection closed
    #[error("Connection closed")]
    ConnectionClosed,

    /// The connection manager has been shut down
    #[error("Connection manager is shut down")]
    ManagerClosed,
}

impl McpError {
    /// Stable machine-readable error code
    pub fn code(&self) -> &'static str {
        match self {
            McpError::HandshakeFailed { .. } | McpError::SpawnFailed { .. } => "handshake_failed",
            McpError::TransportLost(_) | McpError::ConnectionClosed => "transport_lost",
            McpError::ToolNotFound(_) => "tool_not_found",
            McpError::ToolUnavailable { .. } => "tool_unavailable",
            McpError::ToolInvocationFailed(_) | McpError::InvalidParameters(_) => {
                "tool_invocation_failed"
            }
            McpError::Timeout { .. } => "timeout",
            McpError::ProtocolError(_) | McpError::SerializationError(_) => "protocol_error",
            McpError::ManagerClosed => "manager_closed",
        }
    }

    /// Check if this error is retryable
    ///
    /// Returns true for transient errors that may succeed on a later attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            McpError::HandshakeFailed { .. }
                | McpError::TransportLost(_)
                | McpError::ConnectionClosed
                | McpError::Timeout { .. }
        )
    }

    pub(crate) fn timeout(operation: impl Into<String>, after: Duration) -> Self {
        McpError::Timeout {
            operation: operation.into(),
            after,
        }
    }

    /// Create an error from an rmcp error message
    pub fn from_rmcp_error(error: impl std::fmt::Display) -> Self {
        let msg = error.to_string();

        // Parse common rmcp error patterns
        if msg.contains("closed") || msg.contains("Closed") || msg.contains("Transport") {
            McpError::TransportLost(msg)
        } else if msg.contains("timeout") || msg.contains("Timeout") {
            McpError::ProtocolError(msg)
        } else if msg.contains("invalid") || msg.contains("Invalid") {
            McpError::InvalidParameters(msg)
        } else if msg.contains("not found") || msg.contains("NotFound") {
            McpError::ToolInvocationFailed(msg)
        } else {
            McpError::ProtocolError(msg)
        }
    }
}
