//! Connection lifecycle state

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of one tool-server connection.
///
/// `Ready` is the only state whose tools appear in the catalog. `Closed` is
/// terminal and only reached by removal or shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Ready,
    Degraded,
    Closed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Ready => "ready",
            ConnectionState::Degraded => "degraded",
            ConnectionState::Closed => "closed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Closed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One recorded state change
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateTransition {
    pub server_id: String,
    pub from: ConnectionState,
    pub to: ConnectionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub at: DateTime<Utc>,
}

/// Point-in-time view of one connection, for status reporting
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    pub id: String,
    pub transport: &'static str,
    pub state: ConnectionState,
    /// Tools currently contributed to the catalog
    pub tools: usize,
    /// Handshake attempts in the current connect cycle
    pub attempts: u32,
    /// A further attempt is scheduled
    pub retry_pending: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ready_since: Option<DateTime<Utc>>,
    /// Monotonic order in which connections became ready; higher is more recent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ready_order: Option<u64>,
}

impl ConnectionStatus {
    /// Whether this connection has stopped changing on its own
    pub fn is_settled(&self) -> bool {
        match self.state {
            ConnectionState::Ready | ConnectionState::Closed => true,
            ConnectionState::Disconnected => !self.retry_pending,
            ConnectionState::Connecting | ConnectionState::Degraded => false,
        }
    }
}
