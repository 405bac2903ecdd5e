//! Transport-independent session seam
//!
//! The connection manager drives sessions only through [`Connector`] and
//! [`ToolSession`]. The rmcp-backed implementation lives in
//! [`crate::rmcp_client`]; tests plug in scripted implementations.

use crate::error::McpResult;
use async_trait::async_trait;
use canary_registry::ServerDefinition;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

/// One tool as reported by a server's catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON schema of the arguments, opaque to this layer
    pub input_schema: Value,
}

impl ToolSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema: serde_json::json!({"type": "object", "properties": {}}),
        }
    }

    pub fn with_schema(mut self, schema: Value) -> Self {
        self.input_schema = schema;
        self
    }
}

/// Asynchronous log message pushed by a tool server
#[derive(Debug, Clone, PartialEq)]
pub struct ServerNotification {
    pub level: String,
    pub logger: Option<String>,
    pub data: Value,
}

/// Producer half of a connection's bounded notification channel.
///
/// Pushing never waits: when the channel is full the notification is dropped
/// and counted, so a noisy server cannot stall its session.
#[derive(Debug, Clone)]
pub struct NotificationSink {
    tx: mpsc::Sender<ServerNotification>,
    dropped: Arc<AtomicU64>,
}

impl NotificationSink {
    /// Create a sink and its receiving end
    pub fn channel(capacity: usize) -> (Self, NotificationReceiver) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let dropped = Arc::new(AtomicU64::new(0));
        (
            Self {
                tx,
                dropped: Arc::clone(&dropped),
            },
            NotificationReceiver { rx, dropped },
        )
    }

    /// Queue a notification, dropping it if the channel is full or closed
    pub fn push(&self, notification: ServerNotification) {
        if self.tx.try_send(notification).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Consumer half of a connection's notification channel
#[derive(Debug)]
pub struct NotificationReceiver {
    rx: mpsc::Receiver<ServerNotification>,
    dropped: Arc<AtomicU64>,
}

impl NotificationReceiver {
    /// Next notification, or `None` once every sink is gone
    pub async fn recv(&mut self) -> Option<ServerNotification> {
        self.rx.recv().await
    }

    /// Number of notifications dropped since the last call
    pub fn take_dropped(&self) -> u64 {
        self.dropped.swap(0, Ordering::Relaxed)
    }
}

/// A live session with one tool server
#[async_trait]
pub trait ToolSession: Send + Sync {
    /// Invoke a tool. `arguments` is a JSON object (or null for no arguments).
    async fn call_tool(&self, name: &str, arguments: Value) -> McpResult<Value>;

    /// Resolves once the underlying transport has gone away
    async fn closed(&self);

    /// Tear the session down and release its transport
    async fn close(&self) -> McpResult<()>;
}

/// Outcome of a successful handshake
pub struct Handshake {
    pub session: Arc<dyn ToolSession>,
    pub tools: Vec<ToolSpec>,
}

impl std::fmt::Debug for Handshake {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handshake")
            .field("tools", &self.tools)
            .finish_non_exhaustive()
    }
}

/// Establishes sessions from registry definitions
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connect, handshake and fetch the server's tool catalog
    async fn connect(
        &self,
        definition: &ServerDefinition,
        notifications: NotificationSink,
    ) -> McpResult<Handshake>;
}
