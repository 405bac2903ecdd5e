//! Tool-server log notifications
//!
//! Each connection gets one bounded notification channel and one consumer
//! task. The consumer re-emits every message as a `tracing` event and fans it
//! out to [`ToolLogEvent`] subscribers; the server's own message shape never
//! leaves this module.

use crate::session::{NotificationReceiver, ServerNotification};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Structured log event derived from a tool-server notification
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolLogEvent {
    pub server_name: String,
    pub level: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logger: Option<String>,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
}

impl ToolLogEvent {
    pub fn from_notification(server_name: &str, notification: ServerNotification) -> Self {
        Self {
            server_name: server_name.to_string(),
            level: notification.level,
            logger: notification.logger,
            data: notification.data,
            timestamp: Utc::now(),
        }
    }
}

/// Coarse severity used to pick the `tracing` level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Severity {
    Debug,
    Info,
    Warn,
    Error,
}

/// Map a syslog-style MCP logging level onto a `tracing` severity
pub(crate) fn severity(level: &str) -> Severity {
    match level.to_ascii_lowercase().as_str() {
        "debug" => Severity::Debug,
        "info" | "notice" => Severity::Info,
        "warning" | "warn" => Severity::Warn,
        "error" | "critical" | "alert" | "emergency" => Severity::Error,
        _ => Severity::Info,
    }
}

fn emit(event: &ToolLogEvent) {
    let logger = event.logger.as_deref().unwrap_or("");
    match severity(&event.level) {
        Severity::Debug => {
            debug!(server_id = %event.server_name, logger, data = %event.data, "Tool server log")
        }
        Severity::Info => {
            info!(server_id = %event.server_name, logger, data = %event.data, "Tool server log")
        }
        Severity::Warn => {
            warn!(server_id = %event.server_name, logger, data = %event.data, "Tool server log")
        }
        Severity::Error => {
            error!(server_id = %event.server_name, logger, data = %event.data, "Tool server log")
        }
    }
}

/// Spawn the single consumer task for one connection's notifications.
///
/// The task ends when every sink for the connection has been dropped.
pub(crate) fn spawn_consumer(
    server_id: String,
    mut rx: NotificationReceiver,
    events: broadcast::Sender<ToolLogEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(notification) = rx.recv().await {
            let dropped = rx.take_dropped();
            if dropped > 0 {
                warn!(server_id = %server_id, dropped, "Dropped tool server notifications");
            }
            let event = ToolLogEvent::from_notification(&server_id, notification);
            emit(&event);
            // No subscribers is fine
            let _ = events.send(event);
        }
        let dropped = rx.take_dropped();
        if dropped > 0 {
            warn!(server_id = %server_id, dropped, "Dropped tool server notifications");
        }
        debug!(server_id = %server_id, "Notification consumer finished");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::NotificationSink;

    #[test]
    fn test_severity_mapping() {
        assert_eq!(severity("debug"), Severity::Debug);
        assert_eq!(severity("notice"), Severity::Info);
        assert_eq!(severity("WARNING"), Severity::Warn);
        assert_eq!(severity("critical"), Severity::Error);
        assert_eq!(severity("emergency"), Severity::Error);
        assert_eq!(severity("chatty"), Severity::Info);
    }

    #[tokio::test]
    async fn test_consumer_fans_out_events() {
        let (sink, rx) = NotificationSink::channel(8);
        let (events, mut sub) = broadcast::channel(8);
        let task = spawn_consumer("neo4j".to_string(), rx, events);

        sink.push(ServerNotification {
            level: "info".to_string(),
            logger: Some("cypher".to_string()),
            data: serde_json::json!({"msg": "query ok"}),
        });
        drop(sink);

        let event = sub.recv().await.unwrap();
        assert_eq!(event.server_name, "neo4j");
        assert_eq!(event.logger.as_deref(), Some("cypher"));
        assert_eq!(event.data["msg"], "query ok");
        task.await.unwrap();
    }

    #[test]
    fn test_event_serializes_camel_case() {
        let event = ToolLogEvent::from_notification(
            "echart",
            ServerNotification {
                level: "error".to_string(),
                logger: None,
                data: Value::from("boom"),
            },
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["serverName"], "echart");
        assert!(json.get("logger").is_none());
        assert!(json["timestamp"].is_string());
    }
}
