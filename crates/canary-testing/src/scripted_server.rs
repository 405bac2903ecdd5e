//! # Scripted Tool Servers
//!
//! A [`Connector`] whose servers follow a script: how many handshakes fail
//! before one succeeds, which tools they report, what each tool returns and
//! when the transport drops. Every attempt, call and close is recorded.

use async_trait::async_trait;
use canary_mcp::{
    Connector, Handshake, McpError, McpResult, NotificationSink, ServerNotification, ToolSession,
    ToolSpec,
};
use canary_registry::ServerDefinition;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Script for one tool server
#[derive(Debug, Clone)]
pub struct ScriptedServer {
    id: String,
    failures_before_success: u32,
    unreachable: bool,
    handshake_delay: Option<Duration>,
    call_delay: Option<Duration>,
    tools: Vec<ToolSpec>,
    responses: HashMap<String, Value>,
    tool_errors: HashMap<String, String>,
    notifications: Vec<ServerNotification>,
    fail_close: bool,
}

impl ScriptedServer {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            failures_before_success: 0,
            unreachable: false,
            handshake_delay: None,
            call_delay: None,
            tools: Vec::new(),
            responses: HashMap::new(),
            tool_errors: HashMap::new(),
            notifications: Vec::new(),
            fail_close: false,
        }
    }

    /// Report a tool in the catalog
    pub fn with_tool(mut self, name: impl Into<String>, description: impl Into<String>) -> Self {
        self.tools.push(ToolSpec::new(name, description));
        self
    }

    /// Fixed result for a tool
    pub fn with_response(mut self, tool: impl Into<String>, response: Value) -> Self {
        self.responses.insert(tool.into(), response);
        self
    }

    /// Make a tool report an execution error
    pub fn with_tool_error(mut self, tool: impl Into<String>, message: impl Into<String>) -> Self {
        self.tool_errors.insert(tool.into(), message.into());
        self
    }

    /// Fail the first `n` handshakes made for this server
    pub fn failing_handshakes(mut self, n: u32) -> Self {
        self.failures_before_success = n;
        self
    }

    /// Fail every handshake
    pub fn unreachable(mut self) -> Self {
        self.unreachable = true;
        self
    }

    pub fn with_handshake_delay(mut self, delay: Duration) -> Self {
        self.handshake_delay = Some(delay);
        self
    }

    /// Delay every tool call
    pub fn with_call_delay(mut self, delay: Duration) -> Self {
        self.call_delay = Some(delay);
        self
    }

    /// Push a log notification right after the handshake
    pub fn with_notification(mut self, level: &str, data: Value) -> Self {
        self.notifications.push(ServerNotification {
            level: level.to_string(),
            logger: Some(self.id.clone()),
            data,
        });
        self
    }

    /// Make closing the session report an error
    pub fn failing_close(mut self) -> Self {
        self.fail_close = true;
        self
    }
}

/// A recorded tool invocation
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub server_id: String,
    pub tool: String,
    pub arguments: Value,
}

#[derive(Default)]
struct ConnectorState {
    scripts: HashMap<String, ScriptedServer>,
    attempts: HashMap<String, u32>,
    live: HashMap<String, Arc<ScriptedSession>>,
    closes: HashMap<String, u32>,
}

/// Connector driven by [`ScriptedServer`] scripts
#[derive(Clone, Default)]
pub struct ScriptedConnector {
    state: Arc<Mutex<ConnectorState>>,
    calls: Arc<Mutex<Vec<RecordedCall>>>,
}

impl ScriptedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_server(self, server: ScriptedServer) -> Self {
        self.add_server(server);
        self
    }

    /// Add or replace a script
    pub fn add_server(&self, server: ScriptedServer) {
        let mut state = self.state.lock().unwrap();
        state.scripts.insert(server.id.clone(), server);
    }

    /// Handshake attempts made for a server so far
    pub fn attempts(&self, id: &str) -> u32 {
        let state = self.state.lock().unwrap();
        state.attempts.get(id).copied().unwrap_or(0)
    }

    /// Sessions closed for a server so far
    pub fn closes(&self, id: &str) -> u32 {
        let state = self.state.lock().unwrap();
        state.closes.get(id).copied().unwrap_or(0)
    }

    /// Simulate a transport failure on the server's current session
    pub fn drop_transport(&self, id: &str) -> bool {
        let state = self.state.lock().unwrap();
        match state.live.get(id) {
            Some(session) => {
                session.closed.cancel();
                true
            }
            None => false,
        }
    }

    /// Every tool call made through any session, in order
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Calls that reached a particular server
    pub fn calls_to(&self, id: &str) -> Vec<RecordedCall> {
        self.calls()
            .into_iter()
            .filter(|call| call.server_id == id)
            .collect()
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(
        &self,
        definition: &ServerDefinition,
        notifications: NotificationSink,
    ) -> McpResult<Handshake> {
        let (script, attempt) = {
            let mut state = self.state.lock().unwrap();
            let attempt = {
                let counter = state.attempts.entry(definition.id.clone()).or_insert(0);
                *counter += 1;
                *counter
            };
            (state.scripts.get(&definition.id).cloned(), attempt)
        };

        let Some(script) = script else {
            return Err(McpError::HandshakeFailed {
                server_id: definition.id.clone(),
                reason: "no scripted server".to_string(),
            });
        };
        if let Some(delay) = script.handshake_delay {
            tokio::time::sleep(delay).await;
        }
        if script.unreachable || attempt <= script.failures_before_success {
            return Err(McpError::HandshakeFailed {
                server_id: definition.id.clone(),
                reason: format!("scripted failure on attempt {attempt}"),
            });
        }

        for notification in &script.notifications {
            notifications.push(notification.clone());
        }

        let session = Arc::new(ScriptedSession {
            script: script.clone(),
            closed: CancellationToken::new(),
            close_count: Arc::new(AtomicU32::new(0)),
            calls: Arc::clone(&self.calls),
            state: Arc::clone(&self.state),
        });
        {
            let mut state = self.state.lock().unwrap();
            state.live.insert(definition.id.clone(), Arc::clone(&session));
        }
        Ok(Handshake {
            session,
            tools: script.tools,
        })
    }
}

/// Session created by [`ScriptedConnector`]
pub struct ScriptedSession {
    script: ScriptedServer,
    closed: CancellationToken,
    close_count: Arc<AtomicU32>,
    calls: Arc<Mutex<Vec<RecordedCall>>>,
    state: Arc<Mutex<ConnectorState>>,
}

#[async_trait]
impl ToolSession for ScriptedSession {
    async fn call_tool(&self, name: &str, arguments: Value) -> McpResult<Value> {
        if self.closed.is_cancelled() {
            return Err(McpError::TransportLost(format!(
                "session with '{}' is gone",
                self.script.id
            )));
        }
        self.calls.lock().unwrap().push(RecordedCall {
            server_id: self.script.id.clone(),
            tool: name.to_string(),
            arguments: arguments.clone(),
        });
        if let Some(delay) = self.script.call_delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(message) = self.script.tool_errors.get(name) {
            return Err(McpError::ToolInvocationFailed(message.clone()));
        }
        Ok(self
            .script
            .responses
            .get(name)
            .cloned()
            .unwrap_or_else(|| json!({"server": self.script.id, "tool": name, "args": arguments})))
    }

    async fn closed(&self) {
        self.closed.cancelled().await
    }

    async fn close(&self) -> McpResult<()> {
        self.closed.cancel();
        if self.close_count.fetch_add(1, Ordering::SeqCst) == 0 {
            let mut state = self.state.lock().unwrap();
            *state.closes.entry(self.script.id.clone()).or_insert(0) += 1;
        }
        if self.script.fail_close {
            return Err(McpError::ProtocolError("scripted close failure".to_string()));
        }
        Ok(())
    }
}
