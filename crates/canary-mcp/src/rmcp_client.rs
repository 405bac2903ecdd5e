//! rmcp-backed tool-server sessions
//!
//! Process definitions are launched as child processes speaking MCP over
//! stdio; network definitions use the streamable HTTP client transport at
//! `baseUrl` + `ssePath`.

use crate::error::{McpError, McpResult};
use crate::session::{Connector, Handshake, NotificationSink, ServerNotification, ToolSession, ToolSpec};
use async_trait::async_trait;
use canary_registry::{ServerDefinition, Transport};
use rmcp::{
    ClientHandler, RoleClient, ServiceExt,
    model::{
        CallToolRequestParams, ClientInfo, Implementation, LoggingMessageNotificationParam, Tool,
    },
    service::{NotificationContext, Peer, RunningService, RunningServiceCancellationToken},
    transport::{StreamableHttpClientTransport, TokioChildProcess},
};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Commands that must go through `cmd.exe /c` on Windows hosts
const WINDOWS_SHELL_COMMANDS: &[&str] = &[
    "npx", "npm", "node", "pnpm", "yarn", "python", "pip", "mvn", "gradle",
];

/// Client-side handler: forwards server log messages into the connection's
/// notification channel
#[derive(Clone)]
pub struct NotificationForwarder {
    client_name: String,
    client_version: String,
    sink: NotificationSink,
}

impl NotificationForwarder {
    pub fn new(client_name: &str, client_version: &str, sink: NotificationSink) -> Self {
        Self {
            client_name: client_name.to_string(),
            client_version: client_version.to_string(),
            sink,
        }
    }

    pub(crate) fn forward(&self, params: LoggingMessageNotificationParam) {
        let level = match serde_json::to_value(&params.level) {
            Ok(Value::String(level)) => level,
            _ => "info".to_string(),
        };
        self.sink.push(ServerNotification {
            level,
            logger: params.logger,
            data: params.data,
        });
    }
}

impl ClientHandler for NotificationForwarder {
    fn get_info(&self) -> ClientInfo {
        ClientInfo {
            meta: None,
            protocol_version: Default::default(),
            capabilities: Default::default(),
            client_info: Implementation {
                name: self.client_name.clone(),
                version: self.client_version.clone(),
                ..Default::default()
            },
        }
    }

    fn on_logging_message(
        &self,
        params: LoggingMessageNotificationParam,
        _context: NotificationContext<RoleClient>,
    ) -> impl Future<Output = ()> + Send + '_ {
        self.forward(params);
        std::future::ready(())
    }
}

/// A live rmcp client session
pub struct RmcpSession {
    server_id: String,
    peer: Peer<RoleClient>,
    stop: std::sync::Mutex<Option<RunningServiceCancellationToken>>,
    closed: CancellationToken,
    waiter: Mutex<Option<JoinHandle<()>>>,
}

impl RmcpSession {
    /// Take ownership of a running client service: fetch its tool catalog and
    /// wrap it as a session.
    pub async fn from_running(
        server_id: &str,
        running: RunningService<RoleClient, NotificationForwarder>,
    ) -> McpResult<Handshake> {
        let tools = match running.peer().list_all_tools().await {
            Ok(tools) => tools,
            Err(e) => {
                let _ = running.cancel().await;
                return Err(McpError::HandshakeFailed {
                    server_id: server_id.to_string(),
                    reason: format!("listing tools failed: {e}"),
                });
            }
        };
        let tools: Vec<ToolSpec> = tools.iter().map(tool_spec).collect();

        let peer = running.peer().clone();
        let stop = running.cancellation_token();
        let closed = CancellationToken::new();
        let waiter = {
            let closed = closed.clone();
            let server_id = server_id.to_string();
            tokio::spawn(async move {
                match running.waiting().await {
                    Ok(reason) => debug!(server_id = %server_id, ?reason, "MCP session ended"),
                    Err(e) => warn!(server_id = %server_id, error = %e, "MCP session task failed"),
                }
                closed.cancel();
            })
        };

        let session = Self {
            server_id: server_id.to_string(),
            peer,
            stop: std::sync::Mutex::new(Some(stop)),
            closed,
            waiter: Mutex::new(Some(waiter)),
        };
        Ok(Handshake {
            session: Arc::new(session),
            tools,
        })
    }
}

#[async_trait]
impl ToolSession for RmcpSession {
    async fn call_tool(&self, name: &str, arguments: Value) -> McpResult<Value> {
        if self.closed.is_cancelled() {
            return Err(McpError::ConnectionClosed);
        }
        let arguments = match arguments {
            Value::Null => Value::Null,
            Value::Object(map) => Value::Object(map),
            other => {
                return Err(McpError::InvalidParameters(format!(
                    "arguments must be a JSON object, got {other}"
                )));
            }
        };
        let mut request = json!({ "name": name });
        if !arguments.is_null() {
            request["arguments"] = arguments;
        }
        let request: CallToolRequestParams = serde_json::from_value(request)?;

        let result = self
            .peer
            .call_tool(request)
            .await
            .map_err(McpError::from_rmcp_error)?;
        call_result_to_json(serde_json::to_value(&result)?)
    }

    async fn closed(&self) {
        self.closed.cancelled().await
    }

    async fn close(&self) -> McpResult<()> {
        let stop = match self.stop.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(stop) = stop {
            stop.cancel();
        }
        if let Some(waiter) = self.waiter.lock().await.take() {
            waiter
                .await
                .map_err(|e| McpError::ProtocolError(format!("session task for '{}' failed: {e}", self.server_id)))?;
        }
        Ok(())
    }
}

/// Connector that speaks MCP through rmcp
#[derive(Debug, Clone)]
pub struct RmcpConnector {
    client_name: String,
    client_version: String,
}

impl Default for RmcpConnector {
    fn default() -> Self {
        Self::new("canary", env!("CARGO_PKG_VERSION"))
    }
}

impl RmcpConnector {
    pub fn new(client_name: impl Into<String>, client_version: impl Into<String>) -> Self {
        Self {
            client_name: client_name.into(),
            client_version: client_version.into(),
        }
    }
}

#[async_trait]
impl Connector for RmcpConnector {
    async fn connect(
        &self,
        definition: &ServerDefinition,
        notifications: NotificationSink,
    ) -> McpResult<Handshake> {
        let handler = NotificationForwarder::new(&self.client_name, &self.client_version, notifications);
        let handshake_failed = |e: &dyn std::fmt::Display| McpError::HandshakeFailed {
            server_id: definition.id.clone(),
            reason: e.to_string(),
        };

        match definition.transport() {
            Transport::Process { command, args, env } => {
                let command = launch_command(command, args, env);
                let transport = TokioChildProcess::new(command).map_err(|source| {
                    McpError::SpawnFailed {
                        server_id: definition.id.clone(),
                        source,
                    }
                })?;
                let running = handler
                    .serve(transport)
                    .await
                    .map_err(|e| handshake_failed(&e))?;
                RmcpSession::from_running(&definition.id, running).await
            }
            Transport::Network { .. } => {
                let Some(endpoint) = definition.transport().endpoint() else {
                    return Err(handshake_failed(&"network transport without endpoint"));
                };
                debug!(server_id = %definition.id, endpoint = %endpoint, "Connecting over HTTP");
                let transport = StreamableHttpClientTransport::from_uri(endpoint);
                let running = handler
                    .serve(transport)
                    .await
                    .map_err(|e| handshake_failed(&e))?;
                RmcpSession::from_running(&definition.id, running).await
            }
        }
    }
}

/// Program and argument list to launch, wrapped for `cmd.exe` where needed
pub fn wrap_for_platform(command: &str, args: &[String], windows: bool) -> (String, Vec<String>) {
    if !windows {
        return (command.to_string(), args.to_vec());
    }
    let lower = command.to_ascii_lowercase();
    let needs_shell = WINDOWS_SHELL_COMMANDS.contains(&lower.as_str())
        || lower.ends_with(".cmd")
        || lower.ends_with(".bat");
    if !needs_shell {
        return (command.to_string(), args.to_vec());
    }
    let mut wrapped = Vec::with_capacity(args.len() + 2);
    wrapped.push("/c".to_string());
    wrapped.push(command.to_string());
    wrapped.extend(args.iter().cloned());
    ("cmd.exe".to_string(), wrapped)
}

fn launch_command(
    command: &str,
    args: &[String],
    env: &BTreeMap<String, String>,
) -> tokio::process::Command {
    let (program, args) = wrap_for_platform(command, args, cfg!(windows));
    let mut cmd = tokio::process::Command::new(program);
    cmd.args(args).envs(env).kill_on_drop(true);
    cmd
}

fn tool_spec(tool: &Tool) -> ToolSpec {
    ToolSpec {
        name: tool.name.to_string(),
        description: tool.description.as_deref().unwrap_or_default().to_string(),
        input_schema: Value::Object((*tool.input_schema).clone()),
    }
}

/// Convert a serialized tool result into the value handed back to the model.
///
/// Structured content is preferred; otherwise text items are parsed as JSON
/// where possible. A result flagged as an error becomes `ToolInvocationFailed`.
pub(crate) fn call_result_to_json(result: Value) -> McpResult<Value> {
    let contents = result
        .get("content")
        .and_then(Value::as_array)
        .map(|items| contents_to_json(items))
        .unwrap_or_default();

    if result.get("isError").and_then(Value::as_bool).unwrap_or(false) {
        let message = contents
            .iter()
            .map(|c| match c {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect::<Vec<_>>()
            .join("\n");
        return Err(McpError::ToolInvocationFailed(message));
    }

    if let Some(structured) = result.get("structuredContent").filter(|v| !v.is_null()) {
        return Ok(structured.clone());
    }
    Ok(match contents.len() {
        0 => Value::Null,
        1 => contents.into_iter().next().unwrap_or(Value::Null),
        _ => Value::Array(contents),
    })
}

fn contents_to_json(items: &[Value]) -> Vec<Value> {
    items
        .iter()
        .map(|item| match (item.get("type").and_then(Value::as_str), item.get("text")) {
            (Some("text"), Some(Value::String(text))) => {
                serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.clone()))
            }
            _ => item.clone(),
        })
        .collect()
}
