//! Integration tests for rmcp-backed sessions
//!
//! A small MCP server runs over in-memory duplex pipes so the real client
//! handshake, catalog exchange and tool calls are exercised without
//! spawning processes.

use canary_mcp::{
    Connector, McpError, NotificationForwarder, NotificationSink, RmcpConnector, RmcpSession,
};
use canary_registry::{ServerDefinition, ServerSpec};
use rmcp::{
    ServerHandler, ServiceExt,
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{Implementation, ServerCapabilities, ServerInfo},
    schemars, tool, tool_handler, tool_router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::timeout;

#[derive(Debug, Deserialize, Serialize, schemars::JsonSchema)]
struct FindNodeRequest {
    #[schemars(description = "Name of the person or company to look up")]
    name: String,
}

#[derive(Debug, Deserialize, Serialize, schemars::JsonSchema)]
struct LineChartRequest {
    #[schemars(description = "X axis labels")]
    labels: Vec<String>,
    #[schemars(description = "One value per label")]
    values: Vec<f64>,
}

/// Graph and chart tools backed by a fixed dataset
#[derive(Clone)]
struct GraphToolServer {
    tool_router: ToolRouter<Self>,
}

#[tool_router(router = tool_router)]
impl GraphToolServer {
    fn new() -> Self {
        Self {
            tool_router: Self::tool_router(),
        }
    }

    #[tool(name = "neo4j_find_node", description = "Find a node and its direct neighbours")]
    async fn find_node(&self, request: Parameters<FindNodeRequest>) -> Result<String, String> {
        match request.0.name.as_str() {
            "Bob" => Ok(json!({
                "nodes": [{"id": "bob", "label": "Bob"}, {"id": "alice", "label": "Alice"}],
                "edges": [{"source": "bob", "target": "alice", "label": "KNOWS"}]
            })
            .to_string()),
            other => Err(format!("No node named '{other}'")),
        }
    }

    #[tool(name = "generate_line_chart", description = "Build a line chart from labelled values")]
    async fn line_chart(&self, request: Parameters<LineChartRequest>) -> Result<String, String> {
        let LineChartRequest { labels, values } = request.0;
        if labels.len() != values.len() {
            return Err(format!("{} labels but {} values", labels.len(), values.len()));
        }
        Ok(json!({"xAxis": labels, "series": [{"type": "line", "data": values}]}).to_string())
    }

    #[tool(name = "neo4j_health", description = "Report database availability")]
    async fn health(&self) -> String {
        "graph database online".to_string()
    }
}

#[tool_handler(router = self.tool_router)]
impl ServerHandler for GraphToolServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: Default::default(),
            capabilities: ServerCapabilities {
                tools: Some(rmcp::model::ToolsCapability::default()),
                ..Default::default()
            },
            server_info: Implementation {
                name: "graph-tools".to_string(),
                version: "1.0.0".to_string(),
                ..Default::default()
            },
            instructions: Some("Graph lookups and chart generation".to_string()),
        }
    }
}

/// Start the test server on duplex pipes and connect a client session to it
async fn connect_pair() -> (canary_mcp::Handshake, JoinHandle<()>) {
    let (client_read, server_write) = tokio::io::duplex(4096);
    let (server_read, client_write) = tokio::io::duplex(4096);

    let server_transport =
        rmcp::transport::async_rw::AsyncRwTransport::new(server_read, server_write);
    let server = tokio::spawn(async move {
        if let Ok(service) = GraphToolServer::new().serve(server_transport).await {
            let _ = service.waiting().await;
        }
    });

    let client_transport =
        rmcp::transport::async_rw::AsyncRwTransport::new(client_read, client_write);
    let (sink, _rx) = NotificationSink::channel(16);
    let running = NotificationForwarder::new("canary-test", "0.0.0", sink)
        .serve(client_transport)
        .await
        .expect("client handshake");
    let handshake = RmcpSession::from_running("test", running)
        .await
        .expect("catalog exchange");
    (handshake, server)
}

#[tokio::test]
async fn test_session_lists_tools_with_schemas() {
    let (handshake, server) = connect_pair().await;

    let mut names: Vec<&str> = handshake.tools.iter().map(|t| t.name.as_str()).collect();
    names.sort();
    assert_eq!(names, vec!["generate_line_chart", "neo4j_find_node", "neo4j_health"]);

    let chart = handshake
        .tools
        .iter()
        .find(|t| t.name == "generate_line_chart")
        .unwrap();
    assert_eq!(chart.description, "Build a line chart from labelled values");
    assert!(chart.input_schema["properties"]["values"].is_object());

    handshake.session.close().await.unwrap();
    server.abort();
}

#[tokio::test]
async fn test_tool_results_are_converted() {
    let (handshake, server) = connect_pair().await;
    let session = &handshake.session;

    // Text that parses as JSON comes back structured
    let graph = session
        .call_tool("neo4j_find_node", json!({"name": "Bob"}))
        .await
        .unwrap();
    assert_eq!(graph["nodes"][1]["label"], "Alice");
    assert_eq!(graph["edges"][0]["label"], "KNOWS");

    let chart = session
        .call_tool(
            "generate_line_chart",
            json!({"labels": ["Q1", "Q2"], "values": [3, 5]}),
        )
        .await
        .unwrap();
    assert_eq!(chart["series"][0]["data"], json!([3.0, 5.0]));

    // Anything else stays a string
    let health = session.call_tool("neo4j_health", json!({})).await.unwrap();
    assert_eq!(health, json!("graph database online"));

    handshake.session.close().await.unwrap();
    server.abort();
}

#[tokio::test]
async fn test_tool_error_and_bad_arguments() {
    let (handshake, server) = connect_pair().await;
    let session = &handshake.session;

    let err = session
        .call_tool("neo4j_find_node", json!({"name": "Mallory"}))
        .await
        .unwrap_err();
    assert!(matches!(err, McpError::ToolInvocationFailed(_)), "{err}");
    assert_eq!(err.code(), "tool_invocation_failed");
    assert!(err.to_string().contains("Mallory"));

    let err = session
        .call_tool("generate_line_chart", json!([1, 2]))
        .await
        .unwrap_err();
    assert!(matches!(err, McpError::InvalidParameters(_)));

    handshake.session.close().await.unwrap();
    server.abort();
}

#[tokio::test]
async fn test_close_ends_session() {
    let (handshake, server) = connect_pair().await;

    handshake.session.close().await.unwrap();
    timeout(Duration::from_secs(5), handshake.session.closed())
        .await
        .expect("closed() resolves after close");

    let err = handshake
        .session
        .call_tool("neo4j_find_node", json!({"name": "Bob"}))
        .await
        .unwrap_err();
    assert!(matches!(err, McpError::ConnectionClosed));

    // Closing twice is harmless
    handshake.session.close().await.unwrap();
    server.abort();
}

#[tokio::test]
async fn test_server_going_away_is_observed() {
    let (handshake, server) = connect_pair().await;

    server.abort();
    let _ = server.await;

    timeout(Duration::from_secs(5), handshake.session.closed())
        .await
        .expect("transport loss is observed");
    let _ = handshake.session.close().await;
}

#[tokio::test]
async fn test_connector_reports_missing_program() {
    let connector = RmcpConnector::default();
    let definition = ServerDefinition::new(
        "missing",
        ServerSpec::process("canary_nonexistent_command_12345", Vec::<String>::new()),
    );
    let (sink, _rx) = NotificationSink::channel(4);

    let err = timeout(Duration::from_secs(10), connector.connect(&definition, sink))
        .await
        .expect("spawn failure is immediate")
        .err()
        .expect("connect fails");
    assert_eq!(err.code(), "handshake_failed");
    assert!(err.is_retryable() || matches!(err, McpError::SpawnFailed { .. }));
}
