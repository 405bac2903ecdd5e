//! HTTP endpoint tests against scripted tool servers and a scripted model

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use canary_chat::OrchestratorConfig;
use canary_http::{AppState, router};
use canary_mcp::{ConnectionManager, ConnectionPolicy, ConnectionState};
use canary_registry::RegistryStore;
use canary_testing::{ScriptedConnector, ScriptedModel, ScriptedServer};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;

const WAIT: Duration = Duration::from_secs(5);

struct Harness {
    app: Router,
    state: AppState,
    connector: ScriptedConnector,
    dir: TempDir,
}

impl Harness {
    fn registry_path(&self) -> std::path::PathBuf {
        self.dir.path().join("mcp-servers.json")
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, body.to_vec())
    }

    async fn json(&self, request: Request<Body>) -> (StatusCode, Value) {
        let (status, body) = self.send(request).await;
        (status, serde_json::from_slice(&body).unwrap())
    }

    async fn settled(&self) {
        assert!(self.state.manager.wait_until_settled(WAIT).await);
    }
}

fn fast_policy() -> ConnectionPolicy {
    ConnectionPolicy {
        initial_backoff: Duration::from_millis(10),
        max_backoff: Duration::from_millis(40),
        handshake_timeout: Duration::from_secs(1),
        close_timeout: Duration::from_millis(500),
        ..Default::default()
    }
}

fn connector() -> ScriptedConnector {
    ScriptedConnector::new()
        .with_server(
            ScriptedServer::new("graph")
                .with_tool("neo4j_find_node", "Find a node")
                .with_response("neo4j_find_node", json!({"nodes": [], "edges": []})),
        )
        .with_server(ScriptedServer::new("search").with_tool("search", "Search the web"))
        .with_server(ScriptedServer::new("search-mirror").with_tool("search", "Mirror"))
}

async fn harness(model: ScriptedModel) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let registry =
        RegistryStore::with_bundled(dir.path().join("mcp-servers.json"), r#"{"mcpServers": {}}"#)
            .unwrap();
    let connector = connector();
    let manager = ConnectionManager::new(Arc::new(connector.clone()), fast_policy());
    let state = AppState::new(
        registry,
        manager,
        Arc::new(model),
        OrchestratorConfig::default(),
    );
    Harness {
        app: router(state.clone(), true),
        state,
        connector,
        dir,
    }
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn put_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("PUT")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn delete(uri: &str) -> Request<Body> {
    Request::builder()
        .method("DELETE")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

fn scripted(id: &str) -> Value {
    json!({"command": "scripted", "args": [id]})
}

#[tokio::test]
async fn test_health_endpoint() {
    let h = harness(ScriptedModel::new()).await;
    let (status, body) = h.json(get("/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "canary");
    assert_eq!(body["servers"]["total"], 0);
    assert!(body["uptime_seconds"].is_u64());
}

#[tokio::test]
async fn test_upsert_connects_and_persists() {
    let h = harness(ScriptedModel::new()).await;

    let (status, body) = h
        .json(post_json("/api/mcp/servers/graph", scripted("graph")))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["id"], "graph");
    assert_eq!(body["transport"], "process");

    h.settled().await;
    let (_, status_body) = h.json(get("/api/mcp/status")).await;
    assert_eq!(status_body["servers"][0]["id"], "graph");
    assert_eq!(status_body["servers"][0]["state"], "ready");
    assert_eq!(status_body["tools"][0]["name"], "neo4j_find_node");

    let persisted = std::fs::read_to_string(h.registry_path()).unwrap();
    let persisted: Value = serde_json::from_str(&persisted).unwrap();
    assert_eq!(persisted["mcpServers"]["graph"]["command"], "scripted");
}

#[tokio::test]
async fn test_invalid_definition_is_rejected() {
    let h = harness(ScriptedModel::new()).await;

    let (status, body) = h
        .json(post_json("/api/mcp/servers/graph", json!({"command": "   "})))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_definition");
    assert_eq!(body["details"]["id"], "graph");

    let (status, body) = h
        .json(post_json(
            "/api/mcp/servers/both",
            json!({"command": "npx", "baseUrl": "http://localhost:1"}),
        ))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].as_str().unwrap().contains("exactly one transport"));

    assert!(!h.registry_path().exists());
    assert_eq!(h.connector.attempts("graph"), 0);
}

#[tokio::test]
async fn test_list_preserves_unknown_fields() {
    let h = harness(ScriptedModel::new()).await;
    let mut spec = scripted("graph");
    spec["description"] = json!("Graph database tools");

    let (status, _) = h.json(post_json("/api/mcp/servers/graph", spec)).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = h.json(get("/api/mcp/servers")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["mcpServers"]["graph"]["description"],
        "Graph database tools"
    );
}

#[tokio::test]
async fn test_upsert_existing_id_reconnects() {
    let h = harness(ScriptedModel::new()).await;
    h.json(post_json("/api/mcp/servers/graph", scripted("graph")))
        .await;
    h.settled().await;
    assert_eq!(h.connector.attempts("graph"), 1);

    let (status, body) = h
        .json(post_json(
            "/api/mcp/servers/graph",
            json!({"command": "scripted", "args": ["graph", "--verbose"]}),
        ))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["reconnected"], true);
    h.settled().await;

    assert_eq!(h.connector.attempts("graph"), 2);
    assert_eq!(h.connector.closes("graph"), 1);
}

#[tokio::test]
async fn test_upsert_identical_definition_keeps_connection() {
    let h = harness(ScriptedModel::new()).await;
    let (_, body) = h
        .json(post_json("/api/mcp/servers/graph", scripted("graph")))
        .await;
    assert_eq!(body["reconnected"], false);
    h.settled().await;

    let (status, body) = h
        .json(post_json("/api/mcp/servers/graph", scripted("graph")))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["reconnected"], false);
    h.settled().await;

    assert_eq!(h.connector.attempts("graph"), 1);
    assert_eq!(h.connector.closes("graph"), 0);
    let status = h.state.manager.status();
    assert_eq!(status.len(), 1);
    assert_eq!(status[0].state, ConnectionState::Ready);
}

#[tokio::test]
async fn test_delete_closes_connection() {
    let h = harness(ScriptedModel::new()).await;
    h.json(post_json("/api/mcp/servers/graph", scripted("graph")))
        .await;
    h.settled().await;

    let (status, body) = h.json(delete("/api/mcp/servers/graph")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"deleted": true, "id": "graph"}));
    assert_eq!(h.connector.closes("graph"), 1);
    assert!(h.state.manager.catalog().is_empty());

    let (_, body) = h.json(delete("/api/mcp/servers/graph")).await;
    assert_eq!(body["deleted"], false);
}

#[tokio::test]
async fn test_replace_registry_and_collision_report() {
    let h = harness(ScriptedModel::new()).await;

    let document = json!({"mcpServers": {
        "search": scripted("search"),
        "graph": scripted("graph"),
    }});
    let (status, body) = h.json(put_json("/api/mcp/servers", document)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["servers"], json!(["search", "graph"]));
    h.settled().await;

    let (status, _) = h
        .json(post_json("/api/mcp/servers/search-mirror", scripted("mirror")))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    h.settled().await;

    let (_, status_body) = h.json(get("/api/mcp/status")).await;
    let conflicts = status_body["conflicts"].as_array().unwrap();
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0]["keptServer"], "search-mirror");
    assert_eq!(conflicts[0]["droppedServer"], "search");
}

#[tokio::test]
async fn test_replace_with_bad_entry_changes_nothing() {
    let h = harness(ScriptedModel::new()).await;
    h.json(post_json("/api/mcp/servers/graph", scripted("graph")))
        .await;
    h.settled().await;
    let before = std::fs::read_to_string(h.registry_path()).unwrap();

    let document = json!({"mcpServers": {
        "search": scripted("search"),
        "broken": {"baseUrl": "ftp://example.com"},
    }});
    let (status, body) = h.json(put_json("/api/mcp/servers", document)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_definition");

    assert_eq!(std::fs::read_to_string(h.registry_path()).unwrap(), before);
    assert_eq!(h.connector.attempts("search"), 0);
}

#[tokio::test]
async fn test_chat_returns_reply_and_graph() {
    let graph = json!({"nodes": [{"id": "bob"}], "edges": []});
    let model = ScriptedModel::new()
        .then_text([format!("GRAPH_JSON: {graph}")])
        .then_text(["Bob has no connections."]);
    let h = harness(model).await;

    let (status, body) = h
        .json(post_json(
            "/api/chat",
            json!({"message": "Who does Bob know?", "conversationId": "c-1"}),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["reply"], "Bob has no connections.");
    assert_eq!(body["graphJson"], graph);
    assert_eq!(body["chartJson"], Value::Null);
    assert_eq!(body["toolCalls"], json!([]));
}

#[tokio::test]
async fn test_chat_rejects_blank_message() {
    let model = ScriptedModel::new();
    let h = harness(model.clone()).await;

    let (status, body) = h.json(post_json("/api/chat", json!({"message": "  "}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_request");
    assert_eq!(model.calls(), 0);

    let (status, body) = h
        .json(post_json("/api/chat/stream", json!({"message": ""})))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_request");
}

#[tokio::test]
async fn test_chat_model_failure_maps_to_bad_gateway() {
    let h = harness(ScriptedModel::new().then_failure("HTTP 500: upstream")).await;

    let (status, body) = h.json(post_json("/api/chat", json!({"message": "hi"}))).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"], "model_call_failed");
}

#[tokio::test]
async fn test_chat_stream_delivers_named_events() {
    let h = harness(ScriptedModel::new().then_text(["Hello", ", world"])).await;

    let response = h
        .app
        .clone()
        .oneshot(post_json("/api/chat/stream", json!({"message": "Say hello"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(
        response.headers()[header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("text/event-stream")
    );

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    let names: Vec<&str> = text
        .lines()
        .filter_map(|line| line.strip_prefix("event: "))
        .collect();
    assert_eq!(names, vec!["status", "text_delta", "text_delta", "done"]);

    let data: Vec<Value> = text
        .lines()
        .filter_map(|line| line.strip_prefix("data: "))
        .map(|d| serde_json::from_str(d).unwrap())
        .collect();
    assert_eq!(data[0], json!({"type": "status", "status": "thinking"}));
    assert_eq!(data[2], json!({"type": "text_delta", "text": ", world"}));
    assert_eq!(data[3], json!({"type": "done"}));
}

#[tokio::test]
async fn test_status_reports_failed_server() {
    let h = harness(ScriptedModel::new()).await;
    h.connector
        .add_server(ScriptedServer::new("flaky").unreachable());

    h.json(post_json("/api/mcp/servers/flaky", scripted("flaky")))
        .await;
    h.settled().await;

    let status = h.state.manager.status();
    assert_eq!(status[0].state, ConnectionState::Disconnected);
    assert_eq!(status[0].attempts, 4);

    let (_, body) = h.json(get("/api/mcp/status")).await;
    assert_eq!(body["servers"][0]["state"], "disconnected");
    assert!(body["servers"][0]["lastError"].is_string());
    assert_eq!(body["tools"], json!([]));
}
