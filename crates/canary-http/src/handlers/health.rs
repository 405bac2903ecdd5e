//! Liveness endpoint

use axum::{extract::State, http::StatusCode, response::Json};
use canary_mcp::ConnectionState;

use crate::state::AppState;

/// GET /health - Liveness with a summary of tool-server connections
///
/// Degraded connections do not make the service unhealthy; the status reads
/// `degraded` so operators can tell the difference.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    let connections = state.manager.status();
    let ready = connections
        .iter()
        .filter(|c| c.state == ConnectionState::Ready)
        .count();
    let degraded = connections
        .iter()
        .any(|c| c.state == ConnectionState::Degraded);

    let status = if degraded { "degraded" } else { "healthy" };

    (
        StatusCode::OK,
        Json(serde_json::json!({
            "status": status,
            "service": "canary",
            "timestamp": chrono::Utc::now(),
            "version": env!("CARGO_PKG_VERSION"),
            "uptime_seconds": state.started.elapsed().as_secs(),
            "servers": {
                "total": connections.len(),
                "ready": ready,
            },
            "tools": state.manager.catalog().len(),
        })),
    )
}
