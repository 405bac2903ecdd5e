//! Registry administration and connection status handlers
//!
//! Every write goes to the registry first; live connections are reconciled
//! against the persisted document afterwards.

use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use canary_mcp::ReconcileReport;
use canary_registry::{RegistryDocument, RegistryResult, ServerDefinition, ServerSpec};
use serde_json::{Value, json};
use std::collections::HashMap;
use tracing::{info, warn};

use crate::{error::ApiError, state::AppState, streaming::tool_log_stream};

/// GET /api/mcp/servers - Current registry document
pub async fn list_servers(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let document = state.with_registry(|registry| registry.document()).await?;
    Ok(Json(document.to_value()))
}

/// PUT /api/mcp/servers - Replace the whole registry
///
/// The body is a registry document. Every entry must be valid; one bad entry
/// rejects the whole replacement. Ids whose spec changed are reconnected.
pub async fn replace_servers(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    let definitions = parse_document_strict(&body)?;
    let ids: Vec<String> = definitions.iter().map(|d| d.id.clone()).collect();

    let previous: HashMap<String, ServerSpec> = state
        .with_registry(|registry| registry.list())
        .await?
        .into_iter()
        .map(|definition| (definition.id, definition.spec))
        .collect();

    let to_store = definitions.clone();
    state
        .with_registry(move |registry| registry.replace_all(&to_store))
        .await?;

    let report = state.sync_connections().await?;

    let mut reconnected = Vec::new();
    for definition in definitions {
        let changed = previous
            .get(&definition.id)
            .is_some_and(|spec| *spec != definition.spec);
        if changed && report.unchanged.contains(&definition.id) {
            let id = definition.id.clone();
            reconnect(&state, definition).await?;
            reconnected.push(id);
        }
    }

    Ok(Json(json!({
        "servers": ids,
        "reconnected": reconnected,
        "reconcile": report_json(&report),
    })))
}

/// POST /api/mcp/servers/{id} - Insert or replace one definition
pub async fn upsert_server(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> Result<impl IntoResponse, ApiError> {
    let spec = ServerSpec::from_value(&id, body)?;

    let key = id.clone();
    let (previous, definition) = state
        .with_registry(move |registry| {
            let previous = registry.get(&key).ok().flatten().map(|definition| definition.spec);
            registry.upsert(&key, spec).map(|definition| (previous, definition))
        })
        .await?;

    // An identical definition keeps its live connection
    let changed = previous.is_some_and(|spec| spec != definition.spec);
    if changed {
        reconnect(&state, definition.clone()).await?;
    } else {
        state.sync_connections().await?;
    }

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "id": definition.id,
            "transport": definition.transport().kind(),
            "server": definition.spec.to_value(),
            "reconnected": changed,
        })),
    ))
}

/// DELETE /api/mcp/servers/{id} - Remove one definition
pub async fn delete_server(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let key = id.clone();
    let deleted = state
        .with_registry(move |registry| registry.delete(&key))
        .await?;
    if deleted {
        state.sync_connections().await?;
    }
    Ok(Json(json!({ "deleted": deleted, "id": id })))
}

/// GET /api/mcp/status - Live connection status and the aggregated catalog
pub async fn server_status(State(state): State<AppState>) -> Json<Value> {
    let catalog = state.manager.catalog();
    Json(json!({
        "servers": state.manager.status(),
        "tools": catalog
            .tools()
            .map(|tool| json!({"name": tool.name(), "server": tool.owning_server_id()}))
            .collect::<Vec<_>>(),
        "conflicts": catalog.conflicts(),
        "catalogVersion": catalog.version(),
    }))
}

/// GET /api/mcp/logs - Tool-server log notifications as SSE
pub async fn server_logs(State(state): State<AppState>) -> impl IntoResponse {
    tool_log_stream(state.manager.subscribe_logs())
}

async fn reconnect(state: &AppState, definition: ServerDefinition) -> Result<(), ApiError> {
    let server_id = definition.id.clone();
    if let Some(error) = state.manager.reconnect(definition).await? {
        warn!(%server_id, %error, "Previous connection did not close cleanly");
    }
    info!(%server_id, "Reconnecting after definition change");
    Ok(())
}

/// Every entry must validate; the first invalid one fails the request
fn parse_document_strict(body: &Value) -> RegistryResult<Vec<ServerDefinition>> {
    let document = RegistryDocument::parse(&body.to_string(), "request body")?;
    document
        .ids()
        .iter()
        .filter_map(|id| document.get(id))
        .collect()
}

fn report_json(report: &ReconcileReport) -> Value {
    json!({
        "started": report.started,
        "closed": report.closed,
        "unchanged": report.unchanged,
        "rejected": report
            .rejected
            .iter()
            .map(|(id, reason)| json!({"id": id, "reason": reason}))
            .collect::<Vec<_>>(),
        "failures": report
            .failures
            .iter()
            .map(|(id, error)| json!({"id": id, "error": error.code(), "message": error.to_string()}))
            .collect::<Vec<_>>(),
    })
}
