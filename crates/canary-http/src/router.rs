//! HTTP router configuration

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    handlers::{
        chat, chat_stream, delete_server, health_check, list_servers, replace_servers,
        server_logs, server_status, upsert_server,
    },
    state::AppState,
};

/// Build the application router
pub fn router(state: AppState, enable_cors: bool) -> Router {
    let app = Router::new()
        .route("/health", get(health_check))
        .route("/api/chat", post(chat))
        .route("/api/chat/stream", post(chat_stream))
        .route("/api/mcp/servers", get(list_servers).put(replace_servers))
        .route(
            "/api/mcp/servers/{id}",
            post(upsert_server).delete(delete_server),
        )
        .route("/api/mcp/status", get(server_status))
        .route("/api/mcp/logs", get(server_logs))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    if enable_cors {
        app.layer(CorsLayer::permissive())
    } else {
        app
    }
}
