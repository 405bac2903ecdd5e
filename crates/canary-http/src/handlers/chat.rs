//! Chat entry points

use axum::{
    extract::{Json, State},
    response::IntoResponse,
};
use canary_chat::{ChatReply, ChatRequest};
use tracing::debug;

use crate::{error::ApiError, state::AppState, streaming::chat_event_stream};

/// POST /api/chat - Run to completion and return the answer with its payloads
pub async fn chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatReply>, ApiError> {
    let reply = state.orchestrator.chat(request).await?;
    Ok(Json(reply))
}

/// POST /api/chat/stream - Stream the run's events as SSE
pub async fn chat_stream(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<impl IntoResponse, ApiError> {
    debug!(conversation_id = %request.conversation_id(), "Starting streamed chat");
    let events = state.orchestrator.stream(request)?;
    Ok(chat_event_stream(events))
}
