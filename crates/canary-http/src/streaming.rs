//! # Server-Sent Event Delivery
//!
//! Maps a run's [`EventStream`] onto an SSE response: one named event per
//! [`StreamEvent`], JSON data, order preserved. The response body owns the
//! receiving end, so a client that goes away drops it and the run's sink
//! observes the disconnect. A client that stops reading fills the bounded
//! channel until the sink's delivery timeout fires, which is handled the
//! same way.

use axum::{
    BoxError,
    response::sse::{Event, KeepAlive, Sse},
};
use canary_chat::{EventStream, StreamEvent};
use canary_mcp::ToolLogEvent;
use futures::Stream;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_stream::{
    StreamExt,
    wrappers::{BroadcastStream, ReceiverStream, errors::BroadcastStreamRecvError},
};
use tracing::warn;

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(10);

/// SSE event name used for tool-server log lines
pub const LOG_EVENT_NAME: &str = "log";

/// Encode one stream event as an SSE frame
pub fn to_sse_event(event: &StreamEvent) -> Result<Event, BoxError> {
    let data = serde_json::to_string(event)?;
    Ok(Event::default().event(event.name()).data(data))
}

/// SSE response delivering one run's events to its single subscriber
pub fn chat_event_stream(
    events: EventStream,
) -> Sse<impl Stream<Item = Result<Event, BoxError>>> {
    let stream = ReceiverStream::new(events.into_inner()).map(|event| to_sse_event(&event));

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(KEEP_ALIVE_INTERVAL)
            .text("keep-alive"),
    )
}

/// SSE response following tool-server log notifications.
///
/// A subscriber that falls behind skips the overwritten entries.
pub fn tool_log_stream(
    logs: broadcast::Receiver<ToolLogEvent>,
) -> Sse<impl Stream<Item = Result<Event, BoxError>>> {
    let stream = BroadcastStream::new(logs).filter_map(|item| match item {
        Ok(event) => Some(
            serde_json::to_string(&event)
                .map(|data| Event::default().event(LOG_EVENT_NAME).data(data))
                .map_err(Into::into),
        ),
        Err(BroadcastStreamRecvError::Lagged(skipped)) => {
            warn!(skipped, "Log subscriber lagged; entries dropped");
            None
        }
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(KEEP_ALIVE_INTERVAL)
            .text("keep-alive"),
    )
}
