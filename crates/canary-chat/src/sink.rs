//! Per-run event delivery channel
//!
//! A bounded channel from one run to one subscriber. A write that cannot be
//! delivered within the delivery timeout, or a subscriber that went away,
//! counts as a client disconnect and cancels the run. Terminal events can only
//! be sent by consuming the sink, so nothing can follow them.

use crate::error::{ChatError, ChatResult};
use crate::event::StreamEvent;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Producer side owned by the orchestrator for one run
#[derive(Debug)]
pub struct EventSink {
    tx: mpsc::Sender<StreamEvent>,
    delivery_timeout: Duration,
    cancel: CancellationToken,
    finished: CancellationToken,
}

/// Subscriber side, handed to the transport
#[derive(Debug)]
pub struct EventStream {
    rx: mpsc::Receiver<StreamEvent>,
}

impl EventStream {
    pub async fn recv(&mut self) -> Option<StreamEvent> {
        self.rx.recv().await
    }

    pub fn into_inner(self) -> mpsc::Receiver<StreamEvent> {
        self.rx
    }
}

impl EventSink {
    /// Create a sink and its subscriber end. Must be called inside a Tokio
    /// runtime.
    pub fn channel(capacity: usize, delivery_timeout: Duration) -> (Self, EventStream) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let cancel = CancellationToken::new();
        let finished = CancellationToken::new();

        // Watch for the subscriber going away between writes
        let watcher_tx = tx.clone();
        let watcher_cancel = cancel.clone();
        let watcher_finished = finished.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = watcher_tx.closed() => {
                    debug!("Event subscriber closed");
                    watcher_cancel.cancel();
                }
                _ = watcher_finished.cancelled() => {}
            }
        });

        (
            Self {
                tx,
                delivery_timeout,
                cancel,
                finished,
            },
            EventStream { rx },
        )
    }

    /// Token cancelled once the client is considered disconnected
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Deliver a non-terminal event in order
    pub async fn emit(&self, event: StreamEvent) -> ChatResult<()> {
        debug_assert!(!event.is_terminal(), "terminal events go through finish()");
        self.deliver(event).await
    }

    /// Deliver the terminal event and close the sink
    pub async fn finish(self, event: StreamEvent) -> ChatResult<()> {
        self.deliver(event).await
    }

    async fn deliver(&self, event: StreamEvent) -> ChatResult<()> {
        if self.cancel.is_cancelled() {
            return Err(ChatError::ClientDisconnected);
        }
        match self.tx.send_timeout(event, self.delivery_timeout).await {
            Ok(()) => Ok(()),
            Err(e) => {
                debug!(error = %e, "Event delivery failed; treating as disconnect");
                self.cancel.cancel();
                Err(ChatError::ClientDisconnected)
            }
        }
    }
}

impl Drop for EventSink {
    fn drop(&mut self) {
        self.finished.cancel();
    }
}
