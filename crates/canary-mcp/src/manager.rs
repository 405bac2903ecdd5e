//! Connection manager
//!
//! One actor task owns every connection's state and is the only writer of the
//! status list and the tool catalog. Each connection runs in its own worker
//! task that performs the handshake with bounded retries, watches the live
//! session for transport loss and reports back over a channel. Readers get
//! `Arc` snapshots through `watch` channels and never take a lock shared with
//! the writer.
//!
//! ```text
//! reconcile ──► actor ──spawn──► worker(id, generation) ──► Connector::connect
//!                 ▲                     │
//!                 └──── WorkerEvent ◄───┘  AttemptStarted / AttemptFailed /
//!                                          Established / Lost
//! ```

use crate::catalog::{CatalogSource, LiveSession, ToolCatalog};
use crate::error::{McpError, McpResult};
use crate::notifications::{self, ToolLogEvent};
use crate::policy::ConnectionPolicy;
use crate::rmcp_client::RmcpConnector;
use crate::session::{Connector, Handshake, NotificationSink, ToolSpec};
use crate::state::{ConnectionState, ConnectionStatus, StateTransition};
use canary_registry::ServerDefinition;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const COMMAND_BUFFER: usize = 32;
const WORKER_EVENT_BUFFER: usize = 256;
const TRANSITION_BUFFER: usize = 256;
const LOG_EVENT_BUFFER: usize = 512;

/// What a reconcile pass did
#[derive(Debug, Default)]
pub struct ReconcileReport {
    /// Ids that got a new connection
    pub started: Vec<String>,
    /// Ids whose connection was closed because the definition disappeared
    pub closed: Vec<String>,
    /// Ids already connected and left as they were
    pub unchanged: Vec<String>,
    /// Definitions rejected before any connection attempt
    pub rejected: Vec<(String, String)>,
    /// Close failures for removed connections
    pub failures: Vec<(String, McpError)>,
}

/// Result of closing every connection
#[derive(Debug, Default)]
pub struct ShutdownReport {
    pub closed: Vec<String>,
    pub failures: Vec<(String, McpError)>,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

enum Command {
    Reconcile {
        definitions: Vec<ServerDefinition>,
        reply: oneshot::Sender<ReconcileReport>,
    },
    Reconnect {
        definition: ServerDefinition,
        reply: oneshot::Sender<Option<McpError>>,
    },
    Shutdown {
        reply: oneshot::Sender<ShutdownReport>,
    },
}

/// Handle to a running connection manager.
///
/// Cheap to clone; every clone talks to the same actor. When the last handle
/// is dropped the actor closes all connections and exits.
#[derive(Clone)]
pub struct ConnectionManager {
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<Arc<Vec<ConnectionStatus>>>,
    catalog: watch::Receiver<Arc<ToolCatalog>>,
    transitions: broadcast::Sender<StateTransition>,
    logs: broadcast::Sender<ToolLogEvent>,
}

impl ConnectionManager {
    /// Start a manager with the given connector. Must be called inside a
    /// Tokio runtime.
    pub fn new(connector: Arc<dyn Connector>, policy: ConnectionPolicy) -> Self {
        let (commands, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (status_tx, status) = watch::channel(Arc::new(Vec::new()));
        let (catalog_tx, catalog) = watch::channel(Arc::new(ToolCatalog::empty()));
        let (transitions, _) = broadcast::channel(TRANSITION_BUFFER);
        let (logs, _) = broadcast::channel(LOG_EVENT_BUFFER);
        let (events_tx, events_rx) = mpsc::channel(WORKER_EVENT_BUFFER);

        let actor = Actor {
            connector,
            policy,
            connections: BTreeMap::new(),
            events_tx,
            status_tx,
            catalog_tx,
            transitions: transitions.clone(),
            logs: logs.clone(),
            next_generation: 0,
            ready_seq: 0,
            catalog_version: 0,
        };
        tokio::spawn(actor.run(command_rx, events_rx));

        Self {
            commands,
            status,
            catalog,
            transitions,
            logs,
        }
    }

    /// Start a manager that connects through rmcp
    pub fn with_rmcp(policy: ConnectionPolicy) -> Self {
        Self::new(Arc::new(RmcpConnector::default()), policy)
    }

    /// Bring the live connection set in line with `definitions`.
    ///
    /// Definitions are matched by id. New ids are connected, ids no longer
    /// present are closed, and existing ids keep their current connection even
    /// if the server definition changed; use [`ConnectionManager::reconnect`] for that.
    pub async fn reconcile(&self, definitions: Vec<ServerDefinition>) -> McpResult<ReconcileReport> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Reconcile { definitions, reply }).await?;
        rx.await.map_err(|_| McpError::ManagerClosed)
    }

    /// Close the connection for this id (if any) and connect afresh with the
    /// given definition. Returns the close error of the old connection, if
    /// closing it failed.
    pub async fn reconnect(&self, definition: ServerDefinition) -> McpResult<Option<McpError>> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Reconnect { definition, reply }).await?;
        rx.await.map_err(|_| McpError::ManagerClosed)
    }

    /// Close every connection and stop the manager.
    ///
    /// Every session is closed even when some closes fail; failures are
    /// collected in the report. Calling this on a stopped manager returns an
    /// empty report.
    pub async fn shutdown(&self) -> ShutdownReport {
        let (reply, rx) = oneshot::channel();
        if self.send(Command::Shutdown { reply }).await.is_err() {
            return ShutdownReport::default();
        }
        rx.await.unwrap_or_default()
    }

    /// Current status of every known connection, ordered by id
    pub fn status(&self) -> Vec<ConnectionStatus> {
        self.status.borrow().iter().cloned().collect()
    }

    /// Current aggregated tool catalog snapshot
    pub fn catalog(&self) -> Arc<ToolCatalog> {
        Arc::clone(&self.catalog.borrow())
    }

    /// Receiver that observes every catalog rebuild
    pub fn subscribe_catalog(&self) -> watch::Receiver<Arc<ToolCatalog>> {
        self.catalog.clone()
    }

    pub fn subscribe_transitions(&self) -> broadcast::Receiver<StateTransition> {
        self.transitions.subscribe()
    }

    pub fn subscribe_logs(&self) -> broadcast::Receiver<ToolLogEvent> {
        self.logs.subscribe()
    }

    /// Invoke a tool through the current catalog snapshot
    pub async fn invoke(&self, name: &str, arguments: Value, timeout: Duration) -> McpResult<Value> {
        self.catalog().invoke(name, arguments, timeout).await
    }

    /// Wait until no connection is still connecting or retrying. A manager
    /// with no connections counts as settled.
    ///
    /// Returns `false` if `timeout` elapsed first.
    pub async fn wait_until_settled(&self, timeout: Duration) -> bool {
        let mut status = self.status.clone();
        let settled = async move {
            loop {
                if status.borrow_and_update().iter().all(ConnectionStatus::is_settled) {
                    return;
                }
                if status.changed().await.is_err() {
                    return;
                }
            }
        };
        tokio::time::timeout(timeout, settled).await.is_ok()
    }

    async fn send(&self, command: Command) -> McpResult<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| McpError::ManagerClosed)
    }
}

// ---------------------------------------------------------------------------
// Actor
// ---------------------------------------------------------------------------

struct WorkerEvent {
    server_id: String,
    generation: u64,
    kind: WorkerEventKind,
}

enum WorkerEventKind {
    AttemptStarted { attempt: u32 },
    AttemptFailed { attempt: u32, error: String, will_retry: bool },
    Established { session: LiveSession, tools: Vec<ToolSpec> },
    Lost { error: String },
}

struct Entry {
    definition: ServerDefinition,
    generation: u64,
    state: ConnectionState,
    attempts: u32,
    retry_pending: bool,
    last_error: Option<String>,
    ready_since: Option<DateTime<Utc>>,
    ready_order: Option<u64>,
    live: Option<(LiveSession, Vec<ToolSpec>)>,
    cancel: CancellationToken,
    worker: JoinHandle<McpResult<()>>,
}

impl Entry {
    fn status(&self) -> ConnectionStatus {
        ConnectionStatus {
            id: self.definition.id.clone(),
            transport: self.definition.transport().kind(),
            state: self.state,
            tools: self.live.as_ref().map_or(0, |(_, tools)| tools.len()),
            attempts: self.attempts,
            retry_pending: self.retry_pending,
            last_error: self.last_error.clone(),
            ready_since: self.ready_since,
            ready_order: self.ready_order,
        }
    }
}

struct Actor {
    connector: Arc<dyn Connector>,
    policy: ConnectionPolicy,
    connections: BTreeMap<String, Entry>,
    events_tx: mpsc::Sender<WorkerEvent>,
    status_tx: watch::Sender<Arc<Vec<ConnectionStatus>>>,
    catalog_tx: watch::Sender<Arc<ToolCatalog>>,
    transitions: broadcast::Sender<StateTransition>,
    logs: broadcast::Sender<ToolLogEvent>,
    next_generation: u64,
    ready_seq: u64,
    catalog_version: u64,
}

impl Actor {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut events: mpsc::Receiver<WorkerEvent>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Reconcile { definitions, reply }) => {
                        let report = self.reconcile(definitions).await;
                        let _ = reply.send(report);
                    }
                    Some(Command::Reconnect { definition, reply }) => {
                        let failure = self.reconnect(definition).await;
                        let _ = reply.send(failure);
                    }
                    Some(Command::Shutdown { reply }) => {
                        let report = self.shutdown().await;
                        let _ = reply.send(report);
                        break;
                    }
                    None => {
                        let report = self.shutdown().await;
                        debug!(closed = report.closed.len(), "All manager handles dropped");
                        break;
                    }
                },
                Some(event) = events.recv() => self.apply(event),
            }
        }
    }

    async fn reconcile(&mut self, definitions: Vec<ServerDefinition>) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        let mut wanted: BTreeMap<String, ServerDefinition> = BTreeMap::new();
        for definition in definitions {
            if let Err(e) = definition.validate() {
                warn!(server_id = %definition.id, error = %e, "Rejecting invalid server definition");
                report.rejected.push((definition.id.clone(), e.to_string()));
                continue;
            }
            if wanted.contains_key(&definition.id) {
                warn!(server_id = %definition.id, "Duplicate server id in reconcile; keeping the first");
                continue;
            }
            wanted.insert(definition.id.clone(), definition);
        }

        let removed: Vec<String> = self
            .connections
            .keys()
            .filter(|id| !wanted.contains_key(*id))
            .cloned()
            .collect();
        let outcomes = self.close_many(removed).await;
        for (id, outcome) in outcomes {
            if let Err(e) = outcome {
                report.failures.push((id.clone(), e));
            }
            report.closed.push(id);
        }

        for (id, definition) in wanted {
            match self.connections.get(&id) {
                Some(entry) => {
                    if entry.definition != definition {
                        debug!(server_id = %id, "Definition changed; keeping the live connection until reconnect");
                    }
                    report.unchanged.push(id);
                }
                None => {
                    self.start(definition);
                    report.started.push(id);
                }
            }
        }

        self.publish_status();
        info!(
            started = report.started.len(),
            closed = report.closed.len(),
            unchanged = report.unchanged.len(),
            rejected = report.rejected.len(),
            "Reconciled tool server connections"
        );
        report
    }

    async fn reconnect(&mut self, definition: ServerDefinition) -> Option<McpError> {
        if let Err(e) = definition.validate() {
            warn!(server_id = %definition.id, error = %e, "Rejecting invalid server definition");
            return Some(McpError::HandshakeFailed {
                server_id: definition.id.clone(),
                reason: e.to_string(),
            });
        }
        let failure = self
            .close_many(vec![definition.id.clone()])
            .await
            .into_iter()
            .find_map(|(_, outcome)| outcome.err());
        info!(server_id = %definition.id, "Reconnecting tool server");
        self.start(definition);
        self.publish_status();
        failure
    }

    async fn shutdown(&mut self) -> ShutdownReport {
        let ids: Vec<String> = self.connections.keys().cloned().collect();
        let mut report = ShutdownReport::default();
        for (id, outcome) in self.close_many(ids).await {
            if let Err(e) = outcome {
                warn!(server_id = %id, error = %e, "Failed to close tool server connection");
                report.failures.push((id.clone(), e));
            }
            report.closed.push(id);
        }
        self.publish_status();
        info!(
            closed = report.closed.len(),
            failures = report.failures.len(),
            "Connection manager shut down"
        );
        report
    }

    fn start(&mut self, definition: ServerDefinition) {
        self.next_generation += 1;
        let generation = self.next_generation;
        let cancel = CancellationToken::new();

        let (sink, receiver) = NotificationSink::channel(self.policy.notification_buffer);
        notifications::spawn_consumer(definition.id.clone(), receiver, self.logs.clone());

        let worker = Worker {
            definition: definition.clone(),
            generation,
            connector: Arc::clone(&self.connector),
            policy: self.policy.clone(),
            sink,
            events: self.events_tx.clone(),
            cancel: cancel.clone(),
        };
        let worker = tokio::spawn(worker.run());

        debug!(server_id = %definition.id, generation, transport = definition.transport().kind(), "Starting connection");
        self.connections.insert(
            definition.id.clone(),
            Entry {
                definition,
                generation,
                state: ConnectionState::Disconnected,
                attempts: 0,
                retry_pending: true,
                last_error: None,
                ready_since: None,
                ready_order: None,
                live: None,
                cancel,
                worker,
            },
        );
    }

    /// Close the given connections concurrently, marking each `Closed` and
    /// removing it
    async fn close_many(&mut self, ids: Vec<String>) -> Vec<(String, McpResult<()>)> {
        let mut closing = Vec::new();
        let mut catalog_changed = false;
        for id in ids {
            let Some(mut entry) = self.connections.remove(&id) else {
                continue;
            };
            if let Some((live, _)) = entry.live.take() {
                live.mark_dead();
                catalog_changed = true;
            }
            entry.cancel.cancel();
            entry.retry_pending = false;
            record_transition(&self.transitions, &mut entry, ConnectionState::Closed, None);
            closing.push((id, entry.worker));
        }
        if catalog_changed {
            self.rebuild_catalog();
        }

        let timeout = self.policy.close_timeout;
        join_all(closing.into_iter().map(|(id, worker)| async move {
            let outcome = await_worker(worker, timeout).await;
            (id, outcome)
        }))
        .await
    }

    fn apply(&mut self, event: WorkerEvent) {
        let Some(entry) = self.connections.get_mut(&event.server_id) else {
            return;
        };
        if entry.generation != event.generation {
            debug!(server_id = %event.server_id, generation = event.generation, "Ignoring event from a replaced connection");
            return;
        }

        let mut catalog_changed = false;
        match event.kind {
            WorkerEventKind::AttemptStarted { attempt } => {
                entry.attempts = attempt;
                entry.retry_pending = false;
                record_transition(&self.transitions, entry, ConnectionState::Connecting, None);
            }
            WorkerEventKind::AttemptFailed {
                attempt,
                error,
                will_retry,
            } => {
                entry.retry_pending = will_retry;
                entry.last_error = Some(error.clone());
                warn!(
                    server_id = %event.server_id,
                    attempt,
                    will_retry,
                    error = %error,
                    "Handshake attempt failed"
                );
                record_transition(
                    &self.transitions,
                    entry,
                    ConnectionState::Disconnected,
                    Some(error),
                );
            }
            WorkerEventKind::Established { session, tools } => {
                self.ready_seq += 1;
                entry.ready_order = Some(self.ready_seq);
                entry.ready_since = Some(Utc::now());
                entry.last_error = None;
                entry.retry_pending = false;
                info!(server_id = %event.server_id, tools = tools.len(), "Tool server ready");
                entry.live = Some((session, tools));
                record_transition(&self.transitions, entry, ConnectionState::Ready, None);
                catalog_changed = true;
            }
            WorkerEventKind::Lost { error } => {
                if let Some((live, _)) = entry.live.take() {
                    live.mark_dead();
                }
                entry.ready_since = None;
                entry.retry_pending = true;
                entry.last_error = Some(error.clone());
                record_transition(
                    &self.transitions,
                    entry,
                    ConnectionState::Degraded,
                    Some(error),
                );
                catalog_changed = true;
            }
        }

        if catalog_changed {
            self.rebuild_catalog();
        }
        self.publish_status();
    }

    fn rebuild_catalog(&mut self) {
        self.catalog_version += 1;
        let sources = self.connections.values().filter_map(|entry| {
            let (session, tools) = entry.live.as_ref()?;
            (entry.state == ConnectionState::Ready).then(|| CatalogSource {
                server_id: entry.definition.id.clone(),
                ready_order: entry.ready_order.unwrap_or_default(),
                session: session.clone(),
                tools: tools.clone(),
            })
        });
        let catalog = ToolCatalog::build(sources, self.catalog_version);
        debug!(version = catalog.version(), tools = catalog.len(), "Rebuilt tool catalog");
        self.catalog_tx.send_replace(Arc::new(catalog));
    }

    fn publish_status(&self) {
        let status: Vec<ConnectionStatus> = self.connections.values().map(Entry::status).collect();
        self.status_tx.send_replace(Arc::new(status));
    }
}

fn record_transition(
    transitions: &broadcast::Sender<StateTransition>,
    entry: &mut Entry,
    to: ConnectionState,
    error: Option<String>,
) {
    let from = entry.state;
    entry.state = to;
    let server_id = entry.definition.id.as_str();
    match to {
        ConnectionState::Ready | ConnectionState::Closed => {
            info!(server_id, %from, %to, "Connection state changed")
        }
        ConnectionState::Disconnected | ConnectionState::Degraded if error.is_some() => {
            warn!(server_id, %from, %to, error = error.as_deref().unwrap_or(""), "Connection state changed")
        }
        _ => debug!(server_id, %from, %to, "Connection state changed"),
    }
    let _ = transitions.send(StateTransition {
        server_id: server_id.to_string(),
        from,
        to,
        error,
        at: Utc::now(),
    });
}

async fn await_worker(mut worker: JoinHandle<McpResult<()>>, timeout: Duration) -> McpResult<()> {
    match tokio::time::timeout(timeout, &mut worker).await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(e)) => Err(McpError::ProtocolError(format!("connection task failed: {e}"))),
        Err(_) => {
            worker.abort();
            Err(McpError::timeout("closing session", timeout))
        }
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

struct Worker {
    definition: ServerDefinition,
    generation: u64,
    connector: Arc<dyn Connector>,
    policy: ConnectionPolicy,
    sink: NotificationSink,
    events: mpsc::Sender<WorkerEvent>,
    cancel: CancellationToken,
}

impl Worker {
    /// Connect, hold the session until it is lost or cancelled, and reconnect
    /// after loss. The returned result is the outcome of closing the session
    /// on cancellation.
    async fn run(self) -> McpResult<()> {
        let mut after_loss = false;
        loop {
            if after_loss && !self.sleep(self.policy.backoff_after(1)).await {
                return Ok(());
            }
            let Some(handshake) = self.connect_with_retry().await else {
                return Ok(());
            };

            let session = Arc::clone(&handshake.session);
            let live = LiveSession::new(Arc::clone(&session));
            let established = WorkerEventKind::Established {
                session: live.clone(),
                tools: handshake.tools,
            };
            if !self.report(established).await {
                live.mark_dead();
                return session.close().await;
            }

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    live.mark_dead();
                    return session.close().await;
                }
                _ = session.closed() => {
                    live.mark_dead();
                    if let Err(e) = session.close().await {
                        debug!(server_id = %self.definition.id, error = %e, "Releasing lost session failed");
                    }
                    let error = McpError::TransportLost(format!(
                        "session with '{}' ended",
                        self.definition.id
                    ));
                    if !self.report(WorkerEventKind::Lost { error: error.to_string() }).await {
                        return Ok(());
                    }
                    after_loss = true;
                }
            }
        }
    }

    /// Run one connect cycle with the bounded retry budget
    async fn connect_with_retry(&self) -> Option<Handshake> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            if !self.report(WorkerEventKind::AttemptStarted { attempt }).await {
                return None;
            }

            let outcome = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return None,
                outcome = tokio::time::timeout(
                    self.policy.handshake_timeout,
                    self.connector.connect(&self.definition, self.sink.clone()),
                ) => outcome,
            };
            let error = match outcome {
                Ok(Ok(handshake)) => return Some(handshake),
                Ok(Err(e)) => e,
                Err(_) => McpError::timeout("handshake", self.policy.handshake_timeout),
            };

            if !error.is_retryable() {
                debug!(server_id = %self.definition.id, code = error.code(), "Handshake error is not transient");
            }
            let will_retry = self.policy.allows_retry_after(attempt);
            let failed = WorkerEventKind::AttemptFailed {
                attempt,
                error: error.to_string(),
                will_retry,
            };
            if !self.report(failed).await || !will_retry {
                return None;
            }
            if !self.sleep(self.policy.backoff_after(attempt)).await {
                return None;
            }
        }
    }

    /// Send an event to the actor; `false` once cancelled or the actor is gone
    async fn report(&self, kind: WorkerEventKind) -> bool {
        let event = WorkerEvent {
            server_id: self.definition.id.clone(),
            generation: self.generation,
            kind,
        };
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            sent = self.events.send(event) => sent.is_ok(),
        }
    }

    /// Sleep unless cancelled first; `false` when cancelled
    async fn sleep(&self, delay: Duration) -> bool {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }
}
