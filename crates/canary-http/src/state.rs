//! Shared handler state

use crate::error::ApiError;
use canary_chat::{ChatModel, Orchestrator, OrchestratorConfig};
use canary_mcp::{ConnectionManager, ReconcileReport};
use canary_registry::{RegistryResult, RegistryStore};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Everything a request handler needs; cheap to clone
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<RegistryStore>,
    pub manager: ConnectionManager,
    pub orchestrator: Orchestrator,
    pub started: Instant,
}

impl AppState {
    /// Wire an orchestrator to the manager's catalog
    pub fn new(
        registry: RegistryStore,
        manager: ConnectionManager,
        model: Arc<dyn ChatModel>,
        orchestrator: OrchestratorConfig,
    ) -> Self {
        let orchestrator = Orchestrator::new(model, manager.subscribe_catalog(), orchestrator);
        Self {
            registry: Arc::new(registry),
            manager,
            orchestrator,
            started: Instant::now(),
        }
    }

    /// Run a registry operation off the async workers
    pub async fn with_registry<T, F>(&self, op: F) -> Result<T, ApiError>
    where
        F: FnOnce(&RegistryStore) -> RegistryResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let registry = Arc::clone(&self.registry);
        tokio::task::spawn_blocking(move || op(&registry))
            .await
            .map_err(|e| ApiError::Internal(format!("registry task failed: {e}")))?
            .map_err(ApiError::from)
    }

    /// Reconcile live connections against the persisted registry
    pub async fn sync_connections(&self) -> Result<ReconcileReport, ApiError> {
        let definitions = self.with_registry(|registry| registry.list()).await?;
        let report = self.manager.reconcile(definitions).await?;
        log_reconcile(&report);
        Ok(report)
    }
}

pub(crate) fn log_reconcile(report: &ReconcileReport) {
    info!(
        started = report.started.len(),
        closed = report.closed.len(),
        unchanged = report.unchanged.len(),
        "Connections reconciled"
    );
    for (server_id, reason) in &report.rejected {
        warn!(%server_id, %reason, "Definition rejected");
    }
    for (server_id, error) in &report.failures {
        warn!(%server_id, %error, "Close failed during reconcile");
    }
}
