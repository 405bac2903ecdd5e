//! Service startup and shutdown
//!
//! Startup loads the registry and starts connecting every definition in the
//! background, then serves HTTP. After the listener stops, the connection
//! manager is shut down and its report logged.

use canary_chat::OpenAiCompatModel;
use canary_mcp::{ConnectionManager, McpError, ShutdownReport};
use canary_registry::{RegistryError, RegistryStore};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::{
    config::{AppConfig, ConfigError},
    router::router,
    shutdown::shutdown_signal,
    state::{AppState, log_reconcile},
};

/// Errors that prevent the service from starting or stopping cleanly
#[derive(Debug, Error)]
pub enum ServeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Mcp(#[from] McpError),

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("HTTP server error: {0}")]
    Io(#[from] std::io::Error),
}

/// Build the production state: rmcp connections and the configured model
pub fn build_state(config: &AppConfig) -> Result<AppState, ServeError> {
    let registry = RegistryStore::new(&config.servers_file)?;
    let manager = ConnectionManager::with_rmcp(config.connection.clone());
    let model = Arc::new(OpenAiCompatModel::new(config.model.clone()));
    Ok(AppState::new(
        registry,
        manager,
        model,
        config.orchestrator.clone(),
    ))
}

/// Run the service until SIGINT or SIGTERM
pub async fn serve(config: AppConfig) -> Result<ShutdownReport, ServeError> {
    let state = build_state(&config)?;
    let listener = TcpListener::bind(config.bind_addr)
        .await
        .map_err(|source| ServeError::Bind {
            addr: config.bind_addr,
            source,
        })?;
    serve_with_shutdown(state, listener, config.enable_cors, shutdown_signal()).await
}

/// Run the service on `listener` until `shutdown` completes
pub async fn serve_with_shutdown<F>(
    state: AppState,
    listener: TcpListener,
    enable_cors: bool,
    shutdown: F,
) -> Result<ShutdownReport, ServeError>
where
    F: Future<Output = ()> + Send + 'static,
{
    info!(
        path = %state.registry.path().display(),
        source = ?state.registry.source(),
        "Loading tool-server registry"
    );
    let definitions = state.registry.list()?;
    let report = state.manager.reconcile(definitions).await?;
    log_reconcile(&report);

    let manager = state.manager.clone();
    let local_addr = listener.local_addr()?;
    info!(addr = %local_addr, "Canary listening");

    axum::serve(listener, router(state, enable_cors))
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("HTTP server stopped; closing tool-server connections");
    let report = manager.shutdown().await;
    if report.is_clean() {
        info!(closed = report.closed.len(), "All connections closed");
    } else {
        for (server_id, error) in &report.failures {
            warn!(%server_id, %error, "Connection did not close cleanly");
        }
    }
    Ok(report)
}
