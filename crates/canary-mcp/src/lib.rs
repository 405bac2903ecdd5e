//! # Canary MCP - Tool-Server Connections
//!
//! Keeps one live MCP client session per registry definition and merges the
//! tool catalogs of every ready session into one collision-resolved snapshot.
//!
//! ## Features
//!
//! - **Connection Manager**: connect, handshake, bounded retry with backoff,
//!   transport-loss detection, reconnect and deterministic shutdown
//! - **Tool Catalog**: immutable, copy-on-write snapshot of every ready tool
//! - **Notifications**: server log messages re-emitted as `tracing` events and
//!   broadcast as [`ToolLogEvent`]s
//! - **Pluggable transport**: rmcp by default, any [`Connector`] in tests
//!
//! ## Example
//!
//! ```rust,no_run
//! use canary_mcp::{ConnectionManager, ConnectionPolicy};
//! use canary_registry::RegistryStore;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = RegistryStore::new("./mcp-servers.json")?;
//!     let manager = ConnectionManager::with_rmcp(ConnectionPolicy::default());
//!     manager.reconcile(store.list()?).await?;
//!     manager.wait_until_settled(Duration::from_secs(30)).await;
//!
//!     for tool in manager.catalog().tools() {
//!         println!("{} ({})", tool.name(), tool.owning_server_id());
//!     }
//!
//!     let report = manager.shutdown().await;
//!     assert!(report.is_clean());
//!     Ok(())
//! }
//! ```

pub mod catalog;
pub mod error;
pub mod manager;
pub mod notifications;
pub mod policy;
pub mod rmcp_client;
pub mod session;
pub mod state;

pub use catalog::{LiveSession, ToolCatalog, ToolConflict, ToolHandle};
pub use error::{McpError, McpResult};
pub use manager::{ConnectionManager, ReconcileReport, ShutdownReport};
pub use notifications::ToolLogEvent;
pub use policy::ConnectionPolicy;
pub use rmcp_client::{NotificationForwarder, RmcpConnector, RmcpSession, wrap_for_platform};
pub use session::{
    Connector, Handshake, NotificationReceiver, NotificationSink, ServerNotification, ToolSession,
    ToolSpec,
};
pub use state::{ConnectionState, ConnectionStatus, StateTransition};
