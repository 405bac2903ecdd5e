//! # Canary Testing Framework
//!
//! Deterministic stand-ins for the two external dependencies of a Canary
//! deployment: tool servers and the language model.
//!
//! ## Components
//!
//! - **Scripted Servers**: a [`ScriptedConnector`] for the connection manager,
//!   with per-server handshake failures, tool responses and transport drops
//! - **Scripted Model**: a [`ScriptedModel`] replaying queued turns, with
//!   gates for pausing a stream mid-turn
//!
//! ## Usage
//!
//! ```rust
//! use canary_mcp::{ConnectionManager, ConnectionPolicy};
//! use canary_registry::{ServerDefinition, ServerSpec};
//! use canary_testing::{ScriptedConnector, ScriptedServer};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let connector = ScriptedConnector::new()
//!     .with_server(ScriptedServer::new("graph").with_tool("neo4j_find_node", "Find a node"));
//! let manager = ConnectionManager::new(Arc::new(connector), ConnectionPolicy::default());
//!
//! let definition = ServerDefinition::new("graph", ServerSpec::process("scripted", Vec::<String>::new()));
//! manager.reconcile(vec![definition]).await.unwrap();
//! assert!(manager.wait_until_settled(Duration::from_secs(5)).await);
//! assert!(manager.catalog().get("neo4j_find_node").is_some());
//! # });
//! ```

/// Scripted model turns
pub mod scripted_model;
/// Scripted tool servers and their connector
pub mod scripted_server;

pub use scripted_model::{ModelGate, ScriptedModel, ScriptedTurn};
pub use scripted_server::{RecordedCall, ScriptedConnector, ScriptedServer, ScriptedSession};
