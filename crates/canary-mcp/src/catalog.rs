//! Aggregated tool catalog
//!
//! The catalog is an immutable snapshot built from every `Ready` connection.
//! It is rebuilt from scratch whenever the ready set changes and published by
//! swapping an `Arc`, so a run holds a stable view for its whole lifetime.
//!
//! When two servers report the same tool name, the server that became ready
//! most recently wins and the other tool is left out; each such conflict is
//! recorded on the snapshot and logged.

use crate::error::{McpError, McpResult};
use crate::session::{ToolSession, ToolSpec};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// A session plus the liveness flag its tool handles observe.
///
/// The flag is cleared the moment the owning connection leaves `Ready`, which
/// invalidates every handle already handed out from older snapshots.
#[derive(Clone)]
pub struct LiveSession {
    session: Arc<dyn ToolSession>,
    alive: Arc<AtomicBool>,
}

impl LiveSession {
    pub fn new(session: Arc<dyn ToolSession>) -> Self {
        Self {
            session,
            alive: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    pub fn mark_dead(&self) {
        self.alive.store(false, Ordering::Release);
    }

    pub fn session(&self) -> &Arc<dyn ToolSession> {
        &self.session
    }
}

/// One invocable tool in the catalog
#[derive(Clone)]
pub struct ToolHandle {
    spec: ToolSpec,
    server_id: String,
    session: LiveSession,
}

impl std::fmt::Debug for ToolHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolHandle")
            .field("name", &self.spec.name)
            .field("server_id", &self.server_id)
            .field("alive", &self.session.is_alive())
            .finish()
    }
}

impl ToolHandle {
    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn description(&self) -> &str {
        &self.spec.description
    }

    pub fn parameter_schema(&self) -> &Value {
        &self.spec.input_schema
    }

    pub fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    pub fn owning_server_id(&self) -> &str {
        &self.server_id
    }

    /// Invoke the tool on its owning server.
    ///
    /// Fails with `ToolUnavailable` when the owning connection has left
    /// `Ready`; the call is never redirected to another server.
    pub async fn invoke(&self, arguments: Value, timeout: Duration) -> McpResult<Value> {
        if !self.session.is_alive() {
            return Err(McpError::ToolUnavailable {
                tool: self.spec.name.clone(),
                server_id: self.server_id.clone(),
            });
        }
        debug!(tool = %self.spec.name, server_id = %self.server_id, "Invoking tool");
        match tokio::time::timeout(
            timeout,
            self.session.session().call_tool(&self.spec.name, arguments),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(McpError::timeout(
                format!("tool '{}'", self.spec.name),
                timeout,
            )),
        }
    }
}

/// A tool dropped from the catalog because another server offered the same name
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolConflict {
    pub tool: String,
    pub kept_server: String,
    pub dropped_server: String,
}

/// Everything one ready connection contributes to a rebuild
#[derive(Clone)]
pub struct CatalogSource {
    pub server_id: String,
    /// Monotonic ready order; higher became ready later
    pub ready_order: u64,
    pub session: LiveSession,
    pub tools: Vec<ToolSpec>,
}

/// Immutable, collision-resolved tool catalog
#[derive(Debug, Clone, Default)]
pub struct ToolCatalog {
    tools: BTreeMap<String, ToolHandle>,
    conflicts: Vec<ToolConflict>,
    version: u64,
}

impl ToolCatalog {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a catalog from the ready connections
    pub fn build(sources: impl IntoIterator<Item = CatalogSource>, version: u64) -> Self {
        let mut sources: Vec<_> = sources.into_iter().collect();
        sources.sort_by_key(|s| s.ready_order);

        let mut tools: BTreeMap<String, ToolHandle> = BTreeMap::new();
        let mut conflicts = Vec::new();
        for source in sources {
            for spec in source.tools {
                let handle = ToolHandle {
                    spec,
                    server_id: source.server_id.clone(),
                    session: source.session.clone(),
                };
                if let Some(previous) = tools.insert(handle.spec.name.clone(), handle) {
                    if previous.server_id != source.server_id {
                        warn!(
                            tool = %previous.spec.name,
                            kept_server = %source.server_id,
                            dropped_server = %previous.server_id,
                            "Tool name collision; keeping the most recently ready server"
                        );
                        conflicts.push(ToolConflict {
                            tool: previous.spec.name,
                            kept_server: source.server_id.clone(),
                            dropped_server: previous.server_id,
                        });
                    }
                }
            }
        }

        Self {
            tools,
            conflicts,
            version,
        }
    }

    pub fn get(&self, name: &str) -> Option<&ToolHandle> {
        self.tools.get(name)
    }

    /// Handles in name order
    pub fn tools(&self) -> impl Iterator<Item = &ToolHandle> {
        self.tools.values()
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn conflicts(&self) -> &[ToolConflict] {
        &self.conflicts
    }

    /// Rebuild counter of the snapshot
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Specs of every tool, in name order, for handing to a model
    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools.values().map(|h| h.spec.clone()).collect()
    }

    /// Invoke a tool by name
    pub async fn invoke(&self, name: &str, arguments: Value, timeout: Duration) -> McpResult<Value> {
        let handle = self
            .tools
            .get(name)
            .ok_or_else(|| McpError::ToolNotFound(name.to_string()))?;
        handle.invoke(arguments, timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct EchoSession(&'static str);

    #[async_trait]
    impl ToolSession for EchoSession {
        async fn call_tool(&self, name: &str, arguments: Value) -> McpResult<Value> {
            Ok(serde_json::json!({"server": self.0, "tool": name, "args": arguments}))
        }

        async fn closed(&self) {
            std::future::pending::<()>().await
        }

        async fn close(&self) -> McpResult<()> {
            Ok(())
        }
    }

    fn source(server: &'static str, order: u64, tools: &[&str]) -> CatalogSource {
        CatalogSource {
            server_id: server.to_string(),
            ready_order: order,
            session: LiveSession::new(Arc::new(EchoSession(server))),
            tools: tools.iter().map(|t| ToolSpec::new(*t, "")).collect(),
        }
    }

    #[test]
    fn test_union_of_sources() {
        let catalog = ToolCatalog::build(
            [source("a", 1, &["x", "y"]), source("b", 2, &["z"])],
            1,
        );
        assert_eq!(catalog.names(), vec!["x", "y", "z"]);
        assert!(catalog.conflicts().is_empty());
        assert_eq!(catalog.get("z").unwrap().owning_server_id(), "b");
    }

    #[test]
    fn test_latest_ready_wins_regardless_of_input_order() {
        let catalog = ToolCatalog::build(
            [source("late", 7, &["search"]), source("early", 3, &["search"])],
            1,
        );
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.get("search").unwrap().owning_server_id(), "late");
        assert_eq!(
            catalog.conflicts(),
            &[ToolConflict {
                tool: "search".to_string(),
                kept_server: "late".to_string(),
                dropped_server: "early".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn test_invoke_missing_and_unavailable() {
        let src = source("a", 1, &["x"]);
        let live = src.session.clone();
        let catalog = ToolCatalog::build([src], 1);

        let err = catalog
            .invoke("nope", Value::Null, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::ToolNotFound(_)));

        let ok = catalog
            .invoke("x", serde_json::json!({"q": 1}), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(ok["server"], "a");

        live.mark_dead();
        let err = catalog
            .invoke("x", Value::Null, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::ToolUnavailable { .. }));
    }
}
