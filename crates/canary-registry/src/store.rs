//! File-backed registry store
//!
//! Reads prefer the external file. While it does not exist, reads fall back
//! to the bundled default document compiled into the binary; the first write
//! creates the external file, which is authoritative from then on.

use crate::atomic::write_atomic;
use crate::definition::{ServerDefinition, ServerSpec};
use crate::document::RegistryDocument;
use crate::error::{RegistryError, RegistryResult};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info};

/// Default servers shipped with the binary
pub const BUNDLED_SERVERS: &str = include_str!("../defaults/mcp-servers.json");

/// Default external registry location
pub const DEFAULT_SERVERS_FILE: &str = "./mcp-servers.json";

/// Where the current registry contents come from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrySource {
    External,
    Bundled,
}

/// Durable list of tool-server definitions
#[derive(Debug)]
pub struct RegistryStore {
    path: PathBuf,
    bundled: RegistryDocument,
    /// Serializes writers within this process
    write_lock: Mutex<()>,
}

impl RegistryStore {
    /// Store backed by `path`, falling back to [`BUNDLED_SERVERS`]
    pub fn new(path: impl Into<PathBuf>) -> RegistryResult<Self> {
        Self::with_bundled(path, BUNDLED_SERVERS)
    }

    /// Store backed by `path` with a custom bundled default document
    pub fn with_bundled(path: impl Into<PathBuf>, bundled: &str) -> RegistryResult<Self> {
        Ok(Self {
            path: path.into(),
            bundled: RegistryDocument::parse(bundled, "bundled defaults")?,
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Which document backs reads right now
    pub fn source(&self) -> RegistrySource {
        if self.path.exists() {
            RegistrySource::External
        } else {
            RegistrySource::Bundled
        }
    }

    /// Current document, external if present else bundled
    pub fn document(&self) -> RegistryResult<RegistryDocument> {
        match std::fs::read_to_string(&self.path) {
            Ok(text) => RegistryDocument::parse(&text, &self.path.display().to_string()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "Registry file absent, using bundled defaults");
                Ok(self.bundled.clone())
            }
            Err(source) => Err(RegistryError::Read {
                path: self.path.clone(),
                source,
            }),
        }
    }

    /// All valid definitions, in document order
    pub fn list(&self) -> RegistryResult<Vec<ServerDefinition>> {
        Ok(self.document()?.definitions())
    }

    /// One definition by id
    pub fn get(&self, id: &str) -> RegistryResult<Option<ServerDefinition>> {
        self.document()?.get(id).transpose()
    }

    /// Insert or replace the definition stored under `id`
    pub fn upsert(&self, id: &str, spec: ServerSpec) -> RegistryResult<ServerDefinition> {
        spec.validate(id)?;
        self.modify(|doc| {
            doc.insert(id, &spec);
            Ok(true)
        })?;
        info!(server_id = %id, transport = spec.transport.kind(), "Registry entry saved");
        Ok(ServerDefinition::new(id, spec))
    }

    /// Remove the definition stored under `id`. Returns whether anything was removed.
    pub fn delete(&self, id: &str) -> RegistryResult<bool> {
        let removed = self.modify(|doc| Ok(doc.remove(id).is_some()))?;
        if removed {
            info!(server_id = %id, "Registry entry deleted");
        }
        Ok(removed)
    }

    /// Replace the whole registry with `definitions`
    pub fn replace_all(&self, definitions: &[ServerDefinition]) -> RegistryResult<()> {
        let doc = RegistryDocument::from_definitions(definitions)?;
        let _guard = self.lock();
        self.write(&doc)?;
        info!(count = definitions.len(), "Registry replaced");
        Ok(())
    }

    /// Read-modify-write under the writer lock. The closure reports whether
    /// it changed anything; unchanged documents are not rewritten.
    fn modify<F>(&self, apply: F) -> RegistryResult<bool>
    where
        F: FnOnce(&mut RegistryDocument) -> RegistryResult<bool>,
    {
        let _guard = self.lock();
        let mut doc = self.document()?;
        let changed = apply(&mut doc)?;
        if changed {
            self.write(&doc)?;
        }
        Ok(changed)
    }

    fn write(&self, doc: &RegistryDocument) -> RegistryResult<()> {
        write_atomic(&self.path, doc.render()?.as_bytes())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ()> {
        // The guarded unit carries no state, so a poisoned lock is still usable.
        self.write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store_in(dir: &tempfile::TempDir) -> RegistryStore {
        RegistryStore::with_bundled(
            dir.path().join("mcp-servers.json"),
            r#"{"mcpServers": {"bundled": {"command": "node", "args": ["b.js"]}}}"#,
        )
        .unwrap()
    }

    #[test]
    fn test_bundled_defaults_parse() {
        let store = RegistryStore::new("/nonexistent/dir/servers.json").unwrap();
        assert_eq!(store.source(), RegistrySource::Bundled);
        assert!(!store.list().unwrap().is_empty());
    }

    #[test]
    fn test_falls_back_until_first_write() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        assert_eq!(store.source(), RegistrySource::Bundled);
        assert_eq!(store.list().unwrap()[0].id, "bundled");

        store
            .upsert("web", ServerSpec::network("http://localhost:9000", None))
            .unwrap();
        assert_eq!(store.source(), RegistrySource::External);

        let ids: Vec<_> = store.list().unwrap().into_iter().map(|d| d.id).collect();
        assert_eq!(ids, vec!["bundled", "web"]);

        // Once the external file is authoritative, deleting everything does not resurrect defaults.
        assert!(store.delete("bundled").unwrap());
        assert!(store.delete("web").unwrap());
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn test_upsert_rejects_invalid_without_writing() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let err = store
            .upsert("bad", ServerSpec::network("not-a-url", None))
            .unwrap_err();
        assert_eq!(err.code(), "invalid_definition");
        assert_eq!(store.source(), RegistrySource::Bundled);
    }

    #[test]
    fn test_delete_missing_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        assert!(!store.delete("ghost").unwrap());
        assert_eq!(store.source(), RegistrySource::Bundled);
    }

    #[test]
    fn test_replace_all() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let defs = vec![
            ServerDefinition::new("b", ServerSpec::process("python", ["-m", "b"])),
            ServerDefinition::new("a", ServerSpec::network("https://a.example.com", None)),
        ];
        store.replace_all(&defs).unwrap();
        assert_eq!(store.list().unwrap(), defs);
    }

    #[test]
    fn test_unknown_document_fields_survive_upsert() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mcp-servers.json");
        std::fs::write(
            &path,
            r#"{"schema": "v1", "mcpServers": {"a": {"command": "x", "owner": "ops"}}}"#,
        )
        .unwrap();
        let store = RegistryStore::new(&path).unwrap();
        store
            .upsert("b", ServerSpec::process("y", Vec::<String>::new()))
            .unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["schema"], json!("v1"));
        assert_eq!(raw["mcpServers"]["a"]["owner"], json!("ops"));
    }

    #[test]
    fn test_unreadable_document_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mcp-servers.json");
        std::fs::write(&path, "{broken").unwrap();
        let store = RegistryStore::new(&path).unwrap();
        assert_eq!(store.list().unwrap_err().code(), "registry_malformed");
    }
}
