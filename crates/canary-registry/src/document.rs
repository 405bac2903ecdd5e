//! Whole-document view of the registry file
//!
//! The document is an ordered mapping under `mcpServers`. Entries are kept as
//! raw JSON so that unrecognised fields (and entries this build cannot
//! validate) round-trip untouched; typed access validates on the way out.

use crate::definition::{ServerDefinition, ServerSpec};
use crate::error::{RegistryError, RegistryResult};
use serde_json::{Map, Value};
use tracing::warn;

const SERVERS_KEY: &str = "mcpServers";

/// Parsed registry document
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegistryDocument {
    servers: Map<String, Value>,
    /// Top-level keys other than `mcpServers`
    rest: Map<String, Value>,
    /// Position of `mcpServers` among the top-level keys; first when absent
    servers_at: usize,
}

impl RegistryDocument {
    /// Parse a document. Empty input is an empty registry.
    pub fn parse(text: &str, origin: &str) -> RegistryResult<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        let malformed = |message: String| RegistryError::Malformed {
            origin: origin.to_string(),
            message,
        };
        let value: Value = serde_json::from_str(text).map_err(|e| malformed(e.to_string()))?;
        let Value::Object(mut rest) = value else {
            return Err(malformed("top-level value must be an object".to_string()));
        };
        let servers_at = rest.keys().position(|key| key == SERVERS_KEY).unwrap_or(0);
        let servers = match rest.shift_remove(SERVERS_KEY) {
            None => Map::new(),
            Some(Value::Object(servers)) => servers,
            Some(_) => return Err(malformed(format!("'{SERVERS_KEY}' must be an object"))),
        };
        Ok(Self {
            servers,
            rest,
            servers_at,
        })
    }

    /// Build a document holding exactly `definitions`, in order
    pub fn from_definitions(definitions: &[ServerDefinition]) -> RegistryResult<Self> {
        let mut doc = Self::default();
        for definition in definitions {
            definition.validate()?;
            doc.insert(&definition.id, &definition.spec);
        }
        Ok(doc)
    }

    /// Pretty-printed JSON text
    pub fn render(&self) -> RegistryResult<String> {
        let mut text = serde_json::to_string_pretty(&self.to_value())?;
        text.push('\n');
        Ok(text)
    }

    /// Raw JSON value of the whole document
    pub fn to_value(&self) -> Value {
        let at = self.servers_at.min(self.rest.len());
        let mut root = Map::new();
        for (index, (key, value)) in self.rest.iter().enumerate() {
            if index == at {
                root.insert(SERVERS_KEY.to_string(), Value::Object(self.servers.clone()));
            }
            root.insert(key.clone(), value.clone());
        }
        if at == self.rest.len() {
            root.insert(SERVERS_KEY.to_string(), Value::Object(self.servers.clone()));
        }
        Value::Object(root)
    }

    /// Ids in document order, including entries that fail validation
    pub fn ids(&self) -> Vec<String> {
        self.servers.keys().cloned().collect()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.servers.contains_key(id)
    }

    /// Valid definitions in document order. Invalid entries are skipped and logged.
    pub fn definitions(&self) -> Vec<ServerDefinition> {
        self.servers
            .iter()
            .filter_map(|(id, value)| match ServerSpec::from_value(id, value.clone()) {
                Ok(spec) => Some(ServerDefinition::new(id.clone(), spec)),
                Err(error) => {
                    warn!(server_id = %id, %error, "Skipping invalid registry entry");
                    None
                }
            })
            .collect()
    }

    /// Typed lookup of one entry
    pub fn get(&self, id: &str) -> Option<RegistryResult<ServerDefinition>> {
        let value = self.servers.get(id)?;
        Some(
            ServerSpec::from_value(id, value.clone())
                .map(|spec| ServerDefinition::new(id.to_string(), spec)),
        )
    }

    /// Insert or replace an entry. New ids are appended; existing ids keep their position.
    pub fn insert(&mut self, id: &str, spec: &ServerSpec) {
        self.servers.insert(id.to_string(), spec.to_value());
    }

    /// Remove an entry, returning its raw value
    pub fn remove(&mut self, id: &str) -> Option<Value> {
        self.servers.shift_remove(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_preserves_order_and_unknown_keys() {
        let text = r#"{
            "version": 2,
            "mcpServers": {
                "zeta": {"command": "z"},
                "alpha": {"baseUrl": "http://a"},
                "mid": {"command": "m", "timeoutMs": 500}
            }
        }"#;
        let doc = RegistryDocument::parse(text, "test").unwrap();
        assert_eq!(doc.ids(), vec!["zeta", "alpha", "mid"]);
        let rendered = RegistryDocument::parse(&doc.render().unwrap(), "test").unwrap();
        assert_eq!(rendered.to_value()["version"], json!(2));
        assert_eq!(
            rendered.to_value()["mcpServers"]["mid"]["timeoutMs"],
            json!(500)
        );
    }

    #[test]
    fn test_rewrite_keeps_top_level_key_order() {
        let text = r#"{
            "version": 2,
            "mcpServers": {"graph": {"command": "node"}},
            "x-owner": "platform"
        }"#;
        let mut doc = RegistryDocument::parse(text, "test").unwrap();
        doc.insert("web", &ServerSpec::network("http://localhost:9000", None));
        let keys: Vec<_> = doc.to_value().as_object().unwrap().keys().cloned().collect();
        assert_eq!(keys, vec!["version", "mcpServers", "x-owner"]);

        let reparsed = RegistryDocument::parse(&doc.render().unwrap(), "test").unwrap();
        let keys: Vec<_> = reparsed.to_value().as_object().unwrap().keys().cloned().collect();
        assert_eq!(keys, vec!["version", "mcpServers", "x-owner"]);
        assert_eq!(reparsed.ids(), vec!["graph", "web"]);

        // A document without the key gains it in front
        let doc = RegistryDocument::parse(r#"{"version": 1}"#, "test").unwrap();
        let keys: Vec<_> = doc.to_value().as_object().unwrap().keys().cloned().collect();
        assert_eq!(keys, vec!["mcpServers", "version"]);
    }

    #[test]
    fn test_network_entry_keeps_empty_args_on_rewrite() {
        let text = r#"{"mcpServers": {"remote": {"baseUrl": "http://localhost:9000", "args": []}}}"#;
        let mut doc = RegistryDocument::parse(text, "test").unwrap();
        let remote = doc.get("remote").unwrap().unwrap();
        doc.insert("remote", &remote.spec);
        assert_eq!(
            doc.to_value()["mcpServers"]["remote"],
            json!({"baseUrl": "http://localhost:9000", "args": []})
        );
    }

    #[test]
    fn test_invalid_entries_skipped_but_kept() {
        let text = r#"{"mcpServers": {"bad": {"args": []}, "good": {"command": "node"}}}"#;
        let mut doc = RegistryDocument::parse(text, "test").unwrap();
        let defs = doc.definitions();
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].id, "good");

        doc.insert("other", &ServerSpec::process("python", ["-m", "srv"]));
        assert_eq!(doc.ids(), vec!["bad", "good", "other"]);
        assert!(matches!(doc.get("bad"), Some(Err(_))));
    }

    #[test]
    fn test_replace_keeps_position() {
        let text = r#"{"mcpServers": {"a": {"command": "1"}, "b": {"command": "2"}}}"#;
        let mut doc = RegistryDocument::parse(text, "test").unwrap();
        doc.insert("a", &ServerSpec::process("3", Vec::<String>::new()));
        assert_eq!(doc.ids(), vec!["a", "b"]);
        assert!(doc.remove("a").is_some());
        assert!(doc.remove("a").is_none());
        assert_eq!(doc.ids(), vec!["b"]);
    }

    #[test]
    fn test_malformed_documents() {
        assert!(RegistryDocument::parse("[]", "t").is_err());
        assert!(RegistryDocument::parse(r#"{"mcpServers": []}"#, "t").is_err());
        assert!(RegistryDocument::parse("{not json", "t").is_err());
        assert_eq!(RegistryDocument::parse("  \n", "t").unwrap().ids().len(), 0);
    }
}
