//! Tool-server definitions
//!
//! A definition names one tool server and says how to reach it: either a
//! process to launch (`command`, `args`, `env`) or a network endpoint
//! (`baseUrl`, `ssePath`). Exactly one of the two kinds must be present.
//! Fields this version does not recognise are carried through untouched so
//! that documents written by newer or older builds survive a rewrite.

use crate::error::{RegistryError, RegistryResult};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Event sub-path used for network servers that do not specify one
pub const DEFAULT_SSE_PATH: &str = "/mcp";

const MAX_ID_LEN: usize = 128;

/// How a tool server is reached
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transport {
    /// Launched as a child process speaking MCP over stdio
    Process {
        command: String,
        args: Vec<String>,
        env: BTreeMap<String, String>,
    },
    /// Reached over HTTP with server-pushed events
    Network {
        base_url: String,
        sse_path: Option<String>,
    },
}

impl Transport {
    /// Short name of the transport kind, used in logs and status output
    pub fn kind(&self) -> &'static str {
        match self {
            Transport::Process { .. } => "process",
            Transport::Network { .. } => "network",
        }
    }

    /// Full endpoint URL for network transports
    pub fn endpoint(&self) -> Option<String> {
        match self {
            Transport::Process { .. } => None,
            Transport::Network { base_url, sse_path } => {
                let path = sse_path.as_deref().unwrap_or(DEFAULT_SSE_PATH);
                Some(format!(
                    "{}/{}",
                    base_url.trim_end_matches('/'),
                    path.trim_start_matches('/')
                ))
            }
        }
    }
}

/// The connection spec stored under one id in the registry document
#[derive(Debug, Clone, PartialEq)]
pub struct ServerSpec {
    pub transport: Transport,
    /// Unrecognised fields, preserved verbatim
    pub extra: Map<String, Value>,
}

/// Permissive wire shape; validation happens after parsing so that a single
/// bad entry never poisons the whole document.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSpec {
    command: Option<String>,
    args: Option<Vec<String>>,
    env: Option<BTreeMap<String, String>>,
    base_url: Option<String>,
    sse_path: Option<String>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl ServerSpec {
    /// Process-launched server spec
    pub fn process<I, S>(command: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            transport: Transport::Process {
                command: command.into(),
                args: args.into_iter().map(Into::into).collect(),
                env: BTreeMap::new(),
            },
            extra: Map::new(),
        }
    }

    /// Network server spec
    pub fn network(base_url: impl Into<String>, sse_path: Option<String>) -> Self {
        Self {
            transport: Transport::Network {
                base_url: base_url.into(),
                sse_path,
            },
            extra: Map::new(),
        }
    }

    /// Add an environment variable to a process spec. No-op for network specs.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        if let Transport::Process { env, .. } = &mut self.transport {
            env.insert(key.into(), value.into());
        }
        self
    }

    /// Attach an unrecognised field to be preserved on rewrite
    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// Parse and validate the JSON value stored under `id`
    pub fn from_value(id: &str, value: Value) -> RegistryResult<Self> {
        if !value.is_object() {
            return Err(RegistryError::invalid(id, "definition must be a JSON object"));
        }
        let raw: RawSpec =
            serde_json::from_value(value).map_err(|e| RegistryError::invalid(id, e.to_string()))?;
        Self::from_raw(id, raw)
    }

    fn from_raw(id: &str, raw: RawSpec) -> RegistryResult<Self> {
        let mut extra = raw.extra;
        let transport = match (raw.command, raw.base_url) {
            (Some(_), Some(_)) => {
                return Err(RegistryError::invalid(
                    id,
                    "both 'command' and 'baseUrl' are set; exactly one transport is allowed",
                ));
            }
            (None, None) => {
                return Err(RegistryError::invalid(
                    id,
                    "no transport configured; set either 'command' or 'baseUrl'",
                ));
            }
            (Some(command), None) => {
                if raw.sse_path.is_some() {
                    return Err(RegistryError::invalid(
                        id,
                        "'ssePath' is only valid for network servers",
                    ));
                }
                Transport::Process {
                    command,
                    args: raw.args.unwrap_or_default(),
                    env: raw.env.unwrap_or_default(),
                }
            }
            (None, Some(base_url)) => {
                if raw.args.as_ref().is_some_and(|a| !a.is_empty())
                    || raw.env.as_ref().is_some_and(|e| !e.is_empty())
                {
                    return Err(RegistryError::invalid(
                        id,
                        "'args' and 'env' are only valid for process servers",
                    ));
                }
                // Empty process fields mean nothing here but stay in the document
                if raw.args.is_some() {
                    extra.insert("args".to_string(), Value::Array(Vec::new()));
                }
                if raw.env.is_some() {
                    extra.insert("env".to_string(), Value::Object(Map::new()));
                }
                Transport::Network {
                    base_url,
                    sse_path: raw.sse_path,
                }
            }
        };

        let spec = Self { transport, extra };
        spec.validate(id)?;
        Ok(spec)
    }

    /// Check the transport's field contents
    pub fn validate(&self, id: &str) -> RegistryResult<()> {
        validate_id(id)?;
        match &self.transport {
            Transport::Process { command, .. } => {
                if command.trim().is_empty() {
                    return Err(RegistryError::invalid(id, "'command' must not be blank"));
                }
            }
            Transport::Network { base_url, sse_path } => {
                if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
                    return Err(RegistryError::invalid(
                        id,
                        format!("'baseUrl' must be an http(s) URL, got '{base_url}'"),
                    ));
                }
                if sse_path.as_deref().is_some_and(|p| p.trim().is_empty()) {
                    return Err(RegistryError::invalid(id, "'ssePath' must not be blank"));
                }
            }
        }
        Ok(())
    }

    /// Render to the registry's wire shape
    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        match &self.transport {
            Transport::Process { command, args, env } => {
                map.insert("command".to_string(), Value::String(command.clone()));
                map.insert(
                    "args".to_string(),
                    Value::Array(args.iter().cloned().map(Value::String).collect()),
                );
                map.insert(
                    "env".to_string(),
                    Value::Object(
                        env.iter()
                            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                            .collect(),
                    ),
                );
            }
            Transport::Network { base_url, sse_path } => {
                map.insert("baseUrl".to_string(), Value::String(base_url.clone()));
                if let Some(path) = sse_path {
                    map.insert("ssePath".to_string(), Value::String(path.clone()));
                }
            }
        }
        for (key, value) in &self.extra {
            map.entry(key.clone()).or_insert_with(|| value.clone());
        }
        Value::Object(map)
    }
}

impl Serialize for ServerSpec {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

/// A named tool-server definition
#[derive(Debug, Clone, PartialEq)]
pub struct ServerDefinition {
    pub id: String,
    pub spec: ServerSpec,
}

impl ServerDefinition {
    pub fn new(id: impl Into<String>, spec: ServerSpec) -> Self {
        Self {
            id: id.into(),
            spec,
        }
    }

    pub fn transport(&self) -> &Transport {
        &self.spec.transport
    }

    pub fn validate(&self) -> RegistryResult<()> {
        self.spec.validate(&self.id)
    }
}

fn validate_id(id: &str) -> RegistryResult<()> {
    if id.is_empty() {
        return Err(RegistryError::invalid(id, "id must not be empty"));
    }
    if id.trim() != id {
        return Err(RegistryError::invalid(
            id,
            "id must not have surrounding whitespace",
        ));
    }
    if id.len() > MAX_ID_LEN {
        return Err(RegistryError::invalid(
            id,
            format!("id must be at most {MAX_ID_LEN} characters"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[test]
    fn test_process_spec_parses_with_defaults() {
        let spec = ServerSpec::from_value("neo4j", json!({"command": "java"})).unwrap();
        assert_eq!(
            spec.transport,
            Transport::Process {
                command: "java".to_string(),
                args: vec![],
                env: BTreeMap::new(),
            }
        );
    }

    #[test]
    fn test_network_spec_endpoint() {
        let spec = ServerSpec::from_value(
            "search",
            json!({"baseUrl": "http://localhost:9000/", "ssePath": "/sse"}),
        )
        .unwrap();
        assert_eq!(
            spec.transport.endpoint().as_deref(),
            Some("http://localhost:9000/sse")
        );

        let spec =
            ServerSpec::from_value("search", json!({"baseUrl": "http://localhost:9000"})).unwrap();
        assert_eq!(
            spec.transport.endpoint().as_deref(),
            Some("http://localhost:9000/mcp")
        );
    }

    #[rstest]
    #[case::both(json!({"command": "node", "baseUrl": "http://x"}))]
    #[case::neither(json!({"args": ["a"]}))]
    #[case::blank_command(json!({"command": "  "}))]
    #[case::sse_on_process(json!({"command": "node", "ssePath": "/sse"}))]
    #[case::args_on_network(json!({"baseUrl": "http://x", "args": ["a"]}))]
    #[case::bad_scheme(json!({"baseUrl": "ftp://x"}))]
    #[case::not_object(json!(["command"]))]
    #[case::wrong_type(json!({"command": 42}))]
    fn test_invalid_specs_rejected(#[case] value: Value) {
        let err = ServerSpec::from_value("srv", value).unwrap_err();
        assert!(matches!(err, RegistryError::InvalidDefinition { .. }), "{err}");
    }

    #[rstest]
    #[case("")]
    #[case(" padded")]
    fn test_invalid_ids_rejected(#[case] id: &str) {
        let err = ServerSpec::process("node", ["server.js"]).validate(id).unwrap_err();
        assert_eq!(err.code(), "invalid_definition");
    }

    #[test]
    fn test_unknown_fields_survive_rewrite() {
        let value = json!({
            "command": "npx",
            "args": ["-y", "websearch-mcp"],
            "env": {"API_KEY": "k"},
            "disabled": false,
            "x-notes": {"owner": "search-team"}
        });
        let spec = ServerSpec::from_value("web", value.clone()).unwrap();
        assert_eq!(spec.extra.get("disabled"), Some(&json!(false)));
        assert_eq!(spec.to_value(), value);
    }

    #[test]
    fn test_empty_process_fields_survive_on_network_entry() {
        let value = json!({"baseUrl": "http://localhost:9000", "args": [], "env": {}});
        let spec = ServerSpec::from_value("remote", value.clone()).unwrap();
        assert!(matches!(spec.transport, Transport::Network { .. }));
        assert_eq!(spec.to_value(), value);
    }

    #[test]
    fn test_with_env_ignored_for_network() {
        let spec = ServerSpec::network("https://tools.example.com", None).with_env("K", "V");
        assert!(matches!(spec.transport, Transport::Network { .. }));
    }
}
