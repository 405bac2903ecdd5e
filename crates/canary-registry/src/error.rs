//! Registry error types

use std::path::PathBuf;
use thiserror::Error;

/// Registry operation result type
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Errors that can occur while reading or writing the server registry
#[derive(Debug, Error)]
pub enum RegistryError {
    /// A definition failed validation and was rejected before any connection attempt
    #[error("Invalid definition for '{id}': {reason}")]
    InvalidDefinition { id: String, reason: String },

    /// The external registry file could not be read
    #[error("Failed to read registry file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The external registry file could not be replaced
    #[error("Failed to write registry file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The registry document is not shaped like `{"mcpServers": {...}}`
    #[error("Malformed registry document ({origin}): {message}")]
    Malformed { origin: String, message: String },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RegistryError {
    pub(crate) fn invalid(id: &str, reason: impl Into<String>) -> Self {
        RegistryError::InvalidDefinition {
            id: id.to_string(),
            reason: reason.into(),
        }
    }

    /// Stable machine-readable error code
    pub fn code(&self) -> &'static str {
        match self {
            RegistryError::InvalidDefinition { .. } => "invalid_definition",
            RegistryError::Read { .. } => "registry_read_failed",
            RegistryError::Write { .. } => "registry_write_failed",
            RegistryError::Malformed { .. } => "registry_malformed",
            RegistryError::Serialization(_) => "registry_serialization",
        }
    }

    /// Whether the error was caused by caller input rather than the store itself
    pub fn is_client_error(&self) -> bool {
        matches!(self, RegistryError::InvalidDefinition { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_stable() {
        assert_eq!(
            RegistryError::invalid("x", "bad").code(),
            "invalid_definition"
        );
        let err = RegistryError::Malformed {
            origin: "bundled".to_string(),
            message: "not an object".to_string(),
        };
        assert_eq!(err.code(), "registry_malformed");
        assert!(!err.is_client_error());
    }

    #[test]
    fn test_invalid_definition_message() {
        let err = RegistryError::invalid("neo4j", "no transport configured");
        assert_eq!(
            err.to_string(),
            "Invalid definition for 'neo4j': no transport configured"
        );
        assert!(err.is_client_error());
    }
}
