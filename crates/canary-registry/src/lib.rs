//! # Canary Registry
//!
//! Durable list of MCP tool-server definitions. The persisted document is the
//! source of truth; live connections are derived from it.
//!
//! ```rust,no_run
//! use canary_registry::{RegistryStore, ServerSpec};
//!
//! # fn main() -> Result<(), canary_registry::RegistryError> {
//! let store = RegistryStore::new("./mcp-servers.json")?;
//! store.upsert("search", ServerSpec::process("npx", ["-y", "websearch-mcp"]))?;
//! for definition in store.list()? {
//!     println!("{} ({})", definition.id, definition.transport().kind());
//! }
//! # Ok(())
//! # }
//! ```

mod atomic;
pub mod definition;
pub mod document;
pub mod error;
pub mod store;

pub use definition::{DEFAULT_SSE_PATH, ServerDefinition, ServerSpec, Transport};
pub use document::RegistryDocument;
pub use error::{RegistryError, RegistryResult};
pub use store::{BUNDLED_SERVERS, DEFAULT_SERVERS_FILE, RegistrySource, RegistryStore};
