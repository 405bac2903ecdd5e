//! # Canary
//!
//! Tool-server orchestration for streaming, tool-using chat.
//!
//! - [`registry`]: durable list of MCP tool-server definitions
//! - [`mcp`]: one live session per definition, merged into a collision-resolved
//!   tool catalog
//! - [`chat`]: marker extraction and the two-phase streaming orchestrator
//! - [`http`]: SSE delivery, registry administration and service startup

pub use canary_chat as chat;
pub use canary_http as http;
pub use canary_mcp as mcp;
pub use canary_registry as registry;

pub use canary_chat::{ChatRequest, Orchestrator, StreamEvent};
pub use canary_mcp::{ConnectionManager, ToolCatalog};
pub use canary_registry::{RegistryStore, ServerDefinition, ServerSpec};
