//! # Canary Chat - Streaming Orchestration
//!
//! Turns one chat request into an ordered, cancellable sequence of
//! [`StreamEvent`]s: text deltas and tool-call notices from a tool-calling
//! model pass, structured payloads pulled out of the buffered text by marker
//! extraction, and an optional answer pass that explains those payloads.
//!
//! ```rust,no_run
//! use canary_chat::{ChatRequest, ModelConfig, OpenAiCompatModel, Orchestrator, OrchestratorConfig};
//! use canary_mcp::{ConnectionManager, ConnectionPolicy};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let manager = ConnectionManager::with_rmcp(ConnectionPolicy::default());
//!     let model = Arc::new(OpenAiCompatModel::new(ModelConfig::default()));
//!     let orchestrator = Orchestrator::new(model, manager.subscribe_catalog(), OrchestratorConfig::default());
//!
//!     let mut events = orchestrator.stream(ChatRequest::new("Who does Bob know?"))?;
//!     while let Some(event) = events.recv().await {
//!         println!("{}: {}", event.name(), serde_json::to_string(&event)?);
//!     }
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod event;
pub mod markers;
pub mod model;
pub mod openai;
pub mod orchestrator;
pub mod prompts;
pub mod sink;

pub use error::{ChatError, ChatResult};
pub use event::{StreamEvent, ToolCallInfo, infer_tool_group};
pub use markers::{Marker, Payload, extract};
pub use model::{ChatMessage, ChatModel, ModelChunk, ModelRequest, ModelStream, Role, ToolCallRequest};
pub use openai::{ModelConfig, OpenAiCompatModel};
pub use orchestrator::{
    ChatReply, ChatRequest, OrchestrationRun, Orchestrator, OrchestratorConfig, Phase, RunOutcome,
};
pub use sink::{EventSink, EventStream};
