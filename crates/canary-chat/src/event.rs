//! Typed events produced by a chat run

use crate::markers::Marker;
use serde::Serialize;
use serde_json::Value;

/// Status texts emitted at phase boundaries
pub mod status {
    pub const THINKING: &str = "thinking";
    pub const CALLING_TOOLS: &str = "calling_tools";
    pub const ANSWERING: &str = "answering";
}

/// A tool invocation as reported to the client
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolCallInfo {
    pub tool: String,
    pub group: &'static str,
    pub args: Value,
}

impl ToolCallInfo {
    pub fn new(tool: impl Into<String>, args: Value) -> Self {
        let tool = tool.into();
        Self {
            group: infer_tool_group(&tool),
            tool,
            args,
        }
    }
}

/// Tool family inferred from the tool name
pub fn infer_tool_group(tool: &str) -> &'static str {
    if tool.starts_with("neo4j_") {
        "neo4j-crud"
    } else if tool.starts_with("mongo_") {
        "mongo-crud"
    } else if tool.starts_with("echart_") || tool.starts_with("generate_chart") {
        "echart-generate"
    } else if tool.starts_with("web_search") || tool.starts_with("search_web") {
        "web-search"
    } else {
        "unknown"
    }
}

/// One event of a run's output sequence.
///
/// `Done` and `Error` are terminal: exactly one of them ends a run that was
/// not cancelled, and nothing follows it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Status { status: String },
    TextDelta { text: String },
    ToolCall(ToolCallInfo),
    StructuredPayload { marker: Marker, json: Value },
    Error { code: &'static str, message: String },
    Done,
}

impl StreamEvent {
    pub fn status(status: &str) -> Self {
        StreamEvent::Status {
            status: status.to_string(),
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        StreamEvent::TextDelta { text: text.into() }
    }

    /// Event name on the client-facing stream
    pub fn name(&self) -> &'static str {
        match self {
            StreamEvent::Status { .. } => "status",
            StreamEvent::TextDelta { .. } => "text_delta",
            StreamEvent::ToolCall(_) => "tool_call",
            StreamEvent::StructuredPayload { .. } => "structured_payload",
            StreamEvent::Error { .. } => "error",
            StreamEvent::Done => "done",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Done | StreamEvent::Error { .. })
    }
}
