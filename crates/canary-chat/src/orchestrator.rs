//! Streaming orchestrator
//!
//! Drives one chat request through two model phases:
//!
//! 1. **ToolCall**: the model sees the question and the aggregated tool
//!    catalog. Text deltas are streamed out and buffered; requested tools are
//!    invoked through the catalog and their results fed back, for a bounded
//!    number of rounds.
//! 2. **Answer**: only when marker extraction over the buffered text found a
//!    payload. A second, tool-less call turns the payloads into prose.
//!
//! Every run ends with exactly one `Done` or `Error` event, unless the client
//! disconnected, in which case the run stops at the next checkpoint and emits
//! nothing further.

use crate::error::{ChatError, ChatResult};
use crate::event::{StreamEvent, ToolCallInfo, status};
use crate::markers::{self, Marker, Payload};
use crate::model::{ChatMessage, ChatModel, ModelChunk, ModelRequest, ToolCallRequest};
use crate::prompts;
use crate::sink::{EventSink, EventStream};
use canary_mcp::{McpResult, ToolCatalog};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinError;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

const DEFAULT_CONVERSATION_ID: &str = "default";

/// Per-run limits and delivery settings
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorConfig {
    /// Cap on model-to-tool round trips in the tool-calling phase
    pub max_tool_rounds: usize,
    /// Deadline for one model call, streaming included
    pub model_timeout: Duration,
    /// Deadline for one tool invocation
    pub tool_timeout: Duration,
    /// Capacity of the per-run event channel
    pub event_buffer: usize,
    /// A blocked event write longer than this counts as a disconnect
    pub delivery_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_tool_rounds: 8,
            model_timeout: Duration::from_secs(120),
            tool_timeout: Duration::from_secs(20),
            event_buffer: 64,
            delivery_timeout: Duration::from_millis(5000),
        }
    }
}

/// Inbound chat request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
}

impl ChatRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            conversation_id: None,
        }
    }

    pub fn with_conversation_id(mut self, id: impl Into<String>) -> Self {
        self.conversation_id = Some(id.into());
        self
    }

    pub fn conversation_id(&self) -> &str {
        self.conversation_id
            .as_deref()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or(DEFAULT_CONVERSATION_ID)
    }

    pub fn validate(&self) -> ChatResult<()> {
        if self.message.trim().is_empty() {
            return Err(ChatError::InvalidRequest("message must not be blank".to_string()));
        }
        Ok(())
    }
}

/// Final answer of a non-streaming chat
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatReply {
    pub reply: String,
    pub graph_json: Option<Value>,
    pub chart_json: Option<Value>,
    pub tool_calls: Vec<ToolCallInfo>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    ToolCall,
    Answer,
    Done,
    Errored,
}

/// State of one run
#[derive(Debug, Clone)]
pub struct OrchestrationRun {
    pub run_id: Uuid,
    pub conversation_id: String,
    pub input: String,
    pub phase: Phase,
    /// Raw text of the tool-calling phase
    pub buffer: String,
    /// Final answer text
    pub answer: String,
    pub payloads: Vec<Payload>,
    pub tool_calls: Vec<ToolCallInfo>,
}

impl OrchestrationRun {
    fn new(run_id: Uuid, request: &ChatRequest) -> Self {
        Self {
            run_id,
            conversation_id: request.conversation_id().to_string(),
            input: request.message.clone(),
            phase: Phase::ToolCall,
            buffer: String::new(),
            answer: String::new(),
            payloads: Vec::new(),
            tool_calls: Vec::new(),
        }
    }

    fn enter(&mut self, phase: Phase) {
        debug!(run_id = %self.run_id, from = ?self.phase, to = ?phase, "Run phase changed");
        self.phase = phase;
    }

    pub fn into_reply(self) -> ChatReply {
        ChatReply {
            graph_json: markers::payload_for(&self.payloads, Marker::Graph).cloned(),
            chart_json: markers::payload_for(&self.payloads, Marker::Chart).cloned(),
            reply: self.answer,
            tool_calls: self.tool_calls,
        }
    }
}

/// How a run ended
#[derive(Debug)]
pub enum RunOutcome {
    Completed(OrchestrationRun),
    Failed(ChatError),
    /// The client went away; no terminal event was sent
    Cancelled,
}

#[derive(Debug, Default)]
struct Turn {
    text: String,
    tool_calls: Vec<ToolCallRequest>,
}

/// Runs chat requests against a model and the live tool catalog
#[derive(Clone)]
pub struct Orchestrator {
    model: Arc<dyn ChatModel>,
    catalog: watch::Receiver<Arc<ToolCatalog>>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    /// `catalog` is typically `ConnectionManager::subscribe_catalog()`; each
    /// run uses the snapshot current at its start.
    pub fn new(
        model: Arc<dyn ChatModel>,
        catalog: watch::Receiver<Arc<ToolCatalog>>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            model,
            catalog,
            config,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Start a run in the background and return its event stream
    pub fn stream(&self, request: ChatRequest) -> ChatResult<EventStream> {
        request.validate()?;
        let (sink, events) = EventSink::channel(self.config.event_buffer, self.config.delivery_timeout);
        let orchestrator = self.clone();
        tokio::spawn(async move {
            orchestrator.run(request, sink).await;
        });
        Ok(events)
    }

    /// Run to completion and return the final answer with its payloads
    pub async fn chat(&self, request: ChatRequest) -> ChatResult<ChatReply> {
        request.validate()?;
        let (sink, mut events) = EventSink::channel(self.config.event_buffer, self.config.delivery_timeout);
        let drain = async move { while events.recv().await.is_some() {} };
        let (outcome, ()) = tokio::join!(self.run(request, sink), drain);
        match outcome {
            RunOutcome::Completed(run) => Ok(run.into_reply()),
            RunOutcome::Failed(e) => Err(e),
            RunOutcome::Cancelled => Err(ChatError::ClientDisconnected),
        }
    }

    /// Drive one run, delivering its events to `sink`
    pub async fn run(&self, request: ChatRequest, sink: EventSink) -> RunOutcome {
        let run_id = Uuid::new_v4();
        let span = info_span!("chat_run", %run_id, conversation_id = %request.conversation_id());
        async move {
            let started = Instant::now();
            let mut run = OrchestrationRun::new(run_id, &request);
            match self.drive(&mut run, &sink).await {
                Ok(()) => {
                    if sink.finish(StreamEvent::Done).await.is_err() {
                        info!("Client disconnected before completion");
                        return RunOutcome::Cancelled;
                    }
                    run.enter(Phase::Done);
                    info!(
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        tool_calls = run.tool_calls.len(),
                        payloads = run.payloads.len(),
                        "Chat run completed"
                    );
                    RunOutcome::Completed(run)
                }
                Err(ChatError::ClientDisconnected) => {
                    info!(phase = ?run.phase, "Client disconnected; run cancelled");
                    RunOutcome::Cancelled
                }
                Err(e) => {
                    run.enter(Phase::Errored);
                    warn!(code = e.code(), error = %e, "Chat run failed");
                    let _ = sink
                        .finish(StreamEvent::Error {
                            code: e.code(),
                            message: e.to_string(),
                        })
                        .await;
                    RunOutcome::Failed(e)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn drive(&self, run: &mut OrchestrationRun, sink: &EventSink) -> ChatResult<()> {
        let cancel = sink.cancellation();
        let catalog = Arc::clone(&self.catalog.borrow());
        sink.emit(StreamEvent::status(status::THINKING)).await?;

        // Phase ToolCall
        let tools = catalog.specs();
        let mut messages = vec![
            ChatMessage::system(prompts::tool_phase_system()),
            ChatMessage::user(run.input.clone()),
        ];
        let mut tool_rounds = 0;
        loop {
            let request = ModelRequest {
                messages: messages.clone(),
                tools: tools.clone(),
            };
            let turn = self.stream_turn(request, sink, &cancel, &mut run.buffer).await?;
            if turn.tool_calls.is_empty() {
                break;
            }
            if tool_rounds >= self.config.max_tool_rounds {
                warn!(
                    max_tool_rounds = self.config.max_tool_rounds,
                    "Tool round limit reached; ending tool phase with the text so far"
                );
                break;
            }
            if tool_rounds == 0 {
                sink.emit(StreamEvent::status(status::CALLING_TOOLS)).await?;
            }
            tool_rounds += 1;

            messages.push(ChatMessage::assistant(turn.text, turn.tool_calls.clone()));
            for call in turn.tool_calls {
                let info = ToolCallInfo::new(call.name.clone(), call.arguments.clone());
                sink.emit(StreamEvent::ToolCall(info.clone())).await?;
                run.tool_calls.push(info);
                let content = self.invoke_tool(&catalog, &call, &cancel).await?;
                messages.push(ChatMessage::tool(call.id, content));
            }
        }

        run.payloads = markers::extract(&run.buffer);
        if run.payloads.is_empty() {
            debug!("No structured payload; using tool-phase text as the answer");
            run.answer = run.buffer.clone();
            return Ok(());
        }
        for payload in &run.payloads {
            sink.emit(StreamEvent::StructuredPayload {
                marker: payload.marker,
                json: payload.json.clone(),
            })
            .await?;
        }

        // Phase Answer
        run.enter(Phase::Answer);
        sink.emit(StreamEvent::status(status::ANSWERING)).await?;
        let request = ModelRequest {
            messages: vec![
                ChatMessage::system(prompts::answer_phase_system()),
                ChatMessage::user(prompts::answer_phase_user(&run.input, &run.payloads)),
            ],
            tools: Vec::new(),
        };
        let turn = self.stream_turn(request, sink, &cancel, &mut run.answer).await?;
        if !turn.tool_calls.is_empty() {
            warn!(count = turn.tool_calls.len(), "Ignoring tool calls requested in the answer phase");
        }
        Ok(())
    }

    /// Stream one model call, forwarding text deltas as they arrive
    async fn stream_turn(
        &self,
        request: ModelRequest,
        sink: &EventSink,
        cancel: &CancellationToken,
        buffer: &mut String,
    ) -> ChatResult<Turn> {
        let timeout = self.config.model_timeout;
        let deadline = Instant::now() + timeout;

        let mut stream = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ChatError::ClientDisconnected),
            started = tokio::time::timeout_at(deadline, self.model.stream(request)) => {
                started.map_err(|_| ChatError::ModelTimeout(timeout))??
            }
        };

        let mut turn = Turn::default();
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ChatError::ClientDisconnected),
                next = tokio::time::timeout_at(deadline, stream.next()) => {
                    next.map_err(|_| ChatError::ModelTimeout(timeout))?
                }
            };
            match next {
                None => break,
                Some(Err(e)) => return Err(e),
                Some(Ok(ModelChunk::Text(text))) => {
                    buffer.push_str(&text);
                    turn.text.push_str(&text);
                    sink.emit(StreamEvent::text(text)).await?;
                }
                Some(Ok(ModelChunk::ToolCall(call))) => turn.tool_calls.push(call),
            }
        }
        Ok(turn)
    }

    /// Invoke one tool; failures become a tool-error result for the model.
    ///
    /// The invocation runs on its own task so that a disconnect does not
    /// abort it; its result is then discarded.
    async fn invoke_tool(
        &self,
        catalog: &Arc<ToolCatalog>,
        call: &ToolCallRequest,
        cancel: &CancellationToken,
    ) -> ChatResult<String> {
        let task = {
            let catalog = Arc::clone(catalog);
            let name = call.name.clone();
            let arguments = call.arguments.clone();
            let timeout = self.config.tool_timeout;
            tokio::spawn(async move { catalog.invoke(&name, arguments, timeout).await })
        };

        let joined = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(tool = %call.name, "Client gone; discarding in-flight tool result");
                return Err(ChatError::ClientDisconnected);
            }
            joined = task => joined,
        };
        tool_content(&call.name, joined)
    }
}

/// Message content for a finished tool task. Tool errors go back to the model
/// as a JSON error object; a task that died ends the run.
fn tool_content(name: &str, joined: Result<McpResult<Value>, JoinError>) -> ChatResult<String> {
    let result =
        joined.map_err(|e| ChatError::Internal(format!("tool task for '{name}' failed: {e}")))?;
    Ok(match result {
        Ok(Value::String(text)) => text,
        Ok(value) => value.to_string(),
        Err(e) => {
            warn!(tool = %name, code = e.code(), error = %e, "Tool invocation failed");
            json!({"error": {"code": e.code(), "message": e.to_string()}}).to_string()
        }
    })
}
