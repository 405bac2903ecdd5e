//! OpenAI-compatible streaming chat completions client
//!
//! Speaks the `POST {base}/chat/completions` protocol with `stream: true`:
//! server-sent `data:` lines carrying JSON deltas, terminated by `[DONE]`.
//! Tool-call deltas arrive in fragments keyed by index; they are accumulated
//! and emitted once the stream ends.

use crate::error::{ChatError, ChatResult};
use crate::model::{ChatMessage, ChatModel, ModelChunk, ModelRequest, ModelStream, Role, ToolCallRequest};
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use memchr::memchr;
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use tracing::{debug, warn};

pub const DEFAULT_BASE_URL: &str = "https://open.bigmodel.cn/api/paas/v4";
pub const DEFAULT_MODEL: &str = "glm-4-flash";

/// Endpoint and sampling settings
#[derive(Debug, Clone, PartialEq)]
pub struct ModelConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub temperature: f64,
    pub max_tokens: u32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            api_key: None,
            temperature: 0.6,
            max_tokens: 2048,
        }
    }
}

/// Streaming client for any OpenAI-compatible endpoint
#[derive(Debug, Clone)]
pub struct OpenAiCompatModel {
    client: reqwest::Client,
    config: ModelConfig,
}

impl OpenAiCompatModel {
    pub fn new(config: ModelConfig) -> Self {
        Self::with_client(reqwest::Client::new(), config)
    }

    pub fn with_client(client: reqwest::Client, config: ModelConfig) -> Self {
        Self { client, config }
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }

    pub(crate) fn request_body(&self, request: &ModelRequest) -> Value {
        let mut body = json!({
            "model": self.config.model,
            "messages": request.messages.iter().map(wire_message).collect::<Vec<_>>(),
            "stream": true,
            "temperature": self.config.temperature,
            "max_tokens": self.config.max_tokens,
        });
        if !request.tools.is_empty() {
            body["tools"] = request
                .tools
                .iter()
                .map(|tool| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": tool.name,
                            "description": tool.description,
                            "parameters": tool.input_schema,
                        }
                    })
                })
                .collect();
            body["tool_choice"] = json!("auto");
        }
        body
    }
}

#[async_trait]
impl ChatModel for OpenAiCompatModel {
    async fn stream(&self, request: ModelRequest) -> ChatResult<ModelStream> {
        let body = self.request_body(&request);
        debug!(
            model = %self.config.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "Calling model"
        );

        let mut http = self
            .client
            .post(self.endpoint())
            .header("Content-Type", "application/json");
        if let Some(key) = &self.config.api_key {
            http = http.bearer_auth(key);
        }
        let response = http.json(&body).send().await?;

        let status = response.status();
        if !status.is_success() {
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "<no body>".to_string());
            return Err(ChatError::ModelCallFailed(format!(
                "HTTP {}: {}",
                status.as_u16(),
                error_summary(&text)
            )));
        }

        Ok(Box::pin(model_chunks(response.bytes_stream())))
    }
}

/// Turn a raw SSE byte stream into model chunks
pub(crate) fn model_chunks<S, B, E>(bytes: S) -> impl Stream<Item = ChatResult<ModelChunk>> + Send
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send,
    E: std::fmt::Display,
{
    async_stream::try_stream! {
        let mut bytes = Box::pin(bytes);
        let mut lines = LineBuffer::default();
        let mut calls = ToolCallAccumulator::default();
        let mut done = false;

        while !done {
            let Some(chunk) = bytes.next().await else {
                break;
            };
            let chunk = chunk.map_err(|e| ChatError::ModelCallFailed(e.to_string()))?;
            for line in lines.push(chunk.as_ref()) {
                match parse_sse_line(&line)? {
                    SseLine::Done => {
                        done = true;
                        break;
                    }
                    SseLine::Delta(delta) => {
                        if let Some(text) = delta.content.filter(|t| !t.is_empty()) {
                            yield ModelChunk::Text(text);
                        }
                        calls.absorb(delta.tool_calls);
                    }
                    SseLine::Skip => {}
                }
            }
        }
        if !done {
            for line in lines.finish() {
                if let SseLine::Delta(delta) = parse_sse_line(&line)? {
                    if let Some(text) = delta.content.filter(|t| !t.is_empty()) {
                        yield ModelChunk::Text(text);
                    }
                    calls.absorb(delta.tool_calls);
                }
            }
        }

        for call in calls.finish() {
            yield ModelChunk::ToolCall(call);
        }
    }
}

fn wire_message(message: &ChatMessage) -> Value {
    match message.role {
        Role::System => json!({"role": "system", "content": message.content}),
        Role::User => json!({"role": "user", "content": message.content}),
        Role::Assistant if message.tool_calls.is_empty() => {
            json!({"role": "assistant", "content": message.content})
        }
        Role::Assistant => json!({
            "role": "assistant",
            "content": if message.content.is_empty() { Value::Null } else { json!(message.content) },
            "tool_calls": message.tool_calls.iter().map(|call| json!({
                "id": call.id,
                "type": "function",
                "function": {
                    "name": call.name,
                    "arguments": call.arguments.to_string(),
                }
            })).collect::<Vec<_>>(),
        }),
        Role::Tool => json!({
            "role": "tool",
            "tool_call_id": message.tool_call_id,
            "content": message.content,
        }),
    }
}

// ---------------------------------------------------------------------------
// SSE parsing
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Option<Delta>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct Delta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ToolCallDelta>,
}

#[derive(Debug, Deserialize)]
struct ToolCallDelta {
    #[serde(default)]
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<FunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct FunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Debug)]
pub(crate) enum SseLine {
    Delta(Delta),
    Done,
    Skip,
}

pub(crate) fn parse_sse_line(line: &str) -> ChatResult<SseLine> {
    let Some(payload) = line.strip_prefix("data:").map(str::trim) else {
        return Ok(SseLine::Skip);
    };
    if payload == "[DONE]" {
        return Ok(SseLine::Done);
    }
    if payload.is_empty() {
        return Ok(SseLine::Skip);
    }
    let failed = || ChatError::ModelCallFailed(error_summary(payload));
    let value: Value = serde_json::from_str(payload).map_err(|_| failed())?;
    if value.get("error").is_some() {
        return Err(failed());
    }
    let chunk: StreamChunk = serde_json::from_value(value).map_err(|_| failed())?;
    Ok(chunk
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta)
        .map_or(SseLine::Skip, SseLine::Delta))
}

/// Splits a byte stream into trimmed UTF-8 lines
#[derive(Debug, Default)]
pub(crate) struct LineBuffer {
    buffer: Vec<u8>,
}

impl LineBuffer {
    pub(crate) fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(newline) = memchr(b'\n', &self.buffer) {
            match std::str::from_utf8(&self.buffer[..newline]) {
                Ok(line) => {
                    let line = line.trim();
                    if !line.is_empty() {
                        lines.push(line.to_string());
                    }
                }
                Err(e) => warn!(error = %e, "Invalid UTF-8 in model stream"),
            }
            self.buffer.drain(..=newline);
        }
        lines
    }

    pub(crate) fn finish(&mut self) -> Vec<String> {
        let rest = std::mem::take(&mut self.buffer);
        match String::from_utf8(rest) {
            Ok(line) if !line.trim().is_empty() => vec![line.trim().to_string()],
            _ => Vec::new(),
        }
    }
}

#[derive(Debug, Default)]
struct PartialCall {
    id: Option<String>,
    name: String,
    arguments: String,
}

/// Reassembles fragmented tool-call deltas by index
#[derive(Debug, Default)]
pub(crate) struct ToolCallAccumulator {
    calls: BTreeMap<usize, PartialCall>,
}

impl ToolCallAccumulator {
    fn absorb(&mut self, deltas: Vec<ToolCallDelta>) {
        for delta in deltas {
            let call = self.calls.entry(delta.index).or_default();
            if let Some(id) = delta.id.filter(|id| !id.is_empty()) {
                call.id = Some(id);
            }
            if let Some(function) = delta.function {
                if let Some(name) = function.name {
                    call.name.push_str(&name);
                }
                if let Some(arguments) = function.arguments {
                    call.arguments.push_str(&arguments);
                }
            }
        }
    }

    pub(crate) fn finish(self) -> Vec<ToolCallRequest> {
        self.calls
            .into_iter()
            .filter(|(_, call)| !call.name.is_empty())
            .map(|(index, call)| {
                let raw = call.arguments.trim();
                let arguments = if raw.is_empty() {
                    json!({})
                } else {
                    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
                };
                ToolCallRequest {
                    id: call.id.unwrap_or_else(|| format!("call_{index}")),
                    name: call.name,
                    arguments,
                }
            })
            .collect()
    }
}

/// One-line summary of a provider error body
pub(crate) fn error_summary(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }
    let summary = serde_json::from_str::<Value>(trimmed).ok().and_then(|value| {
        value
            .pointer("/error/message")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .or_else(|| match value.get("error") {
                Some(Value::String(s)) => Some(s.clone()),
                _ => None,
            })
            .or_else(|| value.get("message").and_then(Value::as_str).map(str::to_owned))
    });
    summary
        .unwrap_or_else(|| trimmed.to_string())
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
