//! # Scripted Model
//!
//! A [`ChatModel`] that replays queued turns. Each call to `stream` pops the
//! next turn; a turn can emit text, request tools, park on a [`ModelGate`]
//! until the test opens it, or fail partway through.

use async_trait::async_trait;
use canary_chat::{
    ChatError, ChatModel, ChatResult, ModelChunk, ModelRequest, ModelStream, ToolCallRequest,
};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

/// A pause point inside a scripted turn
#[derive(Debug, Clone, Default)]
pub struct ModelGate {
    notify: Arc<Notify>,
}

impl ModelGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Let the parked turn continue
    pub fn open(&self) {
        self.notify.notify_one();
    }

    async fn wait(&self) {
        self.notify.notified().await;
    }
}

#[derive(Debug, Clone)]
enum Step {
    Text(String),
    ToolCall(ToolCallRequest),
    Wait(ModelGate),
    Fail(String),
}

/// One scripted model call
#[derive(Debug, Clone, Default)]
pub struct ScriptedTurn {
    steps: Vec<Step>,
    refuse: Option<String>,
}

impl ScriptedTurn {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(mut self, delta: impl Into<String>) -> Self {
        self.steps.push(Step::Text(delta.into()));
        self
    }

    pub fn tool_call(mut self, id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        self.steps.push(Step::ToolCall(ToolCallRequest {
            id: id.into(),
            name: name.into(),
            arguments,
        }));
        self
    }

    /// Park until `gate` is opened
    pub fn wait(mut self, gate: &ModelGate) -> Self {
        self.steps.push(Step::Wait(gate.clone()));
        self
    }

    /// Fail mid-stream after the preceding steps
    pub fn error(mut self, message: impl Into<String>) -> Self {
        self.steps.push(Step::Fail(message.into()));
        self
    }
}

/// Model replaying [`ScriptedTurn`]s in order
#[derive(Clone, Default)]
pub struct ScriptedModel {
    turns: Arc<Mutex<VecDeque<ScriptedTurn>>>,
    requests: Arc<Mutex<Vec<ModelRequest>>>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a turn that streams the given deltas
    pub fn then_text<I, S>(self, deltas: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let turn = deltas
            .into_iter()
            .fold(ScriptedTurn::new(), |turn, delta| turn.text(delta));
        self.then_turn(turn)
    }

    pub fn then_turn(self, turn: ScriptedTurn) -> Self {
        self.turns.lock().unwrap().push_back(turn);
        self
    }

    /// Queue a call that fails before streaming anything
    pub fn then_failure(self, message: impl Into<String>) -> Self {
        self.then_turn(ScriptedTurn {
            steps: Vec::new(),
            refuse: Some(message.into()),
        })
    }

    /// Number of model calls made so far
    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// Every request received, in order
    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    async fn stream(&self, request: ModelRequest) -> ChatResult<ModelStream> {
        self.requests.lock().unwrap().push(request);
        let turn = self.turns.lock().unwrap().pop_front();
        let Some(turn) = turn else {
            return Err(ChatError::ModelCallFailed("no scripted turns left".to_string()));
        };
        if let Some(message) = turn.refuse {
            return Err(ChatError::ModelCallFailed(message));
        }

        let stream = async_stream::stream! {
            for step in turn.steps {
                match step {
                    Step::Text(delta) => yield Ok(ModelChunk::Text(delta)),
                    Step::ToolCall(call) => yield Ok(ModelChunk::ToolCall(call)),
                    Step::Wait(gate) => gate.wait().await,
                    Step::Fail(message) => {
                        yield Err(ChatError::ModelCallFailed(message));
                        break;
                    }
                }
            }
        };
        Ok(Box::pin(stream))
    }
}
