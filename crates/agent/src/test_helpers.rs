//! Scripted collaborators for tests and demos.
//!
//! [`ScriptedProvider`] replays canned model turns as a stream, one turn per
//! request; [`EchoTool`] echoes its input and counts invocations.

use async_trait::async_trait;
use conductor_core::{
    CancellationToken, EventStream, Provider, ProviderError, ProviderRequest, StreamEvent, TokenUsage, Tool,
    ToolContext, ToolError, ToolOutput,
};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;

/// One canned model response.
#[derive(Debug, Clone)]
pub enum ScriptedTurn {
    /// Replayed in order, then the stream closes
    Events(Vec<StreamEvent>),
    /// `stream` itself fails
    Fail(ProviderError),
    /// The stream stays open and silent until cancelled
    Stall,
}

impl ScriptedTurn {
    /// A plain text answer, streamed in two chunks.
    pub fn text(text: &str) -> Self {
        let split = text.char_indices().nth(text.chars().count() / 2).map_or(text.len(), |(i, _)| i);
        let (head, tail) = text.split_at(split);
        let mut events = Vec::new();
        for chunk in [head, tail] {
            if !chunk.is_empty() {
                events.push(StreamEvent::TextDelta { text: chunk.into() });
            }
        }
        events.push(StreamEvent::Usage {
            usage: TokenUsage::new(10, 5),
        });
        events.push(StreamEvent::Done {
            stop_reason: "end_turn".into(),
        });
        Self::Events(events)
    }

    /// A single tool request.
    pub fn tool_use(id: &str, name: &str, input: Value) -> Self {
        Self::tool_uses(vec![(id, name, input)])
    }

    /// Several tool requests in one turn.
    pub fn tool_uses(calls: Vec<(&str, &str, Value)>) -> Self {
        let mut events: Vec<StreamEvent> = calls
            .into_iter()
            .map(|(id, name, input)| StreamEvent::ToolUse {
                id: id.into(),
                name: name.into(),
                input,
            })
            .collect();
        events.push(StreamEvent::Usage {
            usage: TokenUsage::new(10, 5),
        });
        events.push(StreamEvent::Done {
            stop_reason: "tool_use".into(),
        });
        Self::Events(events)
    }

    /// Replace the turn's usage report.
    pub fn with_usage(self, usage: TokenUsage) -> Self {
        match self {
            Self::Events(events) => Self::Events(
                events
                    .into_iter()
                    .map(|event| match event {
                        StreamEvent::Usage { .. } => StreamEvent::Usage { usage },
                        other => other,
                    })
                    .collect(),
            ),
            other => other,
        }
    }
}

/// A provider that replays scripted turns.
///
/// Requests for a model with its own script (see
/// [`with_model_script`](Self::with_model_script)) draw from that script,
/// everything else from the default one. Running out of turns is an API error.
pub struct ScriptedProvider {
    turns: Mutex<VecDeque<ScriptedTurn>>,
    by_model: Mutex<HashMap<String, VecDeque<ScriptedTurn>>>,
    requests: Mutex<Vec<ProviderRequest>>,
    call_count: AtomicUsize,
    delay: Option<Duration>,
}

impl ScriptedProvider {
    pub fn new(turns: Vec<ScriptedTurn>) -> Self {
        Self {
            turns: Mutex::new(turns.into()),
            by_model: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
            call_count: AtomicUsize::new(0),
            delay: None,
        }
    }

    /// Provider that answers once with `text`.
    pub fn single_text(text: &str) -> Self {
        Self::new(vec![ScriptedTurn::text(text)])
    }

    pub fn with_model_script(self, model: impl Into<String>, turns: Vec<ScriptedTurn>) -> Self {
        self.by_model
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(model.into(), turns.into());
        self
    }

    /// Pause before each streamed event.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Every request received so far.
    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn next_turn(&self, model: &str) -> Option<ScriptedTurn> {
        let mut by_model = self.by_model.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(script) = by_model.get_mut(model) {
            return script.pop_front();
        }
        drop(by_model);
        self.turns.lock().unwrap_or_else(PoisonError::into_inner).pop_front()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn stream(&self, request: ProviderRequest, cancel: CancellationToken) -> Result<EventStream, ProviderError> {
        let call = self.call_count.fetch_add(1, Ordering::SeqCst) + 1;
        let model = request.model.clone();
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request);

        let turn = self.next_turn(&model).ok_or_else(|| ProviderError::ApiError {
            status_code: 500,
            message: format!("no scripted response left (call #{call})"),
        })?;

        let (tx, rx) = mpsc::channel(16);
        match turn {
            ScriptedTurn::Fail(error) => return Err(error),
            ScriptedTurn::Stall => {
                tokio::spawn(async move {
                    cancel.cancelled().await;
                    drop(tx);
                });
            }
            ScriptedTurn::Events(events) => {
                let delay = self.delay;
                tokio::spawn(async move {
                    for event in events {
                        if let Some(delay) = delay {
                            tokio::time::sleep(delay).await;
                        }
                        if cancel.is_cancelled() || tx.send(Ok(event)).await.is_err() {
                            return;
                        }
                    }
                });
            }
        }
        Ok(rx)
    }
}

/// Echoes `input.text` (or the whole input) and counts calls.
pub struct EchoTool {
    name: String,
    calls: AtomicUsize,
}

impl EchoTool {
    pub fn new() -> Self {
        Self::named("echo")
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for EchoTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Echoes back the input"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": { "text": { "type": "string" } }
        })
    }

    async fn execute(&self, input: Value, _ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match input.get("text").and_then(Value::as_str) {
            Some(text) => Ok(ToolOutput::ok(text)),
            None => Ok(ToolOutput::ok(input.to_string())),
        }
    }
}

/// Sleeps for the given duration unless the run is cancelled first.
pub struct SleepTool {
    duration: Duration,
}

impl SleepTool {
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }
}

#[async_trait]
impl Tool for SleepTool {
    fn name(&self) -> &str {
        "sleep"
    }

    fn description(&self) -> &str {
        "Waits for a while"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({"type": "object"})
    }

    async fn execute(&self, _input: Value, ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        tokio::select! {
            _ = tokio::time::sleep(self.duration) => Ok(ToolOutput::ok("done sleeping")),
            _ = ctx.cancel.cancelled() => Err(ToolError::Cancelled("sleep".into())),
        }
    }
}
