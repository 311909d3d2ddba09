//! Run events and the terminal result.
//!
//! `AgentEvent` is what an embedder sees on a run's event stream. Every run
//! ends with exactly one `result` event carrying a [`RunResult`].

use conductor_core::{Message, PermissionMode};
use conductor_telemetry::UsageSummary;
use serde::{Deserialize, Serialize};

/// Events emitted while a run executes, in order.
///
/// - `init`          : run configuration, emitted once before the first turn
/// - `text_delta`    : partial text (only with partial messages enabled)
/// - `thinking_delta`: partial reasoning (only with partial messages enabled)
/// - `assistant`     : one complete model turn
/// - `tool_use`      : a tool invocation is about to be evaluated
/// - `tool_result`   : the result recorded for that invocation
/// - `task_started`  : a background subagent was launched
/// - `result`        : terminal outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    Init {
        session_id: String,
        model: String,
        tools: Vec<String>,
        permission_mode: PermissionMode,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        agents: Vec<String>,
    },

    TextDelta { text: String },

    ThinkingDelta { thinking: String },

    Assistant { message: Message },

    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },

    ToolResult {
        tool_use_id: String,
        name: String,
        content: String,
        is_error: bool,
    },

    TaskStarted {
        task_id: String,
        agent_type: String,
        description: String,
    },

    Result(RunResult),
}

impl AgentEvent {
    /// Wire name of this event.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Init { .. } => "init",
            Self::TextDelta { .. } => "text_delta",
            Self::ThinkingDelta { .. } => "thinking_delta",
            Self::Assistant { .. } => "assistant",
            Self::ToolUse { .. } => "tool_use",
            Self::ToolResult { .. } => "tool_result",
            Self::TaskStarted { .. } => "task_started",
            Self::Result(_) => "result",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Result(_))
    }
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Success,
    Aborted,
    MaxTurnsExceeded,
    MaxBudgetExceeded,
    ExecutionError,
}

impl RunOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Aborted => "aborted",
            Self::MaxTurnsExceeded => "max_turns_exceeded",
            Self::MaxBudgetExceeded => "max_budget_exceeded",
            Self::ExecutionError => "execution_error",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

impl std::fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal summary of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub outcome: RunOutcome,
    pub session_id: String,
    /// Final assistant text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,
    pub turns: u32,
    pub usage: UsageSummary,
    pub duration_ms: u64,
    /// Non-empty exactly when the outcome is not `success`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl RunResult {
    pub fn is_error(&self) -> bool {
        !self.outcome.is_success()
    }

    pub fn text(&self) -> &str {
        self.result.as_deref().unwrap_or("")
    }

    pub fn cost_usd(&self) -> f64 {
        self.usage.cost_usd
    }
}
