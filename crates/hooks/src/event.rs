//! Hook event kinds and the records passed to and returned from hooks.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;

use crate::HookError;

/// A named interception point in a run's lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookEventKind {
    /// Before a tool runs; may deny it or rewrite its input
    PreToolUse,
    /// After a tool succeeded
    PostToolUse,
    /// After a tool returned a failed result
    PostToolUseFailure,
    /// Before the prompt is sent; may add context
    UserPromptSubmit,
    SessionStart,
    SessionEnd,
    /// The run is about to report its terminal result
    Stop,
    SubagentStart,
    SubagentStop,
    /// A model turn was appended to the conversation
    PostTurn,
}

impl HookEventKind {
    pub const ALL: [HookEventKind; 10] = [
        Self::PreToolUse,
        Self::PostToolUse,
        Self::PostToolUseFailure,
        Self::UserPromptSubmit,
        Self::SessionStart,
        Self::SessionEnd,
        Self::Stop,
        Self::SubagentStart,
        Self::SubagentStop,
        Self::PostTurn,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PreToolUse => "pre_tool_use",
            Self::PostToolUse => "post_tool_use",
            Self::PostToolUseFailure => "post_tool_use_failure",
            Self::UserPromptSubmit => "user_prompt_submit",
            Self::SessionStart => "session_start",
            Self::SessionEnd => "session_end",
            Self::Stop => "stop",
            Self::SubagentStart => "subagent_start",
            Self::SubagentStop => "subagent_stop",
            Self::PostTurn => "post_turn",
        }
    }

    /// Events whose matcher is tested against a tool name.
    pub fn is_tool_event(&self) -> bool {
        matches!(
            self,
            Self::PreToolUse | Self::PostToolUse | Self::PostToolUseFailure
        )
    }
}

impl std::fmt::Display for HookEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HookEventKind {
    type Err = HookError;

    /// Accepts `pre_tool_use` as well as `PreToolUse`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s.chars().filter(|c| *c != '_').collect::<String>().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str().replace('_', "") == normalized)
            .ok_or_else(|| HookError::UnknownEvent(s.to_string()))
    }
}

/// An immutable description of one lifecycle occurrence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HookInput {
    #[serde(rename = "hook_event_name")]
    pub event: HookEventKind,

    pub session_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_input: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_response: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_use_id: Option<String>,

    /// Event-specific fields (prompt text, stop reason, agent type, ...)
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl HookInput {
    pub fn new(event: HookEventKind, session_id: impl Into<String>) -> Self {
        Self {
            event,
            session_id: session_id.into(),
            tool_name: None,
            tool_input: None,
            tool_response: None,
            tool_use_id: None,
            extra: serde_json::Map::new(),
        }
    }

    pub fn with_tool(mut self, name: impl Into<String>, input: Value, tool_use_id: impl Into<String>) -> Self {
        self.tool_name = Some(name.into());
        self.tool_input = Some(input);
        self.tool_use_id = Some(tool_use_id.into());
        self
    }

    pub fn with_response(mut self, response: Value) -> Self {
        self.tool_response = Some(response);
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }
}

/// A hook's verdict on a pending tool invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookDecision {
    Allow,
    Deny,
}

/// What a hook hands back. Every field is optional; an all-empty output means
/// "no opinion".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HookOutput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<HookDecision>,

    /// Why the invocation was denied
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// With a deny: abort the whole run
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub interrupt: bool,

    /// Replacement for the tool input
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_input: Option<Value>,

    /// Text appended to the tool result (or prompt)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_context: Option<String>,

    /// Ends the run with this stop reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,
}

impl HookOutput {
    pub fn allow() -> Self {
        Self {
            decision: Some(HookDecision::Allow),
            ..Self::default()
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            decision: Some(HookDecision::Deny),
            reason: Some(reason.into()),
            ..Self::default()
        }
    }

    pub fn with_interrupt(mut self) -> Self {
        self.interrupt = true;
        self
    }

    pub fn with_updated_input(mut self, input: Value) -> Self {
        self.updated_input = Some(input);
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.additional_context = Some(context.into());
        self
    }

    pub fn with_stop_reason(mut self, reason: impl Into<String>) -> Self {
        self.stop_reason = Some(reason.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.decision.is_none()
            && self.updated_input.is_none()
            && self.additional_context.is_none()
            && self.stop_reason.is_none()
    }

    pub fn is_deny(&self) -> bool {
        self.decision == Some(HookDecision::Deny)
    }

    /// Fold a later output into this one.
    ///
    /// The first deny keeps its reason; interrupt flags accumulate. Input and
    /// stop-reason overrides are last-writer-wins. Context fragments are joined
    /// with newlines in order.
    pub fn merge(&mut self, next: HookOutput) {
        match (self.decision, next.decision) {
            (Some(HookDecision::Deny), Some(HookDecision::Deny)) => {
                self.interrupt |= next.interrupt;
            }
            (Some(HookDecision::Deny), _) => {}
            (_, Some(HookDecision::Deny)) => {
                self.decision = Some(HookDecision::Deny);
                self.reason = next.reason;
                self.interrupt |= next.interrupt;
            }
            (_, Some(HookDecision::Allow)) => self.decision = Some(HookDecision::Allow),
            (_, None) => {}
        }

        if next.updated_input.is_some() {
            self.updated_input = next.updated_input;
        }

        if let Some(fragment) = next.additional_context {
            self.additional_context = Some(match self.additional_context.take() {
                Some(existing) => format!("{existing}\n{fragment}"),
                None => fragment,
            });
        }

        if next.stop_reason.is_some() {
            self.stop_reason = next.stop_reason;
        }
    }
}
