//! The policy gate: decides whether a requested tool invocation may run.
//!
//! Evaluation order:
//! 1. deny rules (every mode)
//! 2. `BypassPermissions` allows
//! 3. `Plan` allows the safe set and denies everything else
//! 4. allow rules
//! 5. the safe set
//! 6. the edit set under `AcceptEdits`
//! 7. the decision callback, or allow when none is registered

use async_trait::async_trait;
use conductor_config::PermissionsConfig;
use conductor_core::PermissionMode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use crate::PolicyError;
use crate::rule::PermissionRule;

/// Side-effect-free tools that are always allowed (unless a deny rule says otherwise).
pub const SAFE_TOOLS: &[&str] = &[
    "Read",
    "Glob",
    "Grep",
    "LS",
    "NotebookRead",
    "WebFetch",
    "WebSearch",
    "TaskOutput",
];

/// File-edit tools allowed without asking under `AcceptEdits`.
pub const EDIT_TOOLS: &[&str] = &["Edit", "MultiEdit", "Write", "NotebookEdit"];

/// The outcome of a permission check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "behavior", rename_all = "snake_case")]
pub enum PermissionDecision {
    Allow {
        /// Replacement for the tool input
        #[serde(default, skip_serializing_if = "Option::is_none")]
        updated_input: Option<Value>,
    },
    Deny {
        message: String,
        /// Abort the whole run, not just this invocation
        #[serde(default)]
        interrupt: bool,
    },
}

impl PermissionDecision {
    pub fn allow() -> Self {
        Self::Allow { updated_input: None }
    }

    pub fn allow_with_input(input: Value) -> Self {
        Self::Allow {
            updated_input: Some(input),
        }
    }

    pub fn deny(message: impl Into<String>) -> Self {
        Self::Deny {
            message: message.into(),
            interrupt: false,
        }
    }

    pub fn deny_and_interrupt(message: impl Into<String>) -> Self {
        Self::Deny {
            message: message.into(),
            interrupt: true,
        }
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow { .. })
    }
}

/// What the decision callback is asked about.
#[derive(Debug, Clone, Serialize)]
pub struct PermissionRequest {
    pub tool_name: String,
    pub input: Value,
    pub tool_use_id: String,
    pub session_id: String,
    pub mode: PermissionMode,
}

/// Caller-supplied decision for tools the static policy leaves open.
#[async_trait]
pub trait PermissionCallback: Send + Sync {
    async fn decide(&self, request: &PermissionRequest) -> PermissionDecision;
}

/// Static rules plus an optional callback. Read-only after construction.
#[derive(Clone, Default)]
pub struct PolicyGate {
    allow: Vec<PermissionRule>,
    deny: Vec<PermissionRule>,
    callback: Option<Arc<dyn PermissionCallback>>,
}

impl PolicyGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a gate from settings-file rule lists.
    pub fn from_config(config: &PermissionsConfig) -> Result<Self, PolicyError> {
        Self::new().with_rules(&config.allow, &config.deny)
    }

    pub fn with_rules<S: AsRef<str>>(mut self, allow: &[S], deny: &[S]) -> Result<Self, PolicyError> {
        for rule in allow {
            self.allow.push(PermissionRule::parse(rule.as_ref())?);
        }
        for rule in deny {
            self.deny.push(PermissionRule::parse(rule.as_ref())?);
        }
        Ok(self)
    }

    pub fn with_callback(mut self, callback: Arc<dyn PermissionCallback>) -> Self {
        self.callback = Some(callback);
        self
    }

    pub fn has_callback(&self) -> bool {
        self.callback.is_some()
    }

    /// Steps 1–6: the part of the decision that needs no caller interaction.
    /// `None` means the static policy has no opinion.
    pub fn static_decision(
        &self,
        tool_name: &str,
        input: &Value,
        mode: PermissionMode,
    ) -> Option<PermissionDecision> {
        if let Some(rule) = self.deny.iter().find(|r| r.matches(tool_name, input)) {
            debug!(tool = %tool_name, rule = %rule.as_str(), "Denied by rule");
            return Some(PermissionDecision::deny(format!(
                "Permission to use {tool_name} has been denied by rule '{}'",
                rule.as_str()
            )));
        }

        let safe = SAFE_TOOLS.contains(&tool_name);
        match mode {
            PermissionMode::BypassPermissions => return Some(PermissionDecision::allow()),
            PermissionMode::Plan if safe => return Some(PermissionDecision::allow()),
            PermissionMode::Plan => {
                return Some(PermissionDecision::deny(format!(
                    "{tool_name} is not available in plan mode; only read-only tools may run"
                )));
            }
            _ => {}
        }

        if self.allow.iter().any(|r| r.matches(tool_name, input)) || safe {
            return Some(PermissionDecision::allow());
        }

        if mode == PermissionMode::AcceptEdits && EDIT_TOOLS.contains(&tool_name) {
            return Some(PermissionDecision::allow());
        }

        None
    }

    /// Step 7: ask the callback, or allow when none is registered.
    pub async fn consult_callback(&self, request: &PermissionRequest) -> PermissionDecision {
        match &self.callback {
            Some(callback) => callback.decide(request).await,
            None => PermissionDecision::allow(),
        }
    }

    /// Full evaluation.
    pub async fn evaluate(&self, request: &PermissionRequest) -> PermissionDecision {
        match self.static_decision(&request.tool_name, &request.input, request.mode) {
            Some(decision) => decision,
            None => self.consult_callback(request).await,
        }
    }
}

impl std::fmt::Debug for PolicyGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyGate")
            .field("allow", &self.allow.iter().map(|r| r.as_str()).collect::<Vec<_>>())
            .field("deny", &self.deny.iter().map(|r| r.as_str()).collect::<Vec<_>>())
            .field("callback", &self.callback.is_some())
            .finish()
    }
}
