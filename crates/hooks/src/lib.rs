//! Lifecycle hooks for Conductor.
//!
//! Embedders register callbacks per [`HookEventKind`], optionally filtered by
//! a regex on the tool name. The loop fires events through the
//! [`HookDispatcher`], which runs matching callbacks one after another and
//! merges their [`HookOutput`]s:
//!
//! - any deny beats any allow (the first deny's reason is kept)
//! - the last replacement input wins
//! - additional context is joined with newlines
//! - the last stop-reason override wins
//!
//! ```toml
//! [[hooks]]
//! event = "pre_tool_use"
//! matcher = "^Bash$"
//! command = "./scripts/check-command.sh"
//! timeout_secs = 10
//! ```

mod command;
mod dispatcher;
mod event;

pub use command::CommandHook;
pub use dispatcher::{FnHook, HookCallback, HookDispatcher, HookMatcher, hook_fn};
pub use event::{HookDecision, HookEventKind, HookInput, HookOutput};

use conductor_config::HookConfig;
use std::sync::Arc;
use std::time::Duration;

/// Errors from the hook subsystem.
#[derive(Debug, thiserror::Error)]
pub enum HookError {
    #[error("unknown hook event '{0}'")]
    UnknownEvent(String),

    #[error("invalid hook matcher '{pattern}': {reason}")]
    InvalidMatcher { pattern: String, reason: String },

    #[error("hook command '{command}' failed: {reason}")]
    CommandFailed { command: String, reason: String },

    #[error("hook '{hook}' timed out after {timeout_secs}s")]
    Timeout { hook: String, timeout_secs: u64 },
}

impl HookDispatcher {
    /// Build a dispatcher from `[[hooks]]` configuration entries.
    pub fn from_config(hooks: &[HookConfig]) -> Result<Self, HookError> {
        let mut dispatcher = Self::new();
        for hook in hooks {
            let kind: HookEventKind = hook.event.parse()?;
            let matcher = match &hook.matcher {
                Some(pattern) => HookMatcher::for_tools(pattern)?,
                None => HookMatcher::any(),
            };
            let command = CommandHook::new(&hook.command).with_timeout(Duration::from_secs(hook.timeout_secs));
            dispatcher.register(kind, matcher.with_callback(Arc::new(command)));
        }
        Ok(dispatcher)
    }
}
