//! Policy gate for Conductor. Decides, per tool invocation, whether it may run.
//!
//! Combines the active [`PermissionMode`](conductor_core::PermissionMode),
//! static allow/deny rules from settings, and an optional caller-supplied
//! [`PermissionCallback`]. The gate holds no mutable state and is shared by
//! every loop in a process.

mod gate;
mod rule;

pub use gate::{
    EDIT_TOOLS, PermissionCallback, PermissionDecision, PermissionRequest, PolicyGate, SAFE_TOOLS,
};
pub use rule::{PermissionRule, primary_argument};

/// Errors from the policy subsystem.
#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    #[error("invalid permission rule '{rule}': {reason}")]
    InvalidRule { rule: String, reason: String },
}
