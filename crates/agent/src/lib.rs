//! The orchestration loop for Conductor.
//!
//! An [`Agent`] runs a conversation with a language model to completion:
//!
//! 1. **Send** the conversation to the provider and stream back one turn
//! 2. **Record** the turn, its usage and cost
//! 3. **If tool uses**: vet each through hooks and the policy gate, execute
//!    the permitted ones, append the results, go back to step 1
//! 4. **Otherwise** finish with the model's answer
//!
//! Turn and budget ceilings are checked before every provider call.
//! Interruption, provider failures and misbehaving tools all end in a single
//! terminal [`RunResult`]; the loop itself never panics or returns an error.
//!
//! The model can delegate to subagents through the built-in `Task` tool,
//! either inline or as background tasks tracked in a [`TaskRegistry`].

pub mod agent;
pub mod delegate;
pub mod handle;
pub mod loop_runner;
pub mod stream_event;
pub mod tasks;
#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;

pub use agent::Agent;
pub use delegate::{GENERAL_PURPOSE, ScopedExecutor, TASK_OUTPUT_TOOL, TASK_STOP_TOOL, TASK_TOOL};
pub use handle::{RunControl, RunHandle};
pub use loop_runner::RunOutput;
pub use stream_event::{AgentEvent, RunOutcome, RunResult};
pub use tasks::{TaskError, TaskOutcome, TaskRegistry, TaskSnapshot, TaskState};

/// Errors from building an agent or driving a run handle.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error(transparent)]
    Config(#[from] conductor_config::ConfigError),

    #[error(transparent)]
    Policy(#[from] conductor_policy::PolicyError),

    #[error(transparent)]
    Hook(#[from] conductor_hooks::HookError),

    #[error(transparent)]
    Task(#[from] TaskError),

    #[error("run task failed: {0}")]
    Join(String),
}
