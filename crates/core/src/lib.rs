//! # Conductor Core
//!
//! Domain types, traits, and error definitions for the Conductor agent
//! orchestration runtime. Every collaborator the loop talks to (providers,
//! tool executors, session loggers) is a trait defined here; the other
//! crates depend inward on this one.

pub mod error;
pub mod message;
pub mod provider;
pub mod tool;
pub mod usage;
pub mod agent;
pub mod session;
pub mod rule;

// Re-export key types at crate root for ergonomics
pub use error::{Error, ProviderError, Result, ToolError};
pub use message::{ContentBlock, Conversation, Message, Role, SessionId, ToolUse};
pub use provider::{EventStream, Provider, ProviderRequest, StreamEvent, ToolDefinition};
pub use tool::{Tool, ToolContext, ToolExecutor, ToolOutput, ToolRegistry};
pub use usage::TokenUsage;
pub use agent::{AgentDefinition, PermissionMode};
pub use session::{InMemorySessionLog, SessionLogger};
pub use rule::{RuleSyntax, RuleSyntaxError};
pub use tokio_util::sync::CancellationToken;
