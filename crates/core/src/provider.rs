//! Provider trait: the abstraction over LLM backends.
//!
//! A provider adapter turns a vendor's streaming wire format into a finite
//! sequence of [`StreamEvent`]s. Adapters live outside this workspace; the
//! orchestration loop only sees this trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::ProviderError;
use crate::message::Message;
use crate::usage::TokenUsage;

/// One model call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRequest {
    /// The model to use (e.g., "anthropic/claude-sonnet-4")
    pub model: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    /// The full conversation so far
    pub messages: Vec<Message>,

    /// Tools the model may call this turn
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

/// A tool definition sent to the LLM so it knows what tools it can call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,

    pub description: String,

    /// JSON Schema describing the tool's parameters
    pub parameters: serde_json::Value,
}

/// A normalized streaming event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    TextDelta { text: String },
    ThinkingDelta { thinking: String },
    /// A fully assembled tool invocation.
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    Usage { usage: TokenUsage },
    Done { stop_reason: String },
}

/// The receiving half of a provider stream.
pub type EventStream = mpsc::Receiver<std::result::Result<StreamEvent, ProviderError>>;

/// The core Provider trait.
///
/// `stream` returns once the request is accepted; events then arrive on the
/// channel until `Done`. A channel that closes before `Done` is treated as an
/// interrupted stream. Implementations must stop producing events when
/// `cancel` fires.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider (e.g., "anthropic").
    fn name(&self) -> &str;

    async fn stream(
        &self,
        request: ProviderRequest,
        cancel: CancellationToken,
    ) -> std::result::Result<EventStream, ProviderError>;
}
