//! Tool trait: the abstraction over agent capabilities.
//!
//! The loop never calls a [`Tool`] directly. It goes through a
//! [`ToolExecutor`], which always produces a [`ToolOutput`]: lookup failures,
//! tool errors, timeouts and cancellation are all folded into a failed output
//! so a misbehaving tool cannot abort a run.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::ToolError;
use crate::provider::ToolDefinition;

/// Everything a tool may need to know about the invocation it serves.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub working_dir: PathBuf,
    /// Fires when the run is interrupted; long-running tools should watch it.
    pub cancel: CancellationToken,
    pub session_id: String,
    pub env: HashMap<String, String>,
    /// Id of the tool-use block being answered
    pub tool_use_id: String,
}

impl ToolContext {
    pub fn new(session_id: impl Into<String>, cancel: CancellationToken) -> Self {
        Self {
            working_dir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            cancel,
            session_id: session_id.into(),
            env: HashMap::new(),
            tool_use_id: String::new(),
        }
    }
}

/// The result of a tool execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    /// Text handed back to the model
    pub content: String,

    pub is_error: bool,

    /// Optional structured data for observers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl ToolOutput {
    pub fn ok(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
            metadata: None,
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: true,
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// A single capability the model can invoke.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "Read", "Bash").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the LLM).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    async fn execute(
        &self,
        input: serde_json::Value,
        ctx: &ToolContext,
    ) -> std::result::Result<ToolOutput, ToolError>;

    /// Convert this tool into a ToolDefinition for sending to the LLM.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// Executes tools by name. Never fails: every problem becomes a failed [`ToolOutput`].
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Definitions advertised to the model, in a stable order.
    fn definitions(&self) -> Vec<ToolDefinition>;

    async fn execute(&self, name: &str, input: serde_json::Value, ctx: &ToolContext) -> ToolOutput;
}

/// A registry of available tools, usable directly as a [`ToolExecutor`].
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    timeout: Option<Duration>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound every execution by `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        self.tools.insert(name, tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// List all registered tool names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    async fn run(
        &self,
        name: &str,
        input: serde_json::Value,
        ctx: &ToolContext,
    ) -> std::result::Result<ToolOutput, ToolError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;

        let call = tool.execute(input, ctx);
        let bounded = async {
            match self.timeout {
                Some(limit) => match tokio::time::timeout(limit, call).await {
                    Ok(result) => result,
                    Err(_) => Err(ToolError::Timeout {
                        tool_name: name.to_string(),
                        timeout_secs: limit.as_secs(),
                    }),
                },
                None => call.await,
            }
        };

        tokio::select! {
            result = bounded => result,
            _ = ctx.cancel.cancelled() => Err(ToolError::Cancelled(name.to_string())),
        }
    }
}

#[async_trait]
impl ToolExecutor for ToolRegistry {
    fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self.tools.values().map(|t| t.to_definition()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    async fn execute(&self, name: &str, input: serde_json::Value, ctx: &ToolContext) -> ToolOutput {
        debug!(tool = %name, tool_use_id = %ctx.tool_use_id, "Executing tool");
        match self.run(name, input, ctx).await {
            Ok(output) => output,
            Err(e) => {
                warn!(tool = %name, error = %e, "Tool execution failed");
                ToolOutput::error(e.to_string())
            }
        }
    }
}
