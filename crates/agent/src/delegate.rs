//! Subagent delegation.
//!
//! Top-level runs expose three built-in tools next to the embedder's own:
//! `Task` starts a nested run of a named subagent type (inline or in the
//! background), `TaskOutput` reads a background task's status, and `TaskStop`
//! stops one. Nested runs see none of them, so delegation is one level deep.

use async_trait::async_trait;
use conductor_core::{AgentDefinition, ToolContext, ToolDefinition, ToolExecutor, ToolOutput};
use serde::Deserialize;
use serde_json::json;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

pub const TASK_TOOL: &str = "Task";
pub const TASK_OUTPUT_TOOL: &str = "TaskOutput";
pub const TASK_STOP_TOOL: &str = "TaskStop";

/// Subagent type used when the model names none. Inherits the parent's tools
/// and system prompt unless configured explicitly.
pub const GENERAL_PURPOSE: &str = "general-purpose";

pub(crate) fn is_builtin(name: &str) -> bool {
    matches!(name, TASK_TOOL | TASK_OUTPUT_TOOL | TASK_STOP_TOOL)
}

/// Input of the `Task` tool.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskInput {
    #[serde(default)]
    pub description: String,
    pub prompt: String,
    #[serde(default = "default_subagent_type")]
    pub subagent_type: String,
    #[serde(default)]
    pub run_in_background: bool,
}

fn default_subagent_type() -> String {
    GENERAL_PURPOSE.to_string()
}

/// Input of the `TaskOutput` tool.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskOutputInput {
    pub task_id: String,
    #[serde(default = "default_block")]
    pub block: bool,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

fn default_block() -> bool {
    true
}

/// Input of the `TaskStop` tool.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskStopInput {
    pub task_id: String,
}

/// Look up a subagent type. The general-purpose type always resolves.
pub fn resolve_agent(agents: &BTreeMap<String, AgentDefinition>, name: &str) -> Option<AgentDefinition> {
    match agents.get(name) {
        Some(definition) => Some(definition.clone()),
        None if name == GENERAL_PURPOSE => Some(AgentDefinition {
            description: "General-purpose agent for multi-step research and execution".into(),
            ..AgentDefinition::default()
        }),
        None => None,
    }
}

pub(crate) fn available_agents(agents: &BTreeMap<String, AgentDefinition>) -> Vec<String> {
    let mut names: Vec<String> = agents.keys().cloned().collect();
    if !agents.contains_key(GENERAL_PURPOSE) {
        names.push(GENERAL_PURPOSE.to_string());
    }
    names.sort();
    names
}

/// Definitions of the built-in tools, given the configured subagent types.
pub fn builtin_definitions(agents: &BTreeMap<String, AgentDefinition>) -> Vec<ToolDefinition> {
    let mut catalogue = String::from("Launch a subagent to handle a task autonomously.\n\nAvailable agent types:");
    for name in available_agents(agents) {
        let description = resolve_agent(agents, &name).map(|d| d.description).unwrap_or_default();
        catalogue.push_str(&format!("\n- {name}: {description}"));
    }
    catalogue.push_str(
        "\n\nSet run_in_background to get a task id back immediately; \
         read the result later with TaskOutput.",
    );

    vec![
        ToolDefinition {
            name: TASK_TOOL.into(),
            description: catalogue,
            parameters: json!({
                "type": "object",
                "properties": {
                    "description": { "type": "string", "description": "Short (3-5 word) description of the task" },
                    "prompt": { "type": "string", "description": "The task for the subagent to perform" },
                    "subagent_type": { "type": "string", "description": "The type of agent to use" },
                    "run_in_background": { "type": "boolean", "description": "Run without waiting for the result" }
                },
                "required": ["description", "prompt", "subagent_type"]
            }),
        },
        ToolDefinition {
            name: TASK_OUTPUT_TOOL.into(),
            description: "Read the status or result of a background task".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "task_id": { "type": "string" },
                    "block": { "type": "boolean", "description": "Wait for the task to finish (default true)" },
                    "timeout_ms": { "type": "integer", "description": "Maximum time to wait when blocking" }
                },
                "required": ["task_id"]
            }),
        },
        ToolDefinition {
            name: TASK_STOP_TOOL.into(),
            description: "Stop a running background task".into(),
            parameters: json!({
                "type": "object",
                "properties": { "task_id": { "type": "string" } },
                "required": ["task_id"]
            }),
        },
    ]
}

/// Restricts a parent's tools to the subset a subagent type allows.
pub struct ScopedExecutor {
    inner: Arc<dyn ToolExecutor>,
    allowed: Option<HashSet<String>>,
}

impl ScopedExecutor {
    /// `allowed: None` passes every tool through.
    pub fn new(inner: Arc<dyn ToolExecutor>, allowed: Option<Vec<String>>) -> Self {
        Self {
            inner,
            allowed: allowed.map(|names| names.into_iter().collect()),
        }
    }

    fn permits(&self, name: &str) -> bool {
        !is_builtin(name) && self.allowed.as_ref().is_none_or(|set| set.contains(name))
    }
}

#[async_trait]
impl ToolExecutor for ScopedExecutor {
    fn definitions(&self) -> Vec<ToolDefinition> {
        self.inner
            .definitions()
            .into_iter()
            .filter(|d| self.permits(&d.name))
            .collect()
    }

    async fn execute(&self, name: &str, input: serde_json::Value, ctx: &ToolContext) -> ToolOutput {
        if !self.permits(name) {
            return ToolOutput::error(format!("Tool {name} is not available to this agent"));
        }
        self.inner.execute(name, input, ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::EchoTool;
    use conductor_core::{CancellationToken, ToolRegistry};

    fn registry() -> Arc<dyn ToolExecutor> {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool::named("echo")));
        registry.register(Arc::new(EchoTool::named("shout")));
        Arc::new(registry)
    }

    #[test]
    fn task_input_defaults() {
        let input: TaskInput = serde_json::from_value(json!({"prompt": "look"})).unwrap();
        assert_eq!(input.subagent_type, GENERAL_PURPOSE);
        assert!(!input.run_in_background);

        let output: TaskOutputInput = serde_json::from_value(json!({"task_id": "t1"})).unwrap();
        assert!(output.block);
        assert!(output.timeout_ms.is_none());
    }

    #[test]
    fn unknown_agent_type_does_not_resolve() {
        let agents = BTreeMap::new();
        assert!(resolve_agent(&agents, GENERAL_PURPOSE).is_some());
        assert!(resolve_agent(&agents, "nonexistent").is_none());
    }

    #[test]
    fn task_description_lists_agents() {
        let mut agents = BTreeMap::new();
        agents.insert(
            "reviewer".to_string(),
            AgentDefinition {
                description: "Reviews diffs".into(),
                prompt: "You review code.".into(),
                ..Default::default()
            },
        );
        let defs = builtin_definitions(&agents);
        assert_eq!(defs.len(), 3);
        assert!(defs[0].description.contains("- reviewer: Reviews diffs"));
        assert!(defs[0].description.contains(GENERAL_PURPOSE));
    }

    #[tokio::test]
    async fn scoped_executor_hides_and_refuses_other_tools() {
        let scoped = ScopedExecutor::new(registry(), Some(vec!["echo".into()]));
        let names: Vec<String> = scoped.definitions().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["echo"]);

        let ctx = ToolContext::new("s", CancellationToken::new());
        let refused = scoped.execute("shout", json!({"text": "hi"}), &ctx).await;
        assert!(refused.is_error);
        assert!(refused.content.contains("not available"));

        let ok = scoped.execute("echo", json!({"text": "hi"}), &ctx).await;
        assert!(!ok.is_error);
    }

    #[tokio::test]
    async fn unscoped_executor_passes_everything_but_builtins() {
        let scoped = ScopedExecutor::new(registry(), None);
        assert_eq!(scoped.definitions().len(), 2);
        let ctx = ToolContext::new("s", CancellationToken::new());
        assert!(scoped.execute(TASK_TOOL, json!({}), &ctx).await.is_error);
    }
}
