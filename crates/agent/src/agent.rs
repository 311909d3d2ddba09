//! Run configuration and entry points.

use conductor_config::RuntimeConfig;
use conductor_core::{
    AgentDefinition, CancellationToken, PermissionMode, Provider, SessionId, SessionLogger, ToolExecutor,
};
use conductor_hooks::HookDispatcher;
use conductor_policy::{PermissionCallback, PolicyGate};
use conductor_telemetry::PricingTable;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::debug;

use crate::AgentError;
use crate::delegate::ScopedExecutor;
use crate::handle::{RunControl, RunHandle};
use crate::loop_runner::{EventSink, Run, RunContext, RunOutput};
use crate::tasks::TaskRegistry;

const DEFAULT_EVENT_BUFFER: usize = 64;
const DEFAULT_TASK_OUTPUT_TIMEOUT: Duration = Duration::from_secs(30);

pub(crate) type RunFuture<'a> = Pin<Box<dyn Future<Output = RunOutput> + Send + 'a>>;

/// Everything a run needs: collaborators, limits, and policy.
///
/// Cheap to clone; every collaborator sits behind an `Arc`. One `Agent` can
/// start any number of independent runs.
#[derive(Clone)]
pub struct Agent {
    pub(crate) provider: Arc<dyn Provider>,
    pub(crate) tools: Arc<dyn ToolExecutor>,
    pub(crate) model: String,
    pub(crate) system_prompt: Option<String>,
    /// Turn ceiling; `None` is unlimited
    pub(crate) max_turns: Option<u32>,
    /// Cost ceiling in USD; `None` is unlimited
    pub(crate) max_budget_usd: Option<f64>,
    pub(crate) max_tokens: Option<u32>,
    pub(crate) permission_mode: PermissionMode,
    pub(crate) policy: Arc<PolicyGate>,
    pub(crate) hooks: Arc<HookDispatcher>,
    pub(crate) agents: Arc<BTreeMap<String, AgentDefinition>>,
    pub(crate) session_logger: Option<Arc<dyn SessionLogger>>,
    pub(crate) pricing: Arc<PricingTable>,
    pub(crate) include_partial_messages: bool,
    pub(crate) working_dir: Option<PathBuf>,
    pub(crate) env: HashMap<String, String>,
    pub(crate) event_buffer: usize,
    pub(crate) task_output_timeout: Duration,
    /// Set on subagents: no delegation tools, subagent lifecycle hooks
    pub(crate) nested: bool,
}

impl Agent {
    pub fn new(provider: Arc<dyn Provider>, tools: Arc<dyn ToolExecutor>) -> Self {
        Self {
            provider,
            tools,
            model: "anthropic/claude-sonnet-4".into(),
            system_prompt: None,
            max_turns: None,
            max_budget_usd: None,
            max_tokens: None,
            permission_mode: PermissionMode::Default,
            policy: Arc::new(PolicyGate::new()),
            hooks: Arc::new(HookDispatcher::new()),
            agents: Arc::new(BTreeMap::new()),
            session_logger: None,
            pricing: Arc::new(PricingTable::with_defaults()),
            include_partial_messages: false,
            working_dir: None,
            env: HashMap::new(),
            event_buffer: DEFAULT_EVENT_BUFFER,
            task_output_timeout: DEFAULT_TASK_OUTPUT_TIMEOUT,
            nested: false,
        }
    }

    /// Build an agent from loaded configuration. Rules, hooks, pricing and
    /// subagent types all come from `config`.
    pub fn from_config(
        provider: Arc<dyn Provider>,
        tools: Arc<dyn ToolExecutor>,
        config: &RuntimeConfig,
    ) -> Result<Self, AgentError> {
        config.validate()?;
        let mut agent = Self::new(provider, tools)
            .with_model(config.model.clone())
            .with_permission_mode(config.permission_mode)
            .with_policy(PolicyGate::from_config(&config.permissions)?)
            .with_hooks(HookDispatcher::from_config(&config.hooks)?)
            .with_pricing(Arc::new(PricingTable::from_config(&config.pricing)))
            .with_partial_messages(config.include_partial_messages)
            .with_event_buffer(config.event_buffer)
            .with_task_output_timeout(Duration::from_millis(config.tasks.output_timeout_ms));
        agent.system_prompt = config.system_prompt.clone();
        agent.max_turns = config.max_turns;
        agent.max_budget_usd = config.max_budget_usd;
        agent.working_dir = config.working_dir.clone();
        agent.agents = Arc::new(config.agents.clone());
        Ok(agent)
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Set the turn ceiling.
    pub fn with_max_turns(mut self, max: u32) -> Self {
        self.max_turns = Some(max);
        self
    }

    /// Set the cost ceiling in USD.
    pub fn with_max_budget_usd(mut self, limit: f64) -> Self {
        self.max_budget_usd = Some(limit);
        self
    }

    /// Set the max tokens per model response.
    pub fn with_max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = Some(max);
        self
    }

    pub fn with_permission_mode(mut self, mode: PermissionMode) -> Self {
        self.permission_mode = mode;
        self
    }

    pub fn with_policy(mut self, policy: PolicyGate) -> Self {
        self.policy = Arc::new(policy);
        self
    }

    /// Install the decision callback consulted when the static policy has no
    /// opinion.
    pub fn with_permission_callback(mut self, callback: Arc<dyn PermissionCallback>) -> Self {
        self.policy = Arc::new(self.policy.as_ref().clone().with_callback(callback));
        self
    }

    pub fn with_hooks(mut self, hooks: HookDispatcher) -> Self {
        self.hooks = Arc::new(hooks);
        self
    }

    /// Register a subagent type for the `Task` tool.
    pub fn with_agent(mut self, name: impl Into<String>, definition: AgentDefinition) -> Self {
        Arc::make_mut(&mut self.agents).insert(name.into(), definition);
        self
    }

    pub fn with_session_logger(mut self, logger: Arc<dyn SessionLogger>) -> Self {
        self.session_logger = Some(logger);
        self
    }

    pub fn with_pricing(mut self, pricing: Arc<PricingTable>) -> Self {
        self.pricing = pricing;
        self
    }

    /// Re-emit text and thinking deltas as they arrive.
    pub fn with_partial_messages(mut self, enabled: bool) -> Self {
        self.include_partial_messages = enabled;
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_event_buffer(mut self, capacity: usize) -> Self {
        self.event_buffer = capacity.max(1);
        self
    }

    /// Default wait for a blocking `TaskOutput` call without its own timeout.
    pub fn with_task_output_timeout(mut self, timeout: Duration) -> Self {
        self.task_output_timeout = timeout;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn permission_mode(&self) -> PermissionMode {
        self.permission_mode
    }

    /// Start a run on the current tokio runtime.
    ///
    /// Events stream through the returned handle. Dropping the handle's event
    /// receiver cancels the run.
    pub fn run(&self, prompt: impl Into<String>) -> RunHandle {
        let session_id = SessionId::new();
        let cancel = CancellationToken::new();
        let (events_tx, events_rx) = mpsc::channel(self.event_buffer);
        let (mode_tx, mode_rx) = watch::channel(self.permission_mode);
        let tasks = Arc::new(TaskRegistry::new());

        let ctx = RunContext {
            session_id: session_id.clone(),
            cancel: cancel.clone(),
            mode: mode_rx,
            events: EventSink::new(events_tx, cancel.clone()),
            tasks: tasks.clone(),
        };
        let agent = self.clone();
        let prompt = prompt.into();
        let join = tokio::spawn(async move { agent.drive(prompt, ctx).await });

        debug!(session_id = %session_id, "Spawned run");
        RunHandle::new(session_id, events_rx, RunControl::new(cancel, mode_tx, tasks), join)
    }

    /// Run to completion in the current task, without an event stream.
    pub async fn execute(&self, prompt: impl Into<String>, cancel: CancellationToken) -> RunOutput {
        let (_mode_tx, mode_rx) = watch::channel(self.permission_mode);
        let ctx = RunContext {
            session_id: SessionId::new(),
            cancel: cancel.clone(),
            mode: mode_rx,
            events: EventSink::disabled(cancel),
            tasks: Arc::new(TaskRegistry::new()),
        };
        self.drive(prompt.into(), ctx).await
    }

    /// Boxed so a run can start nested runs of itself.
    pub(crate) fn drive(&self, prompt: String, ctx: RunContext) -> RunFuture<'_> {
        Box::pin(async move { Run::new(self, ctx).execute(prompt).await })
    }

    /// Configuration for a nested run of `definition`.
    pub(crate) fn subagent(&self, definition: &AgentDefinition, budget: Option<f64>) -> Agent {
        let mut child = self.clone();
        child.tools = Arc::new(ScopedExecutor::new(self.tools.clone(), definition.tools.clone()));
        if let Some(model) = &definition.model {
            child.model = model.clone();
        }
        if !definition.prompt.is_empty() {
            child.system_prompt = Some(definition.prompt.clone());
        }
        child.max_budget_usd = budget;
        child.include_partial_messages = false;
        child.nested = true;
        child
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("provider", &self.provider.name())
            .field("model", &self.model)
            .field("max_turns", &self.max_turns)
            .field("max_budget_usd", &self.max_budget_usd)
            .field("permission_mode", &self.permission_mode)
            .field("policy", &self.policy)
            .field("agents", &self.agents.keys().collect::<Vec<_>>())
            .field("nested", &self.nested)
            .finish()
    }
}
