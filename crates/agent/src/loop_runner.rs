//! The turn loop.
//!
//! One [`Run`] drives a conversation: call the model, record its turn, vet and
//! execute each requested tool, append the results, repeat. A run ends when
//! the model answers without tools (or a hook asks it to stop), when a limit
//! trips, when the provider fails, or when it is cancelled. Every exit goes
//! through [`Run::finish`], which emits exactly one `result` event.

use conductor_core::{
    CancellationToken, ContentBlock, Conversation, Message, PermissionMode, ProviderError, ProviderRequest, Role,
    SessionId, StreamEvent, TokenUsage, ToolContext, ToolDefinition, ToolOutput, ToolUse,
};
use conductor_hooks::{HookDecision, HookEventKind, HookInput, HookOutput};
use conductor_policy::{PermissionDecision, PermissionRequest};
use conductor_telemetry::UsageTracker;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::agent::Agent;
use crate::delegate::{
    self, TASK_OUTPUT_TOOL, TASK_STOP_TOOL, TASK_TOOL, TaskInput, TaskOutputInput, TaskStopInput,
};
use crate::stream_event::{AgentEvent, RunOutcome, RunResult};
use crate::tasks::{TaskOutcome, TaskRegistry};

const NOT_EXECUTED: &str = "Not executed: run interrupted";

/// What a finished run hands back: the terminal result and the transcript.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub result: RunResult,
    pub conversation: Conversation,
}

/// Forwards events to the embedder. A dropped receiver cancels the run.
#[derive(Clone)]
pub(crate) struct EventSink {
    tx: Option<mpsc::Sender<AgentEvent>>,
    cancel: CancellationToken,
}

impl EventSink {
    pub(crate) fn new(tx: mpsc::Sender<AgentEvent>, cancel: CancellationToken) -> Self {
        Self { tx: Some(tx), cancel }
    }

    pub(crate) fn disabled(cancel: CancellationToken) -> Self {
        Self { tx: None, cancel }
    }

    async fn emit(&self, event: AgentEvent) {
        let Some(tx) = &self.tx else { return };
        let sent = tokio::select! {
            biased;
            sent = tx.send(event) => sent.is_ok(),
            _ = self.cancel.cancelled() => return,
        };
        if !sent {
            warn!("Event receiver dropped, cancelling run");
            self.cancel.cancel();
        }
    }

    /// The terminal event waits for the receiver even after cancellation.
    async fn emit_final(&self, event: AgentEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event).await;
        }
    }
}

/// Per-run state shared with the run's handle.
pub(crate) struct RunContext {
    pub(crate) session_id: SessionId,
    pub(crate) cancel: CancellationToken,
    pub(crate) mode: watch::Receiver<PermissionMode>,
    pub(crate) events: EventSink,
    pub(crate) tasks: Arc<TaskRegistry>,
}

impl RunContext {
    /// Context for a subagent: fresh session, no event stream.
    fn nested(&self, cancel: CancellationToken) -> Self {
        Self {
            session_id: SessionId::new(),
            events: EventSink::disabled(cancel.clone()),
            cancel,
            mode: self.mode.clone(),
            tasks: self.tasks.clone(),
        }
    }
}

/// How the turn loop ended, before stop hooks have had their say.
struct Ending {
    outcome: RunOutcome,
    stop_reason: Option<String>,
    errors: Vec<String>,
}

impl Ending {
    fn success(stop_reason: Option<String>) -> Self {
        Self {
            outcome: RunOutcome::Success,
            stop_reason,
            errors: Vec::new(),
        }
    }

    fn failure(outcome: RunOutcome, error: impl Into<String>) -> Self {
        Self {
            outcome,
            stop_reason: None,
            errors: vec![error.into()],
        }
    }

    fn aborted() -> Self {
        Self::failure(RunOutcome::Aborted, "Run was interrupted")
    }
}

/// One assembled model turn.
struct Turn {
    blocks: Vec<ContentBlock>,
    usage: TokenUsage,
    stop_reason: Option<String>,
}

enum TurnError {
    Cancelled,
    Provider(ProviderError),
}

/// Folds stream deltas into content blocks, keeping their order.
#[derive(Default)]
struct TurnAssembler {
    blocks: Vec<ContentBlock>,
    text: String,
    thinking: String,
    usage: TokenUsage,
}

impl TurnAssembler {
    fn push_text(&mut self, text: &str) {
        self.flush_thinking();
        self.text.push_str(text);
    }

    fn push_thinking(&mut self, thinking: &str) {
        self.flush_text();
        self.thinking.push_str(thinking);
    }

    fn push_tool_use(&mut self, id: String, name: String, input: Value) {
        self.flush_thinking();
        self.flush_text();
        self.blocks.push(ContentBlock::ToolUse { id, name, input });
    }

    fn flush_text(&mut self) {
        if !self.text.is_empty() {
            self.blocks.push(ContentBlock::Text {
                text: std::mem::take(&mut self.text),
            });
        }
    }

    fn flush_thinking(&mut self) {
        if !self.thinking.is_empty() {
            self.blocks.push(ContentBlock::Thinking {
                thinking: std::mem::take(&mut self.thinking),
            });
        }
    }

    fn finish(mut self, stop_reason: String) -> Turn {
        self.flush_thinking();
        self.flush_text();
        Turn {
            blocks: self.blocks,
            usage: self.usage,
            stop_reason: Some(stop_reason),
        }
    }
}

/// Outcome of vetting and executing one tool invocation.
struct Invocation {
    output: ToolOutput,
    /// Set when this invocation ends the run
    interrupt: Option<String>,
    stop_reason: Option<String>,
}

impl Invocation {
    fn denied(message: String, interrupt: bool, stop_reason: Option<String>) -> Self {
        Self {
            interrupt: interrupt.then(|| message.clone()),
            output: ToolOutput::error(message),
            stop_reason,
        }
    }
}

pub(crate) struct Run<'a> {
    agent: &'a Agent,
    ctx: RunContext,
    conversation: Conversation,
    tracker: UsageTracker,
    tool_defs: Vec<ToolDefinition>,
    turns: u32,
    started: Instant,
}

impl<'a> Run<'a> {
    pub(crate) fn new(agent: &'a Agent, ctx: RunContext) -> Self {
        let mut tool_defs: Vec<ToolDefinition> = agent
            .tools
            .definitions()
            .into_iter()
            .filter(|d| !delegate::is_builtin(&d.name))
            .collect();
        if !agent.nested {
            tool_defs.extend(delegate::builtin_definitions(&agent.agents));
        }

        Self {
            agent,
            conversation: Conversation::new(ctx.session_id.clone()),
            tracker: UsageTracker::new(agent.pricing.clone()),
            ctx,
            tool_defs,
            turns: 0,
            started: Instant::now(),
        }
    }

    fn session(&self) -> String {
        self.ctx.session_id.to_string()
    }

    pub(crate) async fn execute(mut self, prompt: String) -> RunOutput {
        let session_id = self.session();
        info!(
            session_id = %session_id,
            model = %self.agent.model,
            nested = self.agent.nested,
            "Starting run"
        );

        let permission_mode = *self.ctx.mode.borrow();
        self.ctx
            .events
            .emit(AgentEvent::Init {
                session_id: session_id.clone(),
                model: self.agent.model.clone(),
                tools: self.tool_defs.iter().map(|d| d.name.clone()).collect(),
                permission_mode,
                agents: if self.agent.nested {
                    Vec::new()
                } else {
                    delegate::available_agents(&self.agent.agents)
                },
            })
            .await;

        let mut context = Vec::new();
        if !self.agent.nested {
            let start = HookInput::new(HookEventKind::SessionStart, &session_id).with_extra("source", "startup");
            if let Some(c) = self.fire(start).await.and_then(|out| out.additional_context) {
                context.push(c);
            }
        }

        let submit = HookInput::new(HookEventKind::UserPromptSubmit, &session_id).with_extra("prompt", prompt.as_str());
        if let Some(out) = self.fire(submit).await {
            if out.is_deny() {
                let reason = out.reason.unwrap_or_else(|| "no reason given".into());
                warn!(session_id = %session_id, reason = %reason, "Prompt blocked by hook");
                return self
                    .finish(Ending::failure(RunOutcome::Aborted, format!("Prompt blocked by hook: {reason}")))
                    .await;
            }
            context.extend(out.additional_context);
        }

        let text = if context.is_empty() {
            prompt
        } else {
            format!("{prompt}\n\n{}", context.join("\n"))
        };
        self.append(Message::user(text)).await;

        let ending = self.turn_loop().await;
        self.finish(ending).await
    }

    async fn turn_loop(&mut self) -> Ending {
        loop {
            if self.ctx.cancel.is_cancelled() {
                return Ending::aborted();
            }
            if let Some(max) = self.agent.max_turns {
                if self.turns >= max {
                    warn!(session_id = %self.ctx.session_id, max_turns = max, "Max turns reached");
                    return Ending::failure(
                        RunOutcome::MaxTurnsExceeded,
                        format!("Reached maximum number of turns ({max})"),
                    );
                }
            }
            if let Some(limit) = self.agent.max_budget_usd {
                if let Err(e) = self.tracker.check_budget(limit) {
                    warn!(session_id = %self.ctx.session_id, error = %e, "Budget exhausted");
                    return Ending::failure(RunOutcome::MaxBudgetExceeded, e.to_string());
                }
            }

            let request = ProviderRequest {
                model: self.agent.model.clone(),
                system_prompt: self.agent.system_prompt.clone(),
                messages: self.conversation.messages().to_vec(),
                tools: self.tool_defs.clone(),
                max_tokens: self.agent.max_tokens,
            };
            debug!(
                session_id = %self.ctx.session_id,
                turn = self.turns + 1,
                messages = request.messages.len(),
                "Calling provider"
            );

            let turn = match self.stream_turn(request).await {
                Ok(turn) => turn,
                Err(TurnError::Cancelled) => return Ending::aborted(),
                Err(TurnError::Provider(e)) => {
                    error!(session_id = %self.ctx.session_id, error = %e, "Provider failed");
                    return Ending::failure(RunOutcome::ExecutionError, e.to_string());
                }
            };

            self.turns += 1;
            self.tracker.record(&self.agent.model, turn.usage);

            let message = Message::assistant(turn.blocks);
            let tool_uses = message.tool_uses();
            self.ctx
                .events
                .emit(AgentEvent::Assistant {
                    message: message.clone(),
                })
                .await;
            self.append(message).await;

            let post_turn = HookInput::new(HookEventKind::PostTurn, self.session()).with_extra("turn", self.turns);
            let mut stop_request = self.fire(post_turn).await.and_then(|out| out.stop_reason);

            if tool_uses.is_empty() {
                return Ending::success(stop_request.or(turn.stop_reason));
            }

            let mut results = Vec::with_capacity(tool_uses.len());
            let mut interrupted: Option<String> = None;
            for tool_use in tool_uses {
                if interrupted.is_some() || self.ctx.cancel.is_cancelled() {
                    self.record_result(&tool_use, ToolOutput::error(NOT_EXECUTED), &mut results)
                        .await;
                    continue;
                }

                self.ctx
                    .events
                    .emit(AgentEvent::ToolUse {
                        id: tool_use.id.clone(),
                        name: tool_use.name.clone(),
                        input: tool_use.input.clone(),
                    })
                    .await;

                let invocation = self.invoke(&tool_use).await;
                if invocation.stop_reason.is_some() {
                    stop_request = invocation.stop_reason;
                }
                if invocation.interrupt.is_some() {
                    interrupted = invocation.interrupt;
                }
                self.record_result(&tool_use, invocation.output, &mut results).await;
            }
            self.append(Message::tool_results(results)).await;

            if let Some(reason) = interrupted {
                warn!(session_id = %self.ctx.session_id, reason = %reason, "Run interrupted by denial");
                return Ending::failure(RunOutcome::Aborted, reason);
            }
            if let Some(reason) = stop_request {
                info!(session_id = %self.ctx.session_id, stop_reason = %reason, "Hook requested stop");
                return Ending::success(Some(reason));
            }
        }
    }

    async fn record_result(&self, tool_use: &ToolUse, output: ToolOutput, results: &mut Vec<ContentBlock>) {
        self.ctx
            .events
            .emit(AgentEvent::ToolResult {
                tool_use_id: tool_use.id.clone(),
                name: tool_use.name.clone(),
                content: output.content.clone(),
                is_error: output.is_error,
            })
            .await;
        results.push(ContentBlock::tool_result(&tool_use.id, output.content, output.is_error));
    }

    /// Stream one model turn, forwarding deltas when partial messages are on.
    async fn stream_turn(&self, request: ProviderRequest) -> Result<Turn, TurnError> {
        let cancel = &self.ctx.cancel;
        let mut stream = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TurnError::Cancelled),
            stream = self.agent.provider.stream(request, cancel.clone()) => stream.map_err(TurnError::Provider)?,
        };

        let mut turn = TurnAssembler::default();
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(TurnError::Cancelled),
                next = stream.recv() => next,
            };

            match next {
                None => {
                    return Err(TurnError::Provider(ProviderError::StreamInterrupted(
                        "stream closed before completion".into(),
                    )));
                }
                Some(Err(e)) => return Err(TurnError::Provider(e)),
                Some(Ok(StreamEvent::TextDelta { text })) => {
                    turn.push_text(&text);
                    if self.agent.include_partial_messages {
                        self.ctx.events.emit(AgentEvent::TextDelta { text }).await;
                    }
                }
                Some(Ok(StreamEvent::ThinkingDelta { thinking })) => {
                    turn.push_thinking(&thinking);
                    if self.agent.include_partial_messages {
                        self.ctx.events.emit(AgentEvent::ThinkingDelta { thinking }).await;
                    }
                }
                Some(Ok(StreamEvent::ToolUse { id, name, input })) => turn.push_tool_use(id, name, input),
                Some(Ok(StreamEvent::Usage { usage })) => turn.usage += usage,
                Some(Ok(StreamEvent::Done { stop_reason })) => return Ok(turn.finish(stop_reason)),
            }
        }
    }

    /// Hooks, policy, execution and post-hooks for one tool invocation.
    async fn invoke(&mut self, tool_use: &ToolUse) -> Invocation {
        let session_id = self.session();
        let name = tool_use.name.as_str();
        let mut input = tool_use.input.clone();
        let mut stop_reason = None;
        let mut context = Vec::new();
        let mut hook_allowed = false;

        let pre = HookInput::new(HookEventKind::PreToolUse, &session_id).with_tool(name, input.clone(), &tool_use.id);
        if let Some(out) = self.fire(pre).await {
            stop_reason = out.stop_reason.clone();
            if out.is_deny() {
                let reason = out.reason.unwrap_or_else(|| "no reason given".into());
                warn!(session_id = %session_id, tool = %name, reason = %reason, "Tool denied by hook");
                return Invocation::denied(format!("Hook denied {name}: {reason}"), out.interrupt, stop_reason);
            }
            hook_allowed = out.decision == Some(HookDecision::Allow);
            if let Some(updated) = out.updated_input {
                input = updated;
            }
            context.extend(out.additional_context);
        }

        let mode = *self.ctx.mode.borrow();
        let decision = match self.agent.policy.static_decision(name, &input, mode) {
            Some(decision) => decision,
            None if hook_allowed => PermissionDecision::allow(),
            None => {
                let request = PermissionRequest {
                    tool_name: name.to_string(),
                    input: input.clone(),
                    tool_use_id: tool_use.id.clone(),
                    session_id: session_id.clone(),
                    mode,
                };
                tokio::select! {
                    biased;
                    _ = self.ctx.cancel.cancelled() => PermissionDecision::deny("Run was interrupted before permission was granted"),
                    decision = self.agent.policy.consult_callback(&request) => decision,
                }
            }
        };
        match decision {
            PermissionDecision::Deny { message, interrupt } => {
                warn!(session_id = %session_id, tool = %name, mode = %mode, reason = %message, "Tool denied by policy");
                return Invocation::denied(message, interrupt, stop_reason);
            }
            PermissionDecision::Allow {
                updated_input: Some(updated),
            } => input = updated,
            PermissionDecision::Allow { updated_input: None } => {}
        }

        debug!(session_id = %session_id, tool = %name, "Executing tool");
        let mut output = self.dispatch(name, &tool_use.id, input.clone()).await;

        let kind = if output.is_error {
            HookEventKind::PostToolUseFailure
        } else {
            HookEventKind::PostToolUse
        };
        let post = HookInput::new(kind, &session_id)
            .with_tool(name, input, &tool_use.id)
            .with_response(json!({ "content": output.content, "is_error": output.is_error }));
        let mut interrupt = None;
        if let Some(out) = self.fire(post).await {
            if out.stop_reason.is_some() {
                stop_reason = out.stop_reason.clone();
            }
            if out.is_deny() {
                let reason = out.reason.clone().unwrap_or_else(|| "no reason given".into());
                if out.interrupt {
                    interrupt = Some(format!("Hook stopped the run after {name}: {reason}"));
                }
                context.push(reason);
            }
            context.extend(out.additional_context);
        }

        if !context.is_empty() {
            output.content = format!("{}\n\n{}", output.content, context.join("\n"));
        }
        Invocation {
            output,
            interrupt,
            stop_reason,
        }
    }

    async fn dispatch(&mut self, name: &str, tool_use_id: &str, input: Value) -> ToolOutput {
        if !self.agent.nested {
            match name {
                TASK_TOOL => return self.delegate(tool_use_id, input).await,
                TASK_OUTPUT_TOOL => return self.task_output(input).await,
                TASK_STOP_TOOL => return self.task_stop(input),
                _ => {}
            }
        }

        let ctx = self.tool_context(tool_use_id);
        self.agent.tools.execute(name, input, &ctx).await
    }

    fn tool_context(&self, tool_use_id: &str) -> ToolContext {
        let mut ctx = ToolContext::new(self.session(), self.ctx.cancel.clone());
        if let Some(dir) = &self.agent.working_dir {
            ctx.working_dir = dir.clone();
        }
        ctx.env = self.agent.env.clone();
        ctx.tool_use_id = tool_use_id.to_string();
        ctx
    }

    /// Start a subagent, inline or as a background task.
    async fn delegate(&mut self, tool_use_id: &str, input: Value) -> ToolOutput {
        let TaskInput {
            description,
            prompt,
            subagent_type,
            run_in_background,
        } = match serde_json::from_value(input) {
            Ok(task) => task,
            Err(e) => return ToolOutput::error(format!("Invalid {TASK_TOOL} input: {e}")),
        };
        let Some(definition) = delegate::resolve_agent(&self.agent.agents, &subagent_type) else {
            return ToolOutput::error(format!(
                "Unknown subagent type '{subagent_type}'. Available: {}",
                delegate::available_agents(&self.agent.agents).join(", ")
            ));
        };

        let budget = match self.agent.max_budget_usd {
            Some(limit) => {
                let remaining = limit - self.tracker.cost_usd();
                if remaining <= 0.0 {
                    return ToolOutput::error("No budget left for a subagent");
                }
                Some(remaining)
            }
            None => None,
        };

        let start = HookInput::new(HookEventKind::SubagentStart, self.session())
            .with_extra("agent_type", subagent_type.as_str())
            .with_extra("description", description.as_str())
            .with_extra("tool_use_id", tool_use_id);
        self.fire(start).await;

        let child = self.agent.subagent(&definition, budget);
        info!(
            session_id = %self.ctx.session_id,
            agent_type = %subagent_type,
            background = run_in_background,
            "Delegating to subagent"
        );

        if run_in_background {
            let cancel = self.ctx.cancel.child_token();
            let task_id = self
                .ctx
                .tasks
                .register(&subagent_type, &description, cancel.clone());
            self.ctx
                .events
                .emit(AgentEvent::TaskStarted {
                    task_id: task_id.clone(),
                    agent_type: subagent_type.clone(),
                    description,
                })
                .await;

            let ctx = self.ctx.nested(cancel);
            let tasks = self.ctx.tasks.clone();
            let id = task_id.clone();
            tokio::spawn(async move {
                let output = child.drive(prompt, ctx).await;
                let result = output.result;
                let outcome = match result.outcome {
                    RunOutcome::Success => TaskOutcome::Completed(result.result.clone().unwrap_or_default()),
                    RunOutcome::Aborted => TaskOutcome::Stopped,
                    _ => TaskOutcome::Failed(result.errors.join("; ")),
                };
                tasks.finish(&id, outcome, Some(result.usage));
            });

            return ToolOutput::ok(format!(
                "Started background task {task_id} ({}). Use {TASK_OUTPUT_TOOL} with this task_id to read its result.",
                subagent_type
            ))
            .with_metadata(json!({ "task_id": task_id }));
        }

        let ctx = self.ctx.nested(self.ctx.cancel.child_token());
        let result = child.drive(prompt, ctx).await.result;
        self.tracker.merge(&result.usage);

        let metadata = json!({
            "agent_type": subagent_type,
            "turns": result.turns,
            "cost_usd": result.usage.cost_usd,
        });
        if result.outcome.is_success() {
            ToolOutput::ok(result.result.unwrap_or_default()).with_metadata(metadata)
        } else {
            ToolOutput::error(format!(
                "Subagent {} ended with {}: {}",
                subagent_type,
                result.outcome,
                result.errors.join("; ")
            ))
            .with_metadata(metadata)
        }
    }

    async fn task_output(&self, input: Value) -> ToolOutput {
        let request: TaskOutputInput = match serde_json::from_value(input) {
            Ok(request) => request,
            Err(e) => return ToolOutput::error(format!("Invalid {TASK_OUTPUT_TOOL} input: {e}")),
        };
        let timeout = request
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(self.agent.task_output_timeout);

        let output = tokio::select! {
            biased;
            _ = self.ctx.cancel.cancelled() => return ToolOutput::error("Run was interrupted"),
            output = self.ctx.tasks.get_output(&request.task_id, request.block, timeout) => output,
        };
        match output {
            Ok(summary) => ToolOutput::ok(summary),
            Err(e) => ToolOutput::error(e.to_string()),
        }
    }

    fn task_stop(&self, input: Value) -> ToolOutput {
        let request: TaskStopInput = match serde_json::from_value(input) {
            Ok(request) => request,
            Err(e) => return ToolOutput::error(format!("Invalid {TASK_STOP_TOOL} input: {e}")),
        };
        match self.ctx.tasks.stop(&request.task_id) {
            Ok(()) => ToolOutput::ok(format!("Task {} stopped", request.task_id)),
            Err(e) => ToolOutput::error(e.to_string()),
        }
    }

    async fn fire(&self, input: HookInput) -> Option<HookOutput> {
        if !self.agent.hooks.has_hooks(input.event) {
            return None;
        }
        self.agent.hooks.fire(&input).await
    }

    async fn append(&mut self, message: Message) {
        if let Some(logger) = &self.agent.session_logger {
            if let Err(e) = logger.record(&self.ctx.session_id, &message).await {
                warn!(session_id = %self.ctx.session_id, error = %e, "Failed to record message");
            }
        }
        self.conversation.push(message);
    }

    fn last_assistant_text(&self) -> Option<String> {
        self.conversation
            .messages()
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant)
            .map(|m| m.text())
            .filter(|text| !text.is_empty())
    }

    /// Fire stop and session-end hooks, then emit the terminal result.
    async fn finish(self, ending: Ending) -> RunOutput {
        let session_id = self.session();
        let mut stop_reason = ending.stop_reason;

        let kind = if self.agent.nested {
            HookEventKind::SubagentStop
        } else {
            HookEventKind::Stop
        };
        let stop = HookInput::new(kind, &session_id)
            .with_extra("outcome", ending.outcome.as_str())
            .with_extra("stop_reason", stop_reason.clone());
        if let Some(reason) = self.fire(stop).await.and_then(|out| out.stop_reason) {
            stop_reason = Some(reason);
        }
        if !self.agent.nested {
            let end = HookInput::new(HookEventKind::SessionEnd, &session_id).with_extra("reason", ending.outcome.as_str());
            self.fire(end).await;
        }

        let result = RunResult {
            outcome: ending.outcome,
            session_id: session_id.clone(),
            result: self.last_assistant_text(),
            stop_reason,
            turns: self.turns,
            usage: self.tracker.summary().clone(),
            duration_ms: self.started.elapsed().as_millis() as u64,
            errors: ending.errors,
        };

        if result.outcome.is_success() {
            info!(
                session_id = %session_id,
                turns = result.turns,
                cost_usd = result.usage.cost_usd,
                duration_ms = result.duration_ms,
                "Run completed"
            );
        } else {
            warn!(
                session_id = %session_id,
                outcome = %result.outcome,
                turns = result.turns,
                errors = ?result.errors,
                "Run ended without success"
            );
        }

        self.ctx.events.emit_final(AgentEvent::Result(result.clone())).await;
        RunOutput {
            result,
            conversation: self.conversation,
        }
    }
}
