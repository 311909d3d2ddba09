//! End-to-end tests for the Conductor orchestration loop.
//!
//! These drive whole runs through `Agent::run` with a scripted streaming
//! provider, covering termination, limits, hooks, permission changes and
//! background subagents.

use std::sync::Arc;
use std::time::Duration;

use conductor_agent::test_helpers::{EchoTool, ScriptedProvider, ScriptedTurn};
use conductor_agent::{Agent, AgentError, AgentEvent, RunHandle, RunOutcome, TASK_TOOL, TaskError, TaskState};
use conductor_core::{AgentDefinition, PermissionMode, TokenUsage, ToolRegistry};
use conductor_hooks::{HookDispatcher, HookEventKind, HookMatcher, HookOutput, hook_fn};
use conductor_telemetry::{ModelPricing, PricingTable};
use serde_json::json;
use tokio_stream::StreamExt;

const WAIT: Duration = Duration::from_millis(5_000);
const SUB_MODEL: &str = "anthropic/claude-3.5-haiku";

// ── Fixtures ─────────────────────────────────────────────────────────────

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn agent_with(provider: Arc<ScriptedProvider>) -> (Agent, Arc<EchoTool>) {
    init_tracing();
    let echo = Arc::new(EchoTool::new());
    let mut tools = ToolRegistry::new();
    tools.register(echo.clone());
    (Agent::new(provider, Arc::new(tools)), echo)
}

fn researcher() -> AgentDefinition {
    AgentDefinition {
        description: "Researches a question".into(),
        prompt: "You research things.".into(),
        tools: Some(vec!["echo".into()]),
        model: Some(SUB_MODEL.into()),
    }
}

fn background_task(id: &str) -> ScriptedTurn {
    ScriptedTurn::tool_use(
        id,
        TASK_TOOL,
        json!({
            "description": "dig in",
            "prompt": "find the answer",
            "subagent_type": "researcher",
            "run_in_background": true
        }),
    )
}

async fn collect(handle: RunHandle) -> Vec<AgentEvent> {
    let (stream, _control) = handle.into_stream();
    stream.collect().await
}

/// Read events until a background task starts and return its id.
async fn started_task(handle: &mut RunHandle) -> String {
    while let Some(event) = handle.next_event().await {
        if let AgentEvent::TaskStarted { task_id, .. } = event {
            return task_id;
        }
    }
    panic!("run ended without starting a task");
}

fn final_result(events: &[AgentEvent]) -> &conductor_agent::RunResult {
    match events.last() {
        Some(AgentEvent::Result(result)) => result,
        other => panic!("expected a terminal result, got {other:?}"),
    }
}

// ── Termination ──────────────────────────────────────────────────────────

#[tokio::test]
async fn e2e_text_answer_succeeds_in_one_turn() {
    let provider = Arc::new(ScriptedProvider::single_text("The answer is 42."));
    let (agent, _) = agent_with(provider.clone());

    let events = collect(agent.run("What is the answer?")).await;
    assert_eq!(events.first().map(AgentEvent::event_type), Some("init"));
    assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);

    let result = final_result(&events);
    assert_eq!(result.outcome, RunOutcome::Success);
    assert_eq!(result.text(), "The answer is 42.");
    assert_eq!(result.turns, 1);
    assert_eq!(result.usage.total, TokenUsage::new(10, 5));
    assert!(result.errors.is_empty());
    assert_eq!(provider.call_count(), 1);
}

#[tokio::test]
async fn e2e_tool_round_trip_takes_two_turns() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        ScriptedTurn::tool_use("tu_1", "echo", json!({"text": "ping"})),
        ScriptedTurn::text("Echo said ping."),
    ]));
    let (agent, echo) = agent_with(provider.clone());

    let events = collect(agent.run("Echo ping")).await;
    let kinds: Vec<&str> = events.iter().map(AgentEvent::event_type).collect();
    assert_eq!(
        kinds,
        vec!["init", "assistant", "tool_use", "tool_result", "assistant", "result"]
    );
    assert!(events.iter().any(|e| matches!(
        e,
        AgentEvent::ToolResult { tool_use_id, content, is_error: false, .. }
            if tool_use_id == "tu_1" && content == "ping"
    )));

    let result = final_result(&events);
    assert_eq!(result.outcome, RunOutcome::Success);
    assert_eq!(result.turns, 2);
    assert_eq!(echo.call_count(), 1);
    assert_eq!(provider.call_count(), 2);
}

#[tokio::test]
async fn e2e_partial_messages_stream_deltas() {
    let provider = Arc::new(ScriptedProvider::single_text("Hello world"));
    let (agent, _) = agent_with(provider);

    let events = collect(agent.with_partial_messages(true).run("hi")).await;
    let streamed: String = events
        .iter()
        .filter_map(|e| match e {
            AgentEvent::TextDelta { text } => Some(text.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(streamed, "Hello world");
}

#[tokio::test]
async fn e2e_deltas_hidden_by_default() {
    let provider = Arc::new(ScriptedProvider::single_text("Hello world"));
    let (agent, _) = agent_with(provider);
    let events = collect(agent.run("hi")).await;
    assert!(!events.iter().any(|e| matches!(e, AgentEvent::TextDelta { .. })));
}

// ── Limits ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn e2e_turn_ceiling_stops_endless_tool_use() {
    let turns = (0..5)
        .map(|i| ScriptedTurn::tool_use(&format!("tu_{i}"), "echo", json!({"text": "again"})))
        .collect();
    let provider = Arc::new(ScriptedProvider::new(turns));
    let (agent, _) = agent_with(provider.clone());

    let result = agent.with_max_turns(2).run("loop forever").result().await.unwrap();
    assert_eq!(result.outcome, RunOutcome::MaxTurnsExceeded);
    assert_eq!(result.turns, 2);
    assert!(!result.errors.is_empty());
    assert!(provider.call_count() <= 2);
}

#[tokio::test]
async fn e2e_budget_ceiling_stops_before_next_call() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        ScriptedTurn::tool_use("tu_1", "echo", json!({"text": "x"})).with_usage(TokenUsage::new(1_000_000, 0)),
        ScriptedTurn::text("never reached"),
    ]));
    let (agent, echo) = agent_with(provider.clone());
    let pricing = PricingTable::empty();
    pricing.set("test/model", ModelPricing::new(1.0, 0.0));

    let result = agent
        .with_model("test/model")
        .with_pricing(Arc::new(pricing))
        .with_max_budget_usd(0.5)
        .run("spend")
        .result()
        .await
        .unwrap();

    assert_eq!(result.outcome, RunOutcome::MaxBudgetExceeded);
    assert!((result.cost_usd() - 1.0).abs() < 1e-9);
    assert!(result.errors[0].contains("budget exceeded"));
    assert_eq!(echo.call_count(), 1);
    assert_eq!(provider.call_count(), 1);
}

// ── Hooks and permissions ────────────────────────────────────────────────

#[tokio::test]
async fn e2e_hook_deny_never_reaches_executor() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        ScriptedTurn::tool_use("tu_1", "echo", json!({"text": "rm -rf /"})),
        ScriptedTurn::text("Understood."),
    ]));
    let (agent, echo) = agent_with(provider.clone());
    let hooks = HookDispatcher::new().with(
        HookEventKind::PreToolUse,
        HookMatcher::for_tools("^echo$")
            .unwrap()
            .with_callback(hook_fn("guard", |_| HookOutput::deny("dangerous input"))),
    );

    let output = agent.with_hooks(hooks).run("do it").wait().await.unwrap();
    assert_eq!(echo.call_count(), 0);
    let (content, is_error) = output.conversation.find_tool_result("tu_1").unwrap();
    assert!(is_error);
    assert!(content.contains("dangerous input"));
    assert_eq!(output.result.outcome, RunOutcome::Success);
    assert_eq!(provider.call_count(), 2);
}

#[tokio::test]
async fn e2e_hook_interrupt_aborts_run() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        ScriptedTurn::tool_use("tu_1", "echo", json!({"text": "x"})),
        ScriptedTurn::text("never"),
    ]));
    let (agent, echo) = agent_with(provider.clone());
    let hooks = HookDispatcher::new().with(
        HookEventKind::PreToolUse,
        HookMatcher::any().with_callback(hook_fn("halt", |_| HookOutput::deny("halt everything").with_interrupt())),
    );

    let result = agent.with_hooks(hooks).run("go").result().await.unwrap();
    assert_eq!(result.outcome, RunOutcome::Aborted);
    assert!(result.errors[0].contains("halt everything"));
    assert_eq!(echo.call_count(), 0);
    assert_eq!(provider.call_count(), 1);
}

#[tokio::test]
async fn e2e_permission_mode_change_applies_mid_run() {
    let provider = Arc::new(
        ScriptedProvider::new(vec![
            ScriptedTurn::tool_use("tu_1", "echo", json!({"text": "x"})),
            ScriptedTurn::text("done"),
        ])
        .with_delay(Duration::from_millis(50)),
    );
    let (agent, echo) = agent_with(provider);

    let handle = agent.with_permission_mode(PermissionMode::Plan).run("go");
    handle.set_permission_mode(PermissionMode::BypassPermissions);
    let output = handle.wait().await.unwrap();

    assert_eq!(echo.call_count(), 1);
    assert_eq!(output.conversation.find_tool_result("tu_1"), Some(("x", false)));
}

// ── Cancellation ─────────────────────────────────────────────────────────

#[tokio::test]
async fn e2e_interrupt_aborts_stalled_turn() {
    let provider = Arc::new(ScriptedProvider::new(vec![ScriptedTurn::Stall]));
    let (agent, _) = agent_with(provider);

    let mut handle = agent.run("wait forever");
    assert!(matches!(handle.next_event().await, Some(AgentEvent::Init { .. })));
    handle.interrupt();

    let result = handle.result().await.unwrap();
    assert_eq!(result.outcome, RunOutcome::Aborted);
    assert_eq!(result.turns, 0);
    assert!(!result.errors.is_empty());
}

#[tokio::test]
async fn e2e_dropping_events_cancels_run() {
    let provider = Arc::new(ScriptedProvider::new(vec![ScriptedTurn::Stall]));
    let (agent, _) = agent_with(provider);

    let handle = agent.run("nobody is listening");
    let control = handle.control();
    drop(handle);

    let cancelled = tokio::time::timeout(WAIT, async {
        while !control.is_interrupted() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(cancelled.is_ok());
}

// ── Background tasks ─────────────────────────────────────────────────────

#[tokio::test]
async fn e2e_background_task_completes() {
    let provider = Arc::new(
        ScriptedProvider::new(vec![background_task("tu_1"), ScriptedTurn::text("Launched.")])
            .with_model_script(SUB_MODEL, vec![ScriptedTurn::text("nested answer")]),
    );
    let (agent, _) = agent_with(provider);

    let mut handle = agent.with_agent("researcher", researcher()).run("research in background");
    let task_id = started_task(&mut handle).await;

    let output = handle.task_output(&task_id, true, WAIT).await.unwrap();
    assert!(output.contains("nested answer"), "{output}");

    // reads are idempotent once the task is done
    let again = handle.task_output(&task_id, false, WAIT).await.unwrap();
    assert_eq!(again, handle.task_output(&task_id, false, WAIT).await.unwrap());

    let tasks = handle.list_tasks();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].state, TaskState::Completed);
    assert_eq!(tasks[0].agent_type, "researcher");

    let result = handle.result().await.unwrap();
    assert_eq!(result.outcome, RunOutcome::Success);
    assert_eq!(result.text(), "Launched.");
}

#[tokio::test]
async fn e2e_background_task_stop() {
    let provider = Arc::new(
        ScriptedProvider::new(vec![background_task("tu_1"), ScriptedTurn::text("Launched.")])
            .with_model_script(SUB_MODEL, vec![ScriptedTurn::Stall]),
    );
    let (agent, _) = agent_with(provider);

    let mut handle = agent.with_agent("researcher", researcher()).run("start and stop");
    let task_id = started_task(&mut handle).await;

    let first = handle.task_output(&task_id, false, WAIT).await.unwrap();
    let second = handle.task_output(&task_id, false, WAIT).await.unwrap();
    assert_eq!(first, second);
    assert!(first.contains("still running"));

    handle.stop_task(&task_id).unwrap();
    let output = handle.task_output(&task_id, true, WAIT).await.unwrap();
    assert!(output.contains("stopped"), "{output}");
    assert_eq!(handle.list_tasks()[0].state, TaskState::Stopped);

    assert!(matches!(
        handle.stop_task(&task_id),
        Err(AgentError::Task(TaskError::NotRunning { .. }))
    ));
    assert!(matches!(
        handle.stop_task("task_missing"),
        Err(AgentError::Task(TaskError::NotFound(_)))
    ));

    let result = handle.result().await.unwrap();
    assert_eq!(result.outcome, RunOutcome::Success);
}

#[tokio::test]
async fn e2e_parent_interrupt_stops_background_task() {
    let provider = Arc::new(
        ScriptedProvider::new(vec![background_task("tu_1"), ScriptedTurn::Stall])
            .with_model_script(SUB_MODEL, vec![ScriptedTurn::Stall]),
    );
    let (agent, _) = agent_with(provider);

    let mut handle = agent.with_agent("researcher", researcher()).run("start then hang");
    let task_id = started_task(&mut handle).await;
    assert_eq!(handle.list_tasks()[0].state, TaskState::Running);

    handle.interrupt();

    let output = handle.task_output(&task_id, true, WAIT).await.unwrap();
    assert!(output.contains("was stopped"), "{output}");
    let tasks = handle.list_tasks();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].state, TaskState::Stopped);

    let result = handle.result().await.unwrap();
    assert_eq!(result.outcome, RunOutcome::Aborted);
}

#[tokio::test(start_paused = true)]
async fn e2e_blocking_output_times_out_on_running_task() {
    let provider = Arc::new(
        ScriptedProvider::new(vec![background_task("tu_1"), ScriptedTurn::text("Launched.")])
            .with_model_script(SUB_MODEL, vec![ScriptedTurn::Stall]),
    );
    let (agent, _) = agent_with(provider);

    let mut handle = agent.with_agent("researcher", researcher()).run("start");
    let task_id = started_task(&mut handle).await;

    let output = handle
        .task_output(&task_id, true, Duration::from_millis(300))
        .await
        .unwrap();
    assert!(output.contains("timed out after 300 ms"));
    assert_eq!(handle.list_tasks()[0].state, TaskState::Running);

    handle.interrupt();
    handle.result().await.unwrap();
}

#[tokio::test]
async fn e2e_model_reads_background_output_with_tool() {
    // The model cannot know the generated id, so an unknown id exercises the
    // tool's error path and a listed id the happy path via the handle.
    let provider = Arc::new(ScriptedProvider::new(vec![
        ScriptedTurn::tool_use("tu_1", conductor_agent::TASK_OUTPUT_TOOL, json!({"task_id": "task_unknown"})),
        ScriptedTurn::text("No such task."),
    ]));
    let (agent, _) = agent_with(provider);

    let output = agent.run("check").wait().await.unwrap();
    let (content, is_error) = output.conversation.find_tool_result("tu_1").unwrap();
    assert!(is_error);
    assert!(content.contains("task_unknown"));
}
