//! Hook dispatch table: event kind → ordered matcher groups → ordered callbacks.

use async_trait::async_trait;
use regex_lite::Regex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::HookError;
use crate::event::{HookEventKind, HookInput, HookOutput};

/// Something that reacts to a hook event.
#[async_trait]
pub trait HookCallback: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str {
        "callback"
    }

    async fn call(&self, input: &HookInput) -> Result<HookOutput, HookError>;
}

/// Adapts a synchronous closure into a [`HookCallback`].
pub struct FnHook<F> {
    name: String,
    f: F,
}

#[async_trait]
impl<F> HookCallback for FnHook<F>
where
    F: Fn(&HookInput) -> HookOutput + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn call(&self, input: &HookInput) -> Result<HookOutput, HookError> {
        Ok((self.f)(input))
    }
}

/// Wrap a closure as a shareable hook callback.
pub fn hook_fn<F>(name: impl Into<String>, f: F) -> Arc<dyn HookCallback>
where
    F: Fn(&HookInput) -> HookOutput + Send + Sync + 'static,
{
    Arc::new(FnHook { name: name.into(), f })
}

/// A group of callbacks sharing one optional tool-name filter.
#[derive(Clone)]
pub struct HookMatcher {
    pattern: Option<Regex>,
    callbacks: Vec<Arc<dyn HookCallback>>,
    timeout: Option<Duration>,
}

impl HookMatcher {
    /// A group that runs for every tool.
    pub fn any() -> Self {
        Self {
            pattern: None,
            callbacks: Vec::new(),
            timeout: None,
        }
    }

    /// A group that runs only when the tool name matches `pattern`.
    pub fn for_tools(pattern: &str) -> Result<Self, HookError> {
        let regex = Regex::new(pattern).map_err(|e| HookError::InvalidMatcher {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            pattern: Some(regex),
            ..Self::any()
        })
    }

    pub fn with_callback(mut self, callback: Arc<dyn HookCallback>) -> Self {
        self.callbacks.push(callback);
        self
    }

    /// Bound each callback in this group; a callback that overruns counts as no opinion.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Non-tool events ignore the filter.
    /// Matchers only filter tool events; lifecycle events reach every group.
    fn applies_to(&self, input: &HookInput) -> bool {
        match &self.pattern {
            Some(pattern) if input.event.is_tool_event() => {
                pattern.is_match(input.tool_name.as_deref().unwrap_or_default())
            }
            _ => true,
        }
    }
}

/// Fires lifecycle events at registered callbacks and merges their answers.
///
/// Built once, then shared read-only by every loop in the process.
#[derive(Clone, Default)]
pub struct HookDispatcher {
    table: HashMap<HookEventKind, Vec<HookMatcher>>,
}

impl HookDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, kind: HookEventKind, matcher: HookMatcher) {
        self.table.entry(kind).or_default().push(matcher);
    }

    /// Builder form of [`register`](Self::register).
    pub fn with(mut self, kind: HookEventKind, matcher: HookMatcher) -> Self {
        self.register(kind, matcher);
        self
    }

    pub fn has_hooks(&self, kind: HookEventKind) -> bool {
        self.table.get(&kind).is_some_and(|groups| !groups.is_empty())
    }

    pub fn is_empty(&self) -> bool {
        self.table.values().all(|groups| groups.is_empty())
    }

    /// Run every applicable callback for `input.event` in registration order.
    ///
    /// Returns `None` when nothing is registered or every callback had no opinion.
    /// A failing or timed-out callback is logged and treated as no opinion.
    pub async fn fire(&self, input: &HookInput) -> Option<HookOutput> {
        let groups = self.table.get(&input.event)?;

        let mut merged: Option<HookOutput> = None;
        for group in groups.iter().filter(|g| g.applies_to(input)) {
            for callback in &group.callbacks {
                let call = callback.call(input);
                let result = match group.timeout {
                    Some(limit) => match tokio::time::timeout(limit, call).await {
                        Ok(result) => result,
                        Err(_) => Err(HookError::Timeout {
                            hook: callback.name().to_string(),
                            timeout_secs: limit.as_secs(),
                        }),
                    },
                    None => call.await,
                };

                match result {
                    Ok(output) if output.is_empty() => {}
                    Ok(output) => {
                        debug!(event = %input.event, hook = callback.name(), "Hook returned output");
                        match merged.as_mut() {
                            Some(acc) => acc.merge(output),
                            None => merged = Some(output),
                        }
                    }
                    Err(e) => {
                        warn!(event = %input.event, hook = callback.name(), error = %e, "Hook failed, ignoring");
                    }
                }
            }
        }

        if let Some(output) = &merged {
            if output.is_deny() {
                warn!(
                    event = %input.event,
                    tool = input.tool_name.as_deref().unwrap_or(""),
                    reason = output.reason.as_deref().unwrap_or(""),
                    "Hook denied"
                );
            }
        }
        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::HookDecision;
    use serde_json::json;
    use std::sync::Mutex;

    fn pre_tool(tool: &str) -> HookInput {
        HookInput::new(HookEventKind::PreToolUse, "s").with_tool(tool, json!({"command": "ls"}), "tu_1")
    }

    fn fixed(output: HookOutput) -> Arc<dyn HookCallback> {
        hook_fn("fixed", move |_| output.clone())
    }

    struct Failing;

    #[async_trait]
    impl HookCallback for Failing {
        async fn call(&self, _input: &HookInput) -> Result<HookOutput, HookError> {
            Err(HookError::CommandFailed {
                command: "false".into(),
                reason: "exit 1".into(),
            })
        }
    }

    struct Slow;

    #[async_trait]
    impl HookCallback for Slow {
        async fn call(&self, _input: &HookInput) -> Result<HookOutput, HookError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(HookOutput::deny("too late"))
        }
    }

    #[tokio::test]
    async fn no_registrations_is_no_opinion() {
        let dispatcher = HookDispatcher::new();
        assert!(dispatcher.fire(&pre_tool("Bash")).await.is_none());
        assert!(dispatcher.is_empty());
    }

    #[tokio::test]
    async fn matcher_ignored_for_lifecycle_events() {
        let dispatcher = HookDispatcher::new()
            .with(
                HookEventKind::Stop,
                HookMatcher::for_tools("^Bash$")
                    .unwrap()
                    .with_callback(fixed(HookOutput::default().with_stop_reason("hooked"))),
            )
            .with(
                HookEventKind::PreToolUse,
                HookMatcher::for_tools("^Bash$").unwrap().with_callback(fixed(HookOutput::deny("no"))),
            );

        let stop = HookInput::new(HookEventKind::Stop, "s");
        let merged = dispatcher.fire(&stop).await.unwrap();
        assert_eq!(merged.stop_reason.as_deref(), Some("hooked"));

        let no_tool = HookInput::new(HookEventKind::PreToolUse, "s");
        assert!(dispatcher.fire(&no_tool).await.is_none());
        assert!(dispatcher.fire(&pre_tool("Read")).await.is_none());
        assert!(dispatcher.fire(&pre_tool("Bash")).await.unwrap().is_deny());
    }

    #[tokio::test]
    async fn all_empty_outputs_is_no_opinion() {
        let dispatcher = HookDispatcher::new().with(
            HookEventKind::PreToolUse,
            HookMatcher::any()
                .with_callback(fixed(HookOutput::default()))
                .with_callback(fixed(HookOutput::default())),
        );
        assert!(dispatcher.fire(&pre_tool("Bash")).await.is_none());
    }

    #[tokio::test]
    async fn deny_wins_in_either_order() {
        for outputs in [
            [HookOutput::allow(), HookOutput::deny("blocked")],
            [HookOutput::deny("blocked"), HookOutput::allow()],
        ] {
            let [first, second] = outputs;
            let dispatcher = HookDispatcher::new()
                .with(HookEventKind::PreToolUse, HookMatcher::any().with_callback(fixed(first)))
                .with(HookEventKind::PreToolUse, HookMatcher::any().with_callback(fixed(second)));
            let merged = dispatcher.fire(&pre_tool("Bash")).await.unwrap();
            assert_eq!(merged.decision, Some(HookDecision::Deny));
            assert_eq!(merged.reason.as_deref(), Some("blocked"));
        }
    }

    #[tokio::test]
    async fn allow_only_merges_to_allow() {
        let dispatcher = HookDispatcher::new().with(
            HookEventKind::PreToolUse,
            HookMatcher::any()
                .with_callback(fixed(HookOutput::allow()))
                .with_callback(fixed(HookOutput::default().with_context("noted"))),
        );
        let merged = dispatcher.fire(&pre_tool("Bash")).await.unwrap();
        assert_eq!(merged.decision, Some(HookDecision::Allow));
        assert_eq!(merged.additional_context.as_deref(), Some("noted"));
    }

    #[tokio::test]
    async fn last_updated_input_and_stop_reason_win() {
        let dispatcher = HookDispatcher::new().with(
            HookEventKind::PreToolUse,
            HookMatcher::any()
                .with_callback(fixed(
                    HookOutput::default()
                        .with_updated_input(json!({"command": "ls -a"}))
                        .with_stop_reason("first"),
                ))
                .with_callback(fixed(
                    HookOutput::default()
                        .with_updated_input(json!({"command": "ls -la"}))
                        .with_stop_reason("second"),
                )),
        );
        let merged = dispatcher.fire(&pre_tool("Bash")).await.unwrap();
        assert_eq!(merged.updated_input, Some(json!({"command": "ls -la"})));
        assert_eq!(merged.stop_reason.as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn context_concatenated_in_callback_order() {
        let dispatcher = HookDispatcher::new()
            .with(
                HookEventKind::PostToolUse,
                HookMatcher::any().with_callback(fixed(HookOutput::default().with_context("one"))),
            )
            .with(
                HookEventKind::PostToolUse,
                HookMatcher::any()
                    .with_callback(fixed(HookOutput::default().with_context("two")))
                    .with_callback(fixed(HookOutput::default().with_context("three"))),
            );
        let input = HookInput::new(HookEventKind::PostToolUse, "s").with_tool("Read", json!({}), "tu");
        let merged = dispatcher.fire(&input).await.unwrap();
        assert_eq!(merged.additional_context.as_deref(), Some("one\ntwo\nthree"));
    }

    #[tokio::test]
    async fn non_matching_group_is_skipped() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();
        let dispatcher = HookDispatcher::new().with(
            HookEventKind::PreToolUse,
            HookMatcher::for_tools("^(Edit|Write)$").unwrap().with_callback(hook_fn("record", move |input| {
                log.lock().unwrap().push(input.tool_name.clone());
                HookOutput::deny("no edits")
            })),
        );
        assert!(dispatcher.fire(&pre_tool("Bash")).await.is_none());
        assert!(dispatcher.fire(&pre_tool("Write")).await.unwrap().is_deny());
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn matcher_ignored_for_non_tool_events() {
        let dispatcher = HookDispatcher::new().with(
            HookEventKind::UserPromptSubmit,
            HookMatcher::for_tools("^Bash$")
                .unwrap()
                .with_callback(fixed(HookOutput::default().with_context("repo is clean"))),
        );
        let input = HookInput::new(HookEventKind::UserPromptSubmit, "s").with_extra("prompt", "hi");
        let merged = dispatcher.fire(&input).await.unwrap();
        assert_eq!(merged.additional_context.as_deref(), Some("repo is clean"));
    }

    #[tokio::test]
    async fn failing_callback_does_not_poison_merge() {
        let dispatcher = HookDispatcher::new().with(
            HookEventKind::PreToolUse,
            HookMatcher::any()
                .with_callback(Arc::new(Failing))
                .with_callback(fixed(HookOutput::allow())),
        );
        let merged = dispatcher.fire(&pre_tool("Bash")).await.unwrap();
        assert_eq!(merged.decision, Some(HookDecision::Allow));
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_callback_is_no_opinion() {
        let dispatcher = HookDispatcher::new().with(
            HookEventKind::PreToolUse,
            HookMatcher::any()
                .with_timeout(Duration::from_secs(1))
                .with_callback(Arc::new(Slow)),
        );
        assert!(dispatcher.fire(&pre_tool("Bash")).await.is_none());
    }

    #[test]
    fn invalid_matcher_rejected() {
        assert!(matches!(
            HookMatcher::for_tools("(unclosed"),
            Err(HookError::InvalidMatcher { .. })
        ));
    }

    #[test]
    fn has_hooks_per_kind() {
        let dispatcher = HookDispatcher::new().with(HookEventKind::Stop, HookMatcher::any());
        assert!(dispatcher.has_hooks(HookEventKind::Stop));
        assert!(!dispatcher.has_hooks(HookEventKind::PreToolUse));
    }
}
