//! Shell-command hooks.
//!
//! The command receives the [`HookInput`] as JSON on stdin.
//!
//! ## Exit Code Protocol
//! - 0: stdout is parsed as a JSON [`HookOutput`]; plain text becomes
//!   additional context, empty stdout means no opinion
//! - 2: deny, with stderr as the reason
//! - Other: warning logged, no opinion

use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::HookError;
use crate::dispatcher::HookCallback;
use crate::event::{HookInput, HookOutput};

/// Runs `sh -c <command>` for each event it is registered on.
#[derive(Debug, Clone)]
pub struct CommandHook {
    command: String,
    timeout: Duration,
}

impl CommandHook {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn interpret(exit_code: i32, stdout: &str, stderr: &str) -> HookOutput {
        match exit_code {
            0 => {
                let stdout = stdout.trim();
                if stdout.is_empty() {
                    return HookOutput::default();
                }
                serde_json::from_str::<HookOutput>(stdout)
                    .unwrap_or_else(|_| HookOutput::default().with_context(stdout))
            }
            2 => {
                let reason = if stderr.trim().is_empty() {
                    "Hook blocked execution".to_string()
                } else {
                    stderr.trim().to_string()
                };
                HookOutput::deny(reason)
            }
            code => {
                warn!(exit_code = code, stderr = %stderr.trim(), "Hook exited with non-blocking error");
                HookOutput::default()
            }
        }
    }
}

#[async_trait]
impl HookCallback for CommandHook {
    fn name(&self) -> &str {
        &self.command
    }

    async fn call(&self, input: &HookInput) -> Result<HookOutput, HookError> {
        let failed = |reason: String| HookError::CommandFailed {
            command: self.command.clone(),
            reason,
        };

        let payload = serde_json::to_vec(input).map_err(|e| failed(e.to_string()))?;

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| failed(format!("failed to spawn: {e}")))?;

        if let Some(mut stdin) = child.stdin.take() {
            if let Err(e) = stdin.write_all(&payload).await {
                // A hook that ignores stdin may close it early.
                debug!(command = %self.command, "Failed to write hook stdin: {}", e);
            }
        }

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(failed(e.to_string())),
            Err(_) => {
                return Err(HookError::Timeout {
                    hook: self.command.clone(),
                    timeout_secs: self.timeout.as_secs(),
                });
            }
        };

        let exit_code = output.status.code().unwrap_or(-1);
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        debug!(command = %self.command, exit_code, "Hook command complete");

        Ok(Self::interpret(exit_code, &stdout, &stderr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{HookDecision, HookEventKind};
    use serde_json::json;

    #[test]
    fn exit_zero_with_json() {
        let out = CommandHook::interpret(0, r#"{"decision":"allow","additional_context":"ok"}"#, "");
        assert_eq!(out.decision, Some(HookDecision::Allow));
        assert_eq!(out.additional_context.as_deref(), Some("ok"));
    }

    #[test]
    fn exit_zero_plain_text_is_context() {
        let out = CommandHook::interpret(0, "branch: main\n", "");
        assert_eq!(out.additional_context.as_deref(), Some("branch: main"));
        assert!(CommandHook::interpret(0, "  \n", "").is_empty());
    }

    #[test]
    fn exit_two_denies_with_stderr() {
        let out = CommandHook::interpret(2, "", "rm is not allowed\n");
        assert!(out.is_deny());
        assert_eq!(out.reason.as_deref(), Some("rm is not allowed"));
        assert_eq!(
            CommandHook::interpret(2, "", "").reason.as_deref(),
            Some("Hook blocked execution")
        );
    }

    #[test]
    fn other_exit_is_no_opinion() {
        assert!(CommandHook::interpret(1, "{}", "warning").is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_reads_stdin_and_blocks() {
        let hook = CommandHook::new("grep -q 'rm -rf' && { echo 'destructive' >&2; exit 2; } || exit 0");
        let input = HookInput::new(HookEventKind::PreToolUse, "s")
            .with_tool("Bash", json!({"command": "rm -rf /"}), "tu");
        let out = hook.call(&input).await.unwrap();
        assert!(out.is_deny());
        assert_eq!(out.reason.as_deref(), Some("destructive"));

        let input = HookInput::new(HookEventKind::PreToolUse, "s")
            .with_tool("Bash", json!({"command": "ls"}), "tu");
        assert!(hook.call(&input).await.unwrap().is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_timeout_is_an_error() {
        let hook = CommandHook::new("sleep 5").with_timeout(Duration::from_millis(50));
        let input = HookInput::new(HookEventKind::SessionStart, "s");
        assert!(matches!(hook.call(&input).await, Err(HookError::Timeout { .. })));
    }
}
