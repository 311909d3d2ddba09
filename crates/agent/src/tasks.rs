//! Background task registry.
//!
//! Tracks subagent runs that execute concurrently with their parent. Each
//! record leaves `Running` exactly once: whichever of a stop request or the
//! task's own completion gets there first wins, and later writers are ignored.

use chrono::{DateTime, Utc};
use conductor_telemetry::UsageSummary;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

/// Lifecycle state of a background task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Running,
    Completed,
    Failed,
    Stopped,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// A point-in-time copy of a task record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub id: String,
    pub agent_type: String,
    pub description: String,
    pub state: TaskState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<UsageSummary>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl TaskSnapshot {
    /// Human-readable status, as handed to the model by `TaskOutput`.
    pub fn summary(&self) -> String {
        match self.state {
            TaskState::Running => format!("Task {} ({}) is still running", self.id, self.agent_type),
            TaskState::Completed => format!(
                "Task {} ({}) completed:\n{}",
                self.id,
                self.agent_type,
                self.result.as_deref().unwrap_or("")
            ),
            TaskState::Failed => format!(
                "Task {} ({}) failed: {}",
                self.id,
                self.agent_type,
                self.error.as_deref().unwrap_or("unknown error")
            ),
            TaskState::Stopped => format!("Task {} ({}) was stopped", self.id, self.agent_type),
        }
    }
}

struct TaskRecord {
    snapshot: TaskSnapshot,
    cancel: CancellationToken,
    done: watch::Sender<bool>,
}

/// Terminal outcome written back by a finished task.
#[derive(Debug, Clone)]
pub enum TaskOutcome {
    Completed(String),
    Failed(String),
    Stopped,
}

/// Errors from task controls.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TaskError {
    #[error("no task with id '{0}'")]
    NotFound(String),

    #[error("task '{id}' is not running (state: {state})")]
    NotRunning { id: String, state: TaskState },
}

/// Shared map of task id → record, guarded by one mutex.
#[derive(Default)]
pub struct TaskRegistry {
    tasks: Mutex<HashMap<String, TaskRecord>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, TaskRecord>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert a new `Running` task. `cancel` is signalled by [`stop`](Self::stop).
    pub fn register(
        &self,
        agent_type: impl Into<String>,
        description: impl Into<String>,
        cancel: CancellationToken,
    ) -> String {
        let id = format!("task_{}", &Uuid::new_v4().simple().to_string()[..12]);
        let (done, _) = watch::channel(false);
        let snapshot = TaskSnapshot {
            id: id.clone(),
            agent_type: agent_type.into(),
            description: description.into(),
            state: TaskState::Running,
            result: None,
            error: None,
            usage: None,
            started_at: Utc::now(),
            finished_at: None,
        };
        info!(task_id = %id, agent_type = %snapshot.agent_type, "Registered background task");
        self.lock().insert(id.clone(), TaskRecord { snapshot, cancel, done });
        id
    }

    /// Write a task's terminal outcome. Returns `false` if the task already
    /// left `Running` (or does not exist); the earlier outcome is kept.
    pub fn finish(&self, id: &str, outcome: TaskOutcome, usage: Option<UsageSummary>) -> bool {
        let mut tasks = self.lock();
        let Some(record) = tasks.get_mut(id) else {
            return false;
        };
        if record.snapshot.state.is_terminal() {
            debug!(task_id = %id, state = %record.snapshot.state, "Ignoring late task outcome");
            return false;
        }

        let snap = &mut record.snapshot;
        match outcome {
            TaskOutcome::Completed(result) => {
                snap.state = TaskState::Completed;
                snap.result = Some(result);
            }
            TaskOutcome::Failed(error) => {
                snap.state = TaskState::Failed;
                snap.error = Some(error);
            }
            TaskOutcome::Stopped => snap.state = TaskState::Stopped,
        }
        snap.usage = usage;
        snap.finished_at = Some(Utc::now());
        info!(task_id = %id, state = %snap.state, "Background task finished");
        record.done.send_replace(true);
        true
    }

    /// Stop a running task and signal its cancellation handle.
    pub fn stop(&self, id: &str) -> Result<(), TaskError> {
        let mut tasks = self.lock();
        let record = tasks.get_mut(id).ok_or_else(|| TaskError::NotFound(id.to_string()))?;
        if record.snapshot.state.is_terminal() {
            return Err(TaskError::NotRunning {
                id: id.to_string(),
                state: record.snapshot.state,
            });
        }

        record.snapshot.state = TaskState::Stopped;
        record.snapshot.finished_at = Some(Utc::now());
        record.cancel.cancel();
        record.done.send_replace(true);
        info!(task_id = %id, "Stopped background task");
        Ok(())
    }

    pub fn snapshot(&self, id: &str) -> Option<TaskSnapshot> {
        self.lock().get(id).map(|r| r.snapshot.clone())
    }

    /// Summary of a task. With `block`, waits up to `timeout` for it to finish;
    /// a timeout leaves the task untouched.
    pub async fn get_output(&self, id: &str, block: bool, timeout: Duration) -> Result<String, TaskError> {
        let mut done = {
            let tasks = self.lock();
            let record = tasks.get(id).ok_or_else(|| TaskError::NotFound(id.to_string()))?;
            if !block || record.snapshot.state.is_terminal() {
                return Ok(record.snapshot.summary());
            }
            record.done.subscribe()
        };

        if tokio::time::timeout(timeout, done.wait_for(|finished| *finished)).await.is_err() {
            return Ok(format!(
                "Task {id} is still running (timed out after {} ms)",
                timeout.as_millis()
            ));
        }

        self.snapshot(id)
            .map(|s| s.summary())
            .ok_or_else(|| TaskError::NotFound(id.to_string()))
    }

    /// Snapshot of every task, oldest first.
    pub fn list(&self) -> Vec<TaskSnapshot> {
        let mut tasks: Vec<TaskSnapshot> = self.lock().values().map(|r| r.snapshot.clone()).collect();
        tasks.sort_by(|a, b| a.started_at.cmp(&b.started_at).then_with(|| a.id.cmp(&b.id)));
        tasks
    }

    pub fn running_count(&self) -> usize {
        self.lock()
            .values()
            .filter(|r| r.snapshot.state == TaskState::Running)
            .count()
    }
}

impl std::fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRegistry").field("tasks", &self.lock().len()).finish()
    }
}
