//! Handle to a spawned run: its event stream plus interactive controls.

use conductor_core::{CancellationToken, PermissionMode, SessionId};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tracing::info;

use crate::AgentError;
use crate::loop_runner::RunOutput;
use crate::stream_event::{AgentEvent, RunResult};
use crate::tasks::{TaskRegistry, TaskSnapshot};

/// Controls for a live run. Cheap to clone and usable from any task.
#[derive(Clone)]
pub struct RunControl {
    cancel: CancellationToken,
    mode: Arc<watch::Sender<PermissionMode>>,
    tasks: Arc<TaskRegistry>,
}

impl RunControl {
    pub(crate) fn new(cancel: CancellationToken, mode: watch::Sender<PermissionMode>, tasks: Arc<TaskRegistry>) -> Self {
        Self {
            cancel,
            mode: Arc::new(mode),
            tasks,
        }
    }

    /// Cancel the run. The in-flight model call or tool is abandoned and the
    /// run ends `aborted`.
    pub fn interrupt(&self) {
        info!("Run interrupted by caller");
        self.cancel.cancel();
    }

    pub fn is_interrupted(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Switch the permission mode. Takes effect from the next tool evaluation.
    pub fn set_permission_mode(&self, mode: PermissionMode) {
        info!(mode = %mode, "Permission mode changed");
        self.mode.send_replace(mode);
    }

    pub fn permission_mode(&self) -> PermissionMode {
        *self.mode.borrow()
    }

    pub fn tasks(&self) -> &Arc<TaskRegistry> {
        &self.tasks
    }

    /// Track externally started work alongside the run's subagents. The task
    /// is stopped when the run is interrupted.
    pub fn register_task(&self, agent_type: &str, description: &str) -> (String, CancellationToken) {
        let cancel = self.cancel.child_token();
        let id = self.tasks.register(agent_type, description, cancel.clone());
        (id, cancel)
    }

    pub fn stop_task(&self, task_id: &str) -> Result<(), AgentError> {
        Ok(self.tasks.stop(task_id)?)
    }

    pub async fn task_output(&self, task_id: &str, block: bool, timeout: Duration) -> Result<String, AgentError> {
        Ok(self.tasks.get_output(task_id, block, timeout).await?)
    }

    pub fn list_tasks(&self) -> Vec<TaskSnapshot> {
        self.tasks.list()
    }
}

/// A spawned run.
pub struct RunHandle {
    session_id: SessionId,
    events: mpsc::Receiver<AgentEvent>,
    control: RunControl,
    join: JoinHandle<RunOutput>,
}

impl RunHandle {
    pub(crate) fn new(
        session_id: SessionId,
        events: mpsc::Receiver<AgentEvent>,
        control: RunControl,
        join: JoinHandle<RunOutput>,
    ) -> Self {
        Self {
            session_id,
            events,
            control,
            join,
        }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Next event, or `None` once the terminal result has been delivered.
    pub async fn next_event(&mut self) -> Option<AgentEvent> {
        self.events.recv().await
    }

    pub fn control(&self) -> RunControl {
        self.control.clone()
    }

    pub fn interrupt(&self) {
        self.control.interrupt();
    }

    pub fn set_permission_mode(&self, mode: PermissionMode) {
        self.control.set_permission_mode(mode);
    }

    pub fn stop_task(&self, task_id: &str) -> Result<(), AgentError> {
        self.control.stop_task(task_id)
    }

    pub async fn task_output(&self, task_id: &str, block: bool, timeout: Duration) -> Result<String, AgentError> {
        self.control.task_output(task_id, block, timeout).await
    }

    pub fn list_tasks(&self) -> Vec<TaskSnapshot> {
        self.control.list_tasks()
    }

    /// Split into an event stream and detached controls. The run keeps going
    /// for as long as the stream is alive.
    pub fn into_stream(self) -> (ReceiverStream<AgentEvent>, RunControl) {
        (ReceiverStream::new(self.events), self.control)
    }

    /// Drain remaining events and wait for the run to finish.
    pub async fn wait(mut self) -> Result<RunOutput, AgentError> {
        while self.events.recv().await.is_some() {}
        self.join.await.map_err(|e| AgentError::Join(e.to_string()))
    }

    /// Like [`wait`](Self::wait), returning only the terminal result.
    pub async fn result(self) -> Result<RunResult, AgentError> {
        self.wait().await.map(|output| output.result)
    }
}

impl std::fmt::Debug for RunHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunHandle")
            .field("session_id", &self.session_id)
            .field("interrupted", &self.control.is_interrupted())
            .field("permission_mode", &self.control.permission_mode())
            .finish()
    }
}
