//! Dispatch collaborator - launches and monitors processes for commands
//!
//! The engine never launches a process itself. It hands the resolved
//! invocation to a [`Dispatcher`], stores the returned [`TaskHandle`], and
//! waits for status changes.

use crate::core::StepState;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{watch, Mutex, Notify, Semaphore};
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Error types for dispatch operations
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Dispatcher has not been started")]
    NotStarted,

    #[error("Unknown task: {0}")]
    UnknownTask(TaskHandle),

    #[error("Launch failed: {0}")]
    Launch(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Opaque handle to an in-flight dispatch
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskHandle(String);

impl TaskHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random handle
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Status of a dispatched task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DispatchStatus {
    /// Accepted, not yet started
    Pending,
    Running,
    Succeeded,
    Failed { exit_code: Option<i32> },
    FailedToStart { reason: String },
    Killed,
}

impl DispatchStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, DispatchStatus::Pending | DispatchStatus::Running)
    }

    /// The step state this status maps to
    pub fn step_state(&self) -> StepState {
        match self {
            DispatchStatus::Pending => StepState::Pending,
            DispatchStatus::Running => StepState::Running,
            DispatchStatus::Succeeded => StepState::Complete,
            DispatchStatus::Failed { .. } => StepState::Failed,
            DispatchStatus::FailedToStart { .. } => StepState::Error,
            DispatchStatus::Killed => StepState::Killed,
        }
    }
}

/// Backoff used when a dispatcher can only be polled
#[derive(Debug, Clone, Copy)]
pub struct PollBackoff {
    pub initial: Duration,
    pub max: Duration,
}

impl Default for PollBackoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(50),
            max: Duration::from_secs(2),
        }
    }
}

/// Trait for dispatch services - allows for different execution environments
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Start accepting submissions
    async fn start(&self) -> Result<(), DispatchError> {
        Ok(())
    }

    /// Stop accepting submissions and kill whatever is still running
    async fn stop(&self) -> Result<(), DispatchError> {
        Ok(())
    }

    /// Whether submitted tasks may run concurrently
    fn supports_parallel(&self) -> bool {
        true
    }

    /// Submit an invocation, returning a handle to track it
    async fn submit(&self, invocation: &str) -> Result<TaskHandle, DispatchError>;

    /// Current status, without blocking on the task
    async fn status(&self, handle: &TaskHandle) -> Result<DispatchStatus, DispatchError>;

    /// Signal the task to stop. It later reports `Killed`.
    async fn kill(&self, handle: &TaskHandle) -> Result<(), DispatchError>;

    /// Wait until the status differs from `last`.
    ///
    /// The default polls [`Dispatcher::status`] with exponential backoff.
    /// Implementations with completion callbacks should override it.
    async fn next_status(
        &self,
        handle: &TaskHandle,
        last: &DispatchStatus,
        backoff: PollBackoff,
    ) -> Result<DispatchStatus, DispatchError> {
        let mut delay = backoff.initial;
        loop {
            let status = self.status(handle).await?;
            if status != *last {
                return Ok(status);
            }
            sleep(delay).await;
            delay = (delay * 2).min(backoff.max);
        }
    }
}

/// Configuration for the local dispatcher
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Shell used to interpret invocations
    pub shell: String,

    /// Maximum number of processes running at once
    pub max_concurrent: usize,

    /// Working directory for launched processes
    pub working_dir: Option<PathBuf>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            shell: "sh".to_string(),
            max_concurrent: 4,
            working_dir: None,
        }
    }
}

impl DispatchConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

struct LocalTask {
    status: watch::Receiver<DispatchStatus>,
    kill: Arc<Notify>,
}

/// Runs invocations as local shell subprocesses
pub struct LocalDispatcher {
    config: DispatchConfig,
    started: AtomicBool,
    slots: Arc<Semaphore>,
    tasks: Mutex<HashMap<TaskHandle, LocalTask>>,
}

impl LocalDispatcher {
    pub fn new(config: DispatchConfig) -> Self {
        let slots = Arc::new(Semaphore::new(config.max_concurrent.max(1)));
        Self {
            config,
            started: AtomicBool::new(false),
            slots,
            tasks: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Number of tasks whose final status has not been collected yet
    pub async fn tracked_tasks(&self) -> usize {
        self.tasks.lock().await.len()
    }
}

#[async_trait]
impl Dispatcher for LocalDispatcher {
    async fn start(&self) -> Result<(), DispatchError> {
        self.started.store(true, Ordering::SeqCst);
        info!(
            "Local dispatcher started ({} slots, shell {})",
            self.config.max_concurrent, self.config.shell
        );
        Ok(())
    }

    async fn stop(&self) -> Result<(), DispatchError> {
        self.started.store(false, Ordering::SeqCst);

        let mut tasks = self.tasks.lock().await;
        tasks.retain(|_, task| !task.status.borrow().is_terminal());
        for (handle, task) in tasks.iter() {
            debug!("Killing task {} on shutdown", handle);
            task.kill.notify_one();
        }
        info!("Local dispatcher stopped");
        Ok(())
    }

    async fn submit(&self, invocation: &str) -> Result<TaskHandle, DispatchError> {
        if !self.started.load(Ordering::SeqCst) {
            return Err(DispatchError::NotStarted);
        }

        let handle = TaskHandle::generate();
        let (status_tx, status_rx) = watch::channel(DispatchStatus::Pending);
        let kill = Arc::new(Notify::new());

        self.tasks.lock().await.insert(
            handle.clone(),
            LocalTask {
                status: status_rx,
                kill: Arc::clone(&kill),
            },
        );

        debug!("Dispatching task {}: {}", handle, invocation);
        tokio::spawn(run_process(
            self.config.clone(),
            invocation.to_string(),
            Arc::clone(&self.slots),
            status_tx,
            kill,
        ));

        Ok(handle)
    }

    async fn status(&self, handle: &TaskHandle) -> Result<DispatchStatus, DispatchError> {
        let tasks = self.tasks.lock().await;
        let task = tasks
            .get(handle)
            .ok_or_else(|| DispatchError::UnknownTask(handle.clone()))?;
        let status = task.status.borrow().clone();
        Ok(status)
    }

    async fn kill(&self, handle: &TaskHandle) -> Result<(), DispatchError> {
        let tasks = self.tasks.lock().await;
        let task = tasks
            .get(handle)
            .ok_or_else(|| DispatchError::UnknownTask(handle.clone()))?;
        if !task.status.borrow().is_terminal() {
            task.kill.notify_one();
        }
        Ok(())
    }

    async fn next_status(
        &self,
        handle: &TaskHandle,
        last: &DispatchStatus,
        _backoff: PollBackoff,
    ) -> Result<DispatchStatus, DispatchError> {
        let mut status = {
            let tasks = self.tasks.lock().await;
            tasks
                .get(handle)
                .ok_or_else(|| DispatchError::UnknownTask(handle.clone()))?
                .status
                .clone()
        };

        loop {
            let current = status.borrow_and_update().clone();
            if current != *last {
                // A terminal status is only handed out once
                if current.is_terminal() {
                    self.tasks.lock().await.remove(handle);
                }
                return Ok(current);
            }
            if status.changed().await.is_err() {
                return Err(DispatchError::Internal(format!(
                    "task {} ended without reporting a result",
                    handle
                )));
            }
        }
    }
}

async fn run_process(
    config: DispatchConfig,
    invocation: String,
    slots: Arc<Semaphore>,
    status: watch::Sender<DispatchStatus>,
    kill: Arc<Notify>,
) {
    let _permit = tokio::select! {
        permit = slots.acquire_owned() => match permit {
            Ok(permit) => permit,
            Err(_) => {
                status.send_replace(DispatchStatus::FailedToStart {
                    reason: "dispatcher closed".to_string(),
                });
                return;
            }
        },
        _ = kill.notified() => {
            status.send_replace(DispatchStatus::Killed);
            return;
        }
    };

    let mut command = tokio::process::Command::new(&config.shell);
    command
        .arg("-c")
        .arg(&invocation)
        .stdin(Stdio::null())
        .kill_on_drop(true);
    if let Some(dir) = &config.working_dir {
        command.current_dir(dir);
    }

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(e) => {
            warn!("Failed to launch '{}': {}", invocation, e);
            status.send_replace(DispatchStatus::FailedToStart {
                reason: e.to_string(),
            });
            return;
        }
    };
    status.send_replace(DispatchStatus::Running);

    let result = tokio::select! {
        exit = child.wait() => match exit {
            Ok(exit) if exit.success() => DispatchStatus::Succeeded,
            Ok(exit) => {
                warn!("'{}' exited with code {:?}", invocation, exit.code());
                DispatchStatus::Failed { exit_code: exit.code() }
            }
            Err(e) => {
                warn!("Failed to wait on '{}': {}", invocation, e);
                DispatchStatus::Failed { exit_code: None }
            }
        },
        _ = kill.notified() => {
            if let Err(e) = child.kill().await {
                warn!("Failed to kill '{}': {}", invocation, e);
            }
            DispatchStatus::Killed
        }
    };

    status.send_replace(result);
}
