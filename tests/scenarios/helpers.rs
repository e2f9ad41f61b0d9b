//! Test utilities for flowprint scenarios

use async_trait::async_trait;
use flowprint::core::{Run, StepId, StepState};
use flowprint::execution::{
    DispatchError, DispatchStatus, Dispatcher, EngineConfig, ExecutionEngine, PollBackoff,
    TaskHandle,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

struct ScriptedTask {
    outcome: DispatchStatus,
    held: bool,
    killed: bool,
}

/// Mock dispatcher whose outcomes are decided by the invocation text.
///
/// - any word `false` fails the task with exit code 1
/// - an invocation starting with `unlaunchable` fails to start
/// - anything else succeeds
///
/// While holding, new tasks stay running until released or killed.
pub struct ScriptedDispatcher {
    tasks: Mutex<HashMap<TaskHandle, ScriptedTask>>,
    submissions: Mutex<Vec<String>>,
    parallel: bool,
    hold: AtomicBool,
}

impl ScriptedDispatcher {
    pub fn new() -> Self {
        Self {
            tasks: Mutex::new(HashMap::new()),
            submissions: Mutex::new(Vec::new()),
            parallel: true,
            hold: AtomicBool::new(false),
        }
    }

    /// A dispatcher that can only run one task at a time
    pub fn serial_only() -> Self {
        Self {
            parallel: false,
            ..Self::new()
        }
    }

    pub fn holding() -> Self {
        let dispatcher = Self::new();
        dispatcher.hold.store(true, Ordering::SeqCst);
        dispatcher
    }

    /// Let every held task finish with its scripted outcome
    pub fn release_all(&self) {
        self.hold.store(false, Ordering::SeqCst);
        for task in self.tasks.lock().unwrap().values_mut() {
            task.held = false;
        }
    }

    /// Invocations in submission order
    pub fn submissions(&self) -> Vec<String> {
        self.submissions.lock().unwrap().clone()
    }

    /// Wait until at least `count` tasks were submitted
    pub async fn wait_for_submissions(&self, count: usize) {
        for _ in 0..400 {
            if self.submissions.lock().unwrap().len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!(
            "expected {} submissions, got {:?}",
            count,
            self.submissions()
        );
    }

    fn outcome_for(invocation: &str) -> DispatchStatus {
        if invocation.starts_with("unlaunchable") {
            DispatchStatus::FailedToStart {
                reason: "no such executable".to_string(),
            }
        } else if invocation.split_whitespace().any(|word| word == "false") {
            DispatchStatus::Failed { exit_code: Some(1) }
        } else {
            DispatchStatus::Succeeded
        }
    }
}

#[async_trait]
impl Dispatcher for ScriptedDispatcher {
    fn supports_parallel(&self) -> bool {
        self.parallel
    }

    async fn submit(&self, invocation: &str) -> Result<TaskHandle, DispatchError> {
        let handle = TaskHandle::generate();
        self.submissions
            .lock()
            .unwrap()
            .push(invocation.to_string());
        self.tasks.lock().unwrap().insert(
            handle.clone(),
            ScriptedTask {
                outcome: Self::outcome_for(invocation),
                held: self.hold.load(Ordering::SeqCst),
                killed: false,
            },
        );
        Ok(handle)
    }

    async fn status(&self, handle: &TaskHandle) -> Result<DispatchStatus, DispatchError> {
        let tasks = self.tasks.lock().unwrap();
        let task = tasks
            .get(handle)
            .ok_or_else(|| DispatchError::UnknownTask(handle.clone()))?;

        Ok(if task.killed {
            DispatchStatus::Killed
        } else if task.held {
            DispatchStatus::Running
        } else {
            task.outcome.clone()
        })
    }

    async fn kill(&self, handle: &TaskHandle) -> Result<(), DispatchError> {
        let mut tasks = self.tasks.lock().unwrap();
        let task = tasks
            .get_mut(handle)
            .ok_or_else(|| DispatchError::UnknownTask(handle.clone()))?;
        if task.held {
            task.killed = true;
        }
        Ok(())
    }
}

/// Engine over a scripted dispatcher, polling quickly
pub fn engine_for(dispatcher: &Arc<ScriptedDispatcher>, run: Run) -> ExecutionEngine<ScriptedDispatcher> {
    ExecutionEngine::builder(Arc::clone(dispatcher), run)
        .config(EngineConfig {
            poll_backoff: PollBackoff {
                initial: Duration::from_millis(2),
                max: Duration::from_millis(10),
            },
        })
        .build()
}

/// Wait until a step is in the given state
pub async fn wait_for_state(
    engine: &ExecutionEngine<ScriptedDispatcher>,
    id: StepId,
    state: StepState,
) {
    for _ in 0..400 {
        if engine.state(id).await == Some(state) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!(
        "step {} never reached {}, last seen {:?}",
        id,
        state,
        engine.state(id).await
    );
}

/// States of a flow's children, in declared order
pub fn child_states(run: &Run, flow: StepId) -> Vec<StepState> {
    run.children(flow)
        .iter()
        .filter_map(|id| run.state(*id))
        .collect()
}
