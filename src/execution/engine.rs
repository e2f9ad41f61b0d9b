//! Main execution engine - drives runs and owns every state transition
//!
//! All state writes for a run go through one engine while holding the run
//! lock, so two children finishing at the same time are aggregated one after
//! the other instead of racing on their parent.

use crate::{
    core::{ConditionEvaluator, FlowType, LiteralConditionEvaluator, Run, Step, StepId, StepState},
    error::{EngineError, Result},
    execution::{
        aggregation::{self, StateChange},
        dispatch::{DispatchStatus, Dispatcher, PollBackoff, TaskHandle},
    },
    persistence::RunStore,
};
use chrono::Utc;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Events that can occur during a run
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    RunStarted {
        run_id: Uuid,
        flow_name: String,
    },
    StepStateChanged {
        step_id: StepId,
        name: String,
        from: StepState,
        to: StepState,
    },
    CommandSubmitted {
        step_id: StepId,
        exec_string: String,
        task_id: TaskHandle,
    },
    FlowSkipped {
        step_id: StepId,
        name: String,
    },
    RunFinished {
        run_id: Uuid,
        state: StepState,
    },
}

/// Type for event handlers
pub type EventHandler = Arc<dyn Fn(ExecutionEvent) + Send + Sync>;

/// Engine settings
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    /// Backoff for dispatchers that can only be polled
    pub poll_backoff: PollBackoff,
}

type StepFuture = Pin<Box<dyn Future<Output = Result<()>> + Send + 'static>>;

struct EngineInner<D> {
    run_id: Uuid,
    root: StepId,
    flow_name: String,
    run: Mutex<Run>,
    dispatcher: Arc<D>,
    store: Option<Arc<dyn RunStore>>,
    conditions: Arc<dyn ConditionEvaluator>,
    config: EngineConfig,
    event_handlers: Mutex<Vec<EventHandler>>,
    changed: Notify,
    saved: AtomicBool,
}

/// Builder for [`ExecutionEngine`]
pub struct EngineBuilder<D> {
    dispatcher: Arc<D>,
    run: Run,
    store: Option<Arc<dyn RunStore>>,
    conditions: Arc<dyn ConditionEvaluator>,
    config: EngineConfig,
}

impl<D: Dispatcher + 'static> EngineBuilder<D> {
    /// Persist every transition to a store
    pub fn store(mut self, store: Arc<dyn RunStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn condition_evaluator(mut self, evaluator: Arc<dyn ConditionEvaluator>) -> Self {
        self.conditions = evaluator;
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> ExecutionEngine<D> {
        ExecutionEngine {
            inner: Arc::new(EngineInner {
                run_id: self.run.id(),
                root: self.run.root(),
                flow_name: self.run.name().to_string(),
                run: Mutex::new(self.run),
                dispatcher: self.dispatcher,
                store: self.store,
                conditions: self.conditions,
                config: self.config,
                event_handlers: Mutex::new(Vec::new()),
                changed: Notify::new(),
                saved: AtomicBool::new(false),
            }),
        }
    }
}

/// Drives one run through its dispatcher
pub struct ExecutionEngine<D> {
    inner: Arc<EngineInner<D>>,
}

impl<D> Clone for ExecutionEngine<D> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Set a step's state, returning the change if there was one
fn set_state(run: &mut Run, id: StepId, to: StepState) -> Option<StateChange> {
    let step = run.step_mut(id)?;
    let from = step.state;
    if from == to {
        return None;
    }
    step.state = to;
    if to.is_terminal() {
        step.end_time = Some(Utc::now());
    }
    Some(StateChange {
        step_id: id,
        from,
        to,
    })
}

/// Set a terminal state and walk the result up the tree
fn finish(run: &mut Run, id: StepId, to: StepState) -> Vec<StateChange> {
    let mut changes: Vec<_> = set_state(run, id, to).into_iter().collect();
    changes.extend(aggregation::propagate(run, id));
    changes
}

impl<D: Dispatcher + 'static> ExecutionEngine<D> {
    pub fn new(dispatcher: Arc<D>, run: Run) -> Self {
        Self::builder(dispatcher, run).build()
    }

    pub fn builder(dispatcher: Arc<D>, run: Run) -> EngineBuilder<D> {
        EngineBuilder {
            dispatcher,
            run,
            store: None,
            conditions: Arc::new(LiteralConditionEvaluator),
            config: EngineConfig::default(),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.inner.run_id
    }

    pub fn root(&self) -> StepId {
        self.inner.root
    }

    pub fn dispatcher(&self) -> &Arc<D> {
        &self.inner.dispatcher
    }

    /// Add an event handler
    pub async fn add_event_handler<F>(&self, handler: F)
    where
        F: Fn(ExecutionEvent) + Send + Sync + 'static,
    {
        self.inner.event_handlers.lock().await.push(Arc::new(handler));
    }

    /// Emit an event to all handlers
    async fn emit_event(&self, event: ExecutionEvent) {
        let handlers = self.inner.event_handlers.lock().await;
        for handler in handlers.iter() {
            handler(event.clone());
        }
    }

    /// Copy of the current instance tree
    pub async fn snapshot(&self) -> Run {
        self.inner.run.lock().await.clone()
    }

    pub async fn state(&self, id: StepId) -> Option<StepState> {
        self.inner.run.lock().await.state(id)
    }

    pub async fn is_executing(&self, id: StepId) -> bool {
        self.state(id).await.is_some_and(|s| s.is_executing())
    }

    pub async fn state_display(&self, id: StepId) -> Option<&'static str> {
        self.state(id).await.map(|s| s.display())
    }

    /// Find a direct child command of a flow by name
    pub async fn command_named(&self, flow: StepId, name: &str) -> Option<StepId> {
        self.inner.run.lock().await.command_named(flow, name)
    }

    /// Override a command parameter before running it
    pub async fn set_param(&self, id: StepId, name: &str, value: &str) -> Result<()> {
        let mut run = self.inner.run.lock().await;
        run.set_param(id, name, value)?;
        if let Some(step) = run.step(id) {
            self.persist_step(&run, step).await;
        }
        Ok(())
    }

    /// Save the whole instance tree to the store, if there is one
    pub async fn persist(&self) -> Result<()> {
        if let Some(store) = &self.inner.store {
            let run = self.inner.run.lock().await;
            store.save_run(&run).await?;
            self.inner.saved.store(true, Ordering::SeqCst);
        }
        Ok(())
    }

    /// Run the root flow
    pub async fn run_root(&self, wait: bool) -> Result<()> {
        self.run(self.inner.root, wait).await
    }

    /// Run a step.
    ///
    /// With `wait` the call returns once the step reached a terminal state;
    /// otherwise it returns after submission. Configuration and structural
    /// errors are returned to the caller and leave the step in `error`.
    pub async fn run(&self, id: StepId, wait: bool) -> Result<()> {
        if id == self.inner.root {
            info!(
                "Starting run {} of flow '{}'",
                self.inner.run_id, self.inner.flow_name
            );
            self.emit_event(ExecutionEvent::RunStarted {
                run_id: self.inner.run_id,
                flow_name: self.inner.flow_name.clone(),
            })
            .await;
        }
        self.persist().await?;
        self.run_step(id, wait).await
    }

    fn run_step(&self, id: StepId, wait: bool) -> StepFuture {
        let engine = self.clone();
        Box::pin(async move {
            let is_flow = {
                let run = engine.inner.run.lock().await;
                run.step(id).ok_or(EngineError::UnknownStep(id))?.is_flow()
            };

            if is_flow {
                engine.run_flow(id, wait).await
            } else {
                engine.run_command(id, wait).await
            }
        })
    }

    async fn run_flow(&self, id: StepId, wait: bool) -> Result<()> {
        let (flow_type, children) = {
            let mut run = self.inner.run.lock().await;
            let step = run.step(id).ok_or(EngineError::UnknownStep(id))?;
            let name = step.name.clone();
            if !step.is_flow() {
                return Err(EngineError::NotAFlow(id));
            }

            let subtree = run.subtree(id);
            if subtree
                .iter()
                .any(|s| run.state(*s).is_some_and(|state| state.is_executing()))
            {
                return Err(EngineError::Busy(id));
            }

            // A new run retries everything below that did not complete
            let mut changes = Vec::new();
            for descendant in subtree.iter().skip(1) {
                let unfinished = run
                    .state(*descendant)
                    .is_some_and(|s| s.is_terminal() && s != StepState::Complete);
                if unfinished {
                    changes.extend(set_state(&mut run, *descendant, StepState::Unrun));
                    if let Some(step) = run.step_mut(*descendant) {
                        step.end_time = None;
                    }
                }
            }

            if let Some(step) = run.step_mut(id) {
                step.start_time = Some(Utc::now());
                step.end_time = None;
            }
            changes.extend(set_state(&mut run, id, StepState::Running));
            info!("Running flow '{}'", name);

            let (flow_type, children, code) = match run.step(id).and_then(Step::as_flow) {
                Some(flow) => (flow.flow_type, flow.children.clone(), flow.conditional_code.clone()),
                None => return Err(EngineError::NotAFlow(id)),
            };

            if let Some(code) = code {
                let verdict = match run.step(id).and_then(Step::as_flow) {
                    Some(flow) => self.inner.conditions.evaluate(&code, flow),
                    None => return Err(EngineError::NotAFlow(id)),
                };

                if let Some(flow) = run.step_mut(id).and_then(|s| s.as_flow_mut()) {
                    flow.conditional_result = verdict.as_ref().ok().copied();
                }

                match verdict {
                    Ok(true) => debug!("Condition of flow '{}' holds", name),
                    Ok(false) => {
                        info!("Condition of flow '{}' is false, skipping", name);
                        changes.extend(finish(&mut run, id, StepState::Complete));
                        self.emit_event(ExecutionEvent::FlowSkipped { step_id: id, name })
                            .await;
                        self.commit(&mut run, changes).await;
                        return Ok(());
                    }
                    Err(e) => {
                        error!("Cannot evaluate condition of flow '{}': {}", name, e);
                        changes.extend(finish(&mut run, id, StepState::Error));
                        self.commit(&mut run, changes).await;
                        return Err(e);
                    }
                }
            }

            if flow_type == FlowType::Parallel && !self.inner.dispatcher.supports_parallel() {
                error!("Flow '{}' is parallel but the dispatcher is not", name);
                changes.extend(finish(&mut run, id, StepState::Error));
                self.commit(&mut run, changes).await;
                return Err(EngineError::Structural(format!(
                    "flow '{}' requires parallel execution, which the dispatcher does not support",
                    name
                )));
            }

            self.commit(&mut run, changes).await;
            (flow_type, children)
        };

        if wait {
            self.drive_children(id, flow_type, children).await
        } else {
            let engine = self.clone();
            tokio::spawn(async move {
                if let Err(e) = engine.drive_children(id, flow_type, children).await {
                    error!("Flow {} stopped: {}", id, e);
                }
            });
            Ok(())
        }
    }

    async fn drive_children(
        &self,
        id: StepId,
        flow_type: FlowType,
        children: Vec<StepId>,
    ) -> Result<()> {
        match flow_type {
            FlowType::Serial => {
                for child in children {
                    if self.state(child).await == Some(StepState::Complete) {
                        debug!("Skipping complete step {}", child);
                        continue;
                    }

                    self.run_step(child, true).await?;

                    let state = self.state(child).await;
                    if state != Some(StepState::Complete) {
                        info!(
                            "Serial flow {} halted at step {} ({})",
                            id,
                            child,
                            state.map(|s| s.display()).unwrap_or("unknown")
                        );
                        break;
                    }
                }
                self.settle(id).await;
            }
            FlowType::Parallel => {
                let mut branches = JoinSet::new();
                for child in children {
                    if self.state(child).await == Some(StepState::Complete) {
                        debug!("Skipping complete step {}", child);
                        continue;
                    }

                    let engine = self.clone();
                    branches.spawn(async move { (child, engine.run_step(child, true).await) });
                }

                // Every branch returns once its child is terminal
                let mut first_error = None;
                while let Some(joined) = branches.join_next().await {
                    match joined {
                        Ok((_, Ok(()))) => {}
                        Ok((child, Err(e))) => {
                            warn!("Parallel branch {} stopped: {}", child, e);
                            first_error.get_or_insert(e);
                        }
                        Err(e) => {
                            error!("Parallel branch of flow {} panicked: {}", id, e);
                        }
                    }
                }
                self.settle(id).await;

                if let Some(e) = first_error {
                    return Err(e);
                }
            }
        }

        Ok(())
    }

    async fn run_command(&self, id: StepId, wait: bool) -> Result<()> {
        let exec_string = {
            let mut run = self.inner.run.lock().await;
            let step = run.step(id).ok_or(EngineError::UnknownStep(id))?;
            if step.is_executing() {
                return Err(EngineError::Busy(id));
            }
            let name = step.name.clone();
            let built = step
                .as_command()
                .ok_or(EngineError::NotACommand(id))?
                .build_exec_string();

            if let Some(step) = run.step_mut(id) {
                step.start_time = Some(Utc::now());
                step.end_time = None;
            }

            match built {
                Ok(exec_string) => {
                    if let Some(command) = run.step_mut(id).and_then(|s| s.as_command_mut()) {
                        command.exec_string = Some(exec_string.clone());
                        command.task_id = None;
                    }
                    let changes = set_state(&mut run, id, StepState::Pending).into_iter().collect();
                    self.commit(&mut run, changes).await;
                    exec_string
                }
                Err(e) => {
                    warn!("Command '{}' cannot be built: {}", name, e);
                    let changes = finish(&mut run, id, StepState::Error);
                    self.commit(&mut run, changes).await;
                    return Err(e);
                }
            }
        };

        let handle = match self.inner.dispatcher.submit(&exec_string).await {
            Ok(handle) => handle,
            Err(e) => {
                let err = EngineError::Launch {
                    step: id,
                    reason: e.to_string(),
                };
                warn!("{}", err);
                let mut run = self.inner.run.lock().await;
                let changes = finish(&mut run, id, StepState::Error);
                self.commit(&mut run, changes).await;
                return Ok(());
            }
        };

        {
            let mut run = self.inner.run.lock().await;
            if let Some(command) = run.step_mut(id).and_then(|s| s.as_command_mut()) {
                command.task_id = Some(handle.clone());
            }
            if let Some(step) = run.step(id) {
                debug!("Step '{}' submitted as task {}", step.name, handle);
                self.persist_step(&run, step).await;
            }
        }
        self.emit_event(ExecutionEvent::CommandSubmitted {
            step_id: id,
            exec_string,
            task_id: handle.clone(),
        })
        .await;

        let engine = self.clone();
        tokio::spawn(async move { engine.watch_task(id, handle).await });

        if wait {
            self.wait(id).await;
        }
        Ok(())
    }

    /// Follow a dispatched task until it reports a terminal status
    async fn watch_task(&self, id: StepId, handle: TaskHandle) {
        let backoff = self.inner.config.poll_backoff;
        let mut last = DispatchStatus::Pending;

        loop {
            let status = match self
                .inner
                .dispatcher
                .next_status(&handle, &last, backoff)
                .await
            {
                Ok(status) => status,
                Err(e) => {
                    error!("Lost track of task {} for step {}: {}", handle, id, e);
                    DispatchStatus::FailedToStart {
                        reason: e.to_string(),
                    }
                }
            };

            let terminal = status.is_terminal();
            if let Err(e) = self.apply_status(id, Some(&handle), &status).await {
                error!("Cannot apply status of task {}: {}", handle, e);
                break;
            }
            if terminal {
                break;
            }
            last = status;
        }
    }

    /// Report a dispatch outcome for a command from outside the engine
    pub async fn report_outcome(&self, id: StepId, status: DispatchStatus) -> Result<()> {
        self.apply_status(id, None, &status).await
    }

    async fn apply_status(
        &self,
        id: StepId,
        handle: Option<&TaskHandle>,
        status: &DispatchStatus,
    ) -> Result<()> {
        let mut run = self.inner.run.lock().await;
        let step = run.step(id).ok_or(EngineError::UnknownStep(id))?;
        let command = step.as_command().ok_or(EngineError::NotACommand(id))?;

        if let Some(handle) = handle {
            if command.task_id.as_ref() != Some(handle) {
                debug!("Ignoring stale report from task {}", handle);
                return Ok(());
            }
        }
        if !step.is_executing() {
            debug!("Ignoring {:?} for step '{}' in state {}", status, step.name, step.state);
            return Ok(());
        }

        let to = status.step_state();
        let changes = if to.is_terminal() {
            finish(&mut run, id, to)
        } else {
            set_state(&mut run, id, to).into_iter().collect()
        };
        self.commit(&mut run, changes).await;
        Ok(())
    }

    /// Aggregate a flow explicitly, once its children have been driven
    async fn settle(&self, id: StepId) {
        let mut run = self.inner.run.lock().await;
        let mut changes: Vec<_> = aggregation::aggregate_flow(&mut run, id).into_iter().collect();
        if changes.iter().any(|c| c.to.is_terminal()) {
            changes.extend(aggregation::propagate(&mut run, id));
        }
        self.commit(&mut run, changes).await;
    }

    /// Wait until a step reaches a terminal state
    pub async fn wait(&self, id: StepId) -> Option<StepState> {
        loop {
            let notified = self.inner.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let state = self.state(id).await?;
            if state.is_terminal() {
                return Some(state);
            }
            notified.await;
        }
    }

    /// Signal every executing command under a step to stop.
    ///
    /// The dispatcher reports `killed` afterwards; returns how many tasks
    /// were signalled.
    pub async fn kill(&self, id: StepId) -> Result<usize> {
        let handles: Vec<TaskHandle> = {
            let run = self.inner.run.lock().await;
            if run.step(id).is_none() {
                return Err(EngineError::UnknownStep(id));
            }
            run.subtree(id)
                .into_iter()
                .filter_map(|s| {
                    let step = run.step(s)?;
                    if !step.is_executing() {
                        return None;
                    }
                    step.as_command()?.task_id.clone()
                })
                .collect()
        };

        let mut signalled = 0;
        for handle in &handles {
            info!("Killing task {}", handle);
            // The task may have finished since the tree was read
            match self.inner.dispatcher.kill(handle).await {
                Ok(()) => signalled += 1,
                Err(e) => warn!("Cannot kill task {}: {}", handle, e),
            }
        }
        Ok(signalled)
    }

    /// Persist, log and announce applied changes, then wake waiters
    async fn commit(&self, run: &mut Run, changes: Vec<StateChange>) {
        for change in &changes {
            let Some(step) = run.step(change.step_id) else {
                continue;
            };
            info!("Step '{}' {} -> {}", step.name, change.from, change.to);
            self.persist_step(run, step).await;
            self.emit_event(ExecutionEvent::StepStateChanged {
                step_id: change.step_id,
                name: step.name.clone(),
                from: change.from,
                to: change.to,
            })
            .await;
        }

        let finished = changes
            .iter()
            .find(|c| c.step_id == run.root() && c.to.is_terminal())
            .map(|c| c.to);
        if let Some(state) = finished {
            info!("Run {} finished: {}", run.id(), state);
            if let Some(store) = &self.inner.store {
                if let Err(e) = store.save_run(run).await {
                    error!("Failed to save run {}: {:#}", run.id(), e);
                }
            }
            self.emit_event(ExecutionEvent::RunFinished {
                run_id: run.id(),
                state,
            })
            .await;
        }

        self.inner.changed.notify_waiters();
    }

    /// Write one step, or the whole tree if the run was never saved
    async fn persist_step(&self, run: &Run, step: &Step) {
        let Some(store) = &self.inner.store else {
            return;
        };

        if !self.inner.saved.load(Ordering::SeqCst) {
            match store.save_run(run).await {
                Ok(()) => self.inner.saved.store(true, Ordering::SeqCst),
                Err(e) => error!("Failed to save run {}: {:#}", run.id(), e),
            }
            return;
        }

        if let Err(e) = store.update_step(run.id(), step).await {
            error!("Failed to persist step {}: {:#}", step.id, e);
        }
    }
}
