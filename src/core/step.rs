//! Instance tree - materialized, stateful runs built from blueprints

use crate::core::{
    blueprint::{BlueprintId, CommandBlueprint, FlowType},
    param::CommandParam,
    state::{RunSummary, StepState},
};
use crate::error::{EngineError, Result};
use crate::execution::dispatch::TaskHandle;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Identifier of a step instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepId(Uuid);

impl StepId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for StepId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for StepId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single node of a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub id: StepId,

    /// Owning flow (None for the root)
    pub parent: Option<StepId>,

    pub name: String,

    /// Only the execution engine writes this
    pub state: StepState,

    pub start_time: Option<DateTime<Utc>>,

    pub end_time: Option<DateTime<Utc>>,

    pub kind: StepKind,
}

/// Flow or command specific data
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StepKind {
    Flow(Flow),
    Command(Command),
}

/// A grouping of child steps
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Flow {
    /// Blueprint this flow was built from
    pub blueprint: BlueprintId,

    #[serde(rename = "type")]
    pub flow_type: FlowType,

    /// Describes this particular instance of the flow
    pub description: String,

    pub conditional_code: Option<String>,

    /// None unless the condition has been evaluated
    pub conditional_result: Option<bool>,

    /// Ordered child steps
    pub children: Vec<StepId>,
}

/// A leaf step representing one external invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    pub blueprint: Arc<CommandBlueprint>,

    /// Fully resolved invocation, set when the command is run
    pub exec_string: Option<String>,

    /// Handle of the in-flight dispatch
    pub task_id: Option<TaskHandle>,

    /// Per-instance parameter overrides
    pub params: Vec<CommandParam>,
}

impl Command {
    pub fn get_param(&self, name: &str) -> Option<&CommandParam> {
        self.params.iter().find(|p| p.name == name)
    }

    /// Override a blueprint parameter's value, replacing any earlier override
    pub fn set_param(&mut self, name: &str, value: impl Into<String>) -> Result<()> {
        let bp = self
            .blueprint
            .param(name)
            .ok_or_else(|| EngineError::UnknownParameter {
                command: self.blueprint.name.clone(),
                name: name.to_string(),
            })?;

        let param = CommandParam {
            name: name.to_string(),
            prefix: bp.prefix.clone(),
            value: value.into(),
        };

        match self.params.iter_mut().find(|p| p.name == name) {
            Some(existing) => *existing = param,
            None => self.params.push(param),
        }
        Ok(())
    }

    /// Assemble the full invocation string.
    ///
    /// Overridden params are always rendered, required params fall back to
    /// their default, unset optional params are omitted.
    pub fn build_exec_string(&self) -> Result<String> {
        let mut fragments = vec![self.blueprint.exec_path.trim().to_string()];

        for param in self.blueprint.ordered_params() {
            let fragment = match self.get_param(&param.name) {
                Some(overridden) => param.render(Some(&overridden.value)),
                None if !param.is_optional => param.render(None),
                None => continue,
            };

            let fragment = fragment.ok_or_else(|| {
                EngineError::Configuration(format!(
                    "required parameter '{}' of command '{}' has no value and no default",
                    param.name, self.blueprint.name
                ))
            })?;

            let fragment = fragment.trim_end();
            if !fragment.is_empty() {
                fragments.push(fragment.to_string());
            }
        }

        Ok(fragments.join(" "))
    }

    /// Whether every required parameter can be resolved
    pub fn is_ready(&self) -> bool {
        self.build_exec_string().is_ok()
    }
}

impl Step {
    pub(crate) fn new(id: StepId, parent: Option<StepId>, name: String, kind: StepKind) -> Self {
        Self {
            id,
            parent,
            name,
            state: StepState::Unrun,
            start_time: None,
            end_time: None,
            kind,
        }
    }

    pub fn has_executed(&self) -> bool {
        self.state.has_executed()
    }

    pub fn is_executing(&self) -> bool {
        self.state.is_executing()
    }

    pub fn state_display(&self) -> &'static str {
        self.state.display()
    }

    /// A step counts as run once it has a start time
    pub fn has_already_been_run(&self) -> bool {
        self.start_time.is_some()
    }

    pub fn as_flow(&self) -> Option<&Flow> {
        match &self.kind {
            StepKind::Flow(flow) => Some(flow),
            StepKind::Command(_) => None,
        }
    }

    pub fn as_command(&self) -> Option<&Command> {
        match &self.kind {
            StepKind::Command(command) => Some(command),
            StepKind::Flow(_) => None,
        }
    }

    pub(crate) fn as_flow_mut(&mut self) -> Option<&mut Flow> {
        match &mut self.kind {
            StepKind::Flow(flow) => Some(flow),
            StepKind::Command(_) => None,
        }
    }

    pub(crate) fn as_command_mut(&mut self) -> Option<&mut Command> {
        match &mut self.kind {
            StepKind::Command(command) => Some(command),
            StepKind::Flow(_) => None,
        }
    }

    pub fn is_flow(&self) -> bool {
        matches!(self.kind, StepKind::Flow(_))
    }
}

/// An instance tree: every step of one run, keyed by id
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    id: Uuid,
    name: String,
    root: StepId,
    steps: HashMap<StepId, Step>,
    created_at: DateTime<Utc>,
}

impl Run {
    pub(crate) fn from_parts(name: String, root: StepId, steps: HashMap<StepId, Step>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name,
            root,
            steps,
            created_at: Utc::now(),
        }
    }

    pub(crate) fn graft(&mut self, parent: StepId, child: StepId, steps: HashMap<StepId, Step>) {
        self.steps.extend(steps);
        if let Some(flow) = self.steps.get_mut(&parent).and_then(Step::as_flow_mut) {
            flow.children.push(child);
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn root(&self) -> StepId {
        self.root
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn step(&self, id: StepId) -> Option<&Step> {
        self.steps.get(&id)
    }

    pub(crate) fn step_mut(&mut self, id: StepId) -> Option<&mut Step> {
        self.steps.get_mut(&id)
    }

    /// Overwrite a stored step with a newer copy of itself
    pub(crate) fn replace_step(&mut self, step: Step) -> bool {
        match self.steps.get_mut(&step.id) {
            Some(existing) => {
                *existing = step;
                true
            }
            None => false,
        }
    }

    pub fn steps(&self) -> impl Iterator<Item = &Step> {
        self.steps.values()
    }

    /// State of a step, if it exists
    pub fn state(&self, id: StepId) -> Option<StepState> {
        self.steps.get(&id).map(|s| s.state)
    }

    /// Ordered children of a flow (empty for commands and unknown ids)
    pub fn children(&self, id: StepId) -> &[StepId] {
        self.steps
            .get(&id)
            .and_then(Step::as_flow)
            .map(|f| f.children.as_slice())
            .unwrap_or(&[])
    }

    /// The step and all of its descendants, depth first in declared order
    pub fn subtree(&self, id: StepId) -> Vec<StepId> {
        let mut result = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if !self.steps.contains_key(&current) {
                continue;
            }
            result.push(current);
            stack.extend(self.children(current).iter().rev());
        }
        result
    }

    /// Find a direct child command of a flow by name
    pub fn command_named(&self, flow: StepId, name: &str) -> Option<StepId> {
        self.children(flow).iter().copied().find(|id| {
            self.steps
                .get(id)
                .is_some_and(|s| s.name == name && !s.is_flow())
        })
    }

    /// Find a command anywhere in the tree by name (first in declared order)
    pub fn find_command(&self, name: &str) -> Option<StepId> {
        self.subtree(self.root).into_iter().find(|id| {
            self.steps
                .get(id)
                .is_some_and(|s| s.name == name && !s.is_flow())
        })
    }

    /// Override a parameter on a command that is not executing
    pub fn set_param(&mut self, id: StepId, name: &str, value: impl Into<String>) -> Result<()> {
        let step = self.steps.get_mut(&id).ok_or(EngineError::UnknownStep(id))?;
        if step.is_executing() {
            return Err(EngineError::Busy(id));
        }
        step.as_command_mut()
            .ok_or(EngineError::NotACommand(id))?
            .set_param(name, value)
    }

    /// Summarize the run for history
    pub fn summary(&self) -> RunSummary {
        let commands: Vec<_> = self.steps.values().filter(|s| !s.is_flow()).collect();
        let root = self.steps.get(&self.root);

        RunSummary {
            run_id: self.id,
            flow_name: self.name.clone(),
            state: root.map(|s| s.state).unwrap_or_default(),
            started_at: root.and_then(|s| s.start_time),
            ended_at: root.and_then(|s| s.end_time),
            total_commands: commands.len(),
            complete_commands: commands
                .iter()
                .filter(|s| s.state == StepState::Complete)
                .count(),
            unsuccessful_commands: commands
                .iter()
                .filter(|s| s.has_executed() && s.state != StepState::Complete)
                .count(),
        }
    }
}
