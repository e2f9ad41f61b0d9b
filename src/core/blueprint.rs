//! Blueprint tree - immutable templates that build instance trees
//!
//! A [`FlowBlueprint`] describes a grouping of steps, a [`CommandBlueprint`]
//! describes one executable and every parameter it accepts. Building a
//! blueprint walks the tree and produces an isomorphic [`Run`] with every
//! step in the `unrun` state. Blueprints are never mutated by a build.

use crate::core::{
    param::CommandBlueprintParam,
    step::{Command, Flow, Run, Step, StepId, StepKind},
};
use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Identifier of a blueprint node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlueprintId(Uuid);

impl BlueprintId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for BlueprintId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BlueprintId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How a flow executes its children
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowType {
    /// One child at a time, in declared order
    #[default]
    Serial,
    /// All children submitted at once
    Parallel,
}

/// A node of the blueprint tree
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StepBlueprint {
    Flow(FlowBlueprint),
    Command(Arc<CommandBlueprint>),
}

impl StepBlueprint {
    pub fn name(&self) -> &str {
        match self {
            StepBlueprint::Flow(flow) => &flow.name,
            StepBlueprint::Command(command) => &command.name,
        }
    }
}

/// Template for a flow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowBlueprint {
    #[serde(default)]
    pub id: BlueprintId,

    pub name: String,

    /// Long description, usually written by the flow's author
    #[serde(default)]
    pub description: String,

    #[serde(rename = "type", default)]
    pub flow_type: FlowType,

    /// Predicate deciding whether the flow runs at all
    #[serde(default)]
    pub conditional_code: Option<String>,

    /// Ordered child templates
    #[serde(default)]
    pub children: Vec<StepBlueprint>,
}

impl FlowBlueprint {
    pub fn new(name: impl Into<String>, flow_type: FlowType) -> Self {
        Self {
            id: BlueprintId::new(),
            name: name.into(),
            description: String::new(),
            flow_type,
            conditional_code: None,
            children: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_condition(mut self, code: impl Into<String>) -> Self {
        self.conditional_code = Some(code.into());
        self
    }

    pub fn with_flow(mut self, flow: FlowBlueprint) -> Self {
        self.children.push(StepBlueprint::Flow(flow));
        self
    }

    pub fn with_command(mut self, command: CommandBlueprint) -> Self {
        self.children.push(StepBlueprint::Command(Arc::new(command)));
        self
    }

    /// Find a direct child command template by name
    pub fn command(&self, name: &str) -> Option<&Arc<CommandBlueprint>> {
        self.children.iter().find_map(|child| match child {
            StepBlueprint::Command(command) if command.name == name => Some(command),
            _ => None,
        })
    }

    /// Count command templates in the whole tree
    pub fn command_count(&self) -> usize {
        self.children
            .iter()
            .map(|child| match child {
                StepBlueprint::Flow(flow) => flow.command_count(),
                StepBlueprint::Command(_) => 1,
            })
            .sum()
    }

    /// Build a new run whose root is an instance of this flow
    pub fn build(&self) -> Run {
        let mut steps = HashMap::new();
        let root = self.build_node(None, &mut steps);
        Run::from_parts(self.name.clone(), root, steps)
    }

    /// Build this flow as the last child of an existing flow instance
    pub fn build_under(&self, run: &mut Run, parent: StepId) -> Result<StepId> {
        match run.step(parent).map(|s| &s.kind) {
            Some(StepKind::Flow(_)) => {}
            Some(StepKind::Command(_)) => return Err(EngineError::NotAFlow(parent)),
            None => return Err(EngineError::UnknownStep(parent)),
        }

        let mut steps = HashMap::new();
        let id = self.build_node(Some(parent), &mut steps);
        run.graft(parent, id, steps);
        Ok(id)
    }

    fn build_node(&self, parent: Option<StepId>, steps: &mut HashMap<StepId, Step>) -> StepId {
        let id = StepId::new();

        let children = self
            .children
            .iter()
            .map(|child| match child {
                StepBlueprint::Flow(flow) => flow.build_node(Some(id), steps),
                StepBlueprint::Command(command) => {
                    let step = CommandBlueprint::build(command, Some(id));
                    let child_id = step.id;
                    steps.insert(child_id, step);
                    child_id
                }
            })
            .collect();

        let flow = Flow {
            blueprint: self.id,
            flow_type: self.flow_type,
            description: self.description.clone(),
            conditional_code: self.conditional_code.clone(),
            conditional_result: None,
            children,
        };

        steps.insert(id, Step::new(id, parent, self.name.clone(), StepKind::Flow(flow)));
        id
    }
}

/// Template for a single command: the executable plus every parameter it accepts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandBlueprint {
    #[serde(default)]
    pub id: BlueprintId,

    pub name: String,

    /// The binary or script to execute (no options)
    pub exec_path: String,

    /// Parameters in declaration order
    #[serde(default)]
    pub params: Vec<CommandBlueprintParam>,
}

impl CommandBlueprint {
    pub fn new(name: impl Into<String>, exec_path: impl Into<String>) -> Self {
        Self {
            id: BlueprintId::new(),
            name: name.into(),
            exec_path: exec_path.into(),
            params: Vec::new(),
        }
    }

    pub fn with_param(mut self, param: CommandBlueprintParam) -> Self {
        self.params.push(param);
        self
    }

    pub fn param(&self, name: &str) -> Option<&CommandBlueprintParam> {
        self.params.iter().find(|p| p.name == name)
    }

    /// Parameters in render order: ascending position, declaration order on ties
    pub fn ordered_params(&self) -> Vec<&CommandBlueprintParam> {
        let mut params: Vec<_> = self.params.iter().collect();
        // stable sort keeps declaration order for equal positions
        params.sort_by_key(|p| p.position);
        params
    }

    /// Build a command instance under the given parent
    pub fn build(blueprint: &Arc<CommandBlueprint>, parent: Option<StepId>) -> Step {
        let command = Command {
            blueprint: Arc::clone(blueprint),
            exec_string: None,
            task_id: None,
            params: Vec::new(),
        };
        Step::new(StepId::new(), parent, blueprint.name.clone(), StepKind::Command(command))
    }
}
