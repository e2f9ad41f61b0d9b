//! Blueprint configuration from YAML

use crate::core::blueprint::{CommandBlueprint, FlowBlueprint, FlowType, StepBlueprint, BlueprintId};
use crate::core::param::CommandBlueprintParam;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

/// Top-level blueprint configuration: the root flow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlueprintConfig {
    /// Flow name
    pub name: String,

    /// Long description of the flow
    #[serde(default)]
    pub description: Option<String>,

    /// serial or parallel
    #[serde(rename = "type", default)]
    pub flow_type: FlowType,

    /// Optional predicate; the flow is skipped when it evaluates false
    #[serde(default)]
    pub condition: Option<String>,

    /// Ordered child steps
    #[serde(default)]
    pub steps: Vec<StepConfig>,
}

/// A child node, tagged with `kind`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StepConfig {
    Flow(BlueprintConfig),
    Command(CommandConfig),
}

/// Command configuration as defined in YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandConfig {
    pub name: String,

    /// Path to the executable, without options
    pub exec_path: String,

    #[serde(default)]
    pub params: Vec<ParamConfig>,
}

/// Parameter configuration as defined in YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamConfig {
    pub name: String,

    #[serde(default)]
    pub prefix: Option<String>,

    /// Defaults to declaration index
    #[serde(default)]
    pub position: Option<u16>,

    #[serde(default)]
    pub short_desc: String,

    #[serde(default)]
    pub long_desc: String,

    #[serde(default = "default_true")]
    pub is_optional: bool,

    #[serde(default = "default_true")]
    pub is_primary_option: bool,

    #[serde(default)]
    pub has_no_value: bool,

    #[serde(default)]
    pub has_quoted_value: bool,

    /// Any scalar; numbers and booleans are rendered as text
    #[serde(default)]
    pub default_value: Option<Value>,
}

fn default_true() -> bool {
    true
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

impl BlueprintConfig {
    /// Load blueprint configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse blueprint configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: BlueprintConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration tree
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            anyhow::bail!("Flow name cannot be empty");
        }

        // Child names must be unique so commands can be looked up by name
        let mut seen_names = HashSet::new();
        for step in &self.steps {
            let name = match step {
                StepConfig::Flow(flow) => &flow.name,
                StepConfig::Command(command) => &command.name,
            };
            if !seen_names.insert(name) {
                anyhow::bail!("Flow '{}' has duplicate child name '{}'", self.name, name);
            }

            match step {
                StepConfig::Flow(flow) => flow.validate()?,
                StepConfig::Command(command) => command.validate()?,
            }
        }

        Ok(())
    }

    /// Count the commands in the whole tree
    pub fn command_count(&self) -> usize {
        self.steps
            .iter()
            .map(|step| match step {
                StepConfig::Flow(flow) => flow.command_count(),
                StepConfig::Command(_) => 1,
            })
            .sum()
    }

    /// Convert into an immutable blueprint tree
    pub fn to_blueprint(&self) -> FlowBlueprint {
        FlowBlueprint {
            id: BlueprintId::new(),
            name: self.name.clone(),
            description: self.description.clone().unwrap_or_default(),
            flow_type: self.flow_type,
            conditional_code: self.condition.clone(),
            children: self
                .steps
                .iter()
                .map(|step| match step {
                    StepConfig::Flow(flow) => StepBlueprint::Flow(flow.to_blueprint()),
                    StepConfig::Command(command) => {
                        StepBlueprint::Command(Arc::new(command.to_blueprint()))
                    }
                })
                .collect(),
        }
    }
}

impl CommandConfig {
    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            anyhow::bail!("Command name cannot be empty");
        }
        if self.exec_path.trim().is_empty() {
            anyhow::bail!("Command '{}' has an empty exec_path", self.name);
        }

        let mut seen = HashSet::new();
        for param in &self.params {
            if !seen.insert(&param.name) {
                anyhow::bail!(
                    "Command '{}' has duplicate parameter '{}'",
                    self.name,
                    param.name
                );
            }

            if param.has_no_value
                && param.prefix.as_deref().map_or(true, |p| p.trim().is_empty())
            {
                anyhow::bail!(
                    "Parameter '{}' of command '{}' has no value and no prefix",
                    param.name,
                    self.name
                );
            }

            if let Some(default) = &param.default_value {
                if scalar_to_string(default).is_none() && !default.is_null() {
                    anyhow::bail!(
                        "Parameter '{}' of command '{}' has a non-scalar default_value",
                        param.name,
                        self.name
                    );
                }
            }
        }

        Ok(())
    }

    fn to_blueprint(&self) -> CommandBlueprint {
        let params = self
            .params
            .iter()
            .enumerate()
            .map(|(index, param)| CommandBlueprintParam {
                name: param.name.clone(),
                prefix: param.prefix.clone(),
                position: param.position.unwrap_or(index as u16),
                short_desc: param.short_desc.clone(),
                long_desc: param.long_desc.clone(),
                is_optional: param.is_optional,
                is_primary_option: param.is_primary_option,
                has_no_value: param.has_no_value,
                has_quoted_value: param.has_quoted_value,
                default_value: param.default_value.as_ref().and_then(scalar_to_string),
            })
            .collect();

        CommandBlueprint {
            id: BlueprintId::new(),
            name: self.name.clone(),
            exec_path: self.exec_path.clone(),
            params,
        }
    }
}
