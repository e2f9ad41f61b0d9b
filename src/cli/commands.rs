//! CLI command definitions

use clap::Args;

/// Build a blueprint into a new run and execute it
#[derive(Debug, Args, Clone)]
pub struct RunCommand {
    /// Path to blueprint YAML file
    #[arg(short, long)]
    pub file: String,

    /// Parameter overrides (command:name=value)
    #[arg(long, value_parser = parse_param)]
    pub param: Vec<ParamOverride>,

    /// Maximum number of commands executing at once
    #[arg(long, default_value_t = 4)]
    pub max_parallel: usize,

    /// Don't save the run to history
    #[arg(long)]
    pub no_history: bool,
}

/// Validate a blueprint file
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    /// Path to blueprint YAML file
    #[arg(short, long)]
    pub file: String,

    /// Print the built blueprint as JSON
    #[arg(long)]
    pub json: bool,
}

/// Show run history
#[derive(Debug, Args, Clone)]
pub struct HistoryCommand {
    /// Flow name to filter by
    #[arg(long)]
    pub flow: Option<String>,

    /// Number of recent runs to show
    #[arg(short, long, default_value_t = 10)]
    pub limit: usize,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Show the step tree of a saved run
#[derive(Debug, Args, Clone)]
pub struct ShowCommand {
    /// Run ID
    #[arg(long)]
    pub run_id: String,
}

/// A parameter value for one command of the run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamOverride {
    pub command: String,
    pub name: String,
    pub value: String,
}

/// Parse command:name=value overrides
///
/// The command name ends at the first ':' and the parameter name at the
/// first '=' after it, so values may contain both.
pub fn parse_param(s: &str) -> Result<ParamOverride, String> {
    let (command, rest) = s
        .split_once(':')
        .ok_or_else(|| format!("Invalid command:name=value override: {}", s))?;
    let (name, value) = rest
        .split_once('=')
        .ok_or_else(|| format!("Invalid command:name=value override: {}", s))?;

    if command.is_empty() || name.is_empty() {
        return Err(format!("Invalid command:name=value override: {}", s));
    }

    Ok(ParamOverride {
        command: command.to_string(),
        name: name.to_string(),
        value: value.to_string(),
    })
}
