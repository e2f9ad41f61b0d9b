//! CLI output formatting

use crate::{
    core::{Run, RunSummary, StepId, StepState},
    error::{EngineError, Result},
    execution::{Dispatcher, ExecutionEngine, ExecutionEvent},
};
use console::Emoji;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

// Re-export style
pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static SPINNER: Emoji<'_, '_> = Emoji("⏳ ", "~ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "!");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");

/// Create a spinner showing the state of a running flow
pub fn create_spinner() -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner
}

/// Run a step to completion while the spinner shows its state.
///
/// Errors raised anywhere below the step are returned once it is done.
pub async fn run_with_spinner<D: Dispatcher + 'static>(
    engine: &ExecutionEngine<D>,
    id: StepId,
    spinner: &ProgressBar,
) -> Result<StepState> {
    let label = engine
        .snapshot()
        .await
        .step(id)
        .map(|step| step.name.clone())
        .unwrap_or_default();

    let runner = engine.clone();
    let task = tokio::spawn(async move { runner.run(id, true).await });

    while !task.is_finished() {
        let state = engine.state(id).await.unwrap_or_default();
        spinner.set_message(format!("{} {}", style(&label).bold(), state.display()));
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    task.await
        .map_err(|e| EngineError::Structural(format!("run task failed: {}", e)))??;
    engine.state(id).await.ok_or(EngineError::UnknownStep(id))
}

/// Format a step state for display
pub fn format_step_state(state: StepState) -> String {
    let label = state.display().to_uppercase();
    match state {
        StepState::Unrun | StepState::Pending => style(label).dim().to_string(),
        StepState::Running => style(label).yellow().to_string(),
        StepState::Complete => style(label).green().to_string(),
        StepState::Error | StepState::Failed => style(label).red().to_string(),
        StepState::Killed => style(label).magenta().to_string(),
    }
}

fn state_icon(state: StepState) -> Emoji<'static, 'static> {
    match state {
        StepState::Complete => CHECK,
        StepState::Error | StepState::Failed | StepState::Killed => CROSS,
        StepState::Pending | StepState::Running => SPINNER,
        StepState::Unrun => INFO,
    }
}

/// Format a run summary for display
pub fn format_run_summary(summary: &RunSummary) -> String {
    format!(
        "{} {} - {} - {} ({}/{}) - {}",
        state_icon(summary.state),
        style(&summary.run_id.to_string()[..8]).dim(),
        style(&summary.flow_name).bold(),
        format_step_state(summary.state),
        summary.complete_commands,
        summary.total_commands,
        style(format!("{:.0}%", summary.progress() * 100.0)).cyan()
    )
}

/// Format an execution event for display
pub fn format_execution_event(event: &ExecutionEvent) -> String {
    match event {
        ExecutionEvent::RunStarted { run_id, flow_name } => format!(
            "{} Starting flow {} ({})",
            ROCKET,
            style(flow_name).bold(),
            style(&run_id.to_string()[..8]).dim()
        ),
        ExecutionEvent::StepStateChanged { name, from, to, .. } => format!(
            "{} {} {} → {}",
            state_icon(*to),
            style(name).cyan(),
            style(from.display()).dim(),
            format_step_state(*to)
        ),
        ExecutionEvent::CommandSubmitted {
            exec_string,
            task_id,
            ..
        } => format!(
            "{} {} {}",
            SPINNER,
            style(exec_string).bold(),
            style(format!("[{}]", task_id.as_str().chars().take(8).collect::<String>())).dim()
        ),
        ExecutionEvent::FlowSkipped { name, .. } => format!(
            "{} {} skipped (condition is false)",
            INFO,
            style(name).dim()
        ),
        ExecutionEvent::RunFinished { run_id, state } => format!(
            "{} Run ({}) finished {}",
            state_icon(*state),
            style(&run_id.to_string()[..8]).dim(),
            format_step_state(*state)
        ),
    }
}

/// Render the step tree of a run, one step per line
pub fn format_run_tree(run: &Run) -> String {
    let mut lines = Vec::new();
    push_tree_lines(run, run.root(), 0, &mut lines);
    lines.join("\n")
}

fn push_tree_lines(run: &Run, id: StepId, depth: usize, lines: &mut Vec<String>) {
    let Some(step) = run.step(id) else {
        return;
    };

    let indent = "  ".repeat(depth);
    let detail = match (step.as_flow(), step.as_command()) {
        (Some(flow), _) => {
            let flow_type = format!("{:?}", flow.flow_type).to_lowercase();
            style(format!("({})", flow_type)).dim().to_string()
        }
        (_, Some(command)) => command
            .exec_string
            .as_deref()
            .map(|s| style(s).dim().to_string())
            .unwrap_or_default(),
        _ => String::new(),
    };

    lines.push(
        format!(
            "{}{} {} {}",
            indent,
            style(&step.name).bold(),
            format_step_state(step.state),
            detail
        )
        .trim_end()
        .to_string(),
    );

    for child in run.children(id) {
        push_tree_lines(run, *child, depth + 1, lines);
    }
}

/// Format a duration as e.g. "1m 5s"
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
