//! Test: Serial Failure - a failing command halts its serial flow

use crate::helpers::*;
use flowprint::core::{CommandBlueprint, FlowBlueprint, FlowType, StepState};
use std::sync::Arc;

fn three_commands() -> FlowBlueprint {
    FlowBlueprint::new("checks", FlowType::Serial)
        .with_command(CommandBlueprint::new("first", "true"))
        .with_command(CommandBlueprint::new("second", "false"))
        .with_command(CommandBlueprint::new("third", "true"))
}

/// The second command fails: the third never runs and the flow fails
#[tokio::test]
async fn test_serial_failure_halts_flow() {
    let dispatcher = Arc::new(ScriptedDispatcher::new());
    let engine = engine_for(&dispatcher, three_commands().build());

    engine.run_root(true).await.unwrap();

    let run = engine.snapshot().await;
    assert_eq!(
        child_states(&run, run.root()),
        vec![StepState::Complete, StepState::Failed, StepState::Unrun]
    );
    assert_eq!(run.state(run.root()), Some(StepState::Failed));
    assert_eq!(engine.state_display(run.root()).await, Some("failed"));
    assert_eq!(dispatcher.submissions(), vec!["true", "false"]);

    let third = run.command_named(run.root(), "third").unwrap();
    assert!(!run.step(third).unwrap().has_already_been_run());
    assert!(run.step(run.root()).unwrap().end_time.is_some());
}

/// A failure deep in the tree reaches the root through every ancestor
#[tokio::test]
async fn test_failure_propagates_through_nested_flows() {
    let blueprint = FlowBlueprint::new("outer", FlowType::Serial)
        .with_flow(three_commands())
        .with_command(CommandBlueprint::new("report", "true"));
    let dispatcher = Arc::new(ScriptedDispatcher::new());
    let engine = engine_for(&dispatcher, blueprint.build());

    engine.run_root(true).await.unwrap();

    let run = engine.snapshot().await;
    let inner = run.children(run.root())[0];
    assert_eq!(run.state(inner), Some(StepState::Failed));
    assert_eq!(
        child_states(&run, run.root()),
        vec![StepState::Failed, StepState::Unrun]
    );
    assert_eq!(run.state(run.root()), Some(StepState::Failed));
}

/// A command that cannot be launched ends in error, and the flow fails
#[tokio::test]
async fn test_launch_failure_is_error() {
    let blueprint = FlowBlueprint::new("flow", FlowType::Serial)
        .with_command(CommandBlueprint::new("broken", "unlaunchable"))
        .with_command(CommandBlueprint::new("after", "true"));
    let dispatcher = Arc::new(ScriptedDispatcher::new());
    let engine = engine_for(&dispatcher, blueprint.build());

    engine.run_root(true).await.unwrap();

    let run = engine.snapshot().await;
    assert_eq!(
        child_states(&run, run.root()),
        vec![StepState::Error, StepState::Unrun]
    );
    assert_eq!(run.state(run.root()), Some(StepState::Failed));
}
