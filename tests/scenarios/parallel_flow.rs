//! Test: Parallel Flow - children are submitted together

use crate::helpers::*;
use flowprint::core::{CommandBlueprint, CommandBlueprintParam, FlowBlueprint, FlowType, StepState};
use flowprint::error::EngineError;
use std::sync::Arc;

fn parallel(commands: &[(&str, &str)]) -> FlowBlueprint {
    commands.iter().fold(
        FlowBlueprint::new("fan-out", FlowType::Parallel),
        |flow, (name, exec_path)| flow.with_command(CommandBlueprint::new(*name, *exec_path)),
    )
}

/// All children are running at once before any of them finishes
#[tokio::test]
async fn test_parallel_children_run_together() {
    let dispatcher = Arc::new(ScriptedDispatcher::holding());
    let blueprint = parallel(&[("a", "align a"), ("b", "align b"), ("c", "align c")]);
    let engine = engine_for(&dispatcher, blueprint.build());
    let root = engine.root();

    engine.run_root(false).await.unwrap();
    dispatcher.wait_for_submissions(3).await;

    let run = engine.snapshot().await;
    for child in run.children(root) {
        wait_for_state(&engine, *child, StepState::Running).await;
    }
    assert_eq!(engine.state(root).await, Some(StepState::Running));
    assert!(engine.is_executing(root).await);

    dispatcher.release_all();

    assert_eq!(engine.wait(root).await, Some(StepState::Complete));
}

/// One failing branch fails the flow, once every branch is done
#[tokio::test]
async fn test_parallel_failure() {
    let dispatcher = Arc::new(ScriptedDispatcher::holding());
    let blueprint = parallel(&[("a", "true"), ("b", "false"), ("c", "true")]);
    let engine = engine_for(&dispatcher, blueprint.build());
    let root = engine.root();

    engine.run_root(false).await.unwrap();
    dispatcher.wait_for_submissions(3).await;
    dispatcher.release_all();

    assert_eq!(engine.wait(root).await, Some(StepState::Failed));
    let run = engine.snapshot().await;
    assert_eq!(
        child_states(&run, root),
        vec![StepState::Complete, StepState::Failed, StepState::Complete]
    );
}

/// A dispatcher without parallel support is a structural error, not a silent fallback
#[tokio::test]
async fn test_parallel_requires_parallel_dispatcher() {
    let dispatcher = Arc::new(ScriptedDispatcher::serial_only());
    let blueprint = FlowBlueprint::new("outer", FlowType::Serial)
        .with_flow(parallel(&[("a", "true"), ("b", "true")]));
    let engine = engine_for(&dispatcher, blueprint.build());

    let result = engine.run_root(true).await;

    assert!(matches!(result, Err(EngineError::Structural(_))));
    let run = engine.snapshot().await;
    let inner = run.children(run.root())[0];
    assert_eq!(run.state(inner), Some(StepState::Error));
    assert_eq!(run.state(run.root()), Some(StepState::Failed));
    assert!(dispatcher.submissions().is_empty());
}

/// A branch missing a required value errors, and the caller hears about it
#[tokio::test]
async fn test_parallel_configuration_error_reaches_caller() {
    let dispatcher = Arc::new(ScriptedDispatcher::new());
    let blueprint = FlowBlueprint::new("fan-out", FlowType::Parallel)
        .with_command(CommandBlueprint::new("ok", "true"))
        .with_command(
            CommandBlueprint::new("tool", "tool")
                .with_param(CommandBlueprintParam::new("-i", Some("-i "), 0)),
        );
    let engine = engine_for(&dispatcher, blueprint.build());
    let root = engine.root();

    let result = engine.run_root(true).await;

    assert!(matches!(result, Err(EngineError::Configuration(_))));
    let run = engine.snapshot().await;
    assert_eq!(
        child_states(&run, root),
        vec![StepState::Complete, StepState::Error]
    );
    assert_eq!(run.state(root), Some(StepState::Failed));
    assert_eq!(dispatcher.submissions(), vec!["true".to_string()]);
}

/// A branch that fails to launch errors and fails the flow
#[tokio::test]
async fn test_parallel_launch_error() {
    let dispatcher = Arc::new(ScriptedDispatcher::new());
    let blueprint = parallel(&[("a", "true"), ("b", "unlaunchable")]);
    let engine = engine_for(&dispatcher, blueprint.build());
    let root = engine.root();

    engine.run_root(true).await.unwrap();

    let run = engine.snapshot().await;
    assert_eq!(
        child_states(&run, root),
        vec![StepState::Complete, StepState::Error]
    );
    assert_eq!(run.state(root), Some(StepState::Failed));
}

/// Errors in a nested parallel flow reach the caller of the outer flow
#[tokio::test]
async fn test_nested_parallel_configuration_error() {
    let dispatcher = Arc::new(ScriptedDispatcher::new());
    let blueprint = FlowBlueprint::new("outer", FlowType::Serial).with_flow(
        FlowBlueprint::new("inner", FlowType::Parallel).with_command(
            CommandBlueprint::new("tool", "tool")
                .with_param(CommandBlueprintParam::new("-i", Some("-i "), 0)),
        ),
    );
    let engine = engine_for(&dispatcher, blueprint.build());

    let result = engine.run_root(true).await;

    assert!(matches!(result, Err(EngineError::Configuration(_))));
    let run = engine.snapshot().await;
    let inner = run.children(run.root())[0];
    assert_eq!(run.state(inner), Some(StepState::Failed));
    assert_eq!(run.state(run.root()), Some(StepState::Failed));
    assert!(dispatcher.submissions().is_empty());
}
