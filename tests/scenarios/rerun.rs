//! Test: Rerun - a second run retries only what did not complete

use crate::helpers::*;
use flowprint::core::{CommandBlueprint, CommandBlueprintParam, FlowBlueprint, FlowType, StepState};
use flowprint::error::EngineError;
use std::sync::Arc;

fn chain() -> FlowBlueprint {
    FlowBlueprint::new("chain", FlowType::Serial)
        .with_command(CommandBlueprint::new("one", "step one"))
        .with_command(
            CommandBlueprint::new("two", "step two")
                .with_param(CommandBlueprintParam::new("mode", Some("--mode "), 0)),
        )
        .with_command(CommandBlueprint::new("three", "step three"))
}

/// Fix a parameter after a failure and run again
#[tokio::test]
async fn test_rerun_after_fixing_parameter() {
    let dispatcher = Arc::new(ScriptedDispatcher::new());
    let mut run = chain().build();
    let two = run.find_command("two").unwrap();
    run.set_param(two, "mode", "false").unwrap();
    let engine = engine_for(&dispatcher, run);

    engine.run_root(true).await.unwrap();
    assert_eq!(engine.state(engine.root()).await, Some(StepState::Failed));

    engine.set_param(two, "mode", "true").await.unwrap();
    engine.run_root(true).await.unwrap();

    assert_eq!(engine.state(engine.root()).await, Some(StepState::Complete));
    assert_eq!(
        dispatcher.submissions(),
        vec![
            "step one",
            "step two --mode false",
            "step two --mode true",
            "step three",
        ]
    );
}

/// Running a complete flow again launches nothing
#[tokio::test]
async fn test_rerun_of_complete_flow_is_noop() {
    let dispatcher = Arc::new(ScriptedDispatcher::new());
    let mut run = chain().build();
    let two = run.find_command("two").unwrap();
    run.set_param(two, "mode", "fast").unwrap();
    let engine = engine_for(&dispatcher, run);

    engine.run_root(true).await.unwrap();
    engine.run_root(true).await.unwrap();

    assert_eq!(engine.state(engine.root()).await, Some(StepState::Complete));
    assert_eq!(dispatcher.submissions().len(), 3);
}

/// A command run on its own leaves its siblings and parent alone
#[tokio::test]
async fn test_run_single_command() {
    let dispatcher = Arc::new(ScriptedDispatcher::new());
    let engine = engine_for(&dispatcher, chain().build());
    let one = engine.command_named(engine.root(), "one").await.unwrap();

    engine.run(one, true).await.unwrap();

    let run = engine.snapshot().await;
    assert_eq!(
        child_states(&run, run.root()),
        vec![StepState::Complete, StepState::Unrun, StepState::Unrun]
    );
    assert_eq!(run.state(run.root()), Some(StepState::Unrun));
}

/// Nothing can be run or reconfigured while it is executing
#[tokio::test]
async fn test_busy_while_executing() {
    let dispatcher = Arc::new(ScriptedDispatcher::holding());
    let engine = engine_for(&dispatcher, chain().build());
    let root = engine.root();
    let one = engine.command_named(root, "one").await.unwrap();
    let two = engine.command_named(root, "two").await.unwrap();

    engine.run(one, false).await.unwrap();
    dispatcher.wait_for_submissions(1).await;

    assert!(matches!(engine.run(one, true).await, Err(EngineError::Busy(_))));
    assert!(matches!(
        engine.set_param(one, "mode", "x").await,
        Err(EngineError::Busy(_))
    ));
    assert!(matches!(engine.run(root, true).await, Err(EngineError::Busy(_))));

    // Not executing, so it can still be configured
    engine.set_param(two, "mode", "fast").await.unwrap();

    dispatcher.release_all();
    assert_eq!(engine.wait(one).await, Some(StepState::Complete));
}
