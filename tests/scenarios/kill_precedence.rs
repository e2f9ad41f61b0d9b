//! Test: Kill Precedence - a killed child outranks a failed one

use crate::helpers::*;
use flowprint::core::{CommandBlueprint, FlowBlueprint, FlowType, StepState};
use std::sync::Arc;

/// complete + failed + killed children make a killed flow
#[tokio::test]
async fn test_killed_beats_failed() {
    let dispatcher = Arc::new(ScriptedDispatcher::holding());
    let blueprint = FlowBlueprint::new("fan-out", FlowType::Parallel)
        .with_command(CommandBlueprint::new("ok", "true"))
        .with_command(CommandBlueprint::new("bad", "false"))
        .with_command(CommandBlueprint::new("slow", "sleep 600"));
    let engine = engine_for(&dispatcher, blueprint.build());
    let root = engine.root();
    let slow = engine.command_named(root, "slow").await.unwrap();

    engine.run_root(false).await.unwrap();
    dispatcher.wait_for_submissions(3).await;
    wait_for_state(&engine, slow, StepState::Running).await;

    assert_eq!(engine.kill(slow).await.unwrap(), 1);
    wait_for_state(&engine, slow, StepState::Killed).await;
    assert_eq!(engine.state(root).await, Some(StepState::Running));

    dispatcher.release_all();

    assert_eq!(engine.wait(root).await, Some(StepState::Killed));
    let run = engine.snapshot().await;
    assert_eq!(
        child_states(&run, root),
        vec![StepState::Complete, StepState::Failed, StepState::Killed]
    );
}

/// Killing a serial flow stops the running command and nothing after it starts
#[tokio::test]
async fn test_kill_serial_flow() {
    let dispatcher = Arc::new(ScriptedDispatcher::holding());
    let blueprint = FlowBlueprint::new("chain", FlowType::Serial)
        .with_command(CommandBlueprint::new("one", "sleep 600"))
        .with_command(CommandBlueprint::new("two", "true"))
        .with_command(CommandBlueprint::new("three", "true"));
    let engine = engine_for(&dispatcher, blueprint.build());
    let root = engine.root();

    let one = engine.command_named(root, "one").await.unwrap();

    engine.run_root(false).await.unwrap();
    dispatcher.wait_for_submissions(1).await;
    wait_for_state(&engine, one, StepState::Running).await;

    assert_eq!(engine.kill(root).await.unwrap(), 1);

    assert_eq!(engine.wait(root).await, Some(StepState::Killed));
    let run = engine.snapshot().await;
    assert_eq!(
        child_states(&run, root),
        vec![StepState::Killed, StepState::Unrun, StepState::Unrun]
    );
    assert_eq!(dispatcher.submissions().len(), 1);
}
