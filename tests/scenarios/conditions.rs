//! Test: Conditions - a flow whose condition is false completes without running

use crate::helpers::*;
use flowprint::core::{CommandBlueprint, FlowBlueprint, FlowType, StepState};
use flowprint::error::EngineError;
use flowprint::execution::ExecutionEvent;
use std::sync::Arc;

fn guarded(condition: &str) -> FlowBlueprint {
    FlowBlueprint::new("outer", FlowType::Serial)
        .with_flow(
            FlowBlueprint::new("optional", FlowType::Serial)
                .with_condition(condition)
                .with_command(CommandBlueprint::new("extra", "extra-analysis")),
        )
        .with_command(CommandBlueprint::new("after", "report"))
}

#[tokio::test]
async fn test_false_condition_skips_flow() {
    let dispatcher = Arc::new(ScriptedDispatcher::new());
    let engine = engine_for(&dispatcher, guarded("false").build());

    let skipped = Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = Arc::clone(&skipped);
    engine
        .add_event_handler(move |event| {
            if let ExecutionEvent::FlowSkipped { name, .. } = event {
                sink.lock().unwrap().push(name);
            }
        })
        .await;

    engine.run_root(true).await.unwrap();

    let run = engine.snapshot().await;
    let optional = run.children(run.root())[0];
    let flow = run.step(optional).unwrap();
    assert_eq!(flow.state, StepState::Complete);
    assert_eq!(flow.as_flow().unwrap().conditional_result, Some(false));
    assert_eq!(child_states(&run, optional), vec![StepState::Unrun]);
    assert_eq!(run.state(run.root()), Some(StepState::Complete));
    assert_eq!(dispatcher.submissions(), vec!["report"]);
    assert_eq!(*skipped.lock().unwrap(), vec!["optional".to_string()]);
}

#[tokio::test]
async fn test_true_condition_runs_flow() {
    let dispatcher = Arc::new(ScriptedDispatcher::new());
    let engine = engine_for(&dispatcher, guarded("yes").build());

    engine.run_root(true).await.unwrap();

    let run = engine.snapshot().await;
    let optional = run.children(run.root())[0];
    assert_eq!(
        run.step(optional).unwrap().as_flow().unwrap().conditional_result,
        Some(true)
    );
    assert_eq!(dispatcher.submissions(), vec!["extra-analysis", "report"]);
    assert_eq!(run.state(run.root()), Some(StepState::Complete));
}

/// A condition that cannot be evaluated is a configuration error
#[tokio::test]
async fn test_unreadable_condition() {
    let dispatcher = Arc::new(ScriptedDispatcher::new());
    let engine = engine_for(&dispatcher, guarded("maybe").build());

    let result = engine.run_root(true).await;

    assert!(matches!(result, Err(EngineError::Configuration(_))));
    let run = engine.snapshot().await;
    let optional = run.children(run.root())[0];
    assert_eq!(run.state(optional), Some(StepState::Error));
    assert_eq!(run.state(run.root()), Some(StepState::Failed));
    assert!(dispatcher.submissions().is_empty());
}
