//! Test: Serial Success - nested flows complete bottom-up

use crate::helpers::*;
use flowprint::core::{CommandBlueprint, CommandBlueprintParam, FlowBlueprint, FlowType, StepState};
use flowprint::execution::ExecutionEvent;
use std::sync::Arc;

fn annotation() -> FlowBlueprint {
    FlowBlueprint::new("annotation", FlowType::Serial)
        .with_flow(
            FlowBlueprint::new("predict", FlowType::Serial).with_command(
                CommandBlueprint::new("prodigal", "prodigal")
                    .with_param(CommandBlueprintParam::new("-i", Some("-i "), 0))
                    .with_param(CommandBlueprintParam::new("-g", Some("-g "), 1).with_default("11")),
            ),
        )
        .with_command(CommandBlueprint::new("summary", "wc -l"))
}

/// The inner flow completes, then the outer flow runs its last command
#[tokio::test]
async fn test_nested_serial_flows_complete() {
    let dispatcher = Arc::new(ScriptedDispatcher::new());
    let mut run = annotation().build();
    let prodigal = run.find_command("prodigal").unwrap();
    run.set_param(prodigal, "-i", "contigs.fa").unwrap();
    let engine = engine_for(&dispatcher, run);

    engine.run_root(true).await.unwrap();

    let run = engine.snapshot().await;
    assert!(run.steps().all(|s| s.state == StepState::Complete));
    assert_eq!(
        dispatcher.submissions(),
        vec!["prodigal -i contigs.fa -g 11", "wc -l"]
    );

    let step = run.step(prodigal).unwrap();
    let command = step.as_command().unwrap();
    assert_eq!(command.exec_string.as_deref(), Some("prodigal -i contigs.fa -g 11"));
    assert!(command.task_id.is_some());
    assert!(step.start_time.unwrap() <= step.end_time.unwrap());
}

/// Each state change is announced once, ending with the run result
#[tokio::test]
async fn test_events_follow_execution() {
    let dispatcher = Arc::new(ScriptedDispatcher::new());
    let blueprint = FlowBlueprint::new("flow", FlowType::Serial)
        .with_command(CommandBlueprint::new("only", "true"));
    let engine = engine_for(&dispatcher, blueprint.build());

    let events = Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    engine
        .add_event_handler(move |event| sink.lock().unwrap().push(event))
        .await;

    engine.run_root(true).await.unwrap();

    let events = events.lock().unwrap();
    let transitions: Vec<(String, StepState)> = events
        .iter()
        .filter_map(|event| match event {
            ExecutionEvent::StepStateChanged { name, to, .. } => Some((name.clone(), *to)),
            _ => None,
        })
        .collect();

    assert_eq!(
        transitions,
        vec![
            ("flow".to_string(), StepState::Running),
            ("only".to_string(), StepState::Pending),
            ("only".to_string(), StepState::Complete),
            ("flow".to_string(), StepState::Complete),
        ]
    );
    assert!(matches!(
        events.last(),
        Some(ExecutionEvent::RunFinished {
            state: StepState::Complete,
            ..
        })
    ));
}
