//! Bottom-up state aggregation
//!
//! Whenever a step reaches a new state its parent flow recomputes its own
//! state from its children, and keeps walking up while flows keep landing in
//! terminal states.

use crate::core::{FlowType, Run, StepId, StepState};
use chrono::Utc;
use tracing::debug;

/// A state transition applied to one step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChange {
    pub step_id: StepId,
    pub from: StepState,
    pub to: StepState,
}

/// Derive a flow state from its children's states.
///
/// First matching rule wins:
/// 1. any child executing -> running
/// 2. all children complete -> complete
/// 3. none unrun, any killed -> killed
/// 4. none unrun, any failed (or error) -> failed
/// 5. otherwise no determination yet
pub fn aggregate_states(states: &[StepState]) -> Option<StepState> {
    if states.iter().any(StepState::is_executing) {
        return Some(StepState::Running);
    }

    if states.iter().all(|s| *s == StepState::Complete) {
        return Some(StepState::Complete);
    }

    if states.iter().any(|s| *s == StepState::Unrun) {
        return None;
    }

    if states.contains(&StepState::Killed) {
        return Some(StepState::Killed);
    }

    if states
        .iter()
        .any(|s| matches!(s, StepState::Failed | StepState::Error))
    {
        return Some(StepState::Failed);
    }

    None
}

/// Children states that count towards a flow's state.
///
/// A serial flow stops at the first child that ends without completing, so
/// unrun children after that point are unreachable in this run and ignored.
pub fn effective_child_states(run: &Run, flow: StepId) -> Vec<StepState> {
    let children = run.children(flow);
    let states = children.iter().filter_map(|id| run.state(*id));

    let serial = run
        .step(flow)
        .and_then(|s| s.as_flow())
        .is_some_and(|f| f.flow_type == FlowType::Serial);

    if !serial {
        return states.collect();
    }

    let mut halted = false;
    let mut effective = Vec::with_capacity(children.len());
    for state in states {
        if halted && state == StepState::Unrun {
            continue;
        }
        if state.is_terminal() && state != StepState::Complete {
            halted = true;
        }
        effective.push(state);
    }
    effective
}

/// Recompute one flow's state. Returns the change, if any.
///
/// A terminal flow is never moved back to running by aggregation; only a
/// new `run()` does that.
pub(crate) fn aggregate_flow(run: &mut Run, flow: StepId) -> Option<StateChange> {
    let current = run.state(flow)?;
    let next = aggregate_states(&effective_child_states(run, flow))?;

    if next == current || (current.is_terminal() && !next.is_terminal()) {
        return None;
    }

    let step = run.step_mut(flow)?;
    step.state = next;
    if next.is_terminal() {
        step.end_time = Some(Utc::now());
    }
    debug!("Flow '{}' aggregated {} -> {}", step.name, current, next);

    Some(StateChange {
        step_id: flow,
        from: current,
        to: next,
    })
}

/// Walk up from a step whose state just changed, re-aggregating each ancestor
/// until one does not change or does not land in a terminal state.
pub(crate) fn propagate(run: &mut Run, changed: StepId) -> Vec<StateChange> {
    let mut changes = Vec::new();
    let mut current = changed;

    while let Some(parent) = run.step(current).and_then(|s| s.parent) {
        match aggregate_flow(run, parent) {
            Some(change) => {
                let terminal = change.to.is_terminal();
                changes.push(change);
                if !terminal {
                    break;
                }
                current = parent;
            }
            None => break,
        }
    }

    changes
}
