//! flowprint - build workflow instances from blueprints and run them

pub mod cli;
pub mod core;
pub mod error;
pub mod execution;
pub mod persistence;

// Re-export commonly used types
pub use core::{
    CommandBlueprint, CommandBlueprintParam, FlowBlueprint, FlowType, Run, Step, StepId, StepState,
};
pub use error::{EngineError, Result};
pub use execution::{
    DispatchConfig, DispatchStatus, Dispatcher, ExecutionEngine, ExecutionEvent, LocalDispatcher,
};
pub use persistence::{InMemoryStore, RunStore};
