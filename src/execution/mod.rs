//! Run execution: dispatch, aggregation and the engine driving both

pub mod aggregation;
pub mod dispatch;
pub mod engine;

pub use aggregation::{aggregate_states, StateChange};
pub use dispatch::{
    DispatchConfig, DispatchError, DispatchStatus, Dispatcher, LocalDispatcher, PollBackoff,
    TaskHandle,
};
pub use engine::{EngineBuilder, EngineConfig, EventHandler, ExecutionEngine, ExecutionEvent};
