//! Engine error types

use crate::core::StepId;
use crate::execution::dispatch::DispatchError;
use thiserror::Error;

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors surfaced by the blueprint and execution layers
#[derive(Debug, Error)]
pub enum EngineError {
    /// A command or blueprint is misconfigured; nothing was dispatched
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The dispatch collaborator could not start the process
    #[error("Launch error for step {step}: {reason}")]
    Launch { step: StepId, reason: String },

    /// The run cannot proceed as requested (unsupported parallelism, bad tree shape)
    #[error("Structural error: {0}")]
    Structural(String),

    #[error("Step not found: {0}")]
    UnknownStep(StepId),

    #[error("Command '{command}' has no parameter named '{name}'")]
    UnknownParameter { command: String, name: String },

    #[error("Step {0} is not a command")]
    NotACommand(StepId),

    #[error("Step {0} is not a flow")]
    NotAFlow(StepId),

    /// The step is executing and cannot be modified
    #[error("Step {0} is currently executing")]
    Busy(StepId),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Store error: {0}")]
    Store(String),
}

impl From<anyhow::Error> for EngineError {
    fn from(err: anyhow::Error) -> Self {
        EngineError::Store(format!("{:#}", err))
    }
}
