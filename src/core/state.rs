//! Step state machine and run summaries

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// State of a single step (flow or command)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepState {
    /// Built but never run
    #[default]
    Unrun,
    /// Submitted, not yet confirmed started
    Pending,
    /// Currently running
    Running,
    /// Finished successfully
    Complete,
    /// Could not even be launched (bad configuration, spawn failure)
    Error,
    /// Launched, returned non-success
    Failed,
    /// Cancelled by an external signal
    Killed,
}

impl StepState {
    /// Check if the state is terminal
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StepState::Complete | StepState::Error | StepState::Failed | StepState::Killed
        )
    }

    /// An execution has been attempted and a terminal state received.
    /// This doesn't imply success or failure.
    pub fn has_executed(&self) -> bool {
        self.is_terminal()
    }

    pub fn is_executing(&self) -> bool {
        matches!(self, StepState::Pending | StepState::Running)
    }

    /// Human-readable label
    pub fn display(&self) -> &'static str {
        match self {
            StepState::Unrun => "unrun",
            StepState::Pending => "pending",
            StepState::Running => "running",
            StepState::Complete => "complete",
            StepState::Error => "error",
            StepState::Failed => "failed",
            StepState::Killed => "killed",
        }
    }

    /// Parse a label produced by [`StepState::display`]
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "unrun" => Some(StepState::Unrun),
            "pending" => Some(StepState::Pending),
            "running" => Some(StepState::Running),
            "complete" => Some(StepState::Complete),
            "error" => Some(StepState::Error),
            "failed" => Some(StepState::Failed),
            "killed" => Some(StepState::Killed),
            _ => None,
        }
    }
}

impl fmt::Display for StepState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display())
    }
}

/// Summary of a run, kept in history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    /// Unique run ID
    pub run_id: Uuid,

    /// Name of the root flow
    pub flow_name: String,

    /// State of the root flow
    pub state: StepState,

    /// When the root flow started
    pub started_at: Option<DateTime<Utc>>,

    /// When the root flow reached a terminal state
    pub ended_at: Option<DateTime<Utc>>,

    /// Number of commands in the run
    pub total_commands: usize,

    /// Number of complete commands
    pub complete_commands: usize,

    /// Number of commands that failed, errored or were killed
    pub unsuccessful_commands: usize,
}

impl RunSummary {
    /// Fraction of commands that reached a terminal state (0.0 to 1.0)
    pub fn progress(&self) -> f64 {
        if self.total_commands == 0 {
            return 0.0;
        }
        (self.complete_commands + self.unsuccessful_commands) as f64 / self.total_commands as f64
    }
}
