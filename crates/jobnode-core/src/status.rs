//! Externally visible status of a Run.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome of a submission or a completion event, as reported to the control plane.
///
/// This is not the executor's pod phase; phases are translated into one of
/// these values at the executor boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// The image is not permitted by the node's policy.
    NotAllowed,
    /// The run's job exists and has started (or was already running).
    Active,
    /// The job succeeded and its artifact was collected.
    Completed,
    /// The algorithm exited non-zero on every attempt of its retry budget.
    Crashed,
    /// The job succeeded but its output could not be collected.
    Failed,
    /// Outcome could not be determined (startup timeout, unknown pod phase).
    UnknownError,
}

impl TaskStatus {
    /// All variants, in a stable order.
    pub const ALL: [TaskStatus; 6] = [
        Self::NotAllowed,
        Self::Active,
        Self::Completed,
        Self::Crashed,
        Self::Failed,
        Self::UnknownError,
    ];

    /// Returns true if no further status change is expected for the run.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Active)
    }

    /// Returns true if the run did not run to completion.
    pub fn has_failed(&self) -> bool {
        !matches!(self, Self::Active | Self::Completed)
    }

    /// Lowercase label, as used in metrics and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotAllowed => "not_allowed",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Crashed => "crashed",
            Self::Failed => "failed",
            Self::UnknownError => "unknown_error",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
