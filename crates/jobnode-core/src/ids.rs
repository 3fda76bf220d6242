//! Newtype wrappers for identifiers to ensure type safety.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

/// Identifier of a Run, assigned by the control plane.
///
/// Unique per submission. The executor-side job for a run is named after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(u64);

impl RunId {
    /// Create a new RunId.
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw numeric value.
    pub const fn get(&self) -> u64 {
        self.0
    }

    /// Name of the executor job backing this run.
    pub fn job_name(&self) -> String {
        format!("run-{}", self.0)
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for RunId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl FromStr for RunId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<u64>()
            .map(Self)
            .map_err(|_| CoreError::invalid_identifier(s, "run id must be an unsigned integer"))
    }
}

/// Identifier of the Task a Run belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(u64);

impl TaskId {
    /// Create a new TaskId.
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw numeric value.
    pub const fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for TaskId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl FromStr for TaskId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<u64>()
            .map(Self)
            .map_err(|_| CoreError::invalid_identifier(s, "task id must be an unsigned integer"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_name() {
        assert_eq!(RunId::new(1001).job_name(), "run-1001");
    }

    #[test]
    fn test_id_display() {
        let id = TaskId::new(7);
        assert_eq!(format!("{}", id), "7");
    }

    #[test]
    fn test_run_id_parse() {
        assert_eq!("42".parse::<RunId>().unwrap(), RunId::new(42));
        assert!(matches!(
            "run-42".parse::<RunId>(),
            Err(CoreError::InvalidIdentifier { .. })
        ));
    }
}
