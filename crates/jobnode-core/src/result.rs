//! Completion records handed back to the control plane.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{RunId, TaskId, TaskStatus};

/// The final record of a Run.
///
/// Built exactly once per job by the completion reaper. The backing job and
/// pods are deleted right after, so this is the only remaining record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    /// Run that produced this result.
    pub run_id: RunId,

    /// Task the run belongs to.
    pub task_id: TaskId,

    /// Parent task, if any.
    pub parent_id: Option<TaskId>,

    /// Terminal status.
    pub status: TaskStatus,

    /// Logs of every pod attempt, concatenated in creation order.
    pub logs: String,

    /// Raw bytes of the output artifact; empty unless the run completed.
    #[serde(with = "crate::encoding::base64_bytes")]
    pub data: Vec<u8>,

    /// When the result was collected.
    pub finished_at: DateTime<Utc>,
}

impl RunResult {
    /// Returns true if the run produced an artifact.
    pub fn has_data(&self) -> bool {
        !self.data.is_empty()
    }
}
