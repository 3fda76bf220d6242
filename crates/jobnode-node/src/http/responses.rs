//! HTTP request and response types.

use base64::Engine;
use jobnode_core::{RunResult, TaskStatus};
use serde::{Deserialize, Serialize};

// ============================================================================
// Run submission types
// ============================================================================

/// Response body for the submit endpoint.
#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub status: TaskStatus,
}

// ============================================================================
// Result types
// ============================================================================

/// Query of the result long-poll endpoint.
#[derive(Debug, Default, Deserialize)]
pub struct NextResultQuery {
    /// Seconds to wait for a result. Zero returns immediately.
    #[serde(default)]
    pub wait_secs: u64,
}

/// A finished run.
#[derive(Debug, Serialize)]
pub struct ResultResponse {
    pub run_id: u64,
    pub task_id: u64,
    pub parent_id: Option<u64>,
    pub status: TaskStatus,
    pub logs: String,

    /// Artifact bytes (base64 encoded).
    pub data: String,

    /// Collection time (ISO 8601).
    pub finished_at: String,
}

impl From<RunResult> for ResultResponse {
    fn from(result: RunResult) -> Self {
        Self {
            run_id: result.run_id.get(),
            task_id: result.task_id.get(),
            parent_id: result.parent_id.map(|p| p.get()),
            status: result.status,
            logs: result.logs,
            data: base64::engine::general_purpose::STANDARD.encode(&result.data),
            finished_at: result.finished_at.to_rfc3339(),
        }
    }
}

// ============================================================================
// Error types
// ============================================================================

/// Error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}
