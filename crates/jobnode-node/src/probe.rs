//! Run Registry Probe.

use std::sync::Arc;

use jobnode_core::RunId;
use jobnode_kube::ExecutorError;
use tracing::debug;

use crate::context::NodeContext;

/// Asks the executor whether a run already has a job.
///
/// The answer is advisory: another submission can create the job right
/// after this returns false. Callers serialize per run id to close that gap.
pub struct RunRegistryProbe {
    ctx: Arc<NodeContext>,
}

impl RunRegistryProbe {
    pub fn new(ctx: Arc<NodeContext>) -> Self {
        Self { ctx }
    }

    /// True if at least one pod or job carries the run id label.
    pub async fn is_running(&self, run_id: RunId) -> Result<bool, ExecutorError> {
        let selector = self.ctx.run_selector(run_id);
        let executor = &self.ctx.executor;

        let pods = executor.list_pods(self.ctx.namespace(), &selector).await?;
        if !pods.is_empty() {
            debug!(run_id = %run_id, pods = pods.len(), "Run has live pods");
            return Ok(true);
        }

        let jobs = executor
            .list_jobs(self.ctx.namespace(), Some(&selector))
            .await?;
        if !jobs.is_empty() {
            debug!(run_id = %run_id, jobs = jobs.len(), "Run has a job");
        }
        Ok(!jobs.is_empty())
    }
}
