//! Startup Watcher: waits for a run's pod to start.

use std::sync::Arc;
use std::time::Duration;

use jobnode_core::{RunId, TaskStatus};
use jobnode_kube::{ExecutorError, PodPhase};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::context::NodeContext;

/// Furthest pod phase observed for a run. Only moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum StartupState {
    None,
    Pending,
    Running,
    Terminal,
}

impl StartupState {
    /// Fold an observed phase into the state.
    pub fn observe(self, phase: PodPhase) -> Self {
        let next = match phase {
            PodPhase::Pending => Self::Pending,
            PodPhase::Running => Self::Running,
            PodPhase::Succeeded | PodPhase::Failed => Self::Terminal,
            // A pod whose state was lost says nothing about progress.
            PodPhase::Unknown => self,
        };
        self.max(next)
    }

    /// The pod has run, whether or not it is still running.
    pub fn has_started(self) -> bool {
        self >= Self::Running
    }
}

/// Waits for a run's pod to reach `Running`.
pub struct StartupWatcher {
    ctx: Arc<NodeContext>,
}

impl StartupWatcher {
    pub fn new(ctx: Arc<NodeContext>) -> Self {
        Self { ctx }
    }

    /// Returns `Active` as soon as a pod of the run is seen running (or
    /// already finished), `UnknownError` if that does not happen within
    /// `timeout`. The job is left alone either way.
    ///
    /// Transient errors from the subscription are logged and waited out.
    pub async fn await_running(
        &self,
        run_id: RunId,
        timeout: Duration,
    ) -> Result<TaskStatus, ExecutorError> {
        let deadline = Instant::now() + timeout;
        let cancel = CancellationToken::new();

        // Dropping the watch on return stops the subscription.
        let mut watch = self
            .ctx
            .executor
            .watch_pods(
                self.ctx.namespace(),
                &self.ctx.run_selector(run_id),
                timeout,
                cancel,
            )
            .await?;

        let mut state = StartupState::None;
        loop {
            match tokio::time::timeout_at(deadline, watch.next()).await {
                Ok(Some(Ok(event))) => {
                    let next = state.observe(event.phase);
                    if next != state {
                        debug!(run_id = %run_id, pod = %event.pod_name, phase = %event.phase, "Pod phase observed");
                    }
                    state = next;
                    if state.has_started() {
                        info!(run_id = %run_id, pod = %event.pod_name, "Run started");
                        return Ok(TaskStatus::Active);
                    }
                }
                Ok(Some(Err(e))) if e.is_transient() => {
                    self.ctx.metrics.record_executor_error();
                    warn!(run_id = %run_id, error = %e, "Transient error while waiting for startup");
                }
                Ok(Some(Err(e))) => {
                    self.ctx.metrics.record_executor_error();
                    return Err(e);
                }
                Ok(None) | Err(_) => {
                    warn!(
                        run_id = %run_id,
                        timeout_secs = timeout.as_secs(),
                        last_state = ?state,
                        "Run did not start within timeout, leaving job in place"
                    );
                    return Ok(TaskStatus::UnknownError);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::context;
    use jobnode_core::{DatasetCatalog, RunRequest, TaskId};
    use jobnode_testkit::{FakeCluster, Fault, Method};

    use crate::submitter::JobSubmitter;

    async fn submit(ctx: &Arc<NodeContext>, run_id: u64) {
        let request = RunRequest::new(RunId::new(run_id), TaskId::new(1), "allowed/a");
        let plan = ctx
            .planner
            .plan(request.run_id, &DatasetCatalog::default())
            .unwrap();
        JobSubmitter::new(Arc::clone(ctx))
            .submit(&request, &plan, &DatasetCatalog::default())
            .await
            .unwrap();
    }

    #[test]
    fn test_state_is_monotonic() {
        let state = StartupState::None
            .observe(PodPhase::Running)
            .observe(PodPhase::Pending)
            .observe(PodPhase::Unknown);
        assert_eq!(state, StartupState::Running);
        assert!(StartupState::Terminal.has_started());
        assert!(!StartupState::Pending.has_started());
    }

    #[tokio::test]
    async fn test_running_pod_is_active() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(FakeCluster::new(), dir.path());
        submit(&ctx, 1).await;

        let status = StartupWatcher::new(Arc::clone(&ctx))
            .await_running(RunId::new(1), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(status, TaskStatus::Active);
    }

    #[tokio::test]
    async fn test_pending_pod_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let cluster = FakeCluster::new().with_initial_phase(PodPhase::Pending);
        let ctx = context(cluster, dir.path());
        submit(&ctx, 2).await;

        let started = std::time::Instant::now();
        let status = StartupWatcher::new(Arc::clone(&ctx))
            .await_running(RunId::new(2), Duration::from_millis(150))
            .await
            .unwrap();
        assert_eq!(status, TaskStatus::UnknownError);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_late_start_is_seen() {
        let dir = tempfile::tempdir().unwrap();
        let cluster = FakeCluster::new().with_initial_phase(PodPhase::Pending);
        let ctx = context(cluster.clone(), dir.path());
        submit(&ctx, 3).await;

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            cluster.start_pod("run-3");
        });

        let status = StartupWatcher::new(Arc::clone(&ctx))
            .await_running(RunId::new(3), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(status, TaskStatus::Active);
    }

    #[tokio::test]
    async fn test_transient_listing_error_is_waited_out() {
        let dir = tempfile::tempdir().unwrap();
        let cluster = FakeCluster::new();
        let ctx = context(cluster.clone(), dir.path());
        submit(&ctx, 4).await;

        cluster.fail_next(Method::ListPods, Fault::Unavailable);
        let status = StartupWatcher::new(Arc::clone(&ctx))
            .await_running(RunId::new(4), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(status, TaskStatus::Active);
    }
}
