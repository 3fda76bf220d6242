//! Completion Reaper: drains finished jobs into results, exactly once.
//!
//! Each scan lists the node's jobs and pods, picks the oldest terminal job
//! not reaped yet, collects its logs and artifact, remembers its uid and
//! deletes the job and its pods, then removes the run's workspace.
//! Remembered uids ("tombstones") keep a lagging listing from producing a
//! second result for the same job. A tombstone is forgotten once its job is
//! gone from the listing and the retention period has passed.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use jobnode_core::{RunId, RunResult, TaskId, TaskStatus};
use jobnode_kube::{ExecutorError, JobCondition, JobView, PodPhase, PodView};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::context::{
    NodeContext, RUN_ID_ANNOTATION, RUN_ID_LABEL, TASK_ID_ANNOTATION, TASK_PARENT_ID_ANNOTATION,
};
use crate::retry::Transient;

/// Deletions of a reaped job are attempted at most this often.
pub const MAX_DELETE_ATTEMPTS: u32 = 5;

/// Reaper errors. Only listings fail a scan; nothing is tombstoned when one
/// is returned, so the same job is picked up again by the next scan.
#[derive(Debug, Error)]
pub enum ReapError {
    #[error(transparent)]
    Executor(#[from] ExecutorError),
}

impl Transient for ReapError {
    fn is_transient(&self) -> bool {
        match self {
            Self::Executor(e) => e.is_transient(),
        }
    }
}

/// How a job ended, as far as the executor can tell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Terminal {
    Succeeded,
    /// Retry budget exhausted.
    Failed,
    /// Every pod is in an unknown phase.
    Unknown,
}

/// Decide whether a job is terminal. `pods` are the job's pods.
pub fn classify(job: &JobView, pods: &[&PodView], backoff_limit: u32) -> Option<Terminal> {
    match job.condition {
        Some(JobCondition::Complete) => return Some(Terminal::Succeeded),
        Some(JobCondition::Failed) => return Some(Terminal::Failed),
        None => {}
    }
    if job.active == 0 && job.succeeded > 0 {
        return Some(Terminal::Succeeded);
    }
    if job.active == 0 && job.failed > backoff_limit {
        return Some(Terminal::Failed);
    }
    if !pods.is_empty() && pods.iter().all(|p| p.phase == PodPhase::Unknown) {
        return Some(Terminal::Unknown);
    }
    None
}

/// Identity of the run behind a job, recovered from its metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RunIdentity {
    run_id: RunId,
    task_id: TaskId,
    parent_id: Option<TaskId>,
}

impl RunIdentity {
    fn from_job(job: &JobView) -> Option<Self> {
        let run_id = job
            .annotations
            .get(RUN_ID_ANNOTATION)
            .or_else(|| job.labels.get(RUN_ID_LABEL))?
            .parse()
            .ok()?;
        let task_id = job.annotations.get(TASK_ID_ANNOTATION)?.parse().ok()?;
        let parent_id = job
            .annotations
            .get(TASK_PARENT_ID_ANNOTATION)
            .and_then(|p| p.parse().ok());
        Some(Self {
            run_id,
            task_id,
            parent_id,
        })
    }
}

#[derive(Debug)]
struct Tombstone {
    job_name: String,
    pods: Vec<String>,
    reaped_at: Instant,
    pending_delete: bool,
    delete_attempts: u32,
}

/// Outcome of one round of deletions for a reaped job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Deletion {
    Done,
    /// Only transient failures; worth another round.
    Retry,
    /// A failure that repeating will not fix.
    Permanent,
}

#[derive(Debug, Default)]
struct ReaperState {
    /// Keyed by job uid.
    tombstones: HashMap<String, Tombstone>,
}

fn job_key(job: &JobView) -> &str {
    if job.uid.is_empty() {
        &job.name
    } else {
        &job.uid
    }
}

/// Drains terminal jobs.
pub struct CompletionReaper {
    ctx: Arc<NodeContext>,
    state: Mutex<ReaperState>,
}

impl CompletionReaper {
    pub fn new(ctx: Arc<NodeContext>) -> Self {
        Self {
            ctx,
            state: Mutex::new(ReaperState::default()),
        }
    }

    /// Wait for the next terminal job and return its result.
    ///
    /// Scans every `poll_interval` until something is found. Listing
    /// failures are returned, not retried here.
    pub async fn poll_next_completion(&self) -> Result<RunResult, ReapError> {
        loop {
            if let Some(result) = self.reap_next().await? {
                return Ok(result);
            }
            tokio::time::sleep(self.ctx.config.poll_interval()).await;
        }
    }

    /// Run one scan. Returns the result of at most one job.
    pub async fn reap_next(&self) -> Result<Option<RunResult>, ReapError> {
        let mut state = self.state.lock().await;

        let namespace = self.ctx.namespace();
        let selector = self.ctx.managed_selector();
        let jobs = self
            .executor_call(self.ctx.executor.list_jobs(namespace, Some(&selector)))
            .await?;
        let pods = self
            .executor_call(self.ctx.executor.list_pods(namespace, &selector))
            .await?;
        self.ctx.metrics.record_scan();

        let listed: HashSet<&str> = jobs.iter().map(job_key).collect();
        self.retry_deletions(&mut state).await;
        self.prune(&mut state, &listed);

        let mut by_job: HashMap<&str, Vec<&PodView>> = HashMap::new();
        for pod in &pods {
            if let Some(job_name) = pod.job_name() {
                by_job.entry(job_name).or_default().push(pod);
            }
        }

        let backoff_limit = self.ctx.config.backoff_limit;
        let mut terminal: Vec<(&JobView, Terminal)> = jobs
            .iter()
            .filter(|job| !state.tombstones.contains_key(job_key(job)))
            .filter_map(|job| {
                let job_pods = by_job.get(job.name.as_str()).map(Vec::as_slice).unwrap_or(&[]);
                classify(job, job_pods, backoff_limit).map(|t| (job, t))
            })
            .collect();
        terminal.sort_by(|(a, _), (b, _)| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.name.cmp(&b.name))
        });

        let Some((job, outcome)) = terminal.into_iter().next() else {
            return Ok(None);
        };

        let mut job_pods = by_job.remove(job.name.as_str()).unwrap_or_default();
        job_pods.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.name.cmp(&b.name))
        });
        let pod_names: Vec<String> = job_pods.iter().map(|p| p.name.clone()).collect();

        let Some(identity) = RunIdentity::from_job(job) else {
            warn!(job = %job.name, "Terminal job without run identity, deleting without result");
            self.bury(&mut state, job, pod_names).await;
            return Ok(None);
        };

        let result = self.collect(job, outcome, identity, &job_pods).await;
        self.bury(&mut state, job, pod_names).await;
        self.remove_workspace(identity.run_id).await;

        self.ctx.metrics.record_result(result.status);
        info!(
            run_id = %result.run_id,
            task_id = %result.task_id,
            job = %job.name,
            status = %result.status,
            bytes = result.data.len(),
            "Job reaped"
        );
        Ok(Some(result))
    }

    /// Build the result: logs of every pod, then the artifact.
    ///
    /// A log that cannot be read is noted in the logs instead of failing the
    /// job, so one unreadable pod never holds back later completions.
    async fn collect(
        &self,
        job: &JobView,
        outcome: Terminal,
        identity: RunIdentity,
        pods: &[&PodView],
    ) -> RunResult {
        let mut logs = String::new();
        for pod in pods {
            logs.push_str(&format!("===== pod {} (job {}) =====\n", pod.name, job.name));
            match self
                .ctx
                .executor
                .read_pod_log(self.ctx.namespace(), &pod.name)
                .await
            {
                Ok(bytes) => {
                    logs.push_str(&String::from_utf8_lossy(&bytes));
                    if !logs.ends_with('\n') {
                        logs.push('\n');
                    }
                }
                Err(ExecutorError::NotFound(_)) => logs.push_str("(log no longer available)\n"),
                Err(e) => {
                    self.ctx.metrics.record_executor_error();
                    warn!(
                        run_id = %identity.run_id,
                        pod = %pod.name,
                        error = %e,
                        "Failed to read pod log"
                    );
                    logs.push_str(&format!("(log unavailable: {})\n", e));
                }
            }
        }

        let (status, data) = match outcome {
            Terminal::Succeeded => {
                let path = self
                    .ctx
                    .local_layout
                    .artifact_file(identity.run_id, &self.ctx.config.artifact_name);
                match tokio::fs::read(&path).await {
                    Ok(bytes) => (TaskStatus::Completed, bytes),
                    Err(e) => {
                        error!(
                            run_id = %identity.run_id,
                            path = %path.display(),
                            error = %e,
                            "Job succeeded but its artifact is missing"
                        );
                        logs.push_str(&format!(
                            "artifact missing at {}: {}\n",
                            path.display(),
                            e
                        ));
                        (TaskStatus::Failed, Vec::new())
                    }
                }
            }
            Terminal::Failed => (TaskStatus::Crashed, Vec::new()),
            Terminal::Unknown => (TaskStatus::UnknownError, Vec::new()),
        };

        RunResult {
            run_id: identity.run_id,
            task_id: identity.task_id,
            parent_id: identity.parent_id,
            status,
            logs,
            data,
            finished_at: Utc::now(),
        }
    }

    /// Tombstone a job, then delete it and its pods.
    async fn bury(&self, state: &mut ReaperState, job: &JobView, pods: Vec<String>) {
        let mut tombstone = Tombstone {
            job_name: job.name.clone(),
            pods,
            reaped_at: Instant::now(),
            pending_delete: true,
            delete_attempts: 0,
        };
        self.attempt_deletion(&mut tombstone).await;
        state.tombstones.insert(job_key(job).to_string(), tombstone);
    }

    async fn attempt_deletion(&self, tombstone: &mut Tombstone) {
        tombstone.delete_attempts += 1;
        match self.delete_objects(&tombstone.job_name, &tombstone.pods).await {
            Deletion::Done => tombstone.pending_delete = false,
            Deletion::Retry if tombstone.delete_attempts < MAX_DELETE_ATTEMPTS => {}
            Deletion::Retry | Deletion::Permanent => {
                error!(
                    job = %tombstone.job_name,
                    attempts = tombstone.delete_attempts,
                    "Giving up deleting reaped job, it must be removed by hand"
                );
                tombstone.pending_delete = false;
            }
        }
    }

    /// Delete a job and the given pods. Failures are logged, not returned.
    async fn delete_objects(&self, job_name: &str, pods: &[String]) -> Deletion {
        let namespace = self.ctx.namespace();
        let mut outcome = Deletion::Done;
        let mut note = |e: &ExecutorError| {
            self.ctx.metrics.record_deletion_failure();
            if !e.is_transient() {
                outcome = Deletion::Permanent;
            } else if outcome == Deletion::Done {
                outcome = Deletion::Retry;
            }
        };

        if let Err(e) = self.ctx.executor.delete_job(namespace, job_name).await {
            warn!(job = %job_name, error = %e, "Failed to delete job");
            note(&e);
        }
        for pod in pods {
            if let Err(e) = self.ctx.executor.delete_pod(namespace, pod).await {
                warn!(job = %job_name, pod = %pod, error = %e, "Failed to delete pod");
                note(&e);
            }
        }
        outcome
    }

    async fn retry_deletions(&self, state: &mut ReaperState) {
        for tombstone in state.tombstones.values_mut().filter(|t| t.pending_delete) {
            debug!(
                job = %tombstone.job_name,
                attempt = tombstone.delete_attempts + 1,
                "Retrying deletion"
            );
            self.attempt_deletion(tombstone).await;
        }
    }

    /// Forget tombstones whose job is deleted, no longer listed and older
    /// than the retention period.
    fn prune(&self, state: &mut ReaperState, listed: &HashSet<&str>) {
        let retention = self.ctx.config.tombstone_retention();
        state.tombstones.retain(|key, t| {
            t.pending_delete || listed.contains(key.as_str()) || t.reaped_at.elapsed() < retention
        });
    }

    /// Remove the run's directory once its result is collected.
    async fn remove_workspace(&self, run_id: RunId) {
        let dir = self.ctx.local_layout.run_dir(run_id);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => debug!(run_id = %run_id, path = %dir.display(), "Run workspace removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                run_id = %run_id,
                path = %dir.display(),
                error = %e,
                "Failed to remove run workspace"
            ),
        }
    }

    async fn executor_call<T>(
        &self,
        call: impl std::future::Future<Output = Result<T, ExecutorError>>,
    ) -> Result<T, ReapError> {
        call.await.map_err(|e| {
            self.ctx.metrics.record_executor_error();
            ReapError::Executor(e)
        })
    }

    /// Number of remembered jobs.
    pub async fn tombstone_count(&self) -> usize {
        self.state.lock().await.tombstones.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::time::Duration;

    use crate::submitter::JobSubmitter;
    use crate::testing::context;
    use jobnode_core::{DatasetCatalog, RunRequest};
    use jobnode_testkit::{FakeCluster, Fault, Method};

    fn job(active: u32, succeeded: u32, failed: u32, condition: Option<JobCondition>) -> JobView {
        JobView {
            name: "run-1".to_string(),
            uid: "u".to_string(),
            active,
            succeeded,
            failed,
            condition,
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
            created_at: None,
        }
    }

    fn pod(phase: PodPhase) -> PodView {
        PodView {
            name: "run-1-0".to_string(),
            phase,
            labels: BTreeMap::new(),
            created_at: None,
        }
    }

    async fn submit(ctx: &Arc<NodeContext>, run_id: u64) {
        let request = RunRequest::new(RunId::new(run_id), TaskId::new(run_id + 100), "allowed/a");
        let plan = ctx
            .planner
            .plan(request.run_id, &DatasetCatalog::default())
            .unwrap();
        JobSubmitter::new(Arc::clone(ctx))
            .submit(&request, &plan, &DatasetCatalog::default())
            .await
            .unwrap();
    }

    fn write_artifact(ctx: &NodeContext, run_id: u64, bytes: &[u8]) {
        let path = ctx.local_layout.artifact_file(RunId::new(run_id), "result");
        std::fs::write(path, bytes).unwrap();
    }

    #[test]
    fn test_classify() {
        let running = pod(PodPhase::Running);
        let unknown = pod(PodPhase::Unknown);

        assert_eq!(classify(&job(1, 0, 0, None), &[&running], 3), None);
        assert_eq!(
            classify(&job(0, 1, 0, Some(JobCondition::Complete)), &[], 3),
            Some(Terminal::Succeeded)
        );
        assert_eq!(classify(&job(0, 1, 0, None), &[], 3), Some(Terminal::Succeeded));
        // One failed attempt with budget left is not terminal.
        assert_eq!(classify(&job(1, 0, 1, None), &[&running], 3), None);
        assert_eq!(classify(&job(0, 0, 4, None), &[], 3), Some(Terminal::Failed));
        assert_eq!(
            classify(&job(0, 0, 1, Some(JobCondition::Failed)), &[], 3),
            Some(Terminal::Failed)
        );
        assert_eq!(classify(&job(1, 0, 0, None), &[&unknown], 3), Some(Terminal::Unknown));
        assert_eq!(classify(&job(1, 0, 0, None), &[], 3), None);
    }

    #[tokio::test]
    async fn test_nothing_terminal() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(FakeCluster::new(), dir.path());
        submit(&ctx, 1).await;

        let reaper = CompletionReaper::new(Arc::clone(&ctx));
        assert!(reaper.reap_next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_logs_of_every_attempt_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let cluster = FakeCluster::new();
        let ctx = context(cluster.clone(), dir.path());
        submit(&ctx, 2).await;

        cluster.set_pod_log("run-2-0", "attempt one failed");
        cluster.fail_attempt("run-2");
        cluster.set_pod_log("run-2-1", "attempt two ok\n");
        cluster.complete_job("run-2");
        write_artifact(&ctx, 2, b"42");

        let reaper = CompletionReaper::new(Arc::clone(&ctx));
        let result = reaper.reap_next().await.unwrap().unwrap();

        assert_eq!(result.run_id, RunId::new(2));
        assert_eq!(result.task_id, TaskId::new(102));
        assert_eq!(result.parent_id, None);
        assert_eq!(result.status, TaskStatus::Completed);
        assert_eq!(result.data, b"42");
        let first = result.logs.find("attempt one failed").unwrap();
        let second = result.logs.find("attempt two ok").unwrap();
        assert!(first < second);
        assert!(result.logs.contains("===== pod run-2-0 (job run-2) ====="));

        assert!(cluster.job("run-2").is_none());
        assert!(cluster.live_pods().is_empty());
    }

    #[tokio::test]
    async fn test_oldest_terminal_job_first() {
        let dir = tempfile::tempdir().unwrap();
        let cluster = FakeCluster::new();
        let ctx = context(cluster.clone(), dir.path());
        submit(&ctx, 30).await;
        submit(&ctx, 4).await;

        cluster.complete_job("run-4");
        cluster.complete_job("run-30");
        write_artifact(&ctx, 4, b"b");
        write_artifact(&ctx, 30, b"a");

        let reaper = CompletionReaper::new(Arc::clone(&ctx));
        let first = reaper.reap_next().await.unwrap().unwrap();
        let second = reaper.reap_next().await.unwrap().unwrap();
        assert_eq!(first.run_id, RunId::new(30));
        assert_eq!(second.run_id, RunId::new(4));
    }

    #[tokio::test]
    async fn test_failed_deletion_is_retried_without_second_result() {
        let dir = tempfile::tempdir().unwrap();
        let cluster = FakeCluster::new();
        let ctx = context(cluster.clone(), dir.path());
        submit(&ctx, 5).await;
        cluster.fail_job("run-5");

        cluster.fail_next(Method::DeleteJob, Fault::Unavailable);
        let reaper = CompletionReaper::new(Arc::clone(&ctx));
        let result = reaper.reap_next().await.unwrap().unwrap();
        assert_eq!(result.status, TaskStatus::Crashed);
        assert!(cluster.job("run-5").is_some());

        assert!(reaper.reap_next().await.unwrap().is_none());
        assert!(cluster.job("run-5").is_none());
        assert_eq!(cluster.calls(Method::DeleteJob), 2);
    }

    #[tokio::test]
    async fn test_unreadable_log_does_not_block_later_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let cluster = FakeCluster::new();
        let ctx = context(cluster.clone(), dir.path());
        submit(&ctx, 6).await;
        submit(&ctx, 8).await;
        cluster.fail_job("run-6");
        cluster.set_pod_log("run-8-0", "fine");
        cluster.complete_job("run-8");
        write_artifact(&ctx, 8, b"8");

        let reaper = CompletionReaper::new(Arc::clone(&ctx));
        cluster.fail_next(Method::ReadPodLog, Fault::Api(500));
        let first = reaper.reap_next().await.unwrap().unwrap();
        assert_eq!(first.run_id, RunId::new(6));
        assert_eq!(first.status, TaskStatus::Crashed);
        assert!(first.logs.contains("(log unavailable"));

        let second = reaper.reap_next().await.unwrap().unwrap();
        assert_eq!(second.run_id, RunId::new(8));
        assert_eq!(second.status, TaskStatus::Completed);
        assert_eq!(second.data, b"8");
        assert!(second.logs.contains("fine"));
        assert!(cluster.job_names().is_empty());
    }

    #[tokio::test]
    async fn test_listing_failure_surfaces_and_keeps_job() {
        let dir = tempfile::tempdir().unwrap();
        let cluster = FakeCluster::new();
        let ctx = context(cluster.clone(), dir.path());
        submit(&ctx, 9).await;
        cluster.fail_job("run-9");

        cluster.fail_next(Method::ListPods, Fault::Timeout);
        let reaper = CompletionReaper::new(Arc::clone(&ctx));
        let err = reaper.reap_next().await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(reaper.tombstone_count().await, 0);

        let result = reaper.reap_next().await.unwrap().unwrap();
        assert_eq!(result.run_id, RunId::new(9));
    }

    #[tokio::test]
    async fn test_workspace_removed_after_reap() {
        let dir = tempfile::tempdir().unwrap();
        let cluster = FakeCluster::new();
        let ctx = context(cluster.clone(), dir.path());
        submit(&ctx, 10).await;
        cluster.complete_job("run-10");
        write_artifact(&ctx, 10, b"ok");
        let run_dir = ctx.local_layout.run_dir(RunId::new(10));
        assert!(run_dir.is_dir());

        let reaper = CompletionReaper::new(Arc::clone(&ctx));
        let result = reaper.reap_next().await.unwrap().unwrap();

        assert_eq!(result.data, b"ok");
        assert!(!run_dir.exists());
    }

    #[tokio::test]
    async fn test_permanent_deletion_failure_is_not_retried() {
        let dir = tempfile::tempdir().unwrap();
        let cluster = FakeCluster::new();
        let ctx = context(cluster.clone(), dir.path());
        submit(&ctx, 11).await;
        cluster.fail_job("run-11");

        cluster.fail_next(Method::DeleteJob, Fault::Api(403));
        let reaper = CompletionReaper::new(Arc::clone(&ctx));
        assert!(reaper.reap_next().await.unwrap().is_some());

        for _ in 0..3 {
            assert!(reaper.reap_next().await.unwrap().is_none());
        }
        assert_eq!(cluster.calls(Method::DeleteJob), 1);
        assert!(cluster.job("run-11").is_some());
        assert_eq!(reaper.tombstone_count().await, 1);
    }

    #[tokio::test]
    async fn test_transient_deletion_failures_are_capped() {
        let dir = tempfile::tempdir().unwrap();
        let cluster = FakeCluster::new();
        let ctx = context(cluster.clone(), dir.path());
        submit(&ctx, 12).await;
        cluster.fail_job("run-12");

        for _ in 0..MAX_DELETE_ATTEMPTS + 2 {
            cluster.fail_next(Method::DeleteJob, Fault::Unavailable);
        }
        let reaper = CompletionReaper::new(Arc::clone(&ctx));
        assert!(reaper.reap_next().await.unwrap().is_some());
        for _ in 0..MAX_DELETE_ATTEMPTS + 2 {
            assert!(reaper.reap_next().await.unwrap().is_none());
        }

        assert_eq!(cluster.calls(Method::DeleteJob), MAX_DELETE_ATTEMPTS as usize);
    }

    #[tokio::test]
    async fn test_tombstone_pruned_once_job_is_gone() {
        let dir = tempfile::tempdir().unwrap();
        let cluster = FakeCluster::new();
        let config = crate::testing::config(dir.path()).with_tombstone_retention(Duration::ZERO);
        let ctx = crate::testing::context_with(cluster.clone(), config);
        submit(&ctx, 13).await;
        cluster.complete_job("run-13");
        write_artifact(&ctx, 13, b"x");

        let reaper = CompletionReaper::new(Arc::clone(&ctx));
        assert!(reaper.reap_next().await.unwrap().is_some());
        assert_eq!(reaper.tombstone_count().await, 1);

        assert!(reaper.reap_next().await.unwrap().is_none());
        assert_eq!(reaper.tombstone_count().await, 0);
    }

    #[tokio::test]
    async fn test_tombstone_kept_while_job_still_listed() {
        let dir = tempfile::tempdir().unwrap();
        let cluster = FakeCluster::new().with_stale_listings();
        let config = crate::testing::config(dir.path()).with_tombstone_retention(Duration::ZERO);
        let ctx = crate::testing::context_with(cluster.clone(), config);
        submit(&ctx, 14).await;
        cluster.fail_job("run-14");

        let reaper = CompletionReaper::new(Arc::clone(&ctx));
        assert!(reaper.reap_next().await.unwrap().is_some());
        for _ in 0..3 {
            assert!(reaper.reap_next().await.unwrap().is_none());
        }
        assert_eq!(reaper.tombstone_count().await, 1);
    }

    #[tokio::test]
    async fn test_poll_waits_for_completion() {
        let dir = tempfile::tempdir().unwrap();
        let cluster = FakeCluster::new();
        let ctx = context(cluster.clone(), dir.path());
        submit(&ctx, 7).await;
        write_artifact(&ctx, 7, b"done");

        let completer = cluster.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            completer.complete_job("run-7");
        });

        let reaper = CompletionReaper::new(Arc::clone(&ctx));
        let result = tokio::time::timeout(Duration::from_secs(5), reaper.poll_next_completion())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result.status, TaskStatus::Completed);
        assert!(cluster.calls(Method::ListJobs) >= 2);
    }
}
