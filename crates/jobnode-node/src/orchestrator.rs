//! Orchestration facade.
//!
//! `submit` runs the policy check, dataset selection, mount planning,
//! submission and a bounded startup wait, and always answers with a
//! [`TaskStatus`] or a typed error. Results are drained separately, either
//! by pulling with [`Orchestrator::poll_next_completion`] or by spawning a
//! push feed with [`Orchestrator::spawn_completion_feed`]. Results that
//! could not be handed on are given back with [`Orchestrator::requeue`] and
//! come out again before anything newly reaped.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;

use jobnode_core::{CoreError, RunId, RunRequest, RunResult, TaskStatus};
use jobnode_kube::{DeleteOutcome, ExecutorError};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::context::NodeContext;
use crate::lock::KeyedMutex;
use crate::reaper::{CompletionReaper, ReapError};
use crate::retry::Transient;
use crate::submitter::{JobSubmitter, SubmitError};
use crate::watcher::StartupWatcher;

/// Errors surfaced by [`Orchestrator::submit`] and [`Orchestrator::abandon`].
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// The request itself is unusable. Nothing reached the executor.
    #[error("Invalid request: {0}")]
    InvalidRequest(#[from] CoreError),

    #[error("Failed to prepare run workspace at {path}: {source}")]
    Workspace {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The executor failed permanently, or kept failing past the retry budget.
    #[error(transparent)]
    Executor(#[from] ExecutorError),
}

/// The node's orchestration core.
pub struct Orchestrator {
    ctx: Arc<NodeContext>,
    submitter: JobSubmitter,
    watcher: StartupWatcher,
    reaper: CompletionReaper,
    runs: KeyedMutex<RunId>,
    /// Results reaped but not yet taken by a consumer.
    redelivery: Mutex<VecDeque<RunResult>>,
}

impl Orchestrator {
    pub fn new(ctx: Arc<NodeContext>) -> Self {
        Self {
            submitter: JobSubmitter::new(Arc::clone(&ctx)),
            watcher: StartupWatcher::new(Arc::clone(&ctx)),
            reaper: CompletionReaper::new(Arc::clone(&ctx)),
            runs: KeyedMutex::new(),
            redelivery: Mutex::new(VecDeque::new()),
            ctx,
        }
    }

    pub fn context(&self) -> &Arc<NodeContext> {
        &self.ctx
    }

    /// Submit a run and wait, at most the startup timeout, for it to start.
    pub async fn submit(&self, request: &RunRequest) -> Result<TaskStatus, OrchestratorError> {
        let status = self.submit_inner(request).await?;
        self.ctx.metrics.record_submission(status);
        Ok(status)
    }

    async fn submit_inner(&self, request: &RunRequest) -> Result<TaskStatus, OrchestratorError> {
        let run_id = request.run_id;
        let _guard = self.runs.lock(run_id).await;

        if !self.ctx.policy.is_allowed(&request.image) {
            info!(run_id = %run_id, image = %request.image, "Image not allowed, run rejected");
            return Ok(TaskStatus::NotAllowed);
        }

        let datasets = self.ctx.config.databases.select(&request.databases_to_use)?;
        let plan = self.ctx.planner.plan(run_id, &datasets)?;

        let submitted = self
            .ctx
            .retry
            .run("submit", || self.submitter.submit(request, &plan, &datasets))
            .await;

        match submitted {
            Ok(_) => {}
            Err(SubmitError::AlreadyRunning(_)) => {
                info!(run_id = %run_id, "Run already has a job, treating as active");
                return Ok(TaskStatus::Active);
            }
            Err(SubmitError::SubmissionRejected { image }) => {
                info!(run_id = %run_id, image = %image, "Image not allowed, run rejected");
                return Ok(TaskStatus::NotAllowed);
            }
            Err(SubmitError::Workspace { path, source }) => {
                error!(run_id = %run_id, path = %path.display(), error = %source, "Failed to prepare run workspace");
                return Err(OrchestratorError::Workspace { path, source });
            }
            Err(SubmitError::Executor(e)) => {
                self.ctx.metrics.record_executor_error();
                error!(run_id = %run_id, error = %e, "Submission failed");
                return Err(e.into());
            }
        }

        match self
            .watcher
            .await_running(run_id, self.ctx.config.startup_timeout())
            .await
        {
            Ok(status) => Ok(status),
            Err(e) => {
                // The job was accepted; only its startup could not be observed.
                error!(run_id = %run_id, error = %e, "Lost track of run during startup");
                Ok(TaskStatus::UnknownError)
            }
        }
    }

    /// Wait for the next finished run. No ordering across runs is implied.
    pub async fn poll_next_completion(&self) -> Result<RunResult, ReapError> {
        if let Some(result) = self.take_requeued() {
            return Ok(result);
        }
        self.reaper.poll_next_completion().await
    }

    /// Hand a result back for delivery. Requeued results come out first,
    /// in the order they were requeued.
    pub fn requeue(&self, result: RunResult) {
        debug!(run_id = %result.run_id, "Result requeued");
        self.redelivery.lock().push_back(result);
    }

    fn take_requeued(&self) -> Option<RunResult> {
        self.redelivery.lock().pop_front()
    }

    /// Drain results on a background task into a channel.
    ///
    /// A slot in the channel is reserved before each scan and a scan is
    /// never interrupted, so every reaped result ends up in the channel.
    /// Whatever is still buffered when the feed stops can be drained from
    /// the receiver. Executor failures are retried with the context's
    /// backoff. The feed stops when `cancel` fires or the receiver is
    /// dropped.
    pub fn spawn_completion_feed(
        self: Arc<Self>,
        cancel: CancellationToken,
    ) -> (mpsc::Receiver<RunResult>, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(16);

        let handle = tokio::spawn(async move {
            let mut failures = 0u32;
            loop {
                let permit = tokio::select! {
                    _ = cancel.cancelled() => break,
                    permit = tx.reserve() => match permit {
                        Ok(permit) => permit,
                        Err(_) => break,
                    },
                };

                if let Some(result) = self.take_requeued() {
                    permit.send(result);
                    continue;
                }

                let delay = match self.reaper.reap_next().await {
                    Ok(Some(result)) => {
                        failures = 0;
                        permit.send(result);
                        continue;
                    }
                    Ok(None) => {
                        failures = 0;
                        self.ctx.config.poll_interval()
                    }
                    Err(e) => {
                        failures = failures.saturating_add(1);
                        if e.is_transient() && failures < self.ctx.retry.max_attempts {
                            warn!(error = %e, attempt = failures, "Completion scan failed, retrying");
                        } else {
                            error!(error = %e, attempt = failures, "Completion scan keeps failing");
                        }
                        self.ctx.retry.backoff(failures)
                    }
                };
                drop(permit);

                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            info!("Completion feed stopped");
        });

        (rx, handle)
    }

    /// Delete every job and pod of a run without producing a result.
    ///
    /// Returns true if anything was deleted.
    pub async fn abandon(&self, run_id: RunId) -> Result<bool, OrchestratorError> {
        let _guard = self.runs.lock(run_id).await;
        let namespace = self.ctx.namespace();
        let selector = self.ctx.run_selector(run_id);
        let executor = &self.ctx.executor;

        let mut deleted = false;
        for job in executor.list_jobs(namespace, Some(&selector)).await? {
            deleted |= executor.delete_job(namespace, &job.name).await? == DeleteOutcome::Deleted;
        }
        for pod in executor.list_pods(namespace, &selector).await? {
            deleted |= executor.delete_pod(namespace, &pod.name).await? == DeleteOutcome::Deleted;
        }

        info!(run_id = %run_id, deleted, "Run abandoned");
        Ok(deleted)
    }
}
