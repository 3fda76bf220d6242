//! The capability surface the node consumes from the cluster executor.

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::ExecutorError;
use crate::types::{CreateOutcome, DeleteOutcome, JobDescriptor, JobView, LabelSelector, PodView};
use crate::watch::PodWatch;

/// A batch orchestration backend.
///
/// Implementations must make both delete operations idempotent: removing
/// an object that is already gone returns [`DeleteOutcome::AlreadyGone`].
#[async_trait]
pub trait ClusterExecutor: Send + Sync {
    /// Submit a job. Returns once the executor has accepted it, not once a
    /// pod is scheduled.
    async fn create_job(
        &self,
        namespace: &str,
        descriptor: &JobDescriptor,
    ) -> Result<CreateOutcome, ExecutorError>;

    /// List pods matching `selector`.
    async fn list_pods(
        &self,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Result<Vec<PodView>, ExecutorError>;

    /// Subscribe to pod phase changes for `selector`.
    ///
    /// The subscription ends after `timeout`, when `cancel` fires, or when
    /// the returned [`PodWatch`] is dropped.
    async fn watch_pods(
        &self,
        namespace: &str,
        selector: &LabelSelector,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> Result<PodWatch, ExecutorError>;

    /// List jobs, optionally restricted to `selector`.
    async fn list_jobs(
        &self,
        namespace: &str,
        selector: Option<&LabelSelector>,
    ) -> Result<Vec<JobView>, ExecutorError>;

    /// Read the full log of a pod.
    async fn read_pod_log(&self, namespace: &str, pod_name: &str)
        -> Result<Vec<u8>, ExecutorError>;

    async fn delete_job(&self, namespace: &str, name: &str)
        -> Result<DeleteOutcome, ExecutorError>;

    async fn delete_pod(&self, namespace: &str, name: &str)
        -> Result<DeleteOutcome, ExecutorError>;
}
