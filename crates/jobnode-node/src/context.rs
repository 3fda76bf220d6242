//! Orchestration context, built once at startup and read-only afterwards.

use std::sync::Arc;

use jobnode_core::{RunId, RunLayout, VolumePlanner};
use jobnode_kube::{ClusterExecutor, LabelSelector};
use tracing::info;

use crate::config::{ConfigError, NodeConfig};
use crate::metrics::Metrics;
use crate::policy::PolicyGate;
use crate::retry::RetryPolicy;

/// Label carrying the run id on jobs and pods.
pub const RUN_ID_LABEL: &str = "run-id";
/// Label marking objects owned by a node.
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const MANAGED_BY_VALUE: &str = "jobnode";

/// Annotations carried on every job.
pub const RUN_ID_ANNOTATION: &str = "run-id";
pub const TASK_ID_ANNOTATION: &str = "task-id";
pub const TASK_PARENT_ID_ANNOTATION: &str = "task-parent-id";

/// Everything the orchestration components share.
pub struct NodeContext {
    pub config: NodeConfig,
    pub executor: Arc<dyn ClusterExecutor>,
    pub policy: PolicyGate,
    /// Plans mounts against the executor host's task directory.
    pub planner: VolumePlanner,
    /// The same layout as this process sees it.
    pub local_layout: RunLayout,
    pub retry: RetryPolicy,
    pub metrics: Metrics,
}

impl NodeContext {
    /// Validate `config` and build the context.
    pub fn new(
        config: NodeConfig,
        executor: Arc<dyn ClusterExecutor>,
    ) -> Result<Arc<Self>, ConfigError> {
        config.validate()?;
        let policy = PolicyGate::new(&config.policies.allowed_algorithms)?;

        info!(
            namespace = %config.namespace,
            task_dir = %config.task_dir.display(),
            datasets = config.databases.entries().len(),
            allowed_patterns = config.policies.allowed_algorithms.len(),
            backoff_limit = config.backoff_limit,
            "Node context initialized"
        );

        Ok(Arc::new(Self {
            planner: VolumePlanner::new(config.task_dir.clone()),
            local_layout: RunLayout::new(config.local_task_dir().to_path_buf()),
            retry: config.retry_policy(),
            metrics: Metrics::new(),
            policy,
            executor,
            config,
        }))
    }

    pub fn namespace(&self) -> &str {
        &self.config.namespace
    }

    /// Selects every object this node manages.
    pub fn managed_selector(&self) -> LabelSelector {
        LabelSelector::new().with(MANAGED_BY_LABEL, MANAGED_BY_VALUE)
    }

    /// Selects the objects of one run.
    pub fn run_selector(&self, run_id: RunId) -> LabelSelector {
        self.managed_selector()
            .with(RUN_ID_LABEL, run_id.to_string())
    }
}
