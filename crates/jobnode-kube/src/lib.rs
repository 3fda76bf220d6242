//! Cluster executor contract for jobnode.
//!
//! The node only needs a narrow slice of a batch orchestration API: create a
//! job, list and watch pods, list jobs, read pod logs, delete jobs and pods.
//! [`ClusterExecutor`] captures that slice; [`KubeClient`] implements it over
//! the Kubernetes REST API.
//!
//! # Example
//!
//! ```rust,no_run
//! use jobnode_kube::{ClusterExecutor, KubeClient, KubeConfig, LabelSelector};
//!
//! async fn running_pods() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = KubeClient::new(KubeConfig::new("https://127.0.0.1:6443"))?;
//!     let selector = LabelSelector::new().with("run-id", "1001");
//!
//!     for pod in client.list_pods("jobnode", &selector).await? {
//!         println!("{} {}", pod.name, pod.phase);
//!     }
//!     Ok(())
//! }
//! ```

mod client;
mod error;
mod executor;
mod protocol;
mod types;
mod watch;

// Re-export main types
pub use client::{KubeClient, KubeConfig};
pub use error::ExecutorError;
pub use executor::ClusterExecutor;
pub use types::{
    ContainerSpec, CreateOutcome, DeleteOutcome, EnvVar, HostPathVolume, JobCondition,
    JobDescriptor, JobView, LabelSelector, PodPhase, PodPhaseEvent, PodView, RestartPolicy,
    VolumeMountSpec, JOB_NAME_LABEL,
};
pub use watch::{spawn_polling_watch, PodWatch};
