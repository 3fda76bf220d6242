//! Executor-side views and descriptors.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Label the executor puts on every pod spawned by a job.
pub const JOB_NAME_LABEL: &str = "job-name";

/// Equality-based label selector, rendered as `k1=v1,k2=v2`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct LabelSelector {
    terms: BTreeMap<String, String>,
}

impl LabelSelector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method to require `key=value`.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.terms.insert(key.into(), value.into());
        self
    }

    /// Returns true if every term is present in `labels`.
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.terms
            .iter()
            .all(|(k, v)| labels.get(k).map(|l| l == v).unwrap_or(false))
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }
}

impl fmt::Display for LabelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (k, v) in &self.terms {
            if !first {
                f.write_str(",")?;
            }
            write!(f, "{}={}", k, v)?;
            first = false;
        }
        Ok(())
    }
}

/// Lifecycle phase of a pod as reported by the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl PodPhase {
    /// Parse the executor's phase string. Anything unrecognised is `Unknown`.
    pub fn parse(phase: &str) -> Self {
        match phase {
            "Pending" => Self::Pending,
            "Running" => Self::Running,
            "Succeeded" => Self::Succeeded,
            "Failed" => Self::Failed,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Running => "Running",
            Self::Succeeded => "Succeeded",
            Self::Failed => "Failed",
            Self::Unknown => "Unknown",
        }
    }

    /// Returns true if the pod will not change phase again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Unknown)
    }
}

impl fmt::Display for PodPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of a pod.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodView {
    pub name: String,
    pub phase: PodPhase,
    pub labels: BTreeMap<String, String>,
    pub created_at: Option<DateTime<Utc>>,
}

impl PodView {
    /// Name of the job that spawned this pod, if any.
    pub fn job_name(&self) -> Option<&str> {
        self.labels.get(JOB_NAME_LABEL).map(String::as_str)
    }
}

/// A pod was first seen, or changed phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodPhaseEvent {
    pub pod_name: String,
    pub phase: PodPhase,
}

/// Terminal condition the executor attached to a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobCondition {
    /// All required pods succeeded.
    Complete,
    /// The retry budget is exhausted (or the deadline passed).
    Failed,
}

/// Snapshot of a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobView {
    pub name: String,
    /// Executor-assigned identity; differs between two jobs that reuse a name.
    pub uid: String,
    pub active: u32,
    pub succeeded: u32,
    pub failed: u32,
    pub condition: Option<JobCondition>,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    pub created_at: Option<DateTime<Utc>>,
}

/// Restart policy of the job's pod template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartPolicy {
    Never,
    OnFailure,
}

impl RestartPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Never => "Never",
            Self::OnFailure => "OnFailure",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvVar {
    pub name: String,
    pub value: String,
}

impl EnvVar {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Host directory or file exposed as a volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostPathVolume {
    pub name: String,
    pub host_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeMountSpec {
    pub name: String,
    pub mount_path: String,
    pub read_only: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub command: Vec<String>,
    pub args: Vec<String>,
    pub env: Vec<EnvVar>,
    pub volume_mounts: Vec<VolumeMountSpec>,
}

/// Everything needed to create a single-container batch job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobDescriptor {
    pub name: String,
    /// Applied to the job and to its pod template.
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    pub container: ContainerSpec,
    pub volumes: Vec<HostPathVolume>,
    pub restart_policy: RestartPolicy,
    /// Retries the executor may make before marking the job failed.
    pub backoff_limit: u32,
}

/// Outcome of a job creation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    /// A job with this name already exists. Not an error.
    AlreadyExists,
}

/// Outcome of a delete request. Deleting something already gone is fine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    AlreadyGone,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selector_rendering_is_sorted() {
        let selector = LabelSelector::new()
            .with("run-id", "7")
            .with("app.kubernetes.io/managed-by", "jobnode");
        assert_eq!(
            selector.to_string(),
            "app.kubernetes.io/managed-by=jobnode,run-id=7"
        );
    }

    #[test]
    fn test_selector_matches() {
        let mut labels = BTreeMap::new();
        labels.insert("run-id".to_string(), "7".to_string());
        labels.insert("job-name".to_string(), "run-7".to_string());

        assert!(LabelSelector::new().with("run-id", "7").matches(&labels));
        assert!(!LabelSelector::new().with("run-id", "8").matches(&labels));
        assert!(LabelSelector::new().matches(&labels));
    }

    #[test]
    fn test_phase_parse() {
        assert_eq!(PodPhase::parse("Running"), PodPhase::Running);
        assert_eq!(PodPhase::parse("Evicted"), PodPhase::Unknown);
        assert!(PodPhase::Failed.is_terminal());
        assert!(!PodPhase::Pending.is_terminal());
    }
}
