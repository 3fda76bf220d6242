//! Kubernetes wire objects.
//!
//! Only the fields the node reads or writes are modelled. Everything else
//! in an API response is ignored on decode.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::types::{JobCondition, JobDescriptor, JobView, PodPhase, PodView};

/// `items` of a list response.
#[derive(Debug, Deserialize)]
pub(crate) struct ObjectList<T> {
    #[serde(default = "Vec::new")]
    pub items: Vec<T>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ObjectMeta {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub uid: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    pub creation_timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Pod {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub status: PodStatus,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct PodStatus {
    pub phase: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Job {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub status: JobStatus,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct JobStatus {
    #[serde(default)]
    pub active: u32,
    #[serde(default)]
    pub succeeded: u32,
    #[serde(default)]
    pub failed: u32,
    #[serde(default)]
    pub conditions: Vec<JobStatusCondition>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct JobStatusCondition {
    #[serde(rename = "type")]
    pub kind: String,
    pub status: String,
}

/// Error body returned with non-2xx responses.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct Status {
    #[serde(default)]
    pub message: String,
}

/// Options for a background delete, which cascades to dependents.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DeleteOptions {
    pub kind: &'static str,
    pub api_version: &'static str,
    pub propagation_policy: &'static str,
}

impl DeleteOptions {
    pub fn background() -> Self {
        Self {
            kind: "DeleteOptions",
            api_version: "v1",
            propagation_policy: "Background",
        }
    }
}

impl From<Pod> for PodView {
    fn from(pod: Pod) -> Self {
        Self {
            name: pod.metadata.name,
            phase: pod
                .status
                .phase
                .as_deref()
                .map(PodPhase::parse)
                .unwrap_or(PodPhase::Pending),
            labels: pod.metadata.labels,
            created_at: pod.metadata.creation_timestamp,
        }
    }
}

impl From<Job> for JobView {
    fn from(job: Job) -> Self {
        let condition = job
            .status
            .conditions
            .iter()
            .filter(|c| c.status == "True")
            .find_map(|c| match c.kind.as_str() {
                "Complete" => Some(JobCondition::Complete),
                "Failed" => Some(JobCondition::Failed),
                _ => None,
            });

        Self {
            name: job.metadata.name,
            uid: job.metadata.uid,
            active: job.status.active,
            succeeded: job.status.succeeded,
            failed: job.status.failed,
            condition,
            labels: job.metadata.labels,
            annotations: job.metadata.annotations,
            created_at: job.metadata.creation_timestamp,
        }
    }
}

/// Render a `batch/v1` Job manifest.
pub(crate) fn job_manifest(descriptor: &JobDescriptor) -> Value {
    let container = &descriptor.container;

    let env: Vec<Value> = container
        .env
        .iter()
        .map(|e| json!({ "name": e.name, "value": e.value }))
        .collect();
    let mounts: Vec<Value> = container
        .volume_mounts
        .iter()
        .map(|m| json!({ "name": m.name, "mountPath": m.mount_path, "readOnly": m.read_only }))
        .collect();
    let volumes: Vec<Value> = descriptor
        .volumes
        .iter()
        .map(|v| json!({ "name": v.name, "hostPath": { "path": v.host_path } }))
        .collect();

    json!({
        "apiVersion": "batch/v1",
        "kind": "Job",
        "metadata": {
            "name": descriptor.name,
            "labels": descriptor.labels,
            "annotations": descriptor.annotations,
        },
        "spec": {
            "backoffLimit": descriptor.backoff_limit,
            "template": {
                "metadata": {
                    "labels": descriptor.labels,
                    "annotations": descriptor.annotations,
                },
                "spec": {
                    "restartPolicy": descriptor.restart_policy.as_str(),
                    "containers": [{
                        "name": container.name,
                        "image": container.image,
                        "command": container.command,
                        "args": container.args,
                        "env": env,
                        "volumeMounts": mounts,
                    }],
                    "volumes": volumes,
                },
            },
        },
    })
}
