//! Job Submitter: turns a run request into a batch job.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use jobnode_core::{
    DatasetCatalog, Mount, RunId, RunRequest, VolumeMountPlan, INPUT_FILE_MOUNT_PATH,
    OUTPUT_MOUNT_PATH, TMP_MOUNT_PATH, TOKEN_MOUNT_PATH,
};
use jobnode_kube::{
    ContainerSpec, CreateOutcome, EnvVar, ExecutorError, HostPathVolume, JobDescriptor,
    RestartPolicy, VolumeMountSpec,
};
use thiserror::Error;
use tracing::{debug, info};

use crate::context::{
    NodeContext, MANAGED_BY_LABEL, MANAGED_BY_VALUE, RUN_ID_ANNOTATION, RUN_ID_LABEL,
    TASK_ID_ANNOTATION, TASK_PARENT_ID_ANNOTATION,
};
use crate::probe::RunRegistryProbe;
use crate::retry::Transient;

/// Name of the single container in every job.
pub const CONTAINER_NAME: &str = "algorithm";

/// Submission errors.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("Image not allowed by policy: {image}")]
    SubmissionRejected { image: String },

    #[error("Run {0} already has a job")]
    AlreadyRunning(RunId),

    #[error("Failed to prepare run workspace at {path}: {source}")]
    Workspace {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Executor(#[from] ExecutorError),
}

impl Transient for SubmitError {
    fn is_transient(&self) -> bool {
        match self {
            Self::Executor(e) => e.is_transient(),
            _ => false,
        }
    }
}

/// A job the executor accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    pub run_id: RunId,
    pub job_name: String,
}

/// Builds and submits job descriptors.
pub struct JobSubmitter {
    ctx: Arc<NodeContext>,
    probe: RunRegistryProbe,
}

impl JobSubmitter {
    pub fn new(ctx: Arc<NodeContext>) -> Self {
        Self {
            probe: RunRegistryProbe::new(Arc::clone(&ctx)),
            ctx,
        }
    }

    /// Submit a run.
    ///
    /// `datasets` is the catalog already restricted to the run's requested
    /// labels; `plan` was made from it.
    pub async fn submit(
        &self,
        request: &RunRequest,
        plan: &VolumeMountPlan,
        datasets: &DatasetCatalog,
    ) -> Result<JobHandle, SubmitError> {
        if !self.ctx.policy.is_allowed(&request.image) {
            return Err(SubmitError::SubmissionRejected {
                image: request.image.clone(),
            });
        }

        if self.probe.is_running(request.run_id).await? {
            return Err(SubmitError::AlreadyRunning(request.run_id));
        }

        self.prepare_workspace(request).await?;

        let descriptor = self.build_descriptor(request, plan, datasets);
        match self
            .ctx
            .executor
            .create_job(self.ctx.namespace(), &descriptor)
            .await?
        {
            CreateOutcome::Created => {
                info!(
                    run_id = %request.run_id,
                    task_id = %request.task_id,
                    job = %descriptor.name,
                    image = %request.image,
                    "Job submitted"
                );
                Ok(JobHandle {
                    run_id: request.run_id,
                    job_name: descriptor.name,
                })
            }
            CreateOutcome::AlreadyExists => Err(SubmitError::AlreadyRunning(request.run_id)),
        }
    }

    /// Create the run's output and tmp directories and write its token and
    /// input payload.
    ///
    /// An artifact already in the output directory is left alone: it may
    /// belong to a job of this run the registry did not list yet. Reaping
    /// removes the whole run directory.
    pub async fn prepare_workspace(&self, request: &RunRequest) -> Result<(), SubmitError> {
        let layout = &self.ctx.local_layout;
        let run_id = request.run_id;

        for dir in [layout.output_dir(run_id), layout.tmp_dir(run_id)] {
            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(|source| SubmitError::Workspace { path: dir, source })?;
        }

        let files = [
            (layout.token_file(run_id), request.token.expose().as_bytes()),
            (layout.input_file(run_id), request.input.as_slice()),
        ];
        for (path, contents) in files {
            tokio::fs::write(&path, contents)
                .await
                .map_err(|source| SubmitError::Workspace { path, source })?;
        }

        debug!(run_id = %run_id, input_bytes = request.input.len(), "Run workspace prepared");
        Ok(())
    }

    /// Build the job descriptor. Pure.
    pub fn build_descriptor(
        &self,
        request: &RunRequest,
        plan: &VolumeMountPlan,
        datasets: &DatasetCatalog,
    ) -> JobDescriptor {
        let config = &self.ctx.config;
        let run_id = request.run_id.to_string();

        let mut labels = BTreeMap::new();
        labels.insert(MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string());
        labels.insert(RUN_ID_LABEL.to_string(), run_id.clone());

        let mut annotations = BTreeMap::new();
        annotations.insert(RUN_ID_ANNOTATION.to_string(), run_id);
        annotations.insert(TASK_ID_ANNOTATION.to_string(), request.task_id.to_string());
        annotations.insert(
            TASK_PARENT_ID_ANNOTATION.to_string(),
            request
                .parent_id
                .map(|p| p.to_string())
                .unwrap_or_default(),
        );

        let mounts: Vec<&Mount> = plan.mounts().collect();
        let volumes = mounts
            .iter()
            .map(|m| HostPathVolume {
                name: m.name.clone(),
                host_path: m.source_path.clone(),
            })
            .collect();
        let volume_mounts = mounts
            .iter()
            .map(|m| VolumeMountSpec {
                name: m.name.clone(),
                mount_path: m.mount_path.clone(),
                read_only: m.read_only,
            })
            .collect();

        JobDescriptor {
            name: request.run_id.job_name(),
            labels,
            annotations,
            container: ContainerSpec {
                name: CONTAINER_NAME.to_string(),
                image: request.image.clone(),
                command: config.entrypoint.clone(),
                args: request.task_info.values().map(str::to_string).collect(),
                env: self.environment(plan, datasets),
                volume_mounts,
            },
            volumes,
            restart_policy: RestartPolicy::Never,
            backoff_limit: config.backoff_limit,
        }
    }

    fn environment(&self, plan: &VolumeMountPlan, datasets: &DatasetCatalog) -> Vec<EnvVar> {
        let mut env = vec![
            EnvVar::new(
                "OUTPUT_FILE",
                format!("{}/{}", OUTPUT_MOUNT_PATH, self.ctx.config.artifact_name),
            ),
            EnvVar::new("TEMPORARY_FOLDER", TMP_MOUNT_PATH),
            EnvVar::new("TOKEN_FILE", TOKEN_MOUNT_PATH),
            EnvVar::new("INPUT_FILE", INPUT_FILE_MOUNT_PATH),
            EnvVar::new("HOST", self.ctx.config.proxy.host.as_str()),
            EnvVar::new("PORT", self.ctx.config.proxy.port.to_string()),
            EnvVar::new("API_PATH", self.ctx.config.proxy.api_path.as_str()),
        ];

        let labels: Vec<&str> = datasets.entries().iter().map(|e| e.label.as_str()).collect();
        env.push(EnvVar::new("USER_REQUESTED_DATABASE_LABELS", labels.join(",")));

        for entry in datasets.entries() {
            // Mounted datasets are addressed by their path in the container.
            let uri = plan
                .inputs
                .iter()
                .find(|i| i.label == entry.label)
                .map(|i| i.mount.mount_path.clone())
                .unwrap_or_else(|| entry.uri.clone());
            let prefix = env_prefix(&entry.label);
            env.push(EnvVar::new(format!("{}_DATABASE_URI", prefix), uri));
            env.push(EnvVar::new(
                format!("{}_DATABASE_TYPE", prefix),
                entry.kind.as_str(),
            ));
        }

        env
    }
}

/// `cohort.v2-a` becomes `COHORT_V2_A`.
fn env_prefix(label: &str) -> String {
    label
        .chars()
        .map(|c| match c {
            '.' | '-' => '_',
            c => c.to_ascii_uppercase(),
        })
        .collect()
}
