//! Storage layout of a run and the mounts its job needs.
//!
//! Paths inside the algorithm container are fixed by convention:
//!
//! | mount  | container path                 | access     |
//! |--------|--------------------------------|------------|
//! | output | `/app/output`                  | read-write |
//! | tmp    | `/app/tmp`                     | read-write |
//! | token  | `/app/token`                   | read-only  |
//! | input file | `/app/input_file`          | read-only  |
//! | input  | `/app/input/<kind>/<label>`    | read-only  |

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::dataset::{validate_label, DatasetCatalog, DatasetKind};
use crate::error::CoreError;
use crate::RunId;

pub const OUTPUT_MOUNT_PATH: &str = "/app/output";
pub const TMP_MOUNT_PATH: &str = "/app/tmp";
pub const TOKEN_MOUNT_PATH: &str = "/app/token";
pub const INPUT_MOUNT_ROOT: &str = "/app/input";
pub const INPUT_FILE_MOUNT_PATH: &str = "/app/input_file";

/// Per-run directory layout under a task directory.
///
/// The same layout is used twice: with the host's task directory (what the
/// executor bind-mounts) and with the directory as the node process sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunLayout {
    root: PathBuf,
}

impl RunLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn run_dir(&self, run_id: RunId) -> PathBuf {
        self.root.join(run_id.to_string())
    }

    pub fn output_dir(&self, run_id: RunId) -> PathBuf {
        self.run_dir(run_id).join("output")
    }

    pub fn tmp_dir(&self, run_id: RunId) -> PathBuf {
        self.run_dir(run_id).join("tmp")
    }

    pub fn token_file(&self, run_id: RunId) -> PathBuf {
        self.run_dir(run_id).join("token")
    }

    /// The run's input payload.
    pub fn input_file(&self, run_id: RunId) -> PathBuf {
        self.run_dir(run_id).join("input")
    }

    /// Where the algorithm leaves its result: `output/<artifact_name>`.
    pub fn artifact_file(&self, run_id: RunId, artifact_name: &str) -> PathBuf {
        self.output_dir(run_id).join(artifact_name)
    }
}

/// A single bind mount into the algorithm container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    /// Volume name, unique within the job.
    pub name: String,
    /// Path on the executor host.
    pub source_path: String,
    /// Path inside the container.
    pub mount_path: String,
    pub read_only: bool,
}

/// A read-only dataset mount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputMount {
    pub label: String,
    pub kind: DatasetKind,
    pub mount: Mount,
}

/// Every mount a run's job needs. Derived, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeMountPlan {
    pub output: Mount,
    pub tmp: Mount,
    pub token: Mount,
    pub input_file: Mount,
    pub inputs: Vec<InputMount>,
}

impl VolumeMountPlan {
    /// All mounts in a stable order: output, tmp, token, input file, then
    /// datasets.
    pub fn mounts(&self) -> impl Iterator<Item = &Mount> {
        [&self.output, &self.tmp, &self.token, &self.input_file]
            .into_iter()
            .chain(self.inputs.iter().map(|i| &i.mount))
    }
}

/// Maps a run and a dataset catalog to the mounts the run needs.
#[derive(Debug, Clone)]
pub struct VolumePlanner {
    host_layout: RunLayout,
}

impl VolumePlanner {
    /// Create a planner for the executor host's task directory.
    pub fn new(host_task_dir: impl Into<PathBuf>) -> Self {
        Self {
            host_layout: RunLayout::new(host_task_dir),
        }
    }

    pub fn host_layout(&self) -> &RunLayout {
        &self.host_layout
    }

    /// Plan the mounts for `run_id`.
    ///
    /// Pure and deterministic. Every label in the catalog is checked before
    /// anything is produced, so a bad label never reaches the executor.
    pub fn plan(
        &self,
        run_id: RunId,
        catalog: &DatasetCatalog,
    ) -> Result<VolumeMountPlan, CoreError> {
        let mut seen = HashSet::new();
        for entry in catalog.entries() {
            validate_label(&entry.label)?;
            if !seen.insert(entry.label.as_str()) {
                return Err(CoreError::InvalidInput(format!(
                    "duplicate dataset label '{}'",
                    entry.label
                )));
            }
        }

        let output = Mount {
            name: "output".to_string(),
            source_path: path_string(&self.host_layout.output_dir(run_id)),
            mount_path: OUTPUT_MOUNT_PATH.to_string(),
            read_only: false,
        };
        let tmp = Mount {
            name: "tmp".to_string(),
            source_path: path_string(&self.host_layout.tmp_dir(run_id)),
            mount_path: TMP_MOUNT_PATH.to_string(),
            read_only: false,
        };
        let token = Mount {
            name: "token".to_string(),
            source_path: path_string(&self.host_layout.token_file(run_id)),
            mount_path: TOKEN_MOUNT_PATH.to_string(),
            read_only: true,
        };
        let input_file = Mount {
            name: "input-file".to_string(),
            source_path: path_string(&self.host_layout.input_file(run_id)),
            mount_path: INPUT_FILE_MOUNT_PATH.to_string(),
            read_only: true,
        };

        // Volume names use the position, not the label: labels may contain
        // dots, which volume names may not.
        let inputs = catalog
            .entries()
            .iter()
            .filter(|e| e.kind.is_tabular())
            .enumerate()
            .map(|(index, entry)| InputMount {
                label: entry.label.clone(),
                kind: entry.kind,
                mount: Mount {
                    name: format!("input-{}", index),
                    source_path: entry.uri.clone(),
                    mount_path: format!("{}/{}/{}", INPUT_MOUNT_ROOT, entry.kind, entry.label),
                    read_only: true,
                },
            })
            .collect();

        Ok(VolumeMountPlan {
            output,
            tmp,
            token,
            input_file,
            inputs,
        })
    }
}

fn path_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
