//! On-disk spool for results that were reaped but never delivered.
//!
//! Reaping deletes a job's resources, so a result still held in memory when
//! the node stops would be gone for good. On shutdown such results are
//! written here, one JSON file per run, and requeued at the next start.

use std::path::{Path, PathBuf};

use jobnode_core::RunResult;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Spool directory name under the local task directory.
pub const SPOOL_DIR: &str = ".undelivered";

#[derive(Debug, Error)]
pub enum SpoolError {
    #[error("Spool I/O failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to encode result for {path}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Directory of undelivered results.
#[derive(Debug, Clone)]
pub struct ResultSpool {
    dir: PathBuf,
}

impl ResultSpool {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The spool inside a task directory.
    pub fn in_task_dir(task_dir: &Path) -> Self {
        Self::new(task_dir.join(SPOOL_DIR))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write every result to the spool. Returns how many were written.
    pub async fn store(&self, results: &[RunResult]) -> Result<usize, SpoolError> {
        if results.is_empty() {
            return Ok(0);
        }
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| SpoolError::Io {
                path: self.dir.clone(),
                source,
            })?;

        for result in results {
            let path = self.dir.join(format!("{}.json", result.run_id));
            let bytes = serde_json::to_vec(result).map_err(|source| SpoolError::Encode {
                path: path.clone(),
                source,
            })?;
            tokio::fs::write(&path, bytes)
                .await
                .map_err(|source| SpoolError::Io { path, source })?;
            debug!(run_id = %result.run_id, "Result spooled");
        }

        info!(count = results.len(), dir = %self.dir.display(), "Undelivered results spooled");
        Ok(results.len())
    }

    /// Read and remove every spooled result, oldest first.
    ///
    /// Files that cannot be decoded are left in place and logged.
    pub async fn take_all(&self) -> Result<Vec<RunResult>, SpoolError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(SpoolError::Io {
                    path: self.dir.clone(),
                    source,
                })
            }
        };

        let io_error = |path: &Path, source| SpoolError::Io {
            path: path.to_path_buf(),
            source,
        };

        let mut results = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|source| io_error(&self.dir, source))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let bytes = tokio::fs::read(&path)
                .await
                .map_err(|source| io_error(&path, source))?;
            match serde_json::from_slice::<RunResult>(&bytes) {
                Ok(result) => {
                    tokio::fs::remove_file(&path)
                        .await
                        .map_err(|source| io_error(&path, source))?;
                    results.push(result);
                }
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable spooled result"),
            }
        }

        results.sort_by_key(|r| r.finished_at);
        if !results.is_empty() {
            info!(count = results.len(), "Spooled results recovered");
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use jobnode_core::{RunId, TaskId, TaskStatus};

    fn result(run_id: u64, age_secs: i64) -> RunResult {
        RunResult {
            run_id: RunId::new(run_id),
            task_id: TaskId::new(1),
            parent_id: Some(TaskId::new(0)),
            status: TaskStatus::Completed,
            logs: "ok\n".to_string(),
            data: vec![0, 159, 146, 150],
            finished_at: Utc::now() - Duration::seconds(age_secs),
        }
    }

    #[tokio::test]
    async fn test_spooled_results_survive_restart() {
        let dir = tempfile::tempdir().unwrap();
        let spool = ResultSpool::in_task_dir(dir.path());

        let written = vec![result(2, 1), result(1, 10)];
        assert_eq!(spool.store(&written).await.unwrap(), 2);

        let recovered = ResultSpool::in_task_dir(dir.path()).take_all().await.unwrap();
        assert_eq!(recovered, vec![written[1].clone(), written[0].clone()]);
        assert!(spool.take_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_spool_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let spool = ResultSpool::new(dir.path().join("nowhere"));
        assert!(spool.take_all().await.unwrap().is_empty());
        assert_eq!(spool.store(&[]).await.unwrap(), 0);
        assert!(!spool.dir().exists());
    }

    #[tokio::test]
    async fn test_unreadable_file_left_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let spool = ResultSpool::in_task_dir(dir.path());
        spool.store(&[result(3, 0)]).await.unwrap();
        let broken = spool.dir().join("4.json");
        std::fs::write(&broken, b"{not json").unwrap();

        let recovered = spool.take_all().await.unwrap();
        assert_eq!(recovered.len(), 1);
        assert_eq!(recovered[0].run_id, RunId::new(3));
        assert!(broken.exists());
    }
}
