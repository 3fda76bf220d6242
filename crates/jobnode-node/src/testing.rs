//! Fixtures shared by unit tests.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use jobnode_core::{DatasetCatalog, DatasetEntry, DatasetKind};
use jobnode_testkit::FakeCluster;

use crate::config::{NodeConfig, RetryConfig};
use crate::context::NodeContext;

pub(crate) fn catalog() -> DatasetCatalog {
    DatasetCatalog::new(vec![
        DatasetEntry::new("default", DatasetKind::Csv, "/data/default.csv"),
        DatasetEntry::new("registry", DatasetKind::Sql, "postgres://db/registry"),
    ])
}

pub(crate) fn config(task_dir: &Path) -> NodeConfig {
    NodeConfig::new(task_dir)
        .with_allowed_algorithms(vec!["allowed/*".to_string()])
        .with_databases(catalog())
        .with_poll_interval(Duration::from_millis(10))
        .with_startup_timeout(Duration::from_secs(1))
        .with_retry(RetryConfig {
            max_attempts: 3,
            initial_backoff_ms: 5,
            max_backoff_ms: 20,
        })
}

pub(crate) fn context(cluster: FakeCluster, task_dir: &Path) -> Arc<NodeContext> {
    context_with(cluster, config(task_dir))
}

pub(crate) fn context_with(cluster: FakeCluster, config: NodeConfig) -> Arc<NodeContext> {
    NodeContext::new(config, Arc::new(cluster)).unwrap()
}
