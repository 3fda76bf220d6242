//! Node configuration.
//!
//! Loaded once at startup from a YAML file and read-only afterwards:
//!
//! ```yaml
//! namespace: jobnode
//! task_dir: /var/lib/jobnode/tasks
//! databases:
//!   - label: default
//!     type: csv
//!     uri: /data/default.csv
//! policies:
//!   allowed_algorithms:
//!     - "harbor.example.org/algorithms/*"
//! proxy:
//!   host: v6-node-proxy
//!   port: 4567
//! executor:
//!   api_url: https://kubernetes.default.svc
//!   token_file: /var/run/secrets/kubernetes.io/serviceaccount/token
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use jobnode_core::DatasetCatalog;
use jobnode_kube::KubeConfig;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::policy::PolicyGate;
use crate::retry::RetryPolicy;

/// Bounds of the executor's retry budget for a job.
pub const BACKOFF_LIMIT_RANGE: std::ops::RangeInclusive<u32> = 1..=6;

/// Configuration errors. All of them are fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid allow-list pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Node configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    /// Namespace all jobs are created in.
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Task directory as the executor host sees it.
    pub task_dir: PathBuf,

    /// Task directory as this process sees it. Defaults to `task_dir`.
    #[serde(default)]
    pub local_task_dir: Option<PathBuf>,

    /// Datasets this node offers to algorithms.
    #[serde(default)]
    pub databases: DatasetCatalog,

    #[serde(default)]
    pub policies: PolicyConfig,

    #[serde(default = "default_startup_timeout_secs")]
    pub startup_timeout_secs: u64,

    /// Interval between completion scans.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Executor retries per job before it is marked failed.
    #[serde(default = "default_backoff_limit")]
    pub backoff_limit: u32,

    /// File name of the result inside the output mount.
    #[serde(default = "default_artifact_name")]
    pub artifact_name: String,

    /// Command run in the algorithm container; task arguments follow it.
    #[serde(default = "default_entrypoint")]
    pub entrypoint: Vec<String>,

    /// How long reaped jobs are remembered.
    #[serde(default = "default_tombstone_retention_secs")]
    pub tombstone_retention_secs: u64,

    /// Where algorithms reach the node's proxy.
    #[serde(default)]
    pub proxy: ProxyConfig,

    #[serde(default)]
    pub executor: ExecutorConfig,

    /// HTTP bind address.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PolicyConfig {
    /// Image patterns allowed to run. Empty allows everything.
    #[serde(default)]
    pub allowed_algorithms: Vec<String>,
}

/// Proxy address handed to algorithm containers.
#[derive(Debug, Clone, Deserialize)]
pub struct ProxyConfig {
    #[serde(default = "default_proxy_host")]
    pub host: String,

    #[serde(default = "default_proxy_port")]
    pub port: u16,

    /// Path prefix of the proxied API. Empty for none.
    #[serde(default)]
    pub api_path: String,
}

/// Executor connection settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutorConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Service account token file.
    #[serde(default)]
    pub token_file: Option<PathBuf>,

    #[serde(default)]
    pub accept_invalid_certs: bool,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default)]
    pub retry: RetryConfig,
}

/// Retry settings for transient executor failures.
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

fn default_namespace() -> String {
    "jobnode".to_string()
}

fn default_startup_timeout_secs() -> u64 {
    60
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_backoff_limit() -> u32 {
    3
}

fn default_artifact_name() -> String {
    "result".to_string()
}

fn default_entrypoint() -> Vec<String> {
    vec!["python".to_string(), "app.py".to_string()]
}

fn default_tombstone_retention_secs() -> u64 {
    600
}

fn default_proxy_host() -> String {
    "localhost".to_string()
}

fn default_proxy_port() -> u16 {
    4567
}

fn default_bind_addr() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_api_url() -> String {
    "https://kubernetes.default.svc".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_backoff_ms() -> u64 {
    200
}

fn default_max_backoff_ms() -> u64 {
    5000
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            host: default_proxy_host(),
            port: default_proxy_port(),
            api_path: String::new(),
        }
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            token_file: None,
            accept_invalid_certs: false,
            request_timeout_secs: default_request_timeout_secs(),
            retry: RetryConfig::default(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl NodeConfig {
    /// Create a configuration with defaults for everything but the task
    /// directory.
    pub fn new(task_dir: impl Into<PathBuf>) -> Self {
        Self {
            namespace: default_namespace(),
            task_dir: task_dir.into(),
            local_task_dir: None,
            databases: DatasetCatalog::default(),
            policies: PolicyConfig::default(),
            startup_timeout_secs: default_startup_timeout_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            backoff_limit: default_backoff_limit(),
            artifact_name: default_artifact_name(),
            entrypoint: default_entrypoint(),
            tombstone_retention_secs: default_tombstone_retention_secs(),
            proxy: ProxyConfig::default(),
            executor: ExecutorConfig::default(),
            bind_addr: default_bind_addr(),
        }
    }

    /// Read, parse and validate a YAML config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_yaml(&raw)?;
        debug!(path = %path.display(), namespace = %config.namespace, "Configuration loaded");
        Ok(config)
    }

    /// Parse and validate YAML.
    pub fn from_yaml(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Check everything that can be checked without the executor.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.namespace.trim().is_empty() {
            return Err(ConfigError::Invalid("namespace is empty".to_string()));
        }
        if !BACKOFF_LIMIT_RANGE.contains(&self.backoff_limit) {
            return Err(ConfigError::Invalid(format!(
                "backoff_limit {} outside {}..={}",
                self.backoff_limit,
                BACKOFF_LIMIT_RANGE.start(),
                BACKOFF_LIMIT_RANGE.end()
            )));
        }
        if self.artifact_name.is_empty() || self.artifact_name.contains('/') {
            return Err(ConfigError::Invalid(format!(
                "artifact_name '{}' must be a plain file name",
                self.artifact_name
            )));
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "poll_interval_ms must be at least 1".to_string(),
            ));
        }
        if self.entrypoint.is_empty() {
            return Err(ConfigError::Invalid("entrypoint is empty".to_string()));
        }
        if self.executor.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "executor.retry.max_attempts must be at least 1".to_string(),
            ));
        }
        self.databases
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        PolicyGate::compile(&self.policies.allowed_algorithms)?;
        Ok(())
    }

    /// Builder method to set the allow-list.
    pub fn with_allowed_algorithms(mut self, patterns: Vec<String>) -> Self {
        self.policies.allowed_algorithms = patterns;
        self
    }

    /// Builder method to set the dataset catalog.
    pub fn with_databases(mut self, databases: DatasetCatalog) -> Self {
        self.databases = databases;
        self
    }

    /// Builder method to set where this process sees the task directory.
    pub fn with_local_task_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.local_task_dir = Some(dir.into());
        self
    }

    /// Builder method to set the retry budget.
    pub fn with_backoff_limit(mut self, limit: u32) -> Self {
        self.backoff_limit = limit;
        self
    }

    /// Builder method to set the startup timeout.
    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout_secs = timeout.as_secs().max(1);
        self
    }

    /// Builder method to set the completion poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Builder method to set how long reaped jobs are remembered.
    pub fn with_tombstone_retention(mut self, retention: Duration) -> Self {
        self.tombstone_retention_secs = retention.as_secs();
        self
    }

    /// Builder method to set the proxy address handed to algorithms.
    pub fn with_proxy(mut self, proxy: ProxyConfig) -> Self {
        self.proxy = proxy;
        self
    }

    /// Builder method to set the executor retry policy.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.executor.retry = retry;
        self
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn tombstone_retention(&self) -> Duration {
        Duration::from_secs(self.tombstone_retention_secs)
    }

    /// The task directory as this process sees it.
    pub fn local_task_dir(&self) -> &Path {
        self.local_task_dir.as_deref().unwrap_or(&self.task_dir)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.executor.retry.max_attempts,
            Duration::from_millis(self.executor.retry.initial_backoff_ms),
            Duration::from_millis(self.executor.retry.max_backoff_ms),
        )
    }

    /// Build the executor client configuration, reading the token file.
    pub fn kube_config(&self) -> Result<KubeConfig, ConfigError> {
        let mut config = KubeConfig::new(self.executor.api_url.clone())
            .with_accept_invalid_certs(self.executor.accept_invalid_certs)
            .with_request_timeout(Duration::from_secs(self.executor.request_timeout_secs));

        if let Some(path) = &self.executor.token_file {
            let token = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                path: path.clone(),
                source,
            })?;
            config = config.with_token(token.trim());
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobnode_core::DatasetKind;

    const SAMPLE: &str = r#"
namespace: v6-jobs
task_dir: /mnt/tasks
local_task_dir: /tasks
databases:
  - label: default
    type: csv
    uri: /data/default.csv
  - label: omop
    type: omop
    uri: postgres://omop
policies:
  allowed_algorithms:
    - "allowed/*"
backoff_limit: 2
"#;

    #[test]
    fn test_parse_sample() {
        let config = NodeConfig::from_yaml(SAMPLE).unwrap();
        assert_eq!(config.namespace, "v6-jobs");
        assert_eq!(config.task_dir, PathBuf::from("/mnt/tasks"));
        assert_eq!(config.local_task_dir(), Path::new("/tasks"));
        assert_eq!(config.databases.entries().len(), 2);
        assert_eq!(
            config.databases.get("omop").map(|e| e.kind),
            Some(DatasetKind::Omop)
        );
        assert_eq!(config.backoff_limit, 2);
    }

    #[test]
    fn test_defaults() {
        let config = NodeConfig::from_yaml("task_dir: /tasks").unwrap();
        assert_eq!(config.namespace, "jobnode");
        assert_eq!(config.startup_timeout(), Duration::from_secs(60));
        assert_eq!(config.poll_interval(), Duration::from_millis(1000));
        assert_eq!(config.backoff_limit, 3);
        assert_eq!(config.artifact_name, "result");
        assert_eq!(config.entrypoint, vec!["python", "app.py"]);
        assert_eq!(config.local_task_dir(), Path::new("/tasks"));
        assert!(config.policies.allowed_algorithms.is_empty());
        assert_eq!(config.proxy.host, "localhost");
        assert_eq!(config.proxy.port, 4567);
        assert_eq!(config.proxy.api_path, "");
    }

    #[test]
    fn test_proxy_section() {
        let raw = "task_dir: /tasks\nproxy:\n  host: v6-proxy\n  port: 8000\n  api_path: /api\n";
        let config = NodeConfig::from_yaml(raw).unwrap();
        assert_eq!(config.proxy.host, "v6-proxy");
        assert_eq!(config.proxy.port, 8000);
        assert_eq!(config.proxy.api_path, "/api");
    }

    #[test]
    fn test_zero_poll_interval_rejected() {
        let err = NodeConfig::from_yaml("task_dir: /tasks\npoll_interval_ms: 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        assert!(NodeConfig::from_yaml("task_dir: /tasks\npoll_interval_ms: 1").is_ok());
    }

    #[test]
    fn test_backoff_limit_bounded() {
        let err = NodeConfig::from_yaml("task_dir: /tasks\nbackoff_limit: 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        let err = NodeConfig::from_yaml("task_dir: /tasks\nbackoff_limit: 50").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_malformed_pattern_is_fatal() {
        let raw = "task_dir: /tasks\npolicies:\n  allowed_algorithms:\n    - \"regex:([a-z\"\n";
        let err = NodeConfig::from_yaml(raw).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPattern { .. }));
    }

    #[test]
    fn test_bad_dataset_label_rejected() {
        let raw = "task_dir: /tasks\ndatabases:\n  - label: \"Bad Label\"\n    type: csv\n    uri: /x.csv\n";
        assert!(matches!(
            NodeConfig::from_yaml(raw),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        let err = NodeConfig::load("/nonexistent/jobnode.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_token_file_read_and_trimmed() {
        let dir = tempfile::tempdir().unwrap();
        let token_path = dir.path().join("token");
        std::fs::write(&token_path, "secret-token\n").unwrap();

        let mut config = NodeConfig::new("/tasks");
        config.executor.token_file = Some(token_path);
        let kube = config.kube_config().unwrap();
        assert_eq!(kube.token.as_deref(), Some("secret-token"));
    }
}
