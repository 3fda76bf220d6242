//! jobnode Node Library
//!
//! The orchestration core of a jobnode node: it gates images against a
//! policy, submits one batch job per run to the cluster executor, waits for
//! the job's pod to start, and drains finished jobs into results exactly
//! once, deleting their resources afterwards.

pub mod config;
pub mod context;
pub mod http;
pub mod lock;
pub mod metrics;
pub mod orchestrator;
pub mod policy;
pub mod probe;
pub mod reaper;
pub mod retry;
pub mod spool;
pub mod submitter;
pub mod watcher;

#[cfg(test)]
mod testing;

pub use config::{ConfigError, NodeConfig};
pub use context::NodeContext;
pub use orchestrator::{Orchestrator, OrchestratorError};
pub use policy::PolicyGate;
pub use probe::RunRegistryProbe;
pub use reaper::{CompletionReaper, ReapError};
pub use retry::RetryPolicy;
pub use spool::{ResultSpool, SpoolError};
pub use submitter::{JobHandle, JobSubmitter, SubmitError};
pub use watcher::StartupWatcher;
