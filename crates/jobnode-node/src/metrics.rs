//! Prometheus metrics collection and formatting.
//!
//! This module provides metrics in Prometheus text exposition format.

use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};

use jobnode_core::TaskStatus;

/// Process-wide counters.
#[derive(Debug, Default)]
pub struct Metrics {
    submissions: [AtomicU64; TaskStatus::ALL.len()],
    results: [AtomicU64; TaskStatus::ALL.len()],
    reaper_scans: AtomicU64,
    executor_errors: AtomicU64,
    deletion_failures: AtomicU64,
}

fn index(status: TaskStatus) -> usize {
    TaskStatus::ALL
        .iter()
        .position(|s| *s == status)
        .unwrap_or_default()
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a `submit` answer.
    pub fn record_submission(&self, status: TaskStatus) {
        self.submissions[index(status)].fetch_add(1, Ordering::Relaxed);
    }

    /// Count an emitted result.
    pub fn record_result(&self, status: TaskStatus) {
        self.results[index(status)].fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_scan(&self) {
        self.reaper_scans.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_executor_error(&self) {
        self.executor_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_deletion_failure(&self) {
        self.deletion_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn submissions(&self, status: TaskStatus) -> u64 {
        self.submissions[index(status)].load(Ordering::Relaxed)
    }

    pub fn results(&self, status: TaskStatus) -> u64 {
        self.results[index(status)].load(Ordering::Relaxed)
    }

    /// Format all metrics as Prometheus text.
    pub fn render(&self) -> String {
        let mut output = String::new();

        writeln!(
            output,
            "# HELP jobnode_submissions_total Submissions by returned status"
        )
        .ok();
        writeln!(output, "# TYPE jobnode_submissions_total counter").ok();
        for status in TaskStatus::ALL {
            writeln!(
                output,
                "jobnode_submissions_total{{status=\"{}\"}} {}",
                status,
                self.submissions(status)
            )
            .ok();
        }

        writeln!(output).ok();
        writeln!(output, "# HELP jobnode_results_total Results emitted by status").ok();
        writeln!(output, "# TYPE jobnode_results_total counter").ok();
        for status in TaskStatus::ALL {
            writeln!(
                output,
                "jobnode_results_total{{status=\"{}\"}} {}",
                status,
                self.results(status)
            )
            .ok();
        }

        writeln!(output).ok();
        writeln!(output, "# HELP jobnode_reaper_scans_total Completion scans").ok();
        writeln!(output, "# TYPE jobnode_reaper_scans_total counter").ok();
        writeln!(
            output,
            "jobnode_reaper_scans_total {}",
            self.reaper_scans.load(Ordering::Relaxed)
        )
        .ok();

        writeln!(output).ok();
        writeln!(
            output,
            "# HELP jobnode_executor_errors_total Failed executor calls"
        )
        .ok();
        writeln!(output, "# TYPE jobnode_executor_errors_total counter").ok();
        writeln!(
            output,
            "jobnode_executor_errors_total {}",
            self.executor_errors.load(Ordering::Relaxed)
        )
        .ok();

        writeln!(output).ok();
        writeln!(
            output,
            "# HELP jobnode_deletion_failures_total Job or pod deletions that failed"
        )
        .ok();
        writeln!(output, "# TYPE jobnode_deletion_failures_total counter").ok();
        writeln!(
            output,
            "jobnode_deletion_failures_total {}",
            self.deletion_failures.load(Ordering::Relaxed)
        )
        .ok();

        output
    }
}
