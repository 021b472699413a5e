//! Upload/download orchestration against the external transfer tool.

pub mod backend;
pub mod orchestrator;

pub use backend::{CliBackend, TransferBackend};
pub use orchestrator::{SyncContext, TransferOrchestrator, UploadItem};

use std::time::Duration;

/// Per-run transfer state, reported through the progress observer. A
/// failure on one file moves the run to `FailedPartial` without aborting
/// the remaining work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferPhase {
    Scanning,
    BatchingInternal,
    TransferringInternal,
    TransferringExternal,
    Done,
    FailedPartial,
}

/// Per-file retry for transfer attempts: fixed small attempt count, fixed
/// delay. Backoff lives in the manifest store, not here — the external tool
/// does its own network pacing.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(2),
        }
    }
}

/// Counters for one upload run. Transient; never persisted.
#[derive(Debug, Clone, Default)]
pub struct UploadStats {
    pub uploaded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub bytes_uploaded: u64,
    pub failed_files: Vec<String>,
}

impl UploadStats {
    pub fn merge(&mut self, other: UploadStats) {
        self.uploaded += other.uploaded;
        self.skipped += other.skipped;
        self.failed += other.failed;
        self.bytes_uploaded += other.bytes_uploaded;
        self.failed_files.extend(other.failed_files);
    }

    pub fn record_failure(&mut self, portable: &str) {
        self.failed += 1;
        self.failed_files.push(portable.to_string());
    }
}

/// Counters for one restore run. Transient; never persisted.
#[derive(Debug, Clone, Default)]
pub struct DownloadResult {
    pub downloaded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub bytes_downloaded: u64,
    pub failed_files: Vec<String>,
}
