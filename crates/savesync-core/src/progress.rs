use crate::transfer::{DownloadResult, TransferPhase, UploadStats};

/// Observer for sync progress.
///
/// The CLI implements this with indicatif bars; tests implement it with
/// counters. All methods have default no-op implementations.
pub trait SyncReporter: Send + Sync {
    fn on_scan_start(&self) {}
    fn on_scan_complete(&self, _candidates: usize) {}
    fn on_phase(&self, _phase: TransferPhase) {}
    fn on_file_uploaded(&self, _portable: &str, _bytes: u64) {}
    fn on_file_skipped(&self, _portable: &str) {}
    fn on_file_failed(&self, _portable: &str) {}
    fn on_upload_complete(&self, _stats: &UploadStats) {}
    fn on_download_complete(&self, _result: &DownloadResult) {}
}

/// No-op reporter for silent operation.
pub struct SilentReporter;

impl SyncReporter for SilentReporter {}
