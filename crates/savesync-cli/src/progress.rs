use indicatif::{ProgressBar, ProgressStyle};
use savesync_core::transfer::{DownloadResult, TransferPhase, UploadStats};
use savesync_core::SyncReporter;
use std::sync::Mutex;

/// CLI progress reporter using indicatif.
///
/// - Scan phase: spinner (candidate count unknown upfront)
/// - Transfer phases: spinner with per-file messages
pub struct CliReporter {
    bar: Mutex<Option<ProgressBar>>,
}

impl CliReporter {
    pub fn new() -> Self {
        Self {
            bar: Mutex::new(None),
        }
    }

    fn set_bar(&self, pb: ProgressBar) {
        let mut guard = self.bar.lock().unwrap();
        if let Some(old) = guard.take() {
            old.finish_and_clear();
        }
        *guard = Some(pb);
    }

    fn finish_bar(&self) {
        let mut guard = self.bar.lock().unwrap();
        if let Some(pb) = guard.take() {
            pb.finish_and_clear();
        }
    }

    fn spinner(&self, message: &str) {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap()
                .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"),
        );
        pb.set_message(message.to_string());
        pb.enable_steady_tick(std::time::Duration::from_millis(80));
        self.set_bar(pb);
    }

    fn message(&self, message: String) {
        let guard = self.bar.lock().unwrap();
        if let Some(pb) = guard.as_ref() {
            pb.set_message(message);
        }
    }
}

impl Default for CliReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncReporter for CliReporter {
    fn on_scan_start(&self) {
        self.spinner("Scanning save locations...");
    }

    fn on_scan_complete(&self, candidates: usize) {
        self.finish_bar();
        eprintln!(
            "  \x1b[32m✓\x1b[0m Scan complete: {} candidate files",
            candidates
        );
    }

    fn on_phase(&self, phase: TransferPhase) {
        match phase {
            TransferPhase::Scanning => {}
            TransferPhase::BatchingInternal => self.spinner("Preparing transfers..."),
            TransferPhase::TransferringInternal => {
                self.message("Uploading install-directory saves...".to_string())
            }
            TransferPhase::TransferringExternal => {
                self.message("Uploading external saves...".to_string())
            }
            TransferPhase::Done | TransferPhase::FailedPartial => self.finish_bar(),
        }
    }

    fn on_file_uploaded(&self, portable: &str, _bytes: u64) {
        self.message(format!("Uploaded {}", portable));
    }

    fn on_file_failed(&self, portable: &str) {
        self.message(format!("Failed {}", portable));
    }

    fn on_upload_complete(&self, stats: &UploadStats) {
        self.finish_bar();
        eprintln!(
            "  \x1b[32m✓\x1b[0m Upload complete: {} uploaded, {} skipped, {} failed",
            stats.uploaded, stats.skipped, stats.failed
        );
    }

    fn on_download_complete(&self, result: &DownloadResult) {
        self.finish_bar();
        eprintln!(
            "  \x1b[32m✓\x1b[0m Restore complete: {} downloaded, {} skipped, {} failed",
            result.downloaded, result.skipped, result.failed
        );
    }
}
