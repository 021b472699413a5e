//! Batching, retry, and partial-failure handling for one sync run.
//!
//! Files under the install directory share one relative root, so they go up
//! in a single batched call; everything else carries its own portable-root
//! mapping and transfers individually under a bounded-concurrency pool. A
//! failed file is counted and reported, never allowed to cancel the run.

use super::{DownloadResult, RetryPolicy, TransferBackend, TransferPhase, UploadStats};
use crate::codec::{PathCodec, TOKEN_GAMEPATH};
use crate::config::HashAlgorithm;
use crate::error::Error;
use crate::hasher;
use crate::manifest::store::manifest_file_name;
use crate::manifest::{modified_unix_ms, FileChecksumRecord, GameUploadData, ManifestStore};
use crate::progress::SyncReporter;
use chrono::Utc;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{info, warn};

/// Everything one game's transfers need: where the remote lives, how paths
/// are encoded, and which manifest records the outcomes.
#[derive(Clone)]
pub struct SyncContext {
    pub remote_root: String,
    pub codec: PathCodec,
    pub store: Arc<ManifestStore>,
    pub algorithm: HashAlgorithm,
    pub profile: Option<String>,
}

impl SyncContext {
    pub fn remote_file_path(&self, portable: &str) -> String {
        format!(
            "{}/files/{}",
            self.remote_root.trim_end_matches('/'),
            portable.replace('\\', "/")
        )
    }

    pub fn remote_manifest_path(&self) -> String {
        format!(
            "{}/{}",
            self.remote_root.trim_end_matches('/'),
            manifest_file_name(self.profile.as_deref())
        )
    }
}

/// One changed file, already hashed, ready to transfer.
#[derive(Debug, Clone)]
pub struct UploadItem {
    pub local: PathBuf,
    pub portable: String,
    pub checksum: String,
    pub size: u64,
    pub modified_ms: i64,
}

pub struct TransferOrchestrator {
    backend: Arc<dyn TransferBackend>,
    reporter: Arc<dyn SyncReporter>,
    retry: RetryPolicy,
    concurrency: usize,
}

impl TransferOrchestrator {
    pub fn new(
        backend: Arc<dyn TransferBackend>,
        reporter: Arc<dyn SyncReporter>,
    ) -> Self {
        Self {
            backend,
            reporter,
            retry: RetryPolicy::default(),
            concurrency: 8,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Upload a single changed file.
    pub async fn process_file(&self, item: UploadItem, ctx: &SyncContext) -> UploadStats {
        self.transfer_individually(vec![item], ctx).await
    }

    /// Upload a set of changed files: install-directory files batched,
    /// out-of-tree files individual.
    pub async fn process_batch(&self, items: Vec<UploadItem>, ctx: &SyncContext) -> UploadStats {
        self.reporter.on_phase(TransferPhase::BatchingInternal);

        let (internal, external): (Vec<_>, Vec<_>) = items
            .into_iter()
            .partition(|item| gamepath_relative(&item.portable).is_some());

        let mut stats = UploadStats::default();

        if !internal.is_empty() {
            stats.merge(self.transfer_internal_batch(internal, ctx).await);
        }
        if !external.is_empty() {
            self.reporter.on_phase(TransferPhase::TransferringExternal);
            stats.merge(self.transfer_individually(external, ctx).await);
        }

        if stats.failed > 0 {
            self.reporter.on_phase(TransferPhase::FailedPartial);
        } else {
            self.reporter.on_phase(TransferPhase::Done);
        }
        self.reporter.on_upload_complete(&stats);
        stats
    }

    async fn transfer_internal_batch(
        &self,
        items: Vec<UploadItem>,
        ctx: &SyncContext,
    ) -> UploadStats {
        self.reporter.on_phase(TransferPhase::TransferringInternal);

        let relative: Vec<String> = items
            .iter()
            .filter_map(|item| gamepath_relative(&item.portable))
            .collect();
        let remote_dir = format!(
            "{}/files/{}",
            ctx.remote_root.trim_end_matches('/'),
            TOKEN_GAMEPATH
        );
        let local_root = PathBuf::from(ctx.codec.install_dir());

        let backend = Arc::clone(&self.backend);
        let result = with_retry(&self.retry, "upload_batch", || {
            let backend = Arc::clone(&backend);
            let local_root = local_root.clone();
            let remote_dir = remote_dir.clone();
            let relative = relative.clone();
            async move {
                backend
                    .upload_batch(&local_root, &remote_dir, &relative)
                    .await
            }
        })
        .await;

        let mut stats = UploadStats::default();
        match result {
            Ok(()) => {
                for item in items {
                    self.record_uploaded(&item, ctx).await;
                    self.reporter.on_file_uploaded(&item.portable, item.size);
                    stats.uploaded += 1;
                    stats.bytes_uploaded += item.size;
                }
            }
            Err(e) => {
                // The contract gives no per-file result for a failed batch;
                // every member counts as failed.
                warn!("Batched upload failed: {}", e);
                for item in items {
                    self.reporter.on_file_failed(&item.portable);
                    stats.record_failure(&item.portable);
                }
            }
        }
        stats
    }

    async fn transfer_individually(
        &self,
        items: Vec<UploadItem>,
        ctx: &SyncContext,
    ) -> UploadStats {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut handles = Vec::with_capacity(items.len());

        for item in items {
            let backend = Arc::clone(&self.backend);
            let semaphore = Arc::clone(&semaphore);
            let retry = self.retry.clone();
            let remote = ctx.remote_file_path(&item.portable);

            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let result = with_retry(&retry, "upload", || {
                    let backend = Arc::clone(&backend);
                    let local = item.local.clone();
                    let remote = remote.clone();
                    async move { backend.upload(&local, &remote).await }
                })
                .await;
                (item, result)
            }));
        }

        let mut stats = UploadStats::default();
        for handle in handles {
            match handle.await {
                Ok((item, Ok(()))) => {
                    self.record_uploaded(&item, ctx).await;
                    self.reporter.on_file_uploaded(&item.portable, item.size);
                    stats.uploaded += 1;
                    stats.bytes_uploaded += item.size;
                }
                Ok((item, Err(e))) => {
                    warn!("Upload of '{}' failed: {}", item.portable, e);
                    self.reporter.on_file_failed(&item.portable);
                    stats.record_failure(&item.portable);
                }
                Err(e) => {
                    warn!("Upload task panicked: {}", e);
                    stats.failed += 1;
                }
            }
        }
        stats
    }

    /// Record a confirmed upload in the manifest immediately. A failure here
    /// only costs a redundant re-upload next run, so it is logged, not
    /// propagated.
    async fn record_uploaded(&self, item: &UploadItem, ctx: &SyncContext) {
        let record = FileChecksumRecord {
            checksum: item.checksum.clone(),
            size: item.size,
            last_modified_ms: item.modified_ms,
            last_upload: Some(Utc::now()),
            portable_path: item.portable.clone(),
        };
        if let Err(e) = ctx.store.update(|data| data.upsert_record(record)).await {
            warn!(
                "Upload of '{}' succeeded but manifest update failed: {}",
                item.portable, e
            );
        }
    }

    /// Fetch the remote manifest, if one exists.
    pub async fn fetch_remote_manifest(
        &self,
        ctx: &SyncContext,
    ) -> Result<Option<GameUploadData>, Error> {
        let remote = ctx.remote_manifest_path();
        if !self.backend.exists(&remote).await? {
            return Ok(None);
        }

        let tmp = tempfile::NamedTempFile::new()?;
        self.backend.download(&remote, tmp.path()).await?;
        let bytes = tokio::fs::read(tmp.path()).await?;
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    /// Push the local manifest file to the remote root.
    pub async fn push_manifest(&self, ctx: &SyncContext) -> Result<(), Error> {
        let remote = ctx.remote_manifest_path();
        self.backend.upload(ctx.store.path(), &remote).await
    }

    /// Restore a full save set: fetch the remote manifest, then fetch each
    /// referenced file whose local content differs, expanding its portable
    /// path against this machine.
    pub async fn download_with_checksum(
        &self,
        ctx: &SyncContext,
    ) -> Result<DownloadResult, Error> {
        let Some(remote_manifest) = self.fetch_remote_manifest(ctx).await? else {
            info!("No remote manifest at '{}'", ctx.remote_manifest_path());
            return Ok(DownloadResult::default());
        };
        Ok(self.restore_files(remote_manifest, ctx).await)
    }

    /// Restore from an already-fetched remote manifest.
    pub async fn restore_files(
        &self,
        remote_manifest: GameUploadData,
        ctx: &SyncContext,
    ) -> DownloadResult {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut handles = Vec::new();

        for (key, record) in remote_manifest.files {
            let local = PathBuf::from(ctx.codec.expand(&key));
            let remote = ctx.remote_file_path(&key);
            let backend = Arc::clone(&self.backend);
            let semaphore = Arc::clone(&semaphore);
            let retry = self.retry.clone();
            let algorithm = ctx.algorithm;

            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await;

                if local.is_file() {
                    if let Ok(digest) = hasher::file_digest(&local, algorithm) {
                        if digest == record.checksum {
                            return (key, record, local, DownloadOutcome::Skipped);
                        }
                    }
                }

                let result = with_retry(&retry, "download", || {
                    let backend = Arc::clone(&backend);
                    let local = local.clone();
                    let remote = remote.clone();
                    async move { backend.download(&remote, &local).await }
                })
                .await;
                let outcome = match result {
                    Ok(()) => DownloadOutcome::Downloaded,
                    Err(e) => DownloadOutcome::Failed(e),
                };
                (key, record, local, outcome)
            }));
        }

        let mut result = DownloadResult::default();
        for handle in handles {
            let Ok((key, record, local, outcome)) = handle.await else {
                result.failed += 1;
                continue;
            };
            match outcome {
                DownloadOutcome::Downloaded => {
                    result.downloaded += 1;
                    result.bytes_downloaded += record.size;
                    self.record_downloaded(&key, &record, &local, ctx).await;
                }
                DownloadOutcome::Skipped => {
                    result.skipped += 1;
                }
                DownloadOutcome::Failed(e) => {
                    warn!("Restore of '{}' failed: {}", key, e);
                    result.failed += 1;
                    result.failed_files.push(key);
                }
            }
        }

        self.reporter.on_download_complete(&result);
        result
    }

    async fn record_downloaded(
        &self,
        key: &str,
        remote_record: &FileChecksumRecord,
        local: &std::path::Path,
        ctx: &SyncContext,
    ) {
        let modified_ms = std::fs::metadata(local)
            .map(|m| modified_unix_ms(&m))
            .unwrap_or(0);
        let record = FileChecksumRecord {
            checksum: remote_record.checksum.clone(),
            size: remote_record.size,
            last_modified_ms: modified_ms,
            last_upload: remote_record.last_upload,
            portable_path: key.to_string(),
        };
        if let Err(e) = ctx.store.update(|data| data.upsert_record(record)).await {
            warn!("Restored '{}' but manifest update failed: {}", key, e);
        }
    }
}

enum DownloadOutcome {
    Downloaded,
    Skipped,
    Failed(Error),
}

fn gamepath_relative(portable: &str) -> Option<String> {
    let rest = portable.strip_prefix(TOKEN_GAMEPATH)?;
    let rest = rest.trim_start_matches(['/', '\\']);
    if rest.is_empty() {
        None
    } else {
        Some(rest.replace('\\', "/"))
    }
}

async fn with_retry<F, Fut>(
    retry: &RetryPolicy,
    op: &'static str,
    mut attempt_fn: F,
) -> Result<(), Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), Error>>,
{
    let mut last_err = None;
    for attempt in 1..=retry.max_attempts {
        match attempt_fn().await {
            Ok(()) => return Ok(()),
            Err(e) => {
                warn!("{} attempt {}/{} failed: {}", op, attempt, retry.max_attempts, e);
                last_err = Some(e);
                if attempt < retry.max_attempts {
                    tokio::time::sleep(retry.delay).await;
                }
            }
        }
    }
    Err(last_err.unwrap_or_else(|| Error::Other(format!("{} failed", op))))
}
