//! Session engine: the data flow from process detection through
//! classification, change detection, and transfer.

use crate::classify::Classifier;
use crate::codec::{EmulationPrefix, PathCodec};
use crate::config::{AppConfig, GameConfig};
use crate::error::Error;
use crate::manifest::{self, ManifestStore, UploadDecision};
use crate::process::{ProcessLister, ProcessTracker};
use crate::progress::SyncReporter;
use crate::scanner;
use crate::transfer::{
    DownloadResult, SyncContext, TransferBackend, TransferOrchestrator, TransferPhase,
    UploadItem, UploadStats,
};
use chrono::Utc;
use rayon::prelude::*;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tokio::sync::watch;
use tracing::{debug, info, warn};

pub struct SessionOutcome {
    pub play_time: Duration,
    pub stats: UploadStats,
}

pub struct SyncEngine {
    config: AppConfig,
    lister: Arc<dyn ProcessLister>,
    reporter: Arc<dyn SyncReporter>,
    orchestrator: TransferOrchestrator,
}

impl SyncEngine {
    pub fn new(
        config: AppConfig,
        backend: Arc<dyn TransferBackend>,
        lister: Arc<dyn ProcessLister>,
        reporter: Arc<dyn SyncReporter>,
    ) -> Self {
        let orchestrator = TransferOrchestrator::new(backend, Arc::clone(&reporter))
            .with_concurrency(config.transfer_concurrency);
        Self {
            config,
            lister,
            reporter,
            orchestrator,
        }
    }

    pub fn context_for(&self, game: &GameConfig) -> SyncContext {
        let emulation = game
            .emulation_prefix
            .as_ref()
            .map(|prefix| EmulationPrefix::detect_username(prefix.clone()));
        let codec = PathCodec::new(game.install_dir.clone(), emulation);
        let store = Arc::new(ManifestStore::for_game(
            Path::new(&game.install_dir),
            game.profile.as_deref(),
        ));
        SyncContext {
            remote_root: game.remote_root.clone(),
            codec,
            store,
            algorithm: self.config.hash_algorithm,
            profile: game.profile.clone(),
        }
    }

    /// One full upload pass: scan, classify, detect changes, transfer,
    /// record. Always completes with counts; individual failures are
    /// reflected in the stats, never raised.
    pub async fn sync_game(&self, game: &GameConfig) -> Result<UploadStats, Error> {
        let ctx = self.context_for(game);
        self.sync_with_context(game, &ctx, None).await
    }

    async fn sync_with_context(
        &self,
        game: &GameConfig,
        ctx: &SyncContext,
        modified_since: Option<SystemTime>,
    ) -> Result<UploadStats, Error> {
        ctx.store.migrate_paths_if_needed(&ctx.codec).await?;

        let snapshot = ctx.store.load().await;
        if !snapshot.sync_enabled {
            info!("Sync disabled for '{}', skipping", game.name);
            return Ok(UploadStats::default());
        }

        self.reporter.on_phase(TransferPhase::Scanning);
        self.reporter.on_scan_start();

        let classifier = self.classifier_for(game, ctx, &snapshot);
        let files = scanner::collect_files(&game.watched_roots(), modified_since)?;
        let candidates: Vec<PathBuf> = files
            .into_iter()
            .filter(|path| !classifier.should_ignore(&path.to_string_lossy()))
            .collect();
        self.reporter.on_scan_complete(candidates.len());
        debug!(
            "{}: {} candidate files after classification",
            game.name,
            candidates.len()
        );

        // Hashing is parallel and lock-free; the manifest lock is only taken
        // afterwards, for the record updates.
        let codec = ctx.codec.clone();
        let algorithm = ctx.algorithm;
        let decisions = tokio::task::spawn_blocking(move || {
            candidates
                .par_iter()
                .filter_map(|path| {
                    let portable = codec.contract(&path.to_string_lossy());
                    let record = snapshot.find_record(&portable);
                    match manifest::decide_upload(record, path, algorithm) {
                        Ok(decision) => Some((path.clone(), portable, decision)),
                        Err(e) => {
                            warn!("Skipping unreadable '{}': {}", path.display(), e);
                            None
                        }
                    }
                })
                .collect::<Vec<_>>()
        })
        .await
        .map_err(|e| Error::Other(format!("hash phase panicked: {}", e)))?;

        let mut stats = UploadStats::default();
        let mut items = Vec::new();
        let mut refreshed = Vec::new();

        for (local, portable, decision) in decisions {
            match decision {
                UploadDecision::Changed {
                    checksum,
                    size,
                    modified_ms,
                } => items.push(UploadItem {
                    local,
                    portable,
                    checksum,
                    size,
                    modified_ms,
                }),
                UploadDecision::UnchangedDigest { size, modified_ms } => {
                    refreshed.push((portable.clone(), size, modified_ms));
                    self.reporter.on_file_skipped(&portable);
                    stats.skipped += 1;
                }
                UploadDecision::UnchangedFast => {
                    self.reporter.on_file_skipped(&portable);
                    stats.skipped += 1;
                }
            }
        }

        if !refreshed.is_empty() {
            ctx.store
                .update(|data| {
                    for (portable, size, modified_ms) in &refreshed {
                        if let Some(record) = data.find_record(portable).cloned() {
                            let mut record = record;
                            record.size = *size;
                            record.last_modified_ms = *modified_ms;
                            data.upsert_record(record);
                        }
                    }
                })
                .await?;
        }

        info!(
            "{}: {} changed, {} unchanged",
            game.name,
            items.len(),
            stats.skipped
        );
        let run = self.orchestrator.process_batch(items, ctx).await;
        stats.merge(run);

        let status = format!(
            "{} uploaded, {} skipped, {} failed at {}",
            stats.uploaded,
            stats.skipped,
            stats.failed,
            Utc::now().to_rfc3339()
        );
        let provider = game.provider.clone();
        ctx.store
            .update(|data| {
                data.last_sync_status = status.clone();
                data.provider = provider.clone();
                data.last_updated = Some(Utc::now());
            })
            .await?;

        if let Err(e) = self.orchestrator.push_manifest(ctx).await {
            warn!("Failed to push manifest for '{}': {}", game.name, e);
            stats.failed += 1;
            stats.failed_files.push("manifest".to_string());
        }

        Ok(stats)
    }

    /// Restore save data when the cloud copy is newer than the local state.
    pub async fn restore_game(&self, game: &GameConfig) -> Result<DownloadResult, Error> {
        let ctx = self.context_for(game);
        ctx.store.migrate_paths_if_needed(&ctx.codec).await?;

        let Some(remote) = self.orchestrator.fetch_remote_manifest(&ctx).await? else {
            info!("{}: no remote manifest, nothing to restore", game.name);
            return Ok(DownloadResult::default());
        };

        let local = ctx.store.load().await;
        let remote_newer = remote.last_updated > local.last_updated
            || (local.files.is_empty() && !remote.files.is_empty());
        if !remote_newer {
            info!("{}: local manifest up to date, skipping restore", game.name);
            return Ok(DownloadResult::default());
        }

        Ok(self.orchestrator.restore_files(remote, &ctx).await)
    }

    /// Watch a play session: restore first, track the game's processes until
    /// they all exit (or `cancel` fires), then upload the session's changes
    /// and accumulate play time.
    pub async fn watch_game(
        &self,
        game: &GameConfig,
        root_pid: Option<u32>,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<SessionOutcome, Error> {
        let ctx = self.context_for(game);

        if let Err(e) = self.restore_game(game).await {
            // A failed restore degrades to sync-only; local saves still win.
            warn!("{}: restore failed: {}", game.name, e);
        }

        let tracker = ProcessTracker::new(game.install_dir.clone(), Arc::clone(&self.lister));
        let interval = Duration::from_secs(self.config.poll_interval_secs);

        let root = match root_pid {
            Some(pid) => Some(pid),
            None => self.wait_for_game(game, interval, &mut cancel).await,
        };
        let Some(root) = root else {
            info!("{}: cancelled before the game started", game.name);
            return Ok(SessionOutcome {
                play_time: Duration::ZERO,
                stats: UploadStats::default(),
            });
        };

        tracker.initialize(root);
        info!(
            "{}: session started, {} tracked processes",
            game.name,
            tracker.tracked_count()
        );
        let session_start_wall = SystemTime::now();
        let session_start = Instant::now();
        let mut known_pids = self.pid_snapshot();

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                changed = cancel.changed() => {
                    // A dropped sender can never fire; stop rather than spin.
                    if changed.is_err() || *cancel.borrow() {
                        info!("{}: watch cancelled", game.name);
                        break;
                    }
                }
            }

            // Explicit new-process notifications are not available
            // everywhere; diff full enumerations instead.
            if let Ok(processes) = self.lister.list_processes() {
                for info in &processes {
                    if !known_pids.contains(&info.pid) {
                        tracker.handle_new_process(info.pid, info.parent_pid);
                    }
                }
                known_pids = processes.iter().map(|p| p.pid).collect();
            }
            tracker.scan_for_processes_in_directory();
            tracker.prune_exited();

            if tracker.tracked_count() == 0 {
                info!("{}: all tracked processes exited", game.name);
                break;
            }
        }

        let play_time = session_start.elapsed();
        ctx.store
            .update(|data| {
                data.play_time_secs += play_time.as_secs();
            })
            .await?;

        let stats = self
            .sync_with_context(game, &ctx, Some(session_start_wall))
            .await?;
        Ok(SessionOutcome { play_time, stats })
    }

    /// Poll until some process is running from the game's install directory
    /// (or matches the configured executable name). Returns its pid, or
    /// `None` when cancelled.
    async fn wait_for_game(
        &self,
        game: &GameConfig,
        interval: Duration,
        cancel: &mut watch::Receiver<bool>,
    ) -> Option<u32> {
        info!("{}: waiting for the game to start", game.name);
        loop {
            if let Ok(processes) = self.lister.list_processes() {
                for info in processes {
                    let Some(exe) = &info.exe else { continue };
                    let exe_str = exe.to_string_lossy();
                    let name_match = game.executable.as_deref().is_some_and(|wanted| {
                        exe.file_name()
                            .is_some_and(|name| name.to_string_lossy().eq_ignore_ascii_case(wanted))
                    });
                    if name_match
                        || crate::classify::is_same_or_under(&exe_str, &game.install_dir)
                    {
                        return Some(info.pid);
                    }
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                changed = cancel.changed() => {
                    if changed.is_err() || *cancel.borrow() {
                        return None;
                    }
                }
            }
        }
    }

    fn pid_snapshot(&self) -> HashSet<u32> {
        self.lister
            .list_processes()
            .map(|processes| processes.iter().map(|p| p.pid).collect())
            .unwrap_or_default()
    }

    fn classifier_for(
        &self,
        game: &GameConfig,
        ctx: &SyncContext,
        snapshot: &crate::manifest::GameUploadData,
    ) -> Classifier {
        // Manifest blacklist keys are portable; the classifier works on host
        // paths, so expand them here.
        let blacklist: Vec<String> = snapshot
            .blacklist
            .keys()
            .map(|key| ctx.codec.expand(key))
            .collect();
        Classifier::new(game.install_dir.clone(), &self.config.ignore, blacklist)
    }

    /// Add a path to the game's permanent blacklist. Accepts either an
    /// absolute host path or an already-portable path; returns the stored
    /// portable key.
    pub async fn blacklist_add(&self, game: &GameConfig, path: &str) -> Result<String, Error> {
        let ctx = self.context_for(game);
        let portable = if crate::codec::is_portable(path) {
            path.to_string()
        } else {
            ctx.codec.contract(path)
        };
        let key = portable.clone();
        ctx.store
            .update(move |data| data.blacklist_path(&key))
            .await?;
        Ok(portable)
    }

    pub async fn blacklist_remove(&self, game: &GameConfig, path: &str) -> Result<bool, Error> {
        let ctx = self.context_for(game);
        let portable = if crate::codec::is_portable(path) {
            path.to_string()
        } else {
            ctx.codec.contract(path)
        };
        let mut removed = false;
        ctx.store
            .update(|data| removed = data.unblacklist_path(&portable))
            .await?;
        Ok(removed)
    }

    pub async fn manifest_summary(
        &self,
        game: &GameConfig,
    ) -> Result<crate::manifest::GameUploadData, Error> {
        let ctx = self.context_for(game);
        Ok(ctx.store.load().await)
    }
}
