//! Manifest persistence.
//!
//! All reads and writes for a given manifest go through one store instance
//! and are serialized behind an async-aware mutex: at most one
//! reader-or-writer per manifest at any instant. Transient I/O failures are
//! retried with exponential backoff; a load that still fails degrades to an
//! empty manifest, a save that still fails propagates.

use super::{FileChecksumRecord, GameUploadData};
use crate::codec::{self, PathCodec};
use crate::error::Error;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

pub const MANIFEST_DIR: &str = ".savesync";

#[derive(Debug, Clone)]
pub struct StoreRetryPolicy {
    pub max_attempts: usize,
    pub base_backoff_ms: u64,
}

impl Default for StoreRetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_backoff_ms: 120,
        }
    }
}

pub struct ManifestStore {
    path: PathBuf,
    lock: Mutex<()>,
    retry: StoreRetryPolicy,
}

impl ManifestStore {
    pub fn for_game(install_dir: &Path, profile: Option<&str>) -> Self {
        Self::at_path(install_dir.join(MANIFEST_DIR).join(manifest_file_name(profile)))
    }

    pub fn at_path(path: PathBuf) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
            retry: StoreRetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: StoreRetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the manifest, or an empty one when the file is missing,
    /// unreadable after retries, or unparseable. Never fails: a missing
    /// manifest only costs a redundant re-upload, never data.
    pub async fn load(&self) -> GameUploadData {
        let _guard = self.lock.lock().await;
        self.load_locked().await
    }

    /// Save the manifest. Failures after retries propagate — silently
    /// losing a manifest write would corrupt later skip decisions.
    pub async fn save(&self, data: &GameUploadData) -> Result<(), Error> {
        let _guard = self.lock.lock().await;
        self.save_locked(data).await
    }

    /// Load, mutate, save as one critical section.
    pub async fn update<F>(&self, mutate: F) -> Result<GameUploadData, Error>
    where
        F: FnOnce(&mut GameUploadData),
    {
        let _guard = self.lock.lock().await;
        let mut data = self.load_locked().await;
        mutate(&mut data);
        self.save_locked(&data).await?;
        Ok(data)
    }

    /// One-shot upgrade for manifests written before portable encoding:
    /// keys stored as raw emulation-layer absolute paths are rewritten into
    /// token form. Idempotent; returns the number of rewritten keys.
    pub async fn migrate_paths_if_needed(&self, codec: &PathCodec) -> Result<usize, Error> {
        let _guard = self.lock.lock().await;
        let mut data = self.load_locked().await;

        let mut rewritten = rewrite_legacy_keys(&mut data.files, codec);
        rewritten += rewrite_legacy_keys(&mut data.blacklist, codec);

        if rewritten > 0 {
            debug!(
                "Migrated {} legacy manifest keys in '{}'",
                rewritten,
                self.path.display()
            );
            self.save_locked(&data).await?;
        }
        Ok(rewritten)
    }

    async fn load_locked(&self) -> GameUploadData {
        let mut attempt = 0usize;
        let bytes = loop {
            match tokio::fs::read(&self.path).await {
                Ok(bytes) => break bytes,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    return GameUploadData::default();
                }
                Err(e) => {
                    attempt += 1;
                    if attempt >= self.retry.max_attempts {
                        warn!(
                            "Giving up reading manifest '{}' after {} attempts: {}; using empty manifest",
                            self.path.display(),
                            attempt,
                            e
                        );
                        return GameUploadData::default();
                    }
                    tokio::time::sleep(self.backoff(attempt)).await;
                }
            }
        };

        match serde_json::from_slice::<GameUploadData>(&bytes) {
            Ok(data) => data,
            Err(e) => {
                warn!(
                    "Manifest '{}' failed to parse ({}); using empty manifest",
                    self.path.display(),
                    e
                );
                GameUploadData::default()
            }
        }
    }

    async fn save_locked(&self, data: &GameUploadData) -> Result<(), Error> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_vec_pretty(data)?;

        let mut attempt = 0usize;
        loop {
            match tokio::fs::write(&self.path, &json).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    attempt += 1;
                    if attempt >= self.retry.max_attempts {
                        return Err(Error::Manifest(format!(
                            "failed to write '{}' after {} attempts: {}",
                            self.path.display(),
                            attempt,
                            e
                        )));
                    }
                    tokio::time::sleep(self.backoff(attempt)).await;
                }
            }
        }
    }

    fn backoff(&self, attempt: usize) -> Duration {
        Duration::from_millis(self.retry.base_backoff_ms << (attempt - 1).min(6))
    }
}

fn rewrite_legacy_keys(
    map: &mut BTreeMap<String, FileChecksumRecord>,
    codec: &PathCodec,
) -> usize {
    let legacy_keys: Vec<String> = map
        .keys()
        .filter(|key| !codec::is_portable(key))
        .cloned()
        .collect();

    let mut rewritten = 0usize;
    for key in legacy_keys {
        let portable = codec.contract(&key);
        if portable == key {
            // Unrecognized root; leave the record alone rather than drop it.
            continue;
        }
        if let Some(mut record) = map.remove(&key) {
            record.portable_path = portable.clone();
            map.insert(portable, record);
            rewritten += 1;
        }
    }
    rewritten
}

pub fn manifest_file_name(profile: Option<&str>) -> String {
    match profile {
        Some(profile) => format!("manifest.{}.json", profile),
        None => "manifest.json".to_string(),
    }
}
