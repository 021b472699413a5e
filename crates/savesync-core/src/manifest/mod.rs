//! Per-game manifest: the persisted record of tracked files and their
//! last-known content state. Keys are always portable paths so a manifest
//! written on one machine replays on another. The JSON field names here are
//! a compatibility surface between installations.

pub mod store;

pub use store::ManifestStore;

use crate::codec;
use crate::config::HashAlgorithm;
use crate::hasher;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::Metadata;
use std::io;
use std::path::Path;
use std::time::UNIX_EPOCH;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileChecksumRecord {
    pub checksum: String,
    pub size: u64,
    /// Filesystem modification time, unix milliseconds. Compared for
    /// equality only — drift between machines makes ordering meaningless.
    pub last_modified_ms: i64,
    pub last_upload: Option<DateTime<Utc>>,
    pub portable_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GameUploadData {
    pub files: BTreeMap<String, FileChecksumRecord>,
    /// Paths permanently excluded from sync; same record shape so an entry
    /// can be moved back without losing its state.
    pub blacklist: BTreeMap<String, FileChecksumRecord>,
    pub last_updated: Option<DateTime<Utc>>,
    pub sync_enabled: bool,
    pub provider: String,
    pub last_sync_status: String,
    pub play_time_secs: u64,
}

impl Default for GameUploadData {
    fn default() -> Self {
        Self {
            files: BTreeMap::new(),
            blacklist: BTreeMap::new(),
            last_updated: None,
            sync_enabled: true,
            provider: String::new(),
            last_sync_status: String::new(),
            play_time_secs: 0,
        }
    }
}

impl GameUploadData {
    /// Case-insensitive record lookup; portable-path equality ignores case
    /// and separator style.
    pub fn find_record(&self, portable: &str) -> Option<&FileChecksumRecord> {
        if let Some(record) = self.files.get(portable) {
            return Some(record);
        }
        self.files
            .iter()
            .find(|(key, _)| codec::portable_eq(key, portable))
            .map(|(_, record)| record)
    }

    pub fn is_blacklisted(&self, portable: &str) -> bool {
        self.blacklist.contains_key(portable)
            || self
                .blacklist
                .keys()
                .any(|key| codec::portable_eq(key, portable))
    }

    pub fn upsert_record(&mut self, record: FileChecksumRecord) {
        let existing_key = self
            .files
            .keys()
            .find(|key| codec::portable_eq(key, &record.portable_path))
            .cloned();
        let key = existing_key.unwrap_or_else(|| record.portable_path.clone());
        self.files.insert(key, record);
        self.last_updated = Some(Utc::now());
    }

    /// Move a path onto the blacklist, carrying over any existing record.
    pub fn blacklist_path(&mut self, portable: &str) {
        let existing_key = self
            .files
            .keys()
            .find(|key| codec::portable_eq(key, portable))
            .cloned();
        let record = match existing_key {
            Some(key) => self.files.remove(&key).unwrap_or_else(|| {
                empty_record(portable)
            }),
            None => empty_record(portable),
        };
        self.blacklist.insert(record.portable_path.clone(), record);
        self.last_updated = Some(Utc::now());
    }

    pub fn unblacklist_path(&mut self, portable: &str) -> bool {
        let existing_key = self
            .blacklist
            .keys()
            .find(|key| codec::portable_eq(key, portable))
            .cloned();
        match existing_key {
            Some(key) => {
                self.blacklist.remove(&key);
                self.last_updated = Some(Utc::now());
                true
            }
            None => false,
        }
    }
}

fn empty_record(portable: &str) -> FileChecksumRecord {
    FileChecksumRecord {
        checksum: String::new(),
        size: 0,
        last_modified_ms: 0,
        last_upload: None,
        portable_path: portable.to_string(),
    }
}

/// Outcome of the two-tier change check for one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadDecision {
    /// Size and modification time match the stored record; content assumed
    /// unchanged without hashing.
    UnchangedFast,
    /// Metadata differed but the content digest matches; the record's
    /// metadata should be refreshed without a transfer.
    UnchangedDigest {
        size: u64,
        modified_ms: i64,
    },
    Changed {
        checksum: String,
        size: u64,
        modified_ms: i64,
    },
}

impl UploadDecision {
    pub fn needs_upload(&self) -> bool {
        matches!(self, UploadDecision::Changed { .. })
    }
}

/// Two-tier change detection: a size + mtime match skips hashing entirely;
/// any metadata mismatch falls through to the authoritative digest
/// comparison. The fast path is an optimization, never a correctness
/// shortcut.
pub fn decide_upload(
    record: Option<&FileChecksumRecord>,
    local: &Path,
    algorithm: HashAlgorithm,
) -> io::Result<UploadDecision> {
    let metadata = std::fs::metadata(local)?;
    let size = metadata.len();
    let modified_ms = modified_unix_ms(&metadata);

    if let Some(record) = record {
        if record.size == size && record.last_modified_ms == modified_ms {
            return Ok(UploadDecision::UnchangedFast);
        }
    }

    let checksum = hasher::file_digest(local, algorithm)?;

    match record {
        Some(record) if record.checksum == checksum => {
            Ok(UploadDecision::UnchangedDigest { size, modified_ms })
        }
        _ => Ok(UploadDecision::Changed {
            checksum,
            size,
            modified_ms,
        }),
    }
}

pub fn modified_unix_ms(metadata: &Metadata) -> i64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
