#![allow(dead_code)]

use async_trait::async_trait;
use savesync_core::error::Error;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

/// In-memory remote keyed by full remote path. Failure injection by
/// substring match, by batch flag, or by a first-N-calls countdown.
#[derive(Default)]
pub struct MockBackend {
    pub remote: Mutex<HashMap<String, Vec<u8>>>,
    pub upload_calls: AtomicUsize,
    pub batch_calls: AtomicUsize,
    pub download_calls: AtomicUsize,
    pub fail_substring: Mutex<Option<String>>,
    pub fail_batch: AtomicBool,
    pub fail_times: AtomicUsize,
}

impl MockBackend {
    pub fn fail_substring(&self, needle: &str) {
        *self.fail_substring.lock().unwrap() = Some(needle.to_string());
    }

    fn should_fail(&self, key: &str) -> bool {
        if self
            .fail_times
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return true;
        }
        self.fail_substring
            .lock()
            .unwrap()
            .as_deref()
            .map(|needle| key.contains(needle))
            .unwrap_or(false)
    }

    pub fn remote_bytes(&self, key: &str) -> Option<Vec<u8>> {
        self.remote.lock().unwrap().get(key).cloned()
    }

    pub fn seed(&self, key: &str, bytes: &[u8]) {
        self.remote
            .lock()
            .unwrap()
            .insert(key.to_string(), bytes.to_vec());
    }
}

#[async_trait]
impl savesync_core::transfer::TransferBackend for MockBackend {
    async fn exists(&self, remote: &str) -> Result<bool, Error> {
        Ok(self.remote.lock().unwrap().contains_key(remote))
    }

    async fn upload(&self, local: &Path, remote: &str) -> Result<(), Error> {
        self.upload_calls.fetch_add(1, Ordering::SeqCst);
        if self.should_fail(remote) {
            return Err(Error::Backend(format!("injected failure for {}", remote)));
        }
        let bytes = fs::read(local)?;
        self.remote.lock().unwrap().insert(remote.to_string(), bytes);
        Ok(())
    }

    async fn upload_batch(
        &self,
        local_root: &Path,
        remote_root: &str,
        relative_files: &[String],
    ) -> Result<(), Error> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_batch.load(Ordering::SeqCst) || self.should_fail(remote_root) {
            return Err(Error::Backend("injected batch failure".to_string()));
        }
        let mut remote = self.remote.lock().unwrap();
        for rel in relative_files {
            let bytes = fs::read(local_root.join(rel))?;
            remote.insert(format!("{}/{}", remote_root, rel), bytes);
        }
        Ok(())
    }

    async fn download(&self, remote: &str, local: &Path) -> Result<(), Error> {
        self.download_calls.fetch_add(1, Ordering::SeqCst);
        if self.should_fail(remote) {
            return Err(Error::Backend(format!("injected failure for {}", remote)));
        }
        let bytes = self
            .remote_bytes(remote)
            .ok_or_else(|| Error::Backend(format!("no such remote file: {}", remote)))?;
        if let Some(parent) = local.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(local, bytes)?;
        Ok(())
    }

    async fn download_directory(&self, _remote: &str, _local: &Path) -> Result<(), Error> {
        Ok(())
    }

    async fn list_directories(&self, remote_root: &str) -> Result<Vec<String>, Error> {
        let prefix = format!("{}/", remote_root.trim_end_matches('/'));
        let mut dirs: Vec<String> = self
            .remote
            .lock()
            .unwrap()
            .keys()
            .filter_map(|key| key.strip_prefix(&prefix))
            .filter_map(|rest| rest.split('/').next())
            .map(|name| name.to_string())
            .collect();
        dirs.sort();
        dirs.dedup();
        Ok(dirs)
    }

    async fn rename(&self, remote_old: &str, remote_new: &str) -> Result<(), Error> {
        let mut remote = self.remote.lock().unwrap();
        if let Some(bytes) = remote.remove(remote_old) {
            remote.insert(remote_new.to_string(), bytes);
        }
        Ok(())
    }
}
