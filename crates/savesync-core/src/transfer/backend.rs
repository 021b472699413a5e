//! Transfer backend contract and the external-CLI implementation.
//!
//! The orchestrator only ever sees this trait; the concrete tool behind it
//! is a black box that either succeeds or fails per call. Every operation
//! carries its own timeout, and a tool run that outlives its timeout is
//! killed rather than left running.

use crate::config::BackendConfig;
use crate::error::Error;
use async_trait::async_trait;
use std::io::Write;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, trace};

#[async_trait]
pub trait TransferBackend: Send + Sync {
    async fn exists(&self, remote: &str) -> Result<bool, Error>;
    async fn upload(&self, local: &Path, remote: &str) -> Result<(), Error>;
    /// Batched transfer of files sharing one local root; the backend copies
    /// every listed relative path under `remote_root` in a single call.
    async fn upload_batch(
        &self,
        local_root: &Path,
        remote_root: &str,
        relative_files: &[String],
    ) -> Result<(), Error>;
    async fn download(&self, remote: &str, local: &Path) -> Result<(), Error>;
    async fn download_directory(&self, remote: &str, local: &Path) -> Result<(), Error>;
    async fn list_directories(&self, remote_root: &str) -> Result<Vec<String>, Error>;
    async fn rename(&self, remote_old: &str, remote_new: &str) -> Result<(), Error>;
}

/// Backend that shells out to an rclone-style transfer tool.
pub struct CliBackend {
    config: BackendConfig,
}

impl CliBackend {
    pub fn new(config: BackendConfig) -> Self {
        Self { config }
    }

    async fn run(
        &self,
        op: &'static str,
        args: &[&str],
        timeout_secs: u64,
    ) -> Result<std::process::Output, Error> {
        trace!("Backend {}: {} {:?}", op, self.config.program, args);
        let child = Command::new(&self.config.program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Dropping the future on timeout kills the tool; a hung transfer
            // must not outlive its budget.
            .kill_on_drop(true)
            .spawn()?;

        let output = match tokio::time::timeout(
            Duration::from_secs(timeout_secs),
            child.wait_with_output(),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => {
                return Err(Error::Timeout {
                    op,
                    secs: timeout_secs,
                })
            }
        };

        if output.status.success() {
            Ok(output)
        } else {
            Err(Error::Backend(format!(
                "{} failed ({}): {}",
                op,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }
}

#[async_trait]
impl TransferBackend for CliBackend {
    async fn exists(&self, remote: &str) -> Result<bool, Error> {
        match self
            .run("exists", &["lsf", remote], self.config.list_timeout_secs)
            .await
        {
            Ok(output) => Ok(!String::from_utf8_lossy(&output.stdout).trim().is_empty()),
            Err(Error::Timeout { op, secs }) => Err(Error::Timeout { op, secs }),
            Err(e) => {
                // The tool reports a missing remote path as a failed listing.
                debug!("exists('{}') treated as absent: {}", remote, e);
                Ok(false)
            }
        }
    }

    async fn upload(&self, local: &Path, remote: &str) -> Result<(), Error> {
        let local = local.to_string_lossy();
        self.run(
            "upload",
            &["copyto", &local, remote],
            self.config.upload_timeout_secs,
        )
        .await
        .map(|_| ())
    }

    async fn upload_batch(
        &self,
        local_root: &Path,
        remote_root: &str,
        relative_files: &[String],
    ) -> Result<(), Error> {
        // The tool's copy-by-file-list mode reads relative paths from a file.
        let mut list_file = tempfile::NamedTempFile::new()?;
        for rel in relative_files {
            writeln!(list_file, "{}", rel)?;
        }
        list_file.flush()?;

        let local_root = local_root.to_string_lossy();
        let list_path = list_file.path().to_string_lossy().into_owned();
        self.run(
            "upload_batch",
            &[
                "copy",
                &local_root,
                remote_root,
                "--files-from",
                &list_path,
            ],
            self.config.upload_timeout_secs,
        )
        .await
        .map(|_| ())
    }

    async fn download(&self, remote: &str, local: &Path) -> Result<(), Error> {
        if let Some(parent) = local.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let local = local.to_string_lossy();
        self.run(
            "download",
            &["copyto", remote, &local],
            self.config.download_timeout_secs,
        )
        .await
        .map(|_| ())
    }

    async fn download_directory(&self, remote: &str, local: &Path) -> Result<(), Error> {
        tokio::fs::create_dir_all(local).await?;
        let local = local.to_string_lossy();
        self.run(
            "download_directory",
            &["copy", remote, &local],
            self.config.download_timeout_secs,
        )
        .await
        .map(|_| ())
    }

    async fn list_directories(&self, remote_root: &str) -> Result<Vec<String>, Error> {
        let output = self
            .run(
                "list_directories",
                &["lsf", "--dirs-only", remote_root],
                self.config.list_timeout_secs,
            )
            .await?;
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(|line| line.trim_end_matches('/').to_string())
            .filter(|line| !line.is_empty())
            .collect())
    }

    async fn rename(&self, remote_old: &str, remote_new: &str) -> Result<(), Error> {
        self.run(
            "rename",
            &["moveto", remote_old, remote_new],
            self.config.list_timeout_secs,
        )
        .await
        .map(|_| ())
    }
}
