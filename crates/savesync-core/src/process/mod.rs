//! Game-session process tracking.
//!
//! The tracked set starts from the process that launched the game and grows
//! by two rules, checked in order: a process whose parent is already tracked
//! is tracked (inheritance — cheap and reliable even when a child runs a
//! shared runtime from elsewhere), otherwise a process whose executable
//! lives under the install directory is tracked (catches children handed off
//! to a platform client). Periodic rescans cover processes that were never
//! announced individually.

pub mod lister;

pub use lister::{default_lister, ChainLister, ProcessInfo, ProcessLister, SysinfoLister};

use crate::classify::is_same_or_under;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tracing::{debug, error};

pub struct ProcessTracker {
    install_dir: String,
    lister: Arc<dyn ProcessLister>,
    tracked: Mutex<HashSet<u32>>,
}

impl ProcessTracker {
    pub fn new(install_dir: impl Into<String>, lister: Arc<dyn ProcessLister>) -> Self {
        Self {
            install_dir: install_dir.into(),
            lister,
            tracked: Mutex::new(HashSet::new()),
        }
    }

    /// Seed tracking with the root process, then pick up already-running
    /// related processes via a directory scan and a child scan.
    pub fn initialize(&self, root_pid: u32) {
        self.lock().insert(root_pid);
        self.scan_for_processes_in_directory();
        self.scan_for_children(root_pid);
    }

    /// Inheritance rule first, install-directory rule as fallback.
    pub fn handle_new_process(&self, pid: u32, parent_pid: Option<u32>) {
        {
            let mut tracked = self.lock();
            if let Some(parent) = parent_pid {
                if tracked.contains(&parent) {
                    if tracked.insert(pid) {
                        debug!("Tracking pid {} (child of tracked {})", pid, parent);
                    }
                    return;
                }
            }
            if tracked.contains(&pid) {
                return;
            }
        }

        // Executable lookup can race with process exit; a miss just means
        // this process is not tracked.
        if let Some(exe) = self.lister.executable_path(pid) {
            if is_same_or_under(&exe.to_string_lossy(), &self.install_dir) {
                if self.lock().insert(pid) {
                    debug!("Tracking pid {} (runs from install directory)", pid);
                }
            }
        }
    }

    pub fn handle_process_exit(&self, pid: u32) {
        if self.lock().remove(&pid) {
            debug!("Pid {} exited, no longer tracked", pid);
        }
    }

    pub fn is_tracked(&self, pid: u32) -> bool {
        self.lock().contains(&pid)
    }

    /// External signal (e.g. a platform launcher reporting its child)
    /// bypasses both rules.
    pub fn add_explicitly_tracked_pid(&self, pid: u32) {
        if self.lock().insert(pid) {
            debug!("Tracking pid {} (explicit)", pid);
        }
    }

    pub fn tracked_count(&self) -> usize {
        self.lock().len()
    }

    /// Full enumeration pass: track every process running from the install
    /// directory. Compensates for platforms where no per-process start
    /// notification exists. Returns the number of newly tracked processes.
    pub fn scan_for_processes_in_directory(&self) -> usize {
        let processes = match self.lister.list_processes() {
            Ok(processes) => processes,
            Err(e) => {
                error!("Process enumeration failed: {}", e);
                return 0;
            }
        };

        let mut tracked = self.lock();
        let mut added = 0usize;
        for info in &processes {
            if tracked.contains(&info.pid) {
                continue;
            }
            if let Some(exe) = &info.exe {
                if is_same_or_under(&exe.to_string_lossy(), &self.install_dir)
                    && tracked.insert(info.pid)
                {
                    debug!("Tracking pid {} found in install directory", info.pid);
                    added += 1;
                }
            }
        }
        added
    }

    /// Track descendants of `pid`, transitively. Closes the race where a
    /// child spawns before live process events are subscribed.
    pub fn scan_for_children(&self, pid: u32) -> usize {
        let processes = match self.lister.list_processes() {
            Ok(processes) => processes,
            Err(e) => {
                error!("Process enumeration failed: {}", e);
                return 0;
            }
        };

        let mut tracked = self.lock();
        if !tracked.contains(&pid) {
            return 0;
        }

        let mut added = 0usize;
        loop {
            let mut changed = false;
            for info in &processes {
                if tracked.contains(&info.pid) {
                    continue;
                }
                if let Some(parent) = info.parent_pid {
                    if tracked.contains(&parent) && tracked.insert(info.pid) {
                        debug!("Tracking pid {} (descendant of {})", info.pid, pid);
                        added += 1;
                        changed = true;
                    }
                }
            }
            if !changed {
                break;
            }
        }
        added
    }

    /// Drop tracked pids that no longer appear in the process list. Returns
    /// the pids removed. On enumeration failure nothing is dropped — a
    /// transient failure must not end the session.
    pub fn prune_exited(&self) -> Vec<u32> {
        let processes = match self.lister.list_processes() {
            Ok(processes) => processes,
            Err(e) => {
                error!("Process enumeration failed: {}", e);
                return Vec::new();
            }
        };
        let alive: HashSet<u32> = processes.iter().map(|p| p.pid).collect();

        let mut tracked = self.lock();
        let exited: Vec<u32> = tracked.iter().copied().filter(|p| !alive.contains(p)).collect();
        for pid in &exited {
            tracked.remove(pid);
            debug!("Pid {} exited, no longer tracked", pid);
        }
        exited
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashSet<u32>> {
        // Tracked-set mutations never panic while holding the lock.
        self.tracked.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
