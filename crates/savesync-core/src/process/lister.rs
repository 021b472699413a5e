//! Process enumeration behind a narrow trait, so the tracker never depends
//! on one OS mechanism. The preferred implementation uses `sysinfo`; on
//! Linux a `/proc` walk serves as the universally-available fallback.

use crate::error::Error;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use sysinfo::{Pid, ProcessRefreshKind, System, UpdateKind};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct ProcessInfo {
    pub pid: u32,
    pub parent_pid: Option<u32>,
    pub exe: Option<PathBuf>,
}

pub trait ProcessLister: Send + Sync {
    fn list_processes(&self) -> Result<Vec<ProcessInfo>, Error>;
    fn executable_path(&self, pid: u32) -> Option<PathBuf>;
}

/// `sysinfo`-backed lister. Holds its own `System` so repeated refreshes
/// reuse allocations.
pub struct SysinfoLister {
    sys: Mutex<System>,
}

impl SysinfoLister {
    pub fn new() -> Self {
        Self {
            sys: Mutex::new(System::new()),
        }
    }
}

impl Default for SysinfoLister {
    fn default() -> Self {
        Self::new()
    }
}

// Executable paths are opt-in; a bare refresh leaves `exe()` unset.
fn refresh_kind() -> ProcessRefreshKind {
    ProcessRefreshKind::new().with_exe(UpdateKind::OnlyIfNotSet)
}

impl ProcessLister for SysinfoLister {
    fn list_processes(&self) -> Result<Vec<ProcessInfo>, Error> {
        let mut sys = self
            .sys
            .lock()
            .map_err(|e| Error::Other(format!("process lister poisoned: {}", e)))?;
        sys.refresh_processes_specifics(refresh_kind());

        let processes = sys
            .processes()
            .iter()
            .map(|(pid, process)| ProcessInfo {
                pid: pid.as_u32(),
                parent_pid: process.parent().map(|p| p.as_u32()),
                exe: process.exe().map(|p| p.to_path_buf()),
            })
            .collect();
        Ok(processes)
    }

    fn executable_path(&self, pid: u32) -> Option<PathBuf> {
        let mut sys = self.sys.lock().ok()?;
        sys.refresh_processes_specifics(refresh_kind());
        sys.process(Pid::from_u32(pid))
            .and_then(|p| p.exe().map(|e| e.to_path_buf()))
    }
}

/// `/proc` walk fallback. Slower, but available even when the preferred
/// mechanism fails outright.
#[cfg(target_os = "linux")]
pub struct ProcfsLister;

#[cfg(target_os = "linux")]
impl ProcessLister for ProcfsLister {
    fn list_processes(&self) -> Result<Vec<ProcessInfo>, Error> {
        let mut processes = Vec::new();
        for entry in std::fs::read_dir("/proc")? {
            // One inaccessible process must not abort the scan.
            let Ok(entry) = entry else { continue };
            let Some(pid) = entry
                .file_name()
                .to_str()
                .and_then(|name| name.parse::<u32>().ok())
            else {
                continue;
            };
            let parent_pid = read_ppid(pid);
            let exe = std::fs::read_link(format!("/proc/{}/exe", pid)).ok();
            processes.push(ProcessInfo {
                pid,
                parent_pid,
                exe,
            });
        }
        Ok(processes)
    }

    fn executable_path(&self, pid: u32) -> Option<PathBuf> {
        std::fs::read_link(format!("/proc/{}/exe", pid)).ok()
    }
}

#[cfg(target_os = "linux")]
fn read_ppid(pid: u32) -> Option<u32> {
    let stat = std::fs::read_to_string(format!("/proc/{}/stat", pid)).ok()?;
    // Field 4, counted after the parenthesized comm which may contain spaces.
    let after_comm = stat.rsplit_once(')')?.1;
    after_comm.split_whitespace().nth(1)?.parse().ok()
}

/// Tries each lister in order; the first non-empty successful listing wins.
pub struct ChainLister {
    listers: Vec<Box<dyn ProcessLister>>,
}

impl ChainLister {
    pub fn new(listers: Vec<Box<dyn ProcessLister>>) -> Self {
        Self { listers }
    }
}

impl ProcessLister for ChainLister {
    fn list_processes(&self) -> Result<Vec<ProcessInfo>, Error> {
        let mut last_err = Error::Other("no process lister available".to_string());
        for lister in &self.listers {
            match lister.list_processes() {
                Ok(processes) if !processes.is_empty() => return Ok(processes),
                Ok(_) => continue,
                Err(e) => {
                    debug!("Process lister failed, trying next: {}", e);
                    last_err = e;
                }
            }
        }
        Err(last_err)
    }

    fn executable_path(&self, pid: u32) -> Option<PathBuf> {
        self.listers.iter().find_map(|l| l.executable_path(pid))
    }
}

/// Platform-selected default: `sysinfo`, with a `/proc` walk behind it on
/// Linux.
pub fn default_lister() -> Arc<dyn ProcessLister> {
    #[cfg(target_os = "linux")]
    {
        Arc::new(ChainLister::new(vec![
            Box::new(SysinfoLister::new()),
            Box::new(ProcfsLister),
        ]))
    }
    #[cfg(not(target_os = "linux"))]
    {
        Arc::new(SysinfoLister::new())
    }
}
