use savesync_core::error::Error;
use savesync_core::process::{ProcessInfo, ProcessLister, ProcessTracker};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

const INSTALL_DIR: &str = "/games/foo";

struct MockLister {
    processes: Mutex<Vec<ProcessInfo>>,
    fail: AtomicBool,
}

impl MockLister {
    fn new(processes: Vec<ProcessInfo>) -> Arc<Self> {
        Arc::new(Self {
            processes: Mutex::new(processes),
            fail: AtomicBool::new(false),
        })
    }

    fn set_processes(&self, processes: Vec<ProcessInfo>) {
        *self.processes.lock().unwrap() = processes;
    }

    fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

impl ProcessLister for MockLister {
    fn list_processes(&self) -> Result<Vec<ProcessInfo>, Error> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Other("enumeration unavailable".to_string()));
        }
        Ok(self.processes.lock().unwrap().clone())
    }

    fn executable_path(&self, pid: u32) -> Option<PathBuf> {
        self.processes
            .lock()
            .unwrap()
            .iter()
            .find(|p| p.pid == pid)
            .and_then(|p| p.exe.clone())
    }
}

fn proc(pid: u32, parent: Option<u32>, exe: &str) -> ProcessInfo {
    ProcessInfo {
        pid,
        parent_pid: parent,
        exe: Some(PathBuf::from(exe)),
    }
}

#[test]
fn test_inheritance_rule_beats_install_directory() {
    // The child runs a shared runtime from outside the install directory;
    // its tracked parent is what makes it part of the session.
    let lister = MockLister::new(vec![proc(200, Some(100), "/usr/lib/runtime/helper")]);
    let tracker = ProcessTracker::new(INSTALL_DIR, lister);

    tracker.add_explicitly_tracked_pid(100);
    tracker.handle_new_process(200, Some(100));
    assert!(tracker.is_tracked(200));
}

#[test]
fn test_install_directory_rule_as_fallback() {
    let lister = MockLister::new(vec![proc(300, Some(1), "/games/foo/bin/game")]);
    let tracker = ProcessTracker::new(INSTALL_DIR, lister);

    // Parent 1 is not tracked; the executable location is what matches.
    tracker.handle_new_process(300, Some(1));
    assert!(tracker.is_tracked(300));
}

#[test]
fn test_unrelated_process_not_tracked() {
    let lister = MockLister::new(vec![proc(400, Some(1), "/usr/bin/editor")]);
    let tracker = ProcessTracker::new(INSTALL_DIR, lister);

    tracker.handle_new_process(400, Some(1));
    assert!(!tracker.is_tracked(400));
}

#[test]
fn test_process_exit_removes_tracking() {
    let lister = MockLister::new(Vec::new());
    let tracker = ProcessTracker::new(INSTALL_DIR, lister);

    tracker.add_explicitly_tracked_pid(100);
    assert!(tracker.is_tracked(100));
    tracker.handle_process_exit(100);
    assert!(!tracker.is_tracked(100));
}

#[test]
fn test_explicit_pid_bypasses_both_rules() {
    let lister = MockLister::new(Vec::new());
    let tracker = ProcessTracker::new(INSTALL_DIR, lister);

    // No process info at all; the external signal alone is enough.
    tracker.add_explicitly_tracked_pid(999);
    assert!(tracker.is_tracked(999));
}

#[test]
fn test_directory_scan_finds_running_processes() {
    let lister = MockLister::new(vec![
        proc(10, Some(1), "/games/foo/game.exe"),
        proc(11, Some(1), "/games/foo/tools/overlay.exe"),
        proc(12, Some(1), "/usr/bin/other"),
    ]);
    let tracker = ProcessTracker::new(INSTALL_DIR, lister);

    let added = tracker.scan_for_processes_in_directory();
    assert_eq!(added, 2);
    assert!(tracker.is_tracked(10));
    assert!(tracker.is_tracked(11));
    assert!(!tracker.is_tracked(12));
}

#[test]
fn test_directory_scan_survives_enumeration_failure() {
    let lister = MockLister::new(Vec::new());
    lister.set_fail(true);
    let tracker = ProcessTracker::new(INSTALL_DIR, Arc::clone(&lister) as Arc<dyn ProcessLister>);

    assert_eq!(tracker.scan_for_processes_in_directory(), 0);
    assert_eq!(tracker.tracked_count(), 0);
}

#[test]
fn test_child_scan_is_transitive() {
    let lister = MockLister::new(vec![
        proc(100, Some(1), "/games/foo/game.exe"),
        proc(200, Some(100), "/usr/lib/launcher"),
        proc(300, Some(200), "/usr/lib/worker"),
    ]);
    let tracker = ProcessTracker::new(INSTALL_DIR, lister);

    tracker.add_explicitly_tracked_pid(100);
    let added = tracker.scan_for_children(100);
    assert_eq!(added, 2);
    assert!(tracker.is_tracked(200));
    assert!(tracker.is_tracked(300));
}

#[test]
fn test_initialize_seeds_and_scans() {
    let lister = MockLister::new(vec![
        proc(100, Some(1), "/games/foo/game.exe"),
        proc(101, Some(100), "/usr/lib/helper"),
        proc(102, Some(1), "/games/foo/launcher.exe"),
    ]);
    let tracker = ProcessTracker::new(INSTALL_DIR, lister);

    tracker.initialize(100);
    assert!(tracker.is_tracked(100));
    assert!(tracker.is_tracked(101));
    assert!(tracker.is_tracked(102));
}

#[test]
fn test_prune_exited() {
    let lister = MockLister::new(vec![proc(100, Some(1), "/games/foo/game.exe")]);
    let tracker = ProcessTracker::new(INSTALL_DIR, Arc::clone(&lister) as Arc<dyn ProcessLister>);

    tracker.add_explicitly_tracked_pid(100);
    tracker.add_explicitly_tracked_pid(200);

    let exited = tracker.prune_exited();
    assert_eq!(exited, vec![200]);
    assert!(tracker.is_tracked(100));
    assert!(!tracker.is_tracked(200));

    // Enumeration failure must not end the session by pruning everything.
    lister.set_fail(true);
    assert!(tracker.prune_exited().is_empty());
    assert!(tracker.is_tracked(100));
}
