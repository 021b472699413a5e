//! Parallel directory traversal over the watched save roots.

use dashmap::DashMap;
use rayon::prelude::*;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::error;

/// Collect regular files under the given roots, optionally only those
/// modified at or after `since`. Skips symlinks. Inaccessible directories
/// are logged and skipped; one unreadable subtree must not abort the scan.
pub fn collect_files(
    roots: &[String],
    since: Option<SystemTime>,
) -> io::Result<Vec<PathBuf>> {
    let found: DashMap<PathBuf, ()> = DashMap::new();

    roots
        .par_iter()
        .try_for_each(|root| visit_dirs(Path::new(root), &found, since))?;

    Ok(found.into_iter().map(|(path, ())| path).collect())
}

fn visit_dirs(
    dir: &Path,
    found: &DashMap<PathBuf, ()>,
    since: Option<SystemTime>,
) -> io::Result<()> {
    if !dir.is_dir() {
        return Ok(());
    }

    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            // One unreadable subtree must not abort the run.
            error!("Error reading directory {}: {}", dir.display(), err);
            return Ok(());
        }
    };

    entries.par_bridge().try_for_each(|entry_result| -> io::Result<()> {
        let entry = match entry_result {
            Ok(entry) => entry,
            Err(err) => {
                error!("Error reading entry in {}: {}", dir.display(), err);
                return Ok(());
            }
        };

        let path = entry.path();
        let metadata = match fs::symlink_metadata(&path) {
            Ok(metadata) => metadata,
            Err(err) => {
                // The tracked game may delete files mid-scan.
                error!("Error getting metadata for {}: {}", path.display(), err);
                return Ok(());
            }
        };

        if metadata.file_type().is_symlink() {
            return Ok(());
        }

        if metadata.is_dir() {
            visit_dirs(&path, found, since)?;
        } else if metadata.is_file() {
            let include = match since {
                Some(cutoff) => metadata
                    .modified()
                    .map(|modified| modified >= cutoff)
                    .unwrap_or(true),
                None => true,
            };
            if include {
                found.insert(path, ());
            }
        }
        Ok(())
    })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use std::time::Duration;
    use tempfile::tempdir;

    #[test]
    fn test_collects_nested_files() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("a/b")).unwrap();
        fs::write(dir.path().join("top.sav"), b"x").unwrap();
        fs::write(dir.path().join("a/mid.sav"), b"x").unwrap();
        fs::write(dir.path().join("a/b/deep.sav"), b"x").unwrap();

        let files = collect_files(
            &[dir.path().to_string_lossy().into_owned()],
            None,
        )
        .unwrap();
        assert_eq!(files.len(), 3);
    }

    #[test]
    fn test_modified_since_filter() {
        let dir = tempdir().unwrap();
        let old = dir.path().join("old.sav");
        let mut f = File::create(&old).unwrap();
        f.write_all(b"old").unwrap();
        drop(f);
        let old_time = SystemTime::now() - Duration::from_secs(3600);
        filetime::set_file_mtime(
            &old,
            filetime::FileTime::from_system_time(old_time),
        )
        .unwrap();

        let cutoff = SystemTime::now() - Duration::from_secs(60);
        fs::write(dir.path().join("fresh.sav"), b"fresh").unwrap();

        let files = collect_files(
            &[dir.path().to_string_lossy().into_owned()],
            Some(cutoff),
        )
        .unwrap();
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("fresh.sav"));
    }

    #[test]
    #[cfg(unix)]
    fn test_unreadable_subtree_does_not_abort_the_scan() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        fs::write(dir.path().join("ok.sav"), b"x").unwrap();
        let locked = dir.path().join("locked");
        fs::create_dir(&locked).unwrap();
        fs::write(locked.join("hidden.sav"), b"x").unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();

        let result = collect_files(&[dir.path().to_string_lossy().into_owned()], None);
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

        let files = result.unwrap();
        assert!(files.iter().any(|f| f.ends_with("ok.sav")));
    }

    #[test]
    fn test_missing_root_is_empty() {
        let files = collect_files(&["/nonexistent/savesync/root".to_string()], None).unwrap();
        assert!(files.is_empty());
    }
}
