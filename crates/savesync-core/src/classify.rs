//! Save-candidate classification.
//!
//! Layered verdict chain, cheapest and most specific first: per-game
//! blacklist, known system/cache directories, junk filenames, junk
//! extensions, substring keywords, transient-file heuristic, then
//! user-configured glob patterns. A path survives only if no layer matches.

use crate::config::IgnoreOverrides;
use dashmap::DashMap;
use glob::Pattern;
use std::collections::HashSet;
use std::env;
use std::path::PathBuf;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub ignored: bool,
    pub reason: Option<&'static str>,
}

impl Verdict {
    fn keep() -> Self {
        Self {
            ignored: false,
            reason: None,
        }
    }

    fn ignore(reason: &'static str) -> Self {
        Self {
            ignored: true,
            reason: Some(reason),
        }
    }
}

pub struct Classifier {
    install_dir: String,
    blacklist: Vec<String>,
    system_dirs: Vec<String>,
    junk_filenames: HashSet<String>,
    junk_extensions: HashSet<String>,
    keywords: Vec<String>,
    patterns: Vec<Pattern>,
    seen: DashMap<String, ()>,
}

impl Classifier {
    /// `blacklist` entries are absolute host paths (the per-game manifest
    /// blacklist, already expanded by the caller). `overrides` extends the
    /// built-in tables.
    pub fn new(
        install_dir: impl Into<String>,
        overrides: &IgnoreOverrides,
        blacklist: Vec<String>,
    ) -> Self {
        let mut system_dirs = default_system_dirs();
        system_dirs.extend(overrides.system_dirs.iter().cloned());

        let mut junk_filenames = default_junk_filenames();
        junk_filenames.extend(overrides.filenames.iter().map(|f| f.to_ascii_lowercase()));

        let mut junk_extensions = default_junk_extensions();
        junk_extensions.extend(overrides.extensions.iter().map(|e| {
            e.trim_start_matches('.').to_ascii_lowercase()
        }));

        let mut keywords = default_keywords();
        keywords.extend(overrides.keywords.iter().map(|k| k.to_ascii_lowercase()));

        let patterns = overrides
            .patterns
            .iter()
            .filter_map(|g| match Pattern::new(g) {
                Ok(p) => Some(p),
                Err(e) => {
                    tracing::error!("Invalid ignore pattern '{}': {}", g, e);
                    None
                }
            })
            .collect();

        Self {
            install_dir: install_dir.into(),
            blacklist,
            system_dirs,
            junk_filenames,
            junk_extensions,
            keywords,
            patterns,
            seen: DashMap::new(),
        }
    }

    pub fn should_ignore(&self, path: &str) -> bool {
        self.classify(path).ignored
    }

    pub fn classify(&self, path: &str) -> Verdict {
        let verdict = self.classify_inner(path);
        if self.seen.insert(path.to_string(), ()).is_none() {
            if let Some(reason) = verdict.reason {
                debug!("Ignoring '{}': {}", path, reason);
            }
        }
        verdict
    }

    fn classify_inner(&self, path: &str) -> Verdict {
        // Our own metadata must never travel as save data.
        if path
            .split(['/', '\\'])
            .any(|segment| segment == crate::manifest::store::MANIFEST_DIR)
        {
            return Verdict::ignore("sync metadata");
        }

        // Blacklist always wins, even for files inside the install directory.
        for entry in &self.blacklist {
            if is_same_or_under(path, entry) {
                return Verdict::ignore("blacklisted");
            }
        }

        // The install directory exempts its contents from the system
        // directory table only; games installed under Program Files must not
        // lose their in-tree saves to an enclosing match.
        if !is_same_or_under(path, &self.install_dir) {
            for dir in &self.system_dirs {
                if is_same_or_under(path, dir) {
                    return Verdict::ignore("system directory");
                }
            }
        }

        let name = file_name(path);
        let lower_name = name.to_ascii_lowercase();

        if self.junk_filenames.contains(&lower_name) {
            return Verdict::ignore("junk filename");
        }

        if let Some(ext) = extension(&lower_name) {
            if self.junk_extensions.contains(ext) {
                return Verdict::ignore("ignored extension");
            }
        }

        let lower_path = path.replace('\\', "/").to_ascii_lowercase();
        for keyword in &self.keywords {
            if lower_path
                .split('/')
                .any(|segment| segment.contains(keyword.as_str()))
            {
                return Verdict::ignore("keyword match");
            }
        }

        if name.starts_with('~') || name.starts_with('.') {
            return Verdict::ignore("transient or hidden file");
        }

        for pattern in &self.patterns {
            if pattern.matches(&lower_path) {
                return Verdict::ignore("ignore pattern");
            }
        }

        Verdict::keep()
    }
}

/// Case-insensitive, separator-agnostic "equals or is under" test on a
/// component boundary — never a bare substring match.
pub fn is_same_or_under(path: &str, root: &str) -> bool {
    let norm_path = normalize(path);
    let norm_root = normalize(root);
    if norm_root.is_empty() {
        return false;
    }
    norm_path == norm_root
        || (norm_path.starts_with(&norm_root)
            && norm_path.as_bytes().get(norm_root.len()) == Some(&b'/'))
}

fn normalize(s: &str) -> String {
    s.replace('\\', "/")
        .trim_end_matches('/')
        .to_ascii_lowercase()
}

fn file_name(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

fn extension(lower_name: &str) -> Option<&str> {
    match lower_name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => Some(ext),
        _ => None,
    }
}

fn default_junk_filenames() -> HashSet<String> {
    [
        "desktop.ini",
        "thumbs.db",
        ".ds_store",
        "steam_autocloud.vdf",
        "installscript.vdf",
        "unins000.dat",
        "unins000.exe",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_junk_extensions() -> HashSet<String> {
    [
        "tmp", "temp", "log", "dmp", "mdmp", "pdb", "lock", "part", "crdownload",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_keywords() -> Vec<String> {
    ["cache", "shader", "crash", "telemetry"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// Known non-save locations on this host: OS temp, browser caches, GPU
/// shader caches, platform-client logs.
fn default_system_dirs() -> Vec<String> {
    let mut dirs_list = vec![env::temp_dir().to_string_lossy().into_owned()];

    let mut push_under = |base: Option<PathBuf>, subs: &[&str]| {
        if let Some(base) = base {
            for sub in subs {
                dirs_list.push(base.join(sub).to_string_lossy().into_owned());
            }
        }
    };

    push_under(
        dirs::data_local_dir(),
        &[
            "NVIDIA",
            "AMD",
            "D3DSCache",
            "CrashDumps",
            "Google/Chrome/User Data",
            "Mozilla/Firefox",
        ],
    );
    push_under(dirs::cache_dir(), &[""]);
    push_under(
        dirs::config_dir(),
        &["Microsoft/Windows/Recent"],
    );

    if let Ok(pf) = env::var("ProgramFiles(x86)") {
        let steam = PathBuf::from(pf).join("Steam");
        dirs_list.push(steam.join("logs").to_string_lossy().into_owned());
        dirs_list.push(steam.join("dumps").to_string_lossy().into_owned());
        dirs_list.push(
            steam
                .join("steamapps/shadercache")
                .to_string_lossy()
                .into_owned(),
        );
    }

    dirs_list.retain(|d| !d.is_empty());
    dirs_list
}
