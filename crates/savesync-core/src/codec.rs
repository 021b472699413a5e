//! Portable path encoding.
//!
//! Manifest keys are never raw OS paths: each recognized root (the game's
//! install directory, the well-known OS special folders, and the emulation
//! layer's mapped drives) is replaced by a token so the manifest can be
//! replayed on a different machine. The stored form always uses `\` as the
//! separator; matching is case-insensitive and separator-agnostic.

use std::env;

pub const TOKEN_GAMEPATH: &str = "%GAMEPATH%";
pub const TOKEN_USERPROFILE: &str = "%USERPROFILE%";
pub const TOKEN_APPDATA: &str = "%APPDATA%";
pub const TOKEN_LOCALAPPDATA: &str = "%LOCALAPPDATA%";
pub const TOKEN_DOCUMENTS: &str = "%DOCUMENTS%";
pub const TOKEN_TEMP: &str = "%TEMP%";
pub const TOKEN_PROGRAMFILES: &str = "%PROGRAMFILES%";
pub const TOKEN_PROGRAMFILES_X86: &str = "%PROGRAMFILES(X86)%";
pub const TOKEN_ROOTDRIVE: &str = "%ROOTDRIVE%";

/// Compatibility-layer prefix (e.g. a Wine prefix). Paths under
/// `<prefix>/drive_c` are translated into the same tokens a native install
/// would produce, so manifests written under emulation and natively
/// interoperate.
#[derive(Debug, Clone)]
pub struct EmulationPrefix {
    prefix: String,
    username: String,
}

impl EmulationPrefix {
    pub fn new(prefix: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            username: username.into(),
        }
    }

    pub fn detect_username(prefix: impl Into<String>) -> Self {
        let username = env::var("USER")
            .or_else(|_| env::var("USERNAME"))
            .unwrap_or_else(|_| "steamuser".to_string());
        Self::new(prefix, username)
    }

    /// Sub-mappings under the emulated `users/<name>` tree, longest first so
    /// `AppData/Local/Temp` wins over `AppData/Local`.
    const USER_SUBDIRS: &'static [(&'static str, &'static str)] = &[
        ("AppData/Local/Temp", TOKEN_TEMP),
        ("AppData/Local", TOKEN_LOCALAPPDATA),
        ("AppData/Roaming", TOKEN_APPDATA),
        ("My Documents", TOKEN_DOCUMENTS),
        ("Documents", TOKEN_DOCUMENTS),
    ];

    fn contract(&self, path: &str) -> Option<String> {
        let rest = strip_prefix_ci(path, &self.prefix)?;
        if rest.is_empty() {
            return Some(TOKEN_ROOTDRIVE.to_string());
        }

        if let Some(under_c) = strip_prefix_ci(&rest, "drive_c") {
            if let Some(under_users) = strip_prefix_ci(&under_c, "users") {
                // First component is the emulated account name; mappings are
                // relative to whatever name the path actually carries.
                if let Some((_, in_profile)) = split_first_component(&under_users) {
                    for (sub, token) in Self::USER_SUBDIRS {
                        if let Some(rem) = strip_prefix_ci(&in_profile, sub) {
                            return Some(join_portable(token, &rem));
                        }
                    }
                    return Some(join_portable(TOKEN_USERPROFILE, &in_profile));
                }
            }
            return Some(join_portable(TOKEN_ROOTDRIVE, &under_c));
        }

        // Inside the prefix but not a mapped drive (dosdevices, registry
        // hives): generic root-drive token.
        Some(join_portable(TOKEN_ROOTDRIVE, &rest))
    }

    fn expand(&self, token: &str, remainder: &str) -> Option<String> {
        let target = match token {
            TOKEN_ROOTDRIVE => format!("{}/drive_c", self.prefix),
            TOKEN_USERPROFILE => format!("{}/drive_c/users/{}", self.prefix, self.username),
            TOKEN_APPDATA => format!(
                "{}/drive_c/users/{}/AppData/Roaming",
                self.prefix, self.username
            ),
            TOKEN_LOCALAPPDATA => format!(
                "{}/drive_c/users/{}/AppData/Local",
                self.prefix, self.username
            ),
            TOKEN_TEMP => format!(
                "{}/drive_c/users/{}/AppData/Local/Temp",
                self.prefix, self.username
            ),
            TOKEN_DOCUMENTS => format!(
                "{}/drive_c/users/{}/Documents",
                self.prefix, self.username
            ),
            _ => return None,
        };
        Some(join_native(&target, remainder))
    }
}

/// Converts between absolute OS paths and the token form stored in the
/// manifest. Holds no mutable state; build a new codec to retarget it.
#[derive(Debug, Clone)]
pub struct PathCodec {
    install_dir: String,
    emulation: Option<EmulationPrefix>,
    roots: Vec<(&'static str, String)>,
}

impl PathCodec {
    pub fn new(install_dir: impl Into<String>, emulation: Option<EmulationPrefix>) -> Self {
        Self::with_roots(install_dir, emulation, host_roots())
    }

    /// Root table injection point for tests and non-standard environments.
    pub fn with_roots(
        install_dir: impl Into<String>,
        emulation: Option<EmulationPrefix>,
        mut roots: Vec<(&'static str, String)>,
    ) -> Self {
        // Longest-first so a nested root (AppData under the user profile)
        // can never be shadowed by its parent.
        roots.sort_by(|a, b| b.1.len().cmp(&a.1.len()));
        Self {
            install_dir: install_dir.into(),
            emulation,
            roots,
        }
    }

    pub fn install_dir(&self) -> &str {
        &self.install_dir
    }

    /// Absolute path → portable token form. Unrecognized paths pass through
    /// unchanged; a record is never dropped just because its root is unknown.
    pub fn contract(&self, path: &str) -> String {
        if let Some(rem) = strip_prefix_ci(path, &self.install_dir) {
            return join_portable(TOKEN_GAMEPATH, &rem);
        }

        if let Some(emu) = &self.emulation {
            if let Some(portable) = emu.contract(path) {
                return portable;
            }
        }

        for (token, root) in &self.roots {
            if let Some(rem) = strip_prefix_ci(path, root) {
                return join_portable(token, &rem);
            }
        }

        path.to_string()
    }

    /// Portable token form → absolute path on this machine. Strings without
    /// a recognized leading token pass through unchanged.
    pub fn expand(&self, portable: &str) -> String {
        let Some((token, remainder)) = split_token(portable) else {
            return portable.to_string();
        };

        if token == TOKEN_GAMEPATH {
            return join_native(&self.install_dir, remainder);
        }

        if let Some(emu) = &self.emulation {
            if let Some(expanded) = emu.expand(token, remainder) {
                return expanded;
            }
        }

        if token == TOKEN_ROOTDRIVE {
            return join_native("C:", remainder);
        }

        for (root_token, root) in &self.roots {
            if *root_token == token {
                return join_native(root, remainder);
            }
        }

        portable.to_string()
    }
}

/// Two portable paths are equal iff token and remainder match
/// case-insensitively, regardless of separator style.
pub fn portable_eq(a: &str, b: &str) -> bool {
    normalize_for_match(a) == normalize_for_match(b)
}

pub fn is_portable(s: &str) -> bool {
    split_token(s).is_some()
}

/// Host special-folder table. Entries whose location cannot be resolved on
/// this machine are simply absent.
pub fn host_roots() -> Vec<(&'static str, String)> {
    let mut roots = Vec::new();

    let mut push = |token: &'static str, path: Option<std::path::PathBuf>| {
        if let Some(p) = path {
            roots.push((token, p.to_string_lossy().into_owned()));
        }
    };

    push(TOKEN_TEMP, Some(env::temp_dir()));
    push(TOKEN_APPDATA, dirs::config_dir());
    push(TOKEN_LOCALAPPDATA, dirs::data_local_dir());
    push(TOKEN_DOCUMENTS, dirs::document_dir());
    push(TOKEN_USERPROFILE, dirs::home_dir());
    push(
        TOKEN_PROGRAMFILES,
        env::var("ProgramFiles").ok().map(Into::into),
    );
    push(
        TOKEN_PROGRAMFILES_X86,
        env::var("ProgramFiles(x86)").ok().map(Into::into),
    );

    roots
}

fn normalize_for_match(s: &str) -> String {
    s.replace('\\', "/")
        .trim_end_matches('/')
        .to_ascii_lowercase()
}

/// Case-insensitive, separator-agnostic prefix strip. Returns the remainder
/// with its original bytes (empty when the path equals the prefix), and only
/// matches on a component boundary.
fn strip_prefix_ci(path: &str, prefix: &str) -> Option<String> {
    let norm_path = path.replace('\\', "/").to_ascii_lowercase();
    let norm_prefix = {
        let p = prefix.replace('\\', "/").to_ascii_lowercase();
        p.trim_end_matches('/').to_string()
    };
    if norm_prefix.is_empty() {
        return None;
    }

    if norm_path == norm_prefix {
        return Some(String::new());
    }

    if norm_path.starts_with(&norm_prefix)
        && norm_path.as_bytes().get(norm_prefix.len()) == Some(&b'/')
    {
        // ASCII lowercasing and separator replacement are both 1:1 on bytes,
        // so indices into the normalized string are valid in the original.
        let rem = &path[norm_prefix.len() + 1..];
        let rem = rem.trim_start_matches(['/', '\\']);
        return Some(rem.to_string());
    }

    None
}

fn split_first_component(s: &str) -> Option<(String, String)> {
    if s.is_empty() {
        return None;
    }
    match s.find(['/', '\\']) {
        Some(idx) => {
            let rest = s[idx + 1..].trim_start_matches(['/', '\\']);
            Some((s[..idx].to_string(), rest.to_string()))
        }
        None => Some((s.to_string(), String::new())),
    }
}

/// Leading `%TOKEN%` of a portable string, plus the remainder after its
/// separator.
fn split_token(s: &str) -> Option<(&str, &str)> {
    if !s.starts_with('%') {
        return None;
    }
    let end = s[1..].find('%')? + 1;
    let token = &s[..=end];
    let rest = &s[end + 1..];
    let rest = rest.trim_start_matches(['/', '\\']);
    Some((token, rest))
}

fn join_portable(token: &str, remainder: &str) -> String {
    if remainder.is_empty() {
        token.to_string()
    } else {
        format!("{}\\{}", token, remainder.replace('/', "\\"))
    }
}

/// Join using the separator style of the target root, so expansion against
/// `C:\Games\Foo` yields backslashes and `/home/user/game` yields slashes.
fn join_native(root: &str, remainder: &str) -> String {
    let root = root.trim_end_matches(['/', '\\']);
    if remainder.is_empty() {
        return root.to_string();
    }
    let use_backslash = root.contains('\\') || (!root.contains('/') && root.contains(':'));
    if use_backslash {
        format!("{}\\{}", root, remainder.replace('/', "\\"))
    } else {
        format!("{}/{}", root, remainder.replace('\\', "/"))
    }
}
