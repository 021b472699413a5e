use crate::error::Error;
use config::{Config, File as ConfigFile};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub games: Vec<GameConfig>,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub ignore: IgnoreOverrides,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default)]
    pub hash_algorithm: HashAlgorithm,
    #[serde(default = "default_transfer_concurrency")]
    pub transfer_concurrency: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GameConfig {
    pub name: String,
    pub install_dir: String,
    /// Known save-data locations outside the install directory.
    #[serde(default)]
    pub save_roots: Vec<String>,
    #[serde(default)]
    pub profile: Option<String>,
    #[serde(default = "default_provider")]
    pub provider: String,
    pub remote_root: String,
    /// Compatibility-layer prefix when the game runs under an emulation
    /// layer (e.g. a Wine prefix mapping `drive_c` onto host directories).
    #[serde(default)]
    pub emulation_prefix: Option<String>,
    /// Executable name the watch loop waits for; defaults to any process
    /// running from inside `install_dir`.
    #[serde(default)]
    pub executable: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// External transfer tool invoked for every remote operation.
    pub program: String,
    pub upload_timeout_secs: u64,
    pub download_timeout_secs: u64,
    pub list_timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            program: "rclone".to_string(),
            upload_timeout_secs: 300,
            download_timeout_secs: 300,
            list_timeout_secs: 60,
        }
    }
}

/// User-supplied additions to the built-in ignore tables.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct IgnoreOverrides {
    pub patterns: Vec<String>,
    pub filenames: Vec<String>,
    pub extensions: Vec<String>,
    pub keywords: Vec<String>,
    pub system_dirs: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum HashAlgorithm {
    XxHash64,
    #[default]
    Blake3,
}

fn default_poll_interval_secs() -> u64 {
    5
}

fn default_transfer_concurrency() -> usize {
    8
}

fn default_provider() -> String {
    "default".to_string()
}

pub fn load_configuration() -> Result<AppConfig, Error> {
    let builder = Config::builder()
        .add_source(ConfigFile::with_name("Savesync").required(false))
        .build()?;
    Ok(builder.try_deserialize::<AppConfig>()?)
}

impl AppConfig {
    pub fn find_game(&self, name: &str) -> Option<&GameConfig> {
        self.games
            .iter()
            .find(|g| g.name.eq_ignore_ascii_case(name))
    }
}

impl GameConfig {
    /// All roots polled for touched files: the install directory plus any
    /// configured save locations, with nested duplicates removed.
    pub fn watched_roots(&self) -> Vec<String> {
        let mut roots = vec![self.install_dir.clone()];
        roots.extend(self.save_roots.iter().cloned());
        non_overlapping_directories(roots)
    }
}

/// Remove directories that are subdirectories of other directories in the list.
pub fn non_overlapping_directories(dirs: Vec<String>) -> Vec<String> {
    let mut result: Vec<String> = Vec::new();

    for dir in dirs {
        let dir_path = Path::new(&dir);
        let mut should_add = true;
        let result_clone = result.clone();

        for res_dir in &result_clone {
            let res_dir_path = Path::new(res_dir);

            if dir_path.starts_with(res_dir_path) {
                should_add = false;
                break;
            }

            if res_dir_path.starts_with(dir_path) {
                result.retain(|x| x != res_dir);
                break;
            }
        }

        if should_add {
            result.push(dir);
        }
    }

    result
}
