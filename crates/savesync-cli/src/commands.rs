use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "savesync")]
#[command(about = "Cloud backup for game saves", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Watch a game session and upload changed saves when it ends
    Watch {
        /// Game name from the configuration file
        game: String,
        /// Pid of the already-running game process, if known
        #[arg(long)]
        pid: Option<u32>,
    },
    /// Upload changed save files now
    Sync { game: String },
    /// Download save files when the cloud copy is newer
    Restore { game: String },
    /// Show the game's manifest summary
    Status { game: String },
    /// Manage the game's permanent exclusion list
    Blacklist {
        game: String,
        #[command(subcommand)]
        action: BlacklistAction,
    },
    /// Rewrite legacy manifest keys into portable form
    Migrate { game: String },
    /// Print configuration values
    PrintConfig,
}

#[derive(Debug, Subcommand)]
pub enum BlacklistAction {
    /// Exclude a path (absolute or portable) from sync
    Add { path: String },
    /// Remove a previously excluded path
    Remove { path: String },
}
