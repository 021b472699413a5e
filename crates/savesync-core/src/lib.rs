pub mod classify;
pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
pub mod hasher;
pub mod manifest;
pub mod process;
pub mod progress;
pub mod scanner;
pub mod transfer;

pub use config::AppConfig;
pub use engine::{SessionOutcome, SyncEngine};
pub use error::Error;
pub use progress::{SilentReporter, SyncReporter};
pub use transfer::{DownloadResult, TransferPhase, UploadStats};
