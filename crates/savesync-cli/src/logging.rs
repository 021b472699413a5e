use std::env;
use std::path::PathBuf;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// Two sinks: human-oriented output on stdout, full records in a log file.
/// `TRACING_LEVEL` overrides the filter, `LOG_FILE_PATH` the file location.
/// The returned guard must live as long as the process so buffered file
/// output is flushed on exit.
pub fn init_logger() -> tracing_appender::non_blocking::WorkerGuard {
    let filter = EnvFilter::new(
        env::var("TRACING_LEVEL").unwrap_or_else(|_| "savesync=info,warn".to_string()),
    );

    let log_path = PathBuf::from(
        env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/savesync.log".to_string()),
    );
    let log_dir = log_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    let log_file = log_path
        .file_name()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("savesync.log"));

    let (non_blocking, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::never(log_dir, log_file));

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stdout)
                .pretty()
                .with_file(false)
                .without_time()
                .with_ansi(true),
        )
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .with(filter)
        .init();

    guard
}
