mod commands;
mod logging;
mod progress;

use std::process;
use std::sync::Arc;

use clap::{CommandFactory, Parser};
use colored::*;
use commands::{BlacklistAction, Cli, Commands};
use dotenv::dotenv;
use progress::CliReporter;
use savesync_core::config::GameConfig;
use savesync_core::process::default_lister;
use savesync_core::transfer::CliBackend;
use savesync_core::SyncEngine;
use tokio::sync::watch;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    let _guard = logging::init_logger();

    let config = match savesync_core::config::load_configuration() {
        Ok(config) => config,
        Err(err) => {
            error!("Error loading configuration: {}", err);
            process::exit(1);
        }
    };

    let args = Cli::parse();

    let Some(command) = args.command else {
        let _ = Cli::command().print_long_help();
        return Ok(());
    };

    if let Commands::PrintConfig = command {
        println!("Configuration: {:?}", config);
        return Ok(());
    }

    let backend = Arc::new(CliBackend::new(config.backend.clone()));
    let reporter = Arc::new(CliReporter::new());
    let engine = SyncEngine::new(config.clone(), backend, default_lister(), reporter);

    match command {
        Commands::Watch { game, pid } => {
            let game = find_game(&config, &game);
            let (cancel_tx, cancel_rx) = watch::channel(false);
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    let _ = cancel_tx.send(true);
                }
            });

            match engine.watch_game(&game, pid, cancel_rx).await {
                Ok(outcome) => {
                    info!(
                        "Session over after {}: {} uploaded, {} skipped, {} failed",
                        format!("{:.0?}", outcome.play_time).cyan(),
                        format!("{}", outcome.stats.uploaded).green(),
                        format!("{}", outcome.stats.skipped).yellow(),
                        format!("{}", outcome.stats.failed).red(),
                    );
                    print_failures(&outcome.stats.failed_files);
                }
                Err(err) => error!("Error: {}", err),
            }
        }
        Commands::Sync { game } => {
            let game = find_game(&config, &game);
            match engine.sync_game(&game).await {
                Ok(stats) => {
                    info!(
                        "{} uploaded ({} bytes), {} skipped, {} failed",
                        format!("{}", stats.uploaded).green(),
                        stats.bytes_uploaded,
                        format!("{}", stats.skipped).yellow(),
                        format!("{}", stats.failed).red(),
                    );
                    print_failures(&stats.failed_files);
                }
                Err(err) => error!("Error: {}", err),
            }
        }
        Commands::Restore { game } => {
            let game = find_game(&config, &game);
            match engine.restore_game(&game).await {
                Ok(result) => {
                    info!(
                        "{} downloaded ({} bytes), {} up to date, {} failed",
                        format!("{}", result.downloaded).green(),
                        result.bytes_downloaded,
                        format!("{}", result.skipped).yellow(),
                        format!("{}", result.failed).red(),
                    );
                    print_failures(&result.failed_files);
                }
                Err(err) => error!("Error: {}", err),
            }
        }
        Commands::Status { game } => {
            let game = find_game(&config, &game);
            match engine.manifest_summary(&game).await {
                Ok(data) => {
                    println!("Game:           {}", game.name);
                    println!("Tracked files:  {}", data.files.len());
                    println!("Blacklisted:    {}", data.blacklist.len());
                    println!("Sync enabled:   {}", data.sync_enabled);
                    println!("Provider:       {}", data.provider);
                    println!(
                        "Last updated:   {}",
                        data.last_updated
                            .map(|t| t.to_rfc3339())
                            .unwrap_or_else(|| "never".to_string())
                    );
                    println!("Last sync:      {}", data.last_sync_status);
                    println!("Play time:      {}s", data.play_time_secs);
                }
                Err(err) => error!("Error: {}", err),
            }
        }
        Commands::Blacklist { game, action } => {
            let game = find_game(&config, &game);
            match action {
                BlacklistAction::Add { path } => match engine.blacklist_add(&game, &path).await {
                    Ok(portable) => println!("Blacklisted {}", portable.red()),
                    Err(err) => error!("Error: {}", err),
                },
                BlacklistAction::Remove { path } => {
                    match engine.blacklist_remove(&game, &path).await {
                        Ok(true) => println!("Removed from blacklist"),
                        Ok(false) => println!("Not on the blacklist"),
                        Err(err) => error!("Error: {}", err),
                    }
                }
            }
        }
        Commands::Migrate { game } => {
            let game = find_game(&config, &game);
            let ctx = engine.context_for(&game);
            match ctx.store.migrate_paths_if_needed(&ctx.codec).await {
                Ok(0) => println!("Manifest already in portable form"),
                Ok(n) => println!("Migrated {} manifest keys", format!("{}", n).green()),
                Err(err) => error!("Error: {}", err),
            }
        }
        Commands::PrintConfig => unreachable!(),
    }

    Ok(())
}

fn find_game(config: &savesync_core::AppConfig, name: &str) -> GameConfig {
    match config.find_game(name) {
        Some(game) => game.clone(),
        None => {
            error!(
                "Game '{}' is not configured; known games: {}",
                name,
                config
                    .games
                    .iter()
                    .map(|g| g.name.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
            process::exit(1);
        }
    }
}

fn print_failures(failed: &[String]) {
    for name in failed {
        println!("  {} {}", "failed:".red(), name);
    }
}
