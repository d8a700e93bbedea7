// ABOUTME: CLI entry point for mssql-mysql-replicator
// ABOUTME: Parses commands and routes to the orchestrator or daemon management

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};

use mssql_mysql_replicator::config::{self, Settings};
use mssql_mysql_replicator::cursor::CursorStore;
use mssql_mysql_replicator::daemon;
use mssql_mysql_replicator::db::DriverFactory;
use mssql_mysql_replicator::orchestrator::{CycleStats, Orchestrator};

#[derive(Parser)]
#[command(name = "mssql-mysql-replicator")]
#[command(about = "Incremental SQL Server to MySQL replication daemon", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the TOML settings file
    #[arg(long, global = true, default_value = config::DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    /// Set the log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    log: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one replication cycle now
    Sync,
    /// Replicate view definitions only
    Views,
    /// Run replication cycles on the configured schedule
    Run {
        /// Detach and run in the background
        #[arg(long)]
        daemon: bool,
    },
    /// Show the status of a background daemon
    Status,
    /// Stop a running background daemon
    Stop,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over the --log flag, which defaults to "info".
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(cli.log.clone()));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    match cli.command {
        Commands::Status => daemon::print_status(),
        Commands::Stop => {
            if !daemon::stop_daemon()? {
                println!("Replicator daemon was not running");
            }
            Ok(())
        }
        Commands::Sync => {
            let (orchestrator, mut store) = build(&cli.config)?;
            let stats = orchestrator.run_cycle(&mut store).await?;
            print_summary("Replication cycle complete", &stats);
            Ok(())
        }
        Commands::Views => {
            let (orchestrator, _store) = build(&cli.config)?;
            let stats = orchestrator.replicate_views().await?;
            println!("View replication complete: {} views created", stats.views_created);
            for err in &stats.errors {
                println!("  error: {err}");
            }
            Ok(())
        }
        Commands::Run { daemon: detach } => {
            let settings = Settings::load(&cli.config)?;
            let period = settings.schedule_period()?;

            if detach {
                daemon::daemonize()?;
            } else {
                daemon::write_pid()?;
            }

            tracing::info!(
                source = %config::redact_credentials(&settings.connections.source.url),
                target = %config::redact_credentials(&settings.connections.target.url),
                "starting replicator"
            );

            let mut store = CursorStore::load(&settings.cursor_store)?;
            let factory = DriverFactory::new(
                settings.connections.source.clone(),
                settings.connections.target.clone(),
            );
            let orchestrator = Orchestrator::new(settings, Arc::new(factory));

            let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel::<()>(1);
            let shutdown_tx_clone = shutdown_tx.clone();
            tokio::spawn(async move {
                tokio::signal::ctrl_c()
                    .await
                    .expect("failed to listen for Ctrl+C");
                tracing::info!("received shutdown signal");
                let _ = shutdown_tx_clone.send(());
            });

            orchestrator.run_scheduled(period, &mut store, shutdown_rx).await?;

            if let Err(e) = daemon::cleanup() {
                tracing::warn!("failed to clean up daemon PID file: {e}");
            }
            Ok(())
        }
    }
}

fn build(config_path: &Path) -> Result<(Orchestrator, CursorStore)> {
    let settings = Settings::load(config_path)?;
    let store = CursorStore::load(&settings.cursor_store)?;
    let factory = DriverFactory::new(
        settings.connections.source.clone(),
        settings.connections.target.clone(),
    );
    Ok((Orchestrator::new(settings, Arc::new(factory)), store))
}

fn print_summary(title: &str, stats: &CycleStats) {
    println!("{title}:");
    println!("  Tables synced: {}", stats.tables_synced);
    println!("  Rows copied:   {}", stats.rows_copied);
    println!("  Duration:      {}ms", stats.duration_ms);
    if !stats.errors.is_empty() {
        println!("  Errors: {}", stats.errors.len());
        for err in &stats.errors {
            println!("    - {err}");
        }
    }
}
