//! Database Backup Tool
//!
//! Dumps a MySQL or PostgreSQL database, stores it in S3-compatible storage or Google Drive,
//! and enforces an age-based retention policy. Meant to be triggered by cron or a systemd timer.

// dbbackup/src/main.rs
mod backup;
mod config;
mod database;
mod errors;
mod staging;
mod storage;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::LevelFilter;
use std::process::ExitCode;

use backup::{BackupOrchestrator, BackupRecord, RetentionPolicy};
use config::AppConfig;
use database::{DumpOptions, database_manager};
use staging::StagingArea;
use storage::storage_manager;

#[derive(Parser, Debug)]
#[command(name = "dbbackup", version, about = "Database backups to object storage", long_about = None)]
struct Cli {
    /// Verbosity of the log output (off, error, warn, info, debug, trace).
    #[arg(long, global = true)]
    verbose: Option<LevelFilter>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Dump the database and upload it.
    Backup,
    /// List stored backups, newest first.
    List {
        /// Print the listing as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Restore the database from a stored backup.
    Restore {
        /// Backup file name, e.g. backup_20240101_020000.sql
        name: String,
    },
    /// Delete a single stored backup.
    Delete { name: String },
    /// Delete backups older than the retention period.
    Clean {
        /// Retention in days. Defaults to BACKUP_RETENTION_DAYS.
        #[arg(long)]
        days: Option<u32>,
    },
    /// Scheduled run: backup, list, clean, then empty the staging directory.
    Run {
        /// Retention in days. Defaults to BACKUP_RETENTION_DAYS.
        #[arg(long)]
        days: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut logger = env_logger::Builder::new();
    logger.format_timestamp_secs().format_module_path(false);
    match log_level(cli.verbose, std::env::var("RUST_LOG").ok().as_deref()) {
        Some(level) => logger.filter_level(level),
        None => logger.parse_default_env(),
    };
    if let Err(e) = logger.try_init() {
        eprintln!("⚠️ Could not initialise logging: {}", e);
    }

    match run_app(cli.command).await {
        Ok(()) => {
            println!("✅ Operation completed successfully.");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("❌ Error: {:?}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run_app(command: Command) -> Result<()> {
    let config = AppConfig::from_env().context("Failed to load configuration from the environment")?;
    let retention_days = config.backup.retention_days;
    let keep_local = config.backup.keep_local;

    let options = DumpOptions {
        lock_tables: config.backup.lock_tables,
        compress: config.backup.compress,
        extra: config.backup.dump_options.clone(),
    };
    let staging = StagingArea::new(&config.backup.staging_dir).with_context(|| {
        format!(
            "Failed to prepare staging directory {}",
            config.backup.staging_dir.display()
        )
    })?;
    let orchestrator = BackupOrchestrator::new(
        database_manager(config.database, options),
        storage_manager(config.storage),
        staging,
    )
    .keep_local(keep_local);

    log::info!(
        "Database {} → storage {}",
        orchestrator.database_target(),
        orchestrator.storage_name()
    );

    match command {
        Command::Backup => {
            let name = orchestrator.create_backup().await.context("Backup failed")?;
            println!("📦 Created backup {}", name);
        }
        Command::List { json } => {
            let backups = orchestrator.list_backups().await.context("Listing backups failed")?;
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&backups).context("Failed to serialize backup list")?
                );
            } else {
                print_backups(&backups);
            }
        }
        Command::Restore { name } => {
            orchestrator
                .restore_backup(&name)
                .await
                .with_context(|| format!("Restore of {} failed", name))?;
            println!("🔄 Restored {}", name);
        }
        Command::Delete { name } => {
            orchestrator
                .delete_backup(&name)
                .await
                .with_context(|| format!("Deleting {} failed", name))?;
            println!("🗑 Deleted {}", name);
        }
        Command::Clean { days } => {
            let policy = RetentionPolicy::from_days(days.unwrap_or(retention_days));
            let deleted = orchestrator
                .clean_old_backups(&policy)
                .await
                .context("Cleaning old backups failed")?;
            println!("🧹 Deleted {} old backups", deleted);
        }
        Command::Run { days } => {
            let name = orchestrator.create_backup().await.context("Backup failed")?;
            println!("📦 Created backup {}", name);

            let backups = orchestrator.list_backups().await.context("Listing backups failed")?;
            print_backups(&backups);

            let policy = RetentionPolicy::from_days(days.unwrap_or(retention_days));
            let deleted = orchestrator
                .clean_old_backups(&policy)
                .await
                .context("Cleaning old backups failed")?;
            println!("🧹 Deleted {} old backups", deleted);

            // kept local copies live in the staging directory
            if !keep_local {
                orchestrator
                    .purge_staging()
                    .context("Failed to empty the staging directory")?;
            }
        }
    }
    Ok(())
}

/// `--verbose` wins, then `RUST_LOG` (signalled by `None`), then info.
fn log_level(verbose: Option<LevelFilter>, rust_log: Option<&str>) -> Option<LevelFilter> {
    match (verbose, rust_log) {
        (Some(level), _) => Some(level),
        (None, Some(spec)) if !spec.trim().is_empty() => None,
        (None, _) => Some(LevelFilter::Info),
    }
}

fn print_backups(backups: &[BackupRecord]) {
    if backups.is_empty() {
        println!("No backups found.");
        return;
    }
    println!("{:<36} {:<20} {:>12}", "NAME", "CREATED (UTC)", "SIZE");
    for backup in backups {
        println!(
            "{:<36} {:<20} {:>12}",
            backup.filename,
            backup.created_at.format("%Y-%m-%d %H:%M:%S"),
            backup.size_human
        );
    }
    println!("{} backups", backups.len());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_precedence() {
        assert_eq!(log_level(None, None), Some(LevelFilter::Info));
        assert_eq!(log_level(None, Some("")), Some(LevelFilter::Info));
        assert_eq!(log_level(None, Some("debug")), None);
        assert_eq!(
            log_level(Some(LevelFilter::Warn), Some("debug")),
            Some(LevelFilter::Warn)
        );
    }

    #[test]
    fn test_cli_parses_subcommands() {
        let cli = Cli::try_parse_from(["dbbackup", "clean", "--days", "7", "--verbose", "debug"]).unwrap();
        assert_eq!(cli.verbose, Some(LevelFilter::Debug));
        assert!(matches!(cli.command, Command::Clean { days: Some(7) }));

        let cli = Cli::try_parse_from(["dbbackup", "restore", "backup_20240101_020000.sql"]).unwrap();
        assert!(matches!(cli.command, Command::Restore { ref name } if name == "backup_20240101_020000.sql"));
    }
}
