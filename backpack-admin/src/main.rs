//! backpack-admin - BackPackTrack store maintenance
//!
//! Inspect, upgrade and compact the store file.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use backpack_core::{ChangeBus, Config, Database};
use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "backpack-admin")]
#[command(about = "BackPackTrack store maintenance")]
#[command(version)]
struct Args {
    /// Store file to operate on (default: from config)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show schema version, row counts and store size
    Status {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Open the store, upgrading its schema if needed
    Migrate,
    /// Rebuild the store file to reclaim free space
    Vacuum,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let config = Config::load().context("failed to load configuration")?;

    let _log_guard =
        backpack_core::logging::init(&config.logging).context("failed to initialize logging")?;

    tracing::info!(command = ?args.command, "backpack-admin starting");

    let db = open(&config, args.db.as_ref())?;

    match args.command {
        Command::Status { json } => status(&db, json),
        Command::Migrate => {
            let report = db.migration_report();
            if report.created {
                println!("Created store at schema version {}", report.to);
            } else if report.is_noop() {
                println!("Store already at schema version {}", report.to);
            } else {
                println!(
                    "Upgraded store from version {} to {} ({} steps)",
                    report.from,
                    report.to,
                    report.applied.len()
                );
            }
            Ok(())
        }
        Command::Vacuum => {
            let before = db.get_database_size().context("failed to read store size")?;
            db.vacuum().context("failed to vacuum store")?;
            let after = db.get_database_size().context("failed to read store size")?;
            println!("Vacuum complete: {} -> {} bytes", before, after);
            Ok(())
        }
    }
}

fn open(config: &Config, path: Option<&PathBuf>) -> Result<Database> {
    match path {
        Some(path) => {
            tracing::info!(path = %path.display(), "Opening store");
            Database::open_with_bus(path, &config.storage, Arc::new(ChangeBus::new()))
                .with_context(|| format!("failed to open store {}", path.display()))
        }
        None => {
            let path = config.database_path();
            tracing::info!(path = %path.display(), "Opening store");
            Database::open_with(config)
                .with_context(|| format!("failed to open store {}", path.display()))
        }
    }
}

fn status(db: &Database, json: bool) -> Result<()> {
    let status = db.status().context("failed to read store status")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    if let Some(path) = &status.path {
        println!("Store:          {}", path.display());
    }
    println!("Schema version: {}", status.schema_version);
    println!("Size:           {} bytes", status.size_bytes);
    println!("Rows:");
    for (table, count) in &status.rows {
        println!("  {:<18} {}", table, count);
    }
    Ok(())
}
