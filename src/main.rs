//! # Catalog Sync Main Entry Point
//!
//! `catalog-sync serve` (the default) migrates the database and runs the API,
//! chunk executor and stall watchdog; `catalog-sync migrate` only migrates.

use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use catalog_sync::{
    config::ConfigLoader,
    db,
    migration::{Migrator, MigratorTrait},
    server::run_server,
    sources::SourceRegistry,
    telemetry,
};
use clap::{Parser, Subcommand};
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "catalog-sync", version, about = "Chunked catalog import and deletion service")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Apply migrations, then serve the API and run background workers
    Serve,
    /// Apply pending migrations and exit
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration from layered env files and variables
    let config = ConfigLoader::new().load().context("loading configuration")?;
    telemetry::init_tracing(&config).context("initializing telemetry")?;

    if let Ok(redacted_json) = config.redacted_json() {
        info!(profile = %config.profile, config = %redacted_json, "Loaded configuration");
    }

    let db = db::init_pool(&config)
        .await
        .context("initializing database connection pool")?;

    Migrator::up(&db, None).await.context("applying migrations")?;
    info!("Database migrations applied");

    match cli.command.unwrap_or(Command::Serve) {
        Command::Migrate => Ok(()),
        Command::Serve => {
            let registry = SourceRegistry::with_defaults(&config.import, config.import.drop_root.clone())
                .context("building source registry")?;
            run_server(config, db, Arc::new(registry))
                .await
                .map_err(|e| anyhow!("server error: {}", e))
        }
    }
}
