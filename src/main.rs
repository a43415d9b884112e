use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::env;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

use uas_ingest::db::create_pool;
use uas_ingest::ingest_config::IngestConfig;

mod commands;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

#[derive(Parser, Debug)]
#[command(
    name = "uas-ingest",
    version,
    about = "Load UAS flight plan and movement messages into PostgreSQL"
)]
struct Cli {
    /// TOML file with ingest settings; defaults are used when omitted
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Ingest one spreadsheet export (.xlsx, .xls, .ods or .csv)
    Ingest {
        file: PathBuf,
        /// Write the run summary as JSON to this path
        #[arg(long = "summary-json")]
        summary_json: Option<PathBuf>,
    },
    /// Apply pending database migrations
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => IngestConfig::load(path)?,
        None => IngestConfig::default(),
    };

    let database_url =
        env::var("DATABASE_URL").context("DATABASE_URL must be set in environment variables")?;
    let diesel_pool = create_pool(&database_url, config.pool_size)?;
    info!("Connected to database (pool size {})", config.pool_size);

    match cli.command {
        Commands::Ingest { file, summary_json } => {
            commands::handle_ingest(diesel_pool, config, file, summary_json).await
        }
        Commands::Migrate => commands::handle_migrate(diesel_pool).await,
    }
}
