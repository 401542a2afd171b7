use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{info, warn};

mod apimo;
mod config;
mod domain;
mod errors;
mod store;
mod sync;
mod telemetry;


use apimo::ApimoClient;
use config::SyncConfig;
use domain::TaxonomyMap;
use store::sync_runs::get_recent_runs;
use store::{init_db, Database, HttpDownloader, SqliteStore};
use sync::{seed_taxonomies, SyncDriver};

#[derive(Parser, Debug)]
#[command(name = "listing_sync", version, about = "Mirror agency listings into the local store")]
struct Cli {
    /// Override SYNC_DATABASE_PATH
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    /// Override SYNC_TAXONOMY_PATH
    #[arg(long, global = true)]
    taxonomy: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
#[command(rename_all = "kebab-case")]
enum Commands {
    /// Run one sync pass
    Sync,
    /// Delete local listings that are gone from the remote feed
    Prune,
    /// Create property type terms from the taxonomy file
    SeedTaxonomies,
    /// Print recent sync runs
    Runs {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
}

fn main() -> Result<()> {
    dotenv::dotenv().ok();
    telemetry::init_tracing("info")?;

    let cli = Cli::parse();
    let mut config = SyncConfig::from_env().context("invalid configuration")?;
    if let Some(db) = cli.db {
        config.database_path = db;
    }
    if let Some(taxonomy) = cli.taxonomy {
        config.taxonomy_path = taxonomy;
    }

    let db = Database::new(config.database_path.to_string_lossy());
    init_db(&db).context("database initialization failed")?;

    match cli.command {
        Commands::Runs { limit } => print_runs(&db, limit),
        Commands::SeedTaxonomies => {
            let taxonomy = TaxonomyMap::load(&config.taxonomy_path)?;
            let mut store = open_store(&db, &config)?;
            let seeded = seed_taxonomies(&mut store, &taxonomy)?;
            info!(seeded, "taxonomy terms seeded");
            Ok(())
        }
        Commands::Sync | Commands::Prune => {
            let Some(credentials) = config.credentials.clone() else {
                warn!("APIMO_PROVIDER, APIMO_TOKEN and APIMO_AGENCY must all be set; sync disabled");
                return Ok(());
            };
            let taxonomy = TaxonomyMap::load(&config.taxonomy_path)?;
            let client = ApimoClient::new(&config.api, credentials)?;
            info!(endpoint = client.endpoint(), "remote source ready");

            let store = open_store(&db, &config)?;
            let mut driver = SyncDriver::new(&config, &taxonomy, client, store, db.clone());

            if matches!(cli.command, Commands::Prune) {
                let report = driver.prune(Utc::now())?;
                println!(
                    "prune: {} remote listings, {} deleted, {} failed",
                    report.remote_listings,
                    report.deleted.len(),
                    report.failures.len()
                );
            } else {
                let report = driver.run_pass(Utc::now())?;
                println!(
                    "sync: {} pages, {} fetched, {} created, {} updated, {} stale, {} invalid, {} failed, {} mapping gaps",
                    report.pages,
                    report.fetched,
                    report.created,
                    report.updated,
                    report.skipped_stale,
                    report.skipped_invalid,
                    report.failures.len(),
                    report.mapping_gaps
                );
                for failure in &report.failures {
                    println!("  {failure}");
                }
            }
            Ok(())
        }
    }
}

fn open_store(db: &Database, config: &SyncConfig) -> Result<SqliteStore> {
    let downloader = HttpDownloader::new(config.api.request_timeout)?;
    Ok(SqliteStore::new(
        db.clone(),
        Box::new(downloader),
        config.media_dir.clone(),
    ))
}

fn print_runs(db: &Database, limit: usize) -> Result<()> {
    let runs = get_recent_runs(db, limit)?;
    if runs.is_empty() {
        println!("no sync runs recorded");
        return Ok(());
    }
    for run in runs {
        let status = match (run.finished_at, run.success) {
            (None, _) => "running",
            (Some(_), true) => "ok",
            (Some(_), false) => "failed",
        };
        println!(
            "#{} {} started={} pages={} listings={} {}{}",
            run.id,
            run.job,
            run.started_at,
            run.pages_fetched.unwrap_or(0),
            run.listings_seen.unwrap_or(0),
            status,
            run.error_message
                .map(|e| format!(" ({e})"))
                .unwrap_or_default()
        );
    }
    Ok(())
}
