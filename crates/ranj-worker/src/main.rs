//! ranj-worker: runs the enrichment job executor and a few maintenance
//! commands against the ranj database.

mod config;
mod telemetry;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use uuid::Uuid;

use ranj_core::{export_netscape, JobRepository, LinkRepository};
use ranj_db::{log_pool_metrics, Database};
use ranj_inference::cache::ttl_from_env;
use ranj_inference::{CachedEmbedder, OpenAIBackend, RedisEmbeddingCache};
use ranj_jobs::{
    EmbeddingBackfill, HandlerRegistry, HttpMetadataFetcher, ScrapeOgHandler, WorkerBuilder,
    WorkerConfig,
};

use crate::config::WorkerSettings;
use crate::telemetry::LogSettings;

const POOL_HEALTH_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Parser, Debug)]
#[command(name = "ranj-worker")]
#[command(author, version, about = "Link enrichment worker for ranj")]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug, PartialEq)]
enum Commands {
    /// Run the job executor until interrupted (default)
    Run,

    /// Embed every link of a user that has no embedding yet
    BackfillEmbeddings {
        /// Owner of the links
        #[arg(short, long)]
        user: Uuid,
    },

    /// Write a user's links as a Netscape bookmark file
    Export {
        /// Owner of the links
        #[arg(short, long)]
        user: Uuid,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Return jobs locked longer than the given age to the queue
    ReclaimStale {
        /// Lock age in seconds
        #[arg(long, default_value_t = 300)]
        older_than_secs: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let _log_guard = telemetry::init(&LogSettings::from_env());

    let cli = Cli::parse();
    let settings = WorkerSettings::from_env()?;

    info!(subsystem = "worker", "Connecting to database...");
    let db = Database::connect_with_config(&settings.database_url, settings.pool.clone())
        .await
        .context("failed to connect to database")?;

    if settings.run_migrations {
        info!(subsystem = "worker", "Running database migrations...");
        db.migrate().await.context("failed to run migrations")?;
    }

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_worker(db).await,
        Commands::BackfillEmbeddings { user } => backfill_embeddings(db, user).await,
        Commands::Export { user, output } => export(db, user, output).await,
        Commands::ReclaimStale { older_than_secs } => reclaim_stale(db, older_than_secs).await,
    }
}

async fn run_worker(db: Database) -> anyhow::Result<()> {
    let fetcher = HttpMetadataFetcher::from_env()?;
    let registry = HandlerRegistry::builder()
        .register(ScrapeOgHandler::new(db.links.clone(), Arc::new(fetcher)))
        .build();

    let config = WorkerConfig::from_env();
    info!(
        subsystem = "worker",
        enabled = config.enabled,
        batch_size = config.batch_size,
        job_timeout_secs = config.job_timeout_secs,
        handlers = registry.len(),
        "Starting job worker"
    );

    let handle = WorkerBuilder::new(db.jobs.clone())
        .with_config(config)
        .with_registry(registry)
        .build()
        .start();

    let mut health = tokio::time::interval(POOL_HEALTH_INTERVAL);
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("failed to listen for shutdown signal")?;
                break;
            }
            _ = health.tick() => log_pool_metrics(&db.pool),
        }
    }
    info!(subsystem = "worker", "Shutdown signal received");

    handle.shutdown().await?;
    info!(subsystem = "worker", "Job worker stopped");
    Ok(())
}

async fn backfill_embeddings(db: Database, user: Uuid) -> anyhow::Result<()> {
    let backend = OpenAIBackend::from_env()?;
    let cache = RedisEmbeddingCache::from_env().await;
    let embedder =
        CachedEmbedder::new(Arc::new(backend), Arc::new(cache)).with_ttl(ttl_from_env());

    let report = EmbeddingBackfill::new(db.links.clone(), Arc::new(embedder))
        .run(user)
        .await?;
    if report.failed > 0 {
        warn!(
            subsystem = "worker",
            user_id = %user,
            failed = report.failed,
            "Some links could not be embedded"
        );
    }
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn export(db: Database, user: Uuid, output: Option<PathBuf>) -> anyhow::Result<()> {
    let links = db.links.list_for_user(user).await?;
    let html = export_netscape(&links);

    match output {
        Some(path) => {
            std::fs::write(&path, html)
                .with_context(|| format!("failed to write {}", path.display()))?;
            info!(
                subsystem = "worker",
                user_id = %user,
                count = links.len(),
                path = %path.display(),
                "Exported bookmarks"
            );
        }
        None => print!("{}", html),
    }
    Ok(())
}

async fn reclaim_stale(db: Database, older_than_secs: u64) -> anyhow::Result<()> {
    let count = db
        .jobs
        .reclaim_stale(Duration::from_secs(older_than_secs))
        .await?;
    info!(
        subsystem = "worker",
        count,
        older_than_secs,
        "Reclaimed stale job locks"
    );
    println!("{}", count);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_subcommand_means_run() {
        let cli = Cli::try_parse_from(["ranj-worker"]).unwrap();
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_parse_backfill() {
        let user = Uuid::new_v4();
        let cli =
            Cli::try_parse_from(["ranj-worker", "backfill-embeddings", "--user", &user.to_string()])
                .unwrap();
        assert_eq!(cli.command, Some(Commands::BackfillEmbeddings { user }));
    }

    #[test]
    fn test_parse_export_with_output() {
        let user = Uuid::new_v4();
        let cli = Cli::try_parse_from([
            "ranj-worker",
            "export",
            "--user",
            &user.to_string(),
            "-o",
            "bookmarks.html",
        ])
        .unwrap();
        assert_eq!(
            cli.command,
            Some(Commands::Export {
                user,
                output: Some(PathBuf::from("bookmarks.html")),
            })
        );
    }

    #[test]
    fn test_parse_reclaim_stale_default() {
        let cli = Cli::try_parse_from(["ranj-worker", "reclaim-stale"]).unwrap();
        assert_eq!(
            cli.command,
            Some(Commands::ReclaimStale {
                older_than_secs: 300
            })
        );
    }

    #[test]
    fn test_invalid_user_rejected() {
        assert!(Cli::try_parse_from(["ranj-worker", "export", "--user", "nope"]).is_err());
    }
}
