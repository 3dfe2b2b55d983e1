//! Change detector host process
//!
//! Watches the configured origin and logs every confirmed change set. Also
//! carries the operator tools for bootstrapping and pruning the record store.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use change_detector::{
    normalize_path, ArchiveRun, ChangeCoordinator, ChangeNotification, CoordinatorState, Crawler,
    DetectorConfig, HttpFetcher, PathRecord, PathRecordMap, PathRecordStore, SqliteStore,
    LAST_ARCHIVE_KEY,
};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "change-detector")]
#[command(about = "Detect added, modified and removed paths on a website")]
struct Cli {
    /// JSON config file; environment variables are used when omitted
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll the origin and crawl on every sign of change (default)
    Watch,

    /// Run one crawl over every known path and print the change set as JSON
    Crawl,

    /// Add paths to the store so the next crawl discovers them
    Seed {
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Remove a path from the store
    Prune { path: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,change_detector=debug,sqlx=warn".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_line_number(true),
        )
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => DetectorConfig::from_json_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => DetectorConfig::from_env().context("Failed to load config from environment")?,
    };

    let store = Arc::new(
        SqliteStore::new(&config.database_url)
            .await
            .context("Failed to open record store")?,
    );

    match cli.command.unwrap_or(Commands::Watch) {
        Commands::Watch => watch(config, store).await,
        Commands::Crawl => crawl_once(config, store).await,
        Commands::Seed { paths } => seed(store, paths).await,
        Commands::Prune { path } => prune(store, &path).await,
    }
}

async fn watch(config: DetectorConfig, store: Arc<SqliteStore>) -> Result<()> {
    let fetcher = Arc::new(
        HttpFetcher::new(config.origin.clone(), &config.request)
            .context("Failed to build HTTP client")?,
    );

    let coordinator = ChangeCoordinator::new(config, fetcher, store)
        .await
        .context("Failed to create change coordinator")?;
    if coordinator.records().is_empty() {
        tracing::warn!("Record store is empty; run `change-detector seed /` first");
    }

    let mut notifications = coordinator.subscribe();
    let mut state = coordinator.state();
    coordinator.start();
    tracing::info!("Watching for changes (Ctrl-C to stop)");

    let outcome = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupt received");
                break Ok(());
            }
            changed = state.changed() => {
                if changed.is_err() {
                    break Ok(());
                }
                if *state.borrow() == CoordinatorState::Failed {
                    break Err(anyhow::anyhow!("change coordinator failed"));
                }
            }
            notification = notifications.recv() => match notification {
                Ok(ChangeNotification::PossibleChange { path, change_type }) => {
                    tracing::info!(path = %path, change = %change_type, "Possible change detected");
                }
                Ok(ChangeNotification::Change { first_path, changes, .. }) => {
                    tokio::spawn(async move {
                        match changes.await {
                            Ok(change_set) => tracing::info!(
                                trigger = %first_path,
                                added = ?change_set.added,
                                modified = ?change_set.modified,
                                removed = ?change_set.removed,
                                "Change set confirmed"
                            ),
                            Err(e) => tracing::error!(trigger = %first_path, error = %e, "Change set unavailable"),
                        }
                    });
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Notification subscriber lagged");
                }
                Err(RecvError::Closed) => break Ok(()),
            },
        }
    };

    coordinator.destroy().await;
    outcome
}

async fn crawl_once(config: DetectorConfig, store: Arc<SqliteStore>) -> Result<()> {
    let fetcher = Arc::new(
        HttpFetcher::new(config.origin.clone(), &config.request)
            .context("Failed to build HTTP client")?,
    );
    let records = PathRecordMap::from_records(store.load_all().await?);

    let mut crawler = Crawler::new(fetcher, records, store.clone(), config.origin_host());
    let archive = match config.archive.active_base_path() {
        Some(base) => {
            let previous = store.get_state(LAST_ARCHIVE_KEY).await?;
            Some(ArchiveRun::starting_now(base, previous))
        }
        None => None,
    };
    if let Some(archive) = archive.clone() {
        crawler = crawler.with_archive(archive);
    }
    if let Some(limit) = config.max_crawl_concurrency {
        crawler = crawler.with_max_concurrency(limit);
    }

    let changes = crawler.crawl(None).await.context("Crawl failed")?;
    if let Some(archive) = archive {
        store
            .set_state(LAST_ARCHIVE_KEY, &archive.directory_name)
            .await?;
    }

    println!("{}", serde_json::to_string_pretty(&changes)?);
    Ok(())
}

async fn seed(store: Arc<SqliteStore>, paths: Vec<String>) -> Result<()> {
    let existing = PathRecordMap::from_records(store.load_all().await?);

    for path in paths {
        if !path.starts_with('/') {
            bail!("{path} is not an absolute path");
        }
        let path = normalize_path(&path);
        if existing.get(&path).is_some() {
            tracing::info!(path = %path, "Already known, skipping");
            continue;
        }
        store.upsert(&PathRecord::tombstone(&path)).await?;
        tracing::info!(path = %path, "Seeded");
    }
    Ok(())
}

async fn prune(store: Arc<SqliteStore>, path: &str) -> Result<()> {
    let path = normalize_path(path);
    if store.remove(&path).await? {
        tracing::info!(path = %path, "Pruned");
    } else {
        tracing::warn!(path = %path, "No such record");
    }
    Ok(())
}
