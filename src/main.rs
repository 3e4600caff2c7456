use anyhow::{Context, Result};
use clap::Parser;
use rental_scout::notify::{NotificationSink, TelegramSink};
use rental_scout::scheduler::{CycleWorker, Scheduler, SystemClock};
use rental_scout::scrapers::{ListingFetcher, ListingSource};
use rental_scout::storage::{PersistenceSink, SqliteStore};
use rental_scout::{Config, HarvestWorker};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Harvest dom.ria.com rentals and post them to Telegram on a daily schedule
#[derive(Parser, Debug)]
#[command(name = "rental-scout", version)]
struct Args {
    /// Path to the TOML config file
    #[arg(short, long, default_value = "rental-scout.toml")]
    config: PathBuf,

    /// Run one harvest and one post step before arming the schedule
    #[arg(long)]
    now: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config::load(&args.config)?;

    // Initialize logging
    let default_level = if config.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("🏠 Rental Scout - dom.ria.com harvester");
    info!("==========================================");
    info!(
        "⚙️ Loaded config from {} ({} cities)",
        args.config.display(),
        config.cities.len()
    );
    info!(
        "Cities: {}",
        config
            .cities
            .iter()
            .map(|c| c.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );

    let store = Arc::new(
        SqliteStore::open(&config.database_path)
            .with_context(|| format!("Failed to open {}", config.database_path.display()))?,
    );
    for city in &config.cities {
        store.ensure_table(&city.table)?;
    }

    let source: Arc<dyn ListingSource> = Arc::new(ListingFetcher::new(&config.marketplace)?);

    let telegram = TelegramSink::new(&config.telegram)?;
    if let Err(e) = telegram.test_connection().await {
        warn!("⚠️ Telegram check failed, posting will not work: {:#}", e);
    }
    let sink: Arc<dyn NotificationSink> = Arc::new(telegram);

    let clock = Arc::new(SystemClock);
    let worker = Arc::new(HarvestWorker::with_chrome(
        &config,
        source,
        store as Arc<dyn PersistenceSink>,
        sink,
        clock.clone(),
    ));

    if args.now {
        info!("▶️ Running one cycle now...");
        let cancel = CancellationToken::new();
        worker.incremental_harvest(&cancel).await?;
        worker.post_step().await?;
    }

    let scheduler = Scheduler::start(worker, clock, &config.schedule)?;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Ctrl-C received");

    let grace = Duration::from_secs(config.schedule.stop_grace_secs);
    if !scheduler.stop(grace).await {
        warn!("⚠️ Some work was aborted during shutdown");
    }

    Ok(())
}
