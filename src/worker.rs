use crate::config::{CityConfig, Config};
use crate::harvest::{HarvestPipeline, HarvestSettings, PhotoStore};
use crate::models::RunStats;
use crate::notify::NotificationSink;
use crate::posting::PostingCycle;
use crate::scheduler::{Clock, CycleWorker};
use crate::scrapers::browser::ChromeBrowser;
use crate::scrapers::interception::{InterceptionSession, SessionTimings};
use crate::scrapers::traits::{BrowserDriver, ListingSource};
use crate::storage::PersistenceSink;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

type Launcher<D> = Box<dyn Fn() -> Result<D> + Send + Sync>;

pub struct HarvestWorker<D: BrowserDriver> {
    cities: Vec<CityConfig>,
    store: Arc<dyn PersistenceSink>,
    photos: PhotoStore,
    pipeline: HarvestPipeline,
    posting: PostingCycle,
    clock: Arc<dyn Clock>,
    timings: SessionTimings,
    tap_capacity: usize,
    listing_base: String,
    launch: Launcher<D>,
}

impl HarvestWorker<ChromeBrowser> {
    /// Worker that launches a fresh Chrome for every harvest invocation.
    pub fn with_chrome(
        config: &Config,
        source: Arc<dyn ListingSource>,
        store: Arc<dyn PersistenceSink>,
        sink: Arc<dyn NotificationSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let browser = config.browser.clone();
        let user_agent = config.marketplace.user_agent.clone();
        let launch: Launcher<ChromeBrowser> =
            Box::new(move || ChromeBrowser::launch(&browser, &user_agent));
        Self::new(config, source, store, sink, clock, launch)
    }
}

impl<D: BrowserDriver> HarvestWorker<D> {
    pub fn new(
        config: &Config,
        source: Arc<dyn ListingSource>,
        store: Arc<dyn PersistenceSink>,
        sink: Arc<dyn NotificationSink>,
        clock: Arc<dyn Clock>,
        launch: Launcher<D>,
    ) -> Self {
        let photos = PhotoStore::new(&config.photos_dir);
        let pipeline = HarvestPipeline::new(
            source,
            Arc::clone(&store),
            photos.clone(),
            HarvestSettings::from_config(config),
        );
        let posting = PostingCycle::new(
            Arc::clone(&store),
            sink,
            config.posts_per_city,
            Duration::from_millis(config.post_pause_ms),
        );

        Self {
            cities: config.cities.clone(),
            store,
            photos,
            pipeline,
            posting,
            clock,
            timings: SessionTimings::from_config(&config.browser),
            tap_capacity: config.browser.tap_capacity,
            listing_base: config.marketplace.base_url.clone(),
            launch,
        }
    }

    pub fn with_timings(mut self, timings: SessionTimings) -> Self {
        self.timings = timings;
        self
    }

    fn open_session(&self) -> Result<InterceptionSession<D>> {
        let driver = (self.launch)()?;
        InterceptionSession::open(
            driver,
            self.timings.clone(),
            self.tap_capacity,
            &self.listing_base,
        )
    }

    pub async fn harvest_all(&self, cancel: &CancellationToken) -> RunStats {
        let cities: Vec<&CityConfig> = self.cities.iter().collect();
        self.harvest_cities(&cities, cancel).await
    }

    /// One harvest invocation per city. A city that fails to start is logged
    /// and skipped.
    async fn harvest_cities(
        &self,
        cities: &[&CityConfig],
        cancel: &CancellationToken,
    ) -> RunStats {
        let mut total = RunStats::default();
        for &city in cities {
            if cancel.is_cancelled() {
                break;
            }
            match self
                .pipeline
                .run(city, || self.open_session(), cancel)
                .await
            {
                Ok(stats) => total.merge(&stats),
                Err(e) => error!("❌ Harvest for {} aborted: {:#}", city.name, e),
            }
        }
        info!(
            "🏁 Harvest done: {} found, {} stored across {} cities",
            total.total_found,
            total.shown,
            cities.len()
        );
        total
    }

    pub fn log_table_stats(&self) {
        info!("📊 Table statistics:");
        for city in &self.cities {
            match self.store.table_stats(&city.table) {
                Ok(stats) => info!(
                    "   {}: {} total, {} posted, {} unposted",
                    city.name, stats.total, stats.posted, stats.unposted
                ),
                Err(e) => warn!("   {}: unavailable ({})", city.name, e),
            }
        }
    }

    /// Empty every city table. Returns the cities whose table is ready.
    fn reset_tables(&self) -> Vec<&CityConfig> {
        self.cities
            .iter()
            .filter(|city| {
                let cleared = self
                    .store
                    .ensure_table(&city.table)
                    .and_then(|()| self.store.clear_table(&city.table));
                match cleared {
                    Ok(rows) => {
                        debug!("🧹 Cleared {} rows from {}", rows, city.table);
                        true
                    }
                    Err(e) => {
                        error!("❌ Cannot reset {}, skipping {}: {}", city.table, city.name, e);
                        false
                    }
                }
            })
            .collect()
    }
}

#[async_trait]
impl<D: BrowserDriver + 'static> CycleWorker for HarvestWorker<D> {
    /// Wipe photos and tables, then harvest every city from scratch.
    async fn morning_parse(&self, cancel: &CancellationToken) -> Result<()> {
        if let Err(e) = self.photos.wipe().await {
            warn!("⚠️ Photo cleanup failed, continuing: {:#}", e);
        }
        let cities = self.reset_tables();
        self.harvest_cities(&cities, cancel).await;
        self.log_table_stats();
        Ok(())
    }

    async fn post_step(&self) -> Result<()> {
        self.posting.run(&self.cities, self.clock.now()).await;
        Ok(())
    }

    async fn incremental_harvest(&self, cancel: &CancellationToken) -> Result<()> {
        self.harvest_all(cancel).await;
        self.log_table_stats();
        Ok(())
    }
}
