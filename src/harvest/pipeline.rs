use crate::config::{CityConfig, Config};
use crate::harvest::dedup::{Admission, DedupGate};
use crate::harvest::filter::FilterChain;
use crate::harvest::photos::PhotoStore;
use crate::models::{Candidate, FilterVerdict, RunStats};
use crate::scrapers::interception::InterceptionSession;
use crate::scrapers::traits::{BrowserDriver, ListingSource};
use crate::scrapers::types::SearchParams;
use crate::storage::PersistenceSink;
use anyhow::{Context, Result};
use chrono::{Local, NaiveDateTime};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Limits and pacing shared by every city.
#[derive(Debug, Clone)]
pub struct HarvestSettings {
    pub max_pages: u32,
    pub max_photos: usize,
    pub min_rooms: i64,
    pub min_area: f64,
    pub realty_type: u32,
    pub operation: u32,
    pub page_limit: u32,
    pub page_pause: Duration,
    pub candidate_pause: Duration,
    pub blocked_phones: HashSet<String>,
}

impl HarvestSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_pages: config.max_pages,
            max_photos: config.max_photos,
            min_rooms: config.min_rooms,
            min_area: config.min_area,
            realty_type: config.marketplace.realty_type,
            operation: config.marketplace.operation,
            page_limit: config.marketplace.page_limit,
            page_pause: Duration::from_millis(config.marketplace.page_pause_ms),
            candidate_pause: Duration::from_millis(config.marketplace.candidate_pause_ms),
            blocked_phones: config.blocked_phone_set(),
        }
    }

    fn search_params(&self, city: &CityConfig) -> SearchParams {
        SearchParams {
            region_id: city.city_id,
            realty_type: self.realty_type,
            operation: self.operation,
            limit: self.page_limit,
        }
    }
}

pub struct HarvestPipeline {
    source: Arc<dyn ListingSource>,
    store: Arc<dyn PersistenceSink>,
    photos: PhotoStore,
    settings: HarvestSettings,
}

impl HarvestPipeline {
    pub fn new(
        source: Arc<dyn ListingSource>,
        store: Arc<dyn PersistenceSink>,
        photos: PhotoStore,
        settings: HarvestSettings,
    ) -> Self {
        Self {
            source,
            store,
            photos,
            settings,
        }
    }

    /// Harvest one city.
    ///
    /// Only a failure to open the browser session (or to prepare the table)
    /// fails the whole invocation. The session is released before returning.
    pub async fn run<D, F>(
        &self,
        city: &CityConfig,
        open_session: F,
        cancel: &CancellationToken,
    ) -> Result<RunStats>
    where
        D: BrowserDriver,
        F: FnOnce() -> Result<InterceptionSession<D>>,
    {
        info!("🏙 Harvesting {} into {}", city.name, city.table);

        self.store
            .ensure_table(&city.table)
            .with_context(|| format!("Failed to prepare table {}", city.table))?;
        let mut session = open_session().context("Failed to open browser session")?;

        let stats = self.harvest_pages(city, &mut session, cancel).await;
        session.close();

        log_summary(city, &stats);
        Ok(stats)
    }

    async fn harvest_pages<D: BrowserDriver>(
        &self,
        city: &CityConfig,
        session: &mut InterceptionSession<D>,
        cancel: &CancellationToken,
    ) -> RunStats {
        let mut stats = RunStats::default();
        let mut gate = DedupGate::new();
        let filter = FilterChain::new(
            city.hours_limit,
            self.settings.min_rooms,
            self.settings.min_area,
        );
        let params = self.settings.search_params(city);

        'pages: for page in 0..self.settings.max_pages {
            if cancel.is_cancelled() {
                info!("🛑 Harvest of {} cancelled before page {}", city.name, page);
                break;
            }

            let result = match self.source.fetch_page(&params, page).await {
                Ok(result) => result,
                Err(e) => {
                    warn!("⚠️ Page {} of {} failed: {}", page, city.name, e);
                    stats.fetch_failures += 1;
                    if !pause(cancel, self.settings.page_pause).await {
                        break;
                    }
                    continue;
                }
            };

            if result.exhausted {
                debug!("Page {} of {} is empty, stopping", page, city.name);
                break;
            }

            info!("📄 Page {}: {} listings", page, result.ids.len());
            stats.total_found += result.ids.len();

            for id in result.ids {
                if cancel.is_cancelled() {
                    info!("🛑 Harvest of {} cancelled at listing {}", city.name, id);
                    break 'pages;
                }

                self.process_candidate(city, id, &mut gate, &filter, session, &mut stats)
                    .await;

                if !pause(cancel, self.settings.candidate_pause).await {
                    break 'pages;
                }
            }

            if !pause(cancel, self.settings.page_pause).await {
                break;
            }
        }

        stats
    }

    async fn process_candidate<D: BrowserDriver>(
        &self,
        city: &CityConfig,
        id: u64,
        gate: &mut DedupGate,
        filter: &FilterChain,
        session: &mut InterceptionSession<D>,
        stats: &mut RunStats,
    ) {
        match gate.check(self.store.as_ref(), &city.table, id) {
            Ok(Admission::Fresh) => {}
            Ok(Admission::SeenThisRun) => {
                debug!("Listing {} already handled in this run", id);
                return;
            }
            Ok(Admission::Persisted) => {
                debug!("Listing {} already stored", id);
                stats.skipped_existing += 1;
                return;
            }
            Err(e) => {
                warn!("⚠️ Existence check for {} failed: {}", id, e);
                stats.storage_failures += 1;
                return;
            }
        }

        let doc = match self.source.fetch_detail(id).await {
            Ok(doc) => doc,
            Err(e) => {
                warn!("⚠️ Detail for {} failed: {}", id, e);
                stats.fetch_failures += 1;
                return;
            }
        };

        let outcome = filter.evaluate(&doc, now());
        stats.record_verdict(outcome.verdict);
        if outcome.verdict != FilterVerdict::Accepted {
            debug!("Listing {} rejected: {:?}", id, outcome.verdict);
            return;
        }

        let Some(mut candidate) = Candidate::from_document(&doc) else {
            stats.record_verdict(FilterVerdict::RejectedEmptyDate);
            return;
        };

        let enrichment = session
            .enrich(&doc.beautiful_url, self.settings.max_photos)
            .await;

        if let Some(hash) = enrichment.owner_hash.as_deref() {
            match self.source.lookup_phone(hash).await {
                Ok(phone) => candidate.phone = phone,
                Err(e) => warn!("⚠️ Phone lookup for {} failed: {}", id, e),
            }
        } else {
            debug!("No owner hash captured for {}", id);
        }

        if let Some(phone) = candidate.phone.as_deref() {
            if self.settings.blocked_phones.contains(phone) {
                info!("🚫 Listing {} skipped: blocked phone {}", id, phone);
                stats.skipped_blocked += 1;
                return;
            }
        }

        candidate.photo_assets = self
            .photos
            .download(self.source.as_ref(), id, enrichment.photos)
            .await;
        if candidate.photo_assets.is_empty() && !doc.photo_urls.is_empty() {
            debug!("No gallery photos for {}, using the listed ones", id);
            candidate.photo_assets = self
                .photos
                .download_listed(
                    self.source.as_ref(),
                    id,
                    &doc.photo_urls,
                    self.settings.max_photos,
                )
                .await;
        }

        match self.store.insert_if_absent(&city.table, &candidate) {
            Ok(true) => {
                stats.shown += 1;
                info!(
                    "✅ {} | {} грн | {} кімн. | {} м² | {} photos | {}",
                    id,
                    candidate.price,
                    candidate.rooms,
                    candidate.area,
                    candidate.photo_assets.len(),
                    candidate.phone.as_deref().unwrap_or("no phone")
                );
            }
            Ok(false) => {
                debug!("Listing {} was stored concurrently", id);
                stats.skipped_existing += 1;
            }
            Err(e) => {
                warn!("⚠️ Cannot store listing {}: {}", id, e);
                stats.storage_failures += 1;
            }
        }
    }
}

fn now() -> NaiveDateTime {
    Local::now().naive_local()
}

/// Sleep unless cancelled first. Returns false on cancellation.
async fn pause(cancel: &CancellationToken, duration: Duration) -> bool {
    if duration.is_zero() {
        return !cancel.is_cancelled();
    }
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

fn log_summary(city: &CityConfig, stats: &RunStats) {
    info!("📊 {} summary:", city.name);
    info!("   Found: {}", stats.total_found);
    info!("   Stored: {}", stats.shown);
    info!("   Already stored: {}", stats.skipped_existing);
    info!("   No publish date: {}", stats.filtered_empty_date);
    info!("   Older than {}h: {}", city.hours_limit, stats.filtered_too_old);
    info!("   No listing URL: {}", stats.filtered_no_url);
    info!("   Blocked phone: {}", stats.skipped_blocked);
    if stats.fetch_failures > 0 || stats.storage_failures > 0 {
        warn!(
            "   Failures: {} fetch, {} storage",
            stats.fetch_failures, stats.storage_failures
        );
    }
}
