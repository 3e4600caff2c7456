use crate::config::CityConfig;
use crate::error::StoreError;
use crate::models::Candidate;
use crate::notify::NotificationSink;
use crate::storage::PersistenceSink;
use chrono::{Duration as ChronoDuration, NaiveDateTime};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// What one posting pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PostReport {
    pub selected: usize,
    pub posted: usize,
    pub skipped_no_photos: usize,
    pub failed: usize,
}

impl PostReport {
    fn absorb(&mut self, other: PostReport) {
        self.selected += other.selected;
        self.posted += other.posted;
        self.skipped_no_photos += other.skipped_no_photos;
        self.failed += other.failed;
    }
}

pub struct PostingCycle {
    store: Arc<dyn PersistenceSink>,
    sink: Arc<dyn NotificationSink>,
    posts_per_city: usize,
    pause: Duration,
}

impl PostingCycle {
    pub fn new(
        store: Arc<dyn PersistenceSink>,
        sink: Arc<dyn NotificationSink>,
        posts_per_city: usize,
        pause: Duration,
    ) -> Self {
        Self {
            store,
            sink,
            posts_per_city,
            pause,
        }
    }

    /// Post for every city. A storage failure only skips that city.
    pub async fn run(&self, cities: &[CityConfig], now: NaiveDateTime) -> PostReport {
        let mut total = PostReport::default();
        for city in cities {
            match self.run_city(city, now).await {
                Ok(report) => total.absorb(report),
                Err(e) => error!("❌ Posting for {} failed: {}", city.name, e),
            }
        }
        info!(
            "📤 Posting done: {} posted, {} without photos, {} failed",
            total.posted, total.skipped_no_photos, total.failed
        );
        total
    }

    pub async fn run_city(
        &self,
        city: &CityConfig,
        now: NaiveDateTime,
    ) -> Result<PostReport, StoreError> {
        let candidates = self.select(&city.table, now)?;
        let mut report = PostReport {
            selected: candidates.len(),
            ..Default::default()
        };

        if candidates.is_empty() {
            info!("📭 Nothing to post for {}", city.name);
            return Ok(report);
        }
        if city.channels.is_empty() {
            warn!("⚠️ {} has no channels configured", city.name);
            return Ok(report);
        }

        for candidate in candidates {
            if !candidate.has_photos() {
                debug!("Listing {} has no photos, skipping", candidate.id);
                report.skipped_no_photos += 1;
                continue;
            }

            if !self.send_to_channels(&candidate, &city.channels).await {
                warn!("❌ Listing {} was not accepted by any channel", candidate.id);
                report.failed += 1;
                continue;
            }

            match self.store.mark_posted(&city.table, candidate.id) {
                Ok(_) => {
                    report.posted += 1;
                    info!("✅ Posted listing {} for {}", candidate.id, city.name);
                }
                Err(e) => {
                    warn!("⚠️ Listing {} sent but not marked posted: {}", candidate.id, e);
                    report.failed += 1;
                }
            }

            tokio::time::sleep(self.pause).await;
        }

        info!(
            "📊 {}: posted {} of {}",
            city.name, report.posted, report.selected
        );
        Ok(report)
    }

    /// Unposted listings from the last hour, else from the last day.
    fn select(&self, table: &str, now: NaiveDateTime) -> Result<Vec<Candidate>, StoreError> {
        let recent = self.store.unposted_since(
            table,
            now - ChronoDuration::hours(1),
            self.posts_per_city,
        )?;
        if !recent.is_empty() {
            debug!("🆕 {} new listings in {} from the last hour", recent.len(), table);
            return Ok(recent);
        }

        debug!("No new listings in {} this hour, using the last 24h", table);
        self.store
            .unposted_since(table, now - ChronoDuration::hours(24), self.posts_per_city)
    }

    /// True when at least one channel accepted the listing.
    async fn send_to_channels(&self, candidate: &Candidate, channels: &[String]) -> bool {
        let mut any = false;
        for channel in channels {
            if self.sink.post_candidate(candidate, channel).await {
                any = true;
            }
        }
        any
    }
}
