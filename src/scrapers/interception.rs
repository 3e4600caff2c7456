use crate::config::BrowserConfig;
use crate::models::AssetRef;
use crate::scrapers::quality::QualityMerger;
use crate::scrapers::traits::BrowserDriver;
use crate::scrapers::types::AdvanceMethod;
use anyhow::Result;
use regex::Regex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Path fragment of marketplace-hosted listing photos.
pub const PHOTO_PATH: &str = "photosnew/dom/photo/";

/// Below this many photos the fallback advance strategies kick in.
pub const PHOTO_FLOOR: usize = 5;

static OWNER_HASH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"/getOwnerAndAgencyData/([^/?]+)\?").expect("owner hash pattern is valid")
});

/// Producer half of the tap, handed to the browser's network listener.
#[derive(Clone)]
pub struct TapSender {
    tx: SyncSender<String>,
    dropped: Arc<AtomicUsize>,
}

impl TapSender {
    /// Never blocks; a full queue drops the URL.
    pub fn observe(&self, url: String) {
        match self.tx.try_send(url) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}

/// Bounded queue of observed network URLs.
pub struct ObservationTap {
    rx: Receiver<String>,
    dropped: Arc<AtomicUsize>,
}

impl ObservationTap {
    pub fn bounded(capacity: usize) -> (TapSender, ObservationTap) {
        let (tx, rx) = sync_channel(capacity.max(1));
        let dropped = Arc::new(AtomicUsize::new(0));
        (
            TapSender {
                tx,
                dropped: Arc::clone(&dropped),
            },
            ObservationTap { rx, dropped },
        )
    }

    pub fn drain(&self) -> Vec<String> {
        self.rx.try_iter().collect()
    }

    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Extract the opaque owner hash from a lookup URL.
pub fn extract_owner_hash(url: &str) -> Option<String> {
    OWNER_HASH
        .captures(url)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Bounded retry with early exit after too many attempts without progress.
#[derive(Debug, Clone)]
pub struct AdvanceBudget {
    max_attempts: usize,
    stall_limit: usize,
    attempts: usize,
    stalled: usize,
}

impl AdvanceBudget {
    pub fn new(max_attempts: usize, stall_limit: usize) -> Self {
        Self {
            max_attempts,
            stall_limit,
            attempts: 0,
            stalled: 0,
        }
    }

    /// Claim the next attempt, if any remain.
    pub fn try_attempt(&mut self) -> bool {
        if self.attempts >= self.max_attempts || self.stalled >= self.stall_limit {
            return false;
        }
        self.attempts += 1;
        true
    }

    pub fn record(&mut self, progressed: bool) {
        if progressed {
            self.stalled = 0;
        } else {
            self.stalled += 1;
        }
    }

    pub fn attempts(&self) -> usize {
        self.attempts
    }

    pub fn stalled_out(&self) -> bool {
        self.stalled >= self.stall_limit
    }
}

/// Attempt budgets for the primary and fallback gallery strategies.
#[derive(Debug, Clone)]
pub struct AdvancePolicy {
    pub primary: (usize, usize),
    pub arrow_key: (usize, usize),
    pub gallery_click: (usize, usize),
}

impl Default for AdvancePolicy {
    fn default() -> Self {
        Self {
            primary: (25, 5),
            arrow_key: (10, 5),
            gallery_click: (8, 5),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionTimings {
    pub page_settle: Duration,
    pub gallery_settle: Duration,
    pub advance_settle: Duration,
    pub key_settle: Duration,
    pub click_settle: Duration,
}

impl SessionTimings {
    pub fn from_config(config: &BrowserConfig) -> Self {
        Self {
            page_settle: Duration::from_millis(config.page_settle_ms),
            gallery_settle: Duration::from_millis(config.gallery_settle_ms),
            advance_settle: Duration::from_millis(config.advance_settle_ms),
            key_settle: Duration::from_millis(config.key_settle_ms),
            click_settle: Duration::from_millis(config.click_settle_ms),
        }
    }

    pub fn immediate() -> Self {
        Self {
            page_settle: Duration::ZERO,
            gallery_settle: Duration::ZERO,
            advance_settle: Duration::ZERO,
            key_settle: Duration::ZERO,
            click_settle: Duration::ZERO,
        }
    }

    fn settle_for(&self, method: AdvanceMethod) -> Duration {
        match method {
            AdvanceMethod::NextButton => self.advance_settle,
            AdvanceMethod::ArrowKey => self.key_settle,
            AdvanceMethod::GalleryClickKey => self.click_settle,
        }
    }
}

/// What the browser phase found for one listing.
#[derive(Debug, Clone, Default)]
pub struct Enrichment {
    pub owner_hash: Option<String>,
    pub photos: Vec<AssetRef>,
}

/// Exclusive owner of the browser for the length of one harvest invocation.
///
/// The browser reports every network response URL into a bounded
/// [`ObservationTap`], drained only at checkpoints. Photo observations are
/// counted from the moment the gallery phase starts; whatever the page
/// loaded before that (other listings' carousels) is discarded.
pub struct InterceptionSession<D: BrowserDriver> {
    driver: D,
    tap: ObservationTap,
    timings: SessionTimings,
    policy: AdvancePolicy,
    listing_base: String,
    merger: QualityMerger,
    last_hash: Option<String>,
}

impl<D: BrowserDriver> InterceptionSession<D> {
    pub fn open(
        mut driver: D,
        timings: SessionTimings,
        tap_capacity: usize,
        listing_base: &str,
    ) -> Result<Self> {
        let (sender, tap) = ObservationTap::bounded(tap_capacity);
        driver.attach_tap(sender)?;

        Ok(Self {
            driver,
            tap,
            timings,
            policy: AdvancePolicy::default(),
            listing_base: listing_base.trim_end_matches('/').to_string(),
            merger: QualityMerger::new(),
            last_hash: None,
        })
    }

    /// Visit one listing page and collect its owner hash and photos.
    /// Never fails: browser errors only shrink what is returned.
    pub async fn enrich(&mut self, beautiful_url: &str, max_photos: usize) -> Enrichment {
        self.reset();

        let url = format!("{}/uk/{}", self.listing_base, beautiful_url);
        debug!("Opening listing page {}", url);

        if let Err(e) = self.driver.navigate(&url) {
            warn!("⚠️ Navigation to {} failed: {:#}", url, e);
            self.checkpoint();
            return self.take_enrichment(max_photos);
        }

        tokio::time::sleep(self.timings.page_settle).await;
        self.checkpoint();

        self.harvest_photos(max_photos).await;

        let dropped = self.tap.dropped();
        if dropped > 0 {
            debug!("Observation tap dropped {} URLs so far", dropped);
        }

        self.take_enrichment(max_photos)
    }

    /// Release the browser.
    pub fn close(self) {
        info!("🔒 Closing browser session");
        drop(self.driver);
    }

    fn reset(&mut self) {
        let stale = self.tap.drain().len();
        if stale > 0 {
            debug!("Discarded {} observations from the previous listing", stale);
        }
        self.merger.clear();
        self.last_hash = None;
    }

    /// Drain the tap; returns the merged photo count.
    fn checkpoint(&mut self) -> usize {
        for url in self.tap.drain() {
            if let Some(hash) = extract_owner_hash(&url) {
                self.last_hash = Some(hash);
            } else if url.contains(PHOTO_PATH) {
                self.merger.observe(&url);
            }
        }
        self.merger.len()
    }

    async fn harvest_photos(&mut self, max_photos: usize) {
        self.merger.clear();
        match self.driver.reveal_gallery() {
            Ok(true) => debug!("🖼 Gallery opened"),
            Ok(false) => debug!("Gallery control not found"),
            Err(e) => debug!("Gallery control failed: {:#}", e),
        }
        tokio::time::sleep(self.timings.gallery_settle).await;
        self.checkpoint();

        let (max, stall) = self.policy.primary;
        self.run_strategy(AdvanceMethod::NextButton, AdvanceBudget::new(max, stall), max_photos)
            .await;

        if self.merger.len() < PHOTO_FLOOR && max_photos > PHOTO_FLOOR {
            debug!(
                "🔄 Only {} photos found, trying fallback strategies",
                self.merger.len()
            );
            let (max, stall) = self.policy.arrow_key;
            self.run_strategy(AdvanceMethod::ArrowKey, AdvanceBudget::new(max, stall), max_photos)
                .await;

            if self.merger.len() < PHOTO_FLOOR {
                let (max, stall) = self.policy.gallery_click;
                self.run_strategy(
                    AdvanceMethod::GalleryClickKey,
                    AdvanceBudget::new(max, stall),
                    max_photos,
                )
                .await;
            }
        }
    }

    async fn run_strategy(
        &mut self,
        method: AdvanceMethod,
        mut budget: AdvanceBudget,
        max_photos: usize,
    ) {
        while self.merger.len() < max_photos && budget.try_attempt() {
            let before = self.merger.len();
            let progressed = match self.driver.advance(method) {
                Ok(true) => {
                    tokio::time::sleep(self.timings.settle_for(method)).await;
                    self.checkpoint() > before
                }
                Ok(false) => false,
                Err(e) => {
                    debug!("Advance via {:?} failed: {:#}", method, e);
                    false
                }
            };
            budget.record(progressed);
        }

        debug!(
            "📸 {:?}: {} photos after {} attempts{}",
            method,
            self.merger.len(),
            budget.attempts(),
            if budget.stalled_out() { " (stalled)" } else { "" }
        );
    }

    fn take_enrichment(&mut self, max_photos: usize) -> Enrichment {
        let merger = std::mem::take(&mut self.merger);
        let mut photos = merger.into_assets();
        photos.truncate(max_photos);
        Enrichment {
            owner_hash: self.last_hash.clone(),
            photos,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::QualityTier;
    use crate::test_utils::{photo_url, ScriptedBrowser};

    const OWNER_URL: &str =
        "https://dom.ria.com/v1/api/realty/getOwnerAndAgencyData/h4sh?spa_final_page=true";

    fn session(browser: ScriptedBrowser) -> InterceptionSession<ScriptedBrowser> {
        InterceptionSession::open(
            browser,
            SessionTimings::immediate(),
            64,
            "https://dom.ria.com",
        )
        .unwrap()
    }

    #[test]
    fn test_extract_owner_hash() {
        assert_eq!(extract_owner_hash(OWNER_URL).as_deref(), Some("h4sh"));
        assert_eq!(
            extract_owner_hash("https://dom.ria.com/v1/api/realty/getOwnerAndAgencyData/h4sh"),
            None
        );
        assert_eq!(extract_owner_hash("https://dom.ria.com/uk/"), None);
    }

    #[test]
    fn test_tap_drops_when_full() {
        let (tx, tap) = ObservationTap::bounded(2);
        for i in 0..5 {
            tx.observe(format!("u{i}"));
        }
        assert_eq!(tap.dropped(), 3);
        assert_eq!(tap.drain(), vec!["u0".to_string(), "u1".to_string()]);
        assert!(tap.drain().is_empty());
    }

    #[test]
    fn test_budget_stops_on_stall_and_resets_on_progress() {
        let mut budget = AdvanceBudget::new(10, 2);
        assert!(budget.try_attempt());
        budget.record(false);
        assert!(budget.try_attempt());
        budget.record(true);
        assert!(budget.try_attempt());
        budget.record(false);
        assert!(budget.try_attempt());
        budget.record(false);
        assert!(!budget.try_attempt());
        assert!(budget.stalled_out());
        assert_eq!(budget.attempts(), 4);

        let mut budget = AdvanceBudget::new(3, 5);
        let mut n = 0;
        while budget.try_attempt() {
            budget.record(true);
            n += 1;
        }
        assert_eq!(n, 3);
    }

    #[tokio::test]
    async fn test_enrich_merges_tiers_and_captures_hash() {
        let browser = ScriptedBrowser::new()
            .on_navigate(vec![OWNER_URL.to_string()])
            .on_reveal(vec![photo_url("k1", "lg")])
            .on_advance(AdvanceMethod::NextButton, vec![photo_url("k2", "lg")])
            .on_advance(AdvanceMethod::NextButton, vec![photo_url("k1", "fx")]);

        let mut session = session(browser);
        let found = session.enrich("realty-1.html", 5).await;

        assert_eq!(found.owner_hash.as_deref(), Some("h4sh"));
        assert_eq!(found.photos.len(), 2);
        assert_eq!(found.photos[0].tier, QualityTier::Fx);
        assert!(found.photos[0].logical_key.ends_with("/k1"));
        assert_eq!(found.photos[1].tier, QualityTier::Lg);
    }

    #[tokio::test]
    async fn test_stalled_gallery_uses_bounded_fallbacks() {
        let browser = ScriptedBrowser::new().on_reveal(vec![photo_url("only", "md")]);
        let log = browser.log();

        let mut session = session(browser);
        let found = session.enrich("realty-2.html", 10).await;

        assert_eq!(found.photos.len(), 1);
        let log = log.lock().unwrap();
        assert_eq!(log.advances(AdvanceMethod::NextButton), 5);
        assert_eq!(log.advances(AdvanceMethod::ArrowKey), 5);
        assert_eq!(log.advances(AdvanceMethod::GalleryClickKey), 5);
    }

    #[tokio::test]
    async fn test_no_fallback_when_target_within_floor() {
        let browser = ScriptedBrowser::new();
        let log = browser.log();

        let mut session = session(browser);
        let found = session.enrich("realty-3.html", 5).await;

        assert!(found.photos.is_empty());
        assert!(found.owner_hash.is_none());
        let log = log.lock().unwrap();
        assert_eq!(log.advances(AdvanceMethod::NextButton), 5);
        assert_eq!(log.advances(AdvanceMethod::ArrowKey), 0);
    }

    #[tokio::test]
    async fn test_stops_at_max_photos() {
        let mut browser = ScriptedBrowser::new().on_reveal(vec![photo_url("p0", "lg")]);
        for i in 1..20 {
            let url = photo_url(&format!("p{i}"), "lg");
            browser = browser.on_advance(AdvanceMethod::NextButton, vec![url]);
        }
        let log = browser.log();

        let mut session = session(browser);
        let found = session.enrich("realty-4.html", 3).await;

        assert_eq!(found.photos.len(), 3);
        assert_eq!(log.lock().unwrap().advances(AdvanceMethod::NextButton), 2);
    }

    #[tokio::test]
    async fn test_hash_does_not_leak_between_listings() {
        let browser = ScriptedBrowser::new().on_navigate(vec![OWNER_URL.to_string()]);

        let mut session = session(browser);
        let first = session.enrich("realty-5.html", 5).await;
        assert_eq!(first.owner_hash.as_deref(), Some("h4sh"));

        let second = session.enrich("realty-6.html", 5).await;
        assert!(second.owner_hash.is_none());
    }

    #[tokio::test]
    async fn test_page_load_photos_are_not_counted() {
        let browser = ScriptedBrowser::new()
            .on_navigate(vec![
                photo_url("other_listing", "md"),
                OWNER_URL.to_string(),
            ])
            .on_advance(AdvanceMethod::NextButton, vec![photo_url("own", "lg")]);

        let mut session = session(browser);
        let found = session.enrich("realty-9.html", 5).await;

        assert_eq!(found.owner_hash.as_deref(), Some("h4sh"));
        assert_eq!(found.photos.len(), 1);
        assert!(found.photos[0].logical_key.ends_with("/own"));
        assert_eq!(found.photos[0].tier, QualityTier::Lg);
    }

    #[tokio::test]
    async fn test_navigation_failure_degrades_to_empty() {
        let browser = ScriptedBrowser::new().failing_navigation();
        let log = browser.log();

        let mut session = session(browser);
        let found = session.enrich("realty-7.html", 5).await;

        assert!(found.photos.is_empty());
        assert!(found.owner_hash.is_none());
        assert_eq!(log.lock().unwrap().advances(AdvanceMethod::NextButton), 0);
    }

    #[tokio::test]
    async fn test_navigates_to_localized_listing_url() {
        let browser = ScriptedBrowser::new();
        let log = browser.log();

        let mut session = session(browser);
        session.enrich("realty-8.html", 5).await;

        assert_eq!(
            log.lock().unwrap().visited,
            vec!["https://dom.ria.com/uk/realty-8.html".to_string()]
        );
    }
}
