use crate::error::{FetchError, StoreError};
use crate::models::{Candidate, ListingDocument};
use crate::scrapers::interception::TapSender;
use crate::scrapers::traits::{BrowserDriver, ListingSource};
use crate::scrapers::types::{AdvanceMethod, PageResult, SearchParams};
use crate::storage::{PersistenceSink, SqliteStore, TableStats};
use chrono::NaiveDateTime;
use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

/// A marketplace photo URL for `name` at `tier`.
pub fn photo_url(name: &str, tier: &str) -> String {
    format!("https://cdn.riastatic.com/photosnew/dom/photo/{name}_{tier}.webp")
}

/// What the scripted browser was asked to do.
#[derive(Debug, Default)]
pub struct BrowserLog {
    pub visited: Vec<String>,
    pub reveals: usize,
    pub advanced: Vec<AdvanceMethod>,
}

impl BrowserLog {
    pub fn advances(&self, method: AdvanceMethod) -> usize {
        self.advanced.iter().filter(|m| **m == method).count()
    }
}

/// Browser that replays canned network observations.
///
/// Each navigation emits the next queued batch, as does each gallery reveal;
/// each advance emits the next batch queued for that method (or nothing once
/// the queue is empty).
#[derive(Default)]
pub struct ScriptedBrowser {
    tap: Option<TapSender>,
    navigations: VecDeque<Vec<String>>,
    reveals: VecDeque<Vec<String>>,
    advances: Vec<(AdvanceMethod, VecDeque<Vec<String>>)>,
    fail_navigation: bool,
    log: Arc<Mutex<BrowserLog>>,
}

impl ScriptedBrowser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_navigate(mut self, urls: Vec<String>) -> Self {
        self.navigations.push_back(urls);
        self
    }

    pub fn on_reveal(mut self, urls: Vec<String>) -> Self {
        self.reveals.push_back(urls);
        self
    }

    pub fn on_advance(mut self, method: AdvanceMethod, urls: Vec<String>) -> Self {
        match self.advances.iter_mut().find(|(m, _)| *m == method) {
            Some((_, queue)) => queue.push_back(urls),
            None => self.advances.push((method, VecDeque::from([urls]))),
        }
        self
    }

    pub fn failing_navigation(mut self) -> Self {
        self.fail_navigation = true;
        self
    }

    pub fn log(&self) -> Arc<Mutex<BrowserLog>> {
        Arc::clone(&self.log)
    }

    fn emit(&self, urls: Vec<String>) {
        if let Some(tap) = &self.tap {
            for url in urls {
                tap.observe(url);
            }
        }
    }
}

impl BrowserDriver for ScriptedBrowser {
    fn attach_tap(&mut self, sender: TapSender) -> Result<()> {
        self.tap = Some(sender);
        Ok(())
    }

    fn navigate(&mut self, url: &str) -> Result<()> {
        if let Ok(mut log) = self.log.lock() {
            log.visited.push(url.to_string());
        }
        if self.fail_navigation {
            bail!("navigation timed out");
        }
        let batch = self.navigations.pop_front().unwrap_or_default();
        self.emit(batch);
        Ok(())
    }

    fn reveal_gallery(&mut self) -> Result<bool> {
        if let Ok(mut log) = self.log.lock() {
            log.reveals += 1;
        }
        let batch = self.reveals.pop_front().unwrap_or_default();
        self.emit(batch);
        Ok(true)
    }

    fn advance(&mut self, method: AdvanceMethod) -> Result<bool> {
        if let Ok(mut log) = self.log.lock() {
            log.advanced.push(method);
        }
        let batch = self
            .advances
            .iter_mut()
            .find(|(m, _)| *m == method)
            .and_then(|(_, queue)| queue.pop_front())
            .unwrap_or_default();
        self.emit(batch);
        Ok(true)
    }
}

/// In-memory marketplace.
#[derive(Default)]
pub struct FakeSource {
    pages: HashMap<u32, Vec<u64>>,
    failing_pages: HashSet<u32>,
    details: HashMap<u64, Value>,
    phones: HashMap<String, String>,
    pub detail_requests: Mutex<Vec<u64>>,
}

impl FakeSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(mut self, page: u32, ids: Vec<u64>) -> Self {
        self.pages.insert(page, ids);
        self
    }

    pub fn with_failing_page(mut self, page: u32) -> Self {
        self.failing_pages.insert(page);
        self
    }

    pub fn with_detail(mut self, id: u64, detail: Value) -> Self {
        self.details.insert(id, detail);
        self
    }

    pub fn with_phone(mut self, hash: &str, phone: &str) -> Self {
        self.phones.insert(hash.to_string(), phone.to_string());
        self
    }

    pub fn detail_requests(&self) -> Vec<u64> {
        self.detail_requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ListingSource for FakeSource {
    async fn fetch_page(
        &self,
        _params: &SearchParams,
        page: u32,
    ) -> Result<PageResult, FetchError> {
        if self.failing_pages.contains(&page) {
            return Err(FetchError::Timeout(format!("page {page}")));
        }
        Ok(PageResult::from_ids(
            self.pages.get(&page).cloned().unwrap_or_default(),
        ))
    }

    async fn fetch_detail(&self, id: u64) -> Result<ListingDocument, FetchError> {
        if let Ok(mut requests) = self.detail_requests.lock() {
            requests.push(id);
        }
        self.details
            .get(&id)
            .map(|value| ListingDocument::from_value(id, value))
            .ok_or(FetchError::NotFound(id))
    }

    async fn lookup_phone(&self, hash: &str) -> Result<Option<String>, FetchError> {
        Ok(self.phones.get(hash).cloned())
    }

    async fn fetch_asset(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        if url.contains("broken") {
            return Err(FetchError::Http("404".to_string()));
        }
        Ok(url.as_bytes().to_vec())
    }
}

/// In-memory store whose writes can be made to fail for chosen rows or tables.
pub struct FlakyStore {
    inner: SqliteStore,
    failing_marks: HashSet<u64>,
    failing_clears: HashSet<String>,
}

impl FlakyStore {
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Ok(Self {
            inner: SqliteStore::open_in_memory()?,
            failing_marks: HashSet::new(),
            failing_clears: HashSet::new(),
        })
    }

    pub fn failing_mark(mut self, id: u64) -> Self {
        self.failing_marks.insert(id);
        self
    }

    pub fn failing_clear(mut self, table: &str) -> Self {
        self.failing_clears.insert(table.to_string());
        self
    }

    pub fn inner(&self) -> &SqliteStore {
        &self.inner
    }
}

impl PersistenceSink for FlakyStore {
    fn ensure_table(&self, table: &str) -> Result<(), StoreError> {
        self.inner.ensure_table(table)
    }

    fn exists(&self, table: &str, id: u64) -> Result<bool, StoreError> {
        self.inner.exists(table, id)
    }

    fn insert_if_absent(&self, table: &str, candidate: &Candidate) -> Result<bool, StoreError> {
        self.inner.insert_if_absent(table, candidate)
    }

    fn mark_posted(&self, table: &str, id: u64) -> Result<bool, StoreError> {
        if self.failing_marks.contains(&id) {
            return Err(StoreError::Poisoned);
        }
        self.inner.mark_posted(table, id)
    }

    fn unposted_since(
        &self,
        table: &str,
        since: NaiveDateTime,
        limit: usize,
    ) -> Result<Vec<Candidate>, StoreError> {
        self.inner.unposted_since(table, since, limit)
    }

    fn clear_table(&self, table: &str) -> Result<usize, StoreError> {
        if self.failing_clears.contains(table) {
            return Err(StoreError::Poisoned);
        }
        self.inner.clear_table(table)
    }

    fn table_stats(&self, table: &str) -> Result<TableStats, StoreError> {
        self.inner.table_stats(table)
    }
}
