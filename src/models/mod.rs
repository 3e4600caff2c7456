use chrono::NaiveDateTime;
use scraper::Html;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::PathBuf;

/// Timestamp format used by the marketplace and by storage.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Photo quality tiers, declared from highest to lowest fidelity.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum QualityTier {
    Fx,
    Lg,
    Md,
    Sm,
    Xs,
    Thumb,
}

impl QualityTier {
    pub const RANKED: [QualityTier; 6] = [
        QualityTier::Fx,
        QualityTier::Lg,
        QualityTier::Md,
        QualityTier::Sm,
        QualityTier::Xs,
        QualityTier::Thumb,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QualityTier::Fx => "fx",
            QualityTier::Lg => "lg",
            QualityTier::Md => "md",
            QualityTier::Sm => "sm",
            QualityTier::Xs => "xs",
            QualityTier::Thumb => "thumb",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::RANKED.into_iter().find(|tier| tier.as_str() == s)
    }

    /// Lower is better.
    fn rank(&self) -> usize {
        *self as usize
    }

    pub fn outranks(&self, other: QualityTier) -> bool {
        self.rank() < other.rank()
    }
}

impl fmt::Display for QualityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One logical photo of a listing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AssetRef {
    /// Source URL without query string and quality suffix.
    pub logical_key: String,
    pub tier: QualityTier,
    pub source_url: String,
    pub local_path: Option<PathBuf>,
}

impl AssetRef {
    /// Rebuild an asset from a stored photo path named `{id}_{tier}_{seq}.jpg`.
    pub fn from_stored_path(path: &str) -> Self {
        let tier = PathBuf::from(path)
            .file_stem()
            .and_then(|stem| stem.to_str())
            .and_then(|stem| stem.split('_').nth(1))
            .and_then(QualityTier::parse)
            .unwrap_or(QualityTier::Thumb);

        Self {
            logical_key: path.to_string(),
            tier,
            source_url: String::new(),
            local_path: Some(PathBuf::from(path)),
        }
    }
}

/// A discovered listing pending enrichment and persistence.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Candidate {
    pub id: u64,
    pub description: String,
    pub address: String,
    pub price: i64,
    pub floor: i64,
    pub floors_count: i64,
    pub rooms: i64,
    pub area: f64,
    pub phone: Option<String>,
    pub published_at: NaiveDateTime,
    pub photo_assets: Vec<AssetRef>,
    pub posted: bool,
}

impl Candidate {
    /// Build from a detail document. `None` when the publish date is unreadable.
    pub fn from_document(doc: &ListingDocument) -> Option<Self> {
        let published_at = doc.published_at()?;
        Some(Self {
            id: doc.id,
            description: clean_description(&doc.description),
            address: format!("{}, буд. {}", doc.street, doc.building),
            price: doc.price,
            floor: doc.floor,
            floors_count: doc.floors_count,
            rooms: doc.rooms,
            area: doc.area,
            phone: None,
            published_at,
            photo_assets: Vec::new(),
            posted: false,
        })
    }

    pub fn photo_paths(&self) -> impl Iterator<Item = &PathBuf> {
        self.photo_assets
            .iter()
            .filter_map(|asset| asset.local_path.as_ref())
    }

    pub fn has_photos(&self) -> bool {
        self.photo_paths().next().is_some()
    }
}

/// Strip markup and entities from a listing description.
fn clean_description(raw: &str) -> String {
    if raw.is_empty() {
        return String::new();
    }
    let fragment = Html::parse_fragment(raw);
    let text: String = fragment.root_element().text().collect();
    text.replace('\u{a0}', " ").trim().to_string()
}

/// Flat per-listing detail document, read leniently from the marketplace JSON.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListingDocument {
    pub id: u64,
    pub publishing_date: String,
    pub rooms: i64,
    pub area: f64,
    pub beautiful_url: String,
    pub description: String,
    pub price: i64,
    pub floor: i64,
    pub floors_count: i64,
    pub street: String,
    pub building: String,
    /// Absolute photo URLs listed under `photos[].url`.
    pub photo_urls: Vec<String>,
}

impl ListingDocument {
    pub fn from_value(id: u64, value: &Value) -> Self {
        Self {
            id,
            publishing_date: opt_string(value, "publishing_date"),
            rooms: opt_i64(value, "rooms_count"),
            area: opt_f64(value, "total_square_meters"),
            beautiful_url: opt_string(value, "beautiful_url"),
            description: opt_string(value, "description_uk"),
            price: opt_i64(value, "price"),
            floor: opt_i64(value, "floor"),
            floors_count: opt_i64(value, "floors_count"),
            street: opt_string(value, "street_name_uk"),
            building: opt_string(value, "building_number_str"),
            photo_urls: listed_photos(value),
        }
    }

    pub fn published_at(&self) -> Option<NaiveDateTime> {
        NaiveDateTime::parse_from_str(self.publishing_date.trim(), TIMESTAMP_FORMAT).ok()
    }
}

fn opt_string(value: &Value, key: &str) -> String {
    match value.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

fn listed_photos(value: &Value) -> Vec<String> {
    let Some(Value::Array(photos)) = value.get("photos") else {
        return Vec::new();
    };
    photos
        .iter()
        .filter_map(|photo| photo.get("url").and_then(Value::as_str))
        .map(str::trim)
        .filter(|url| url.starts_with("http"))
        .map(str::to_string)
        .collect()
}

fn opt_i64(value: &Value, key: &str) -> i64 {
    match value.get(key) {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or(0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

fn opt_f64(value: &Value, key: &str) -> f64 {
    match value.get(key) {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(f64::NAN),
        Some(Value::String(s)) => s.trim().replace(',', ".").parse().unwrap_or(f64::NAN),
        _ => f64::NAN,
    }
}

/// Result of running the filter chain over one detail document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterVerdict {
    Accepted,
    RejectedEmptyDate,
    RejectedTooOld,
    RejectedNoUrl,
    RejectedMinimums,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterOutcome {
    pub candidate_id: u64,
    pub verdict: FilterVerdict,
}

/// Counters for one harvest invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunStats {
    pub total_found: usize,
    pub shown: usize,
    pub filtered_empty_date: usize,
    pub filtered_too_old: usize,
    pub filtered_no_url: usize,
    pub skipped_existing: usize,
    pub skipped_blocked: usize,
    pub fetch_failures: usize,
    pub storage_failures: usize,
}

impl RunStats {
    pub fn record_verdict(&mut self, verdict: FilterVerdict) {
        match verdict {
            FilterVerdict::RejectedEmptyDate => self.filtered_empty_date += 1,
            FilterVerdict::RejectedTooOld => self.filtered_too_old += 1,
            FilterVerdict::RejectedNoUrl => self.filtered_no_url += 1,
            FilterVerdict::Accepted | FilterVerdict::RejectedMinimums => {}
        }
    }

    pub fn merge(&mut self, other: &RunStats) {
        self.total_found += other.total_found;
        self.shown += other.shown;
        self.filtered_empty_date += other.filtered_empty_date;
        self.filtered_too_old += other.filtered_too_old;
        self.filtered_no_url += other.filtered_no_url;
        self.skipped_existing += other.skipped_existing;
        self.skipped_blocked += other.skipped_blocked;
        self.fetch_failures += other.fetch_failures;
        self.storage_failures += other.storage_failures;
    }
}
