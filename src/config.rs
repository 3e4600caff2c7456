use crate::error::ConfigError;
use crate::storage::is_valid_table_name;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Number of photo slots a stored listing has.
pub const PHOTO_SLOTS: usize = 10;

const BOT_TOKEN_ENV: &str = "RENTAL_SCOUT_BOT_TOKEN";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database_path: PathBuf,
    pub photos_dir: PathBuf,
    pub max_pages: u32,
    pub min_rooms: i64,
    pub min_area: f64,
    pub max_photos: usize,
    pub verbose: bool,
    pub posts_per_city: usize,
    pub post_pause_ms: u64,
    /// Phones (as returned by the lookup endpoint) whose listings are never stored.
    pub blocked_phones: Vec<String>,
    pub marketplace: MarketplaceConfig,
    pub browser: BrowserConfig,
    pub telegram: TelegramConfig,
    pub schedule: ScheduleConfig,
    pub cities: Vec<CityConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("listings.db"),
            photos_dir: PathBuf::from("photos"),
            max_pages: 2,
            min_rooms: 1,
            min_area: 25.0,
            max_photos: 5,
            verbose: false,
            posts_per_city: 2,
            post_pause_ms: 2000,
            blocked_phones: Vec::new(),
            marketplace: MarketplaceConfig::default(),
            browser: BrowserConfig::default(),
            telegram: TelegramConfig::default(),
            schedule: ScheduleConfig::default(),
            cities: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketplaceConfig {
    pub base_url: String,
    pub search_timeout_secs: u64,
    pub detail_timeout_secs: u64,
    pub realty_type: u32,
    pub operation: u32,
    pub page_limit: u32,
    pub page_pause_ms: u64,
    pub candidate_pause_ms: u64,
    pub user_agent: String,
}

impl Default for MarketplaceConfig {
    fn default() -> Self {
        Self {
            base_url: "https://dom.ria.com".to_string(),
            search_timeout_secs: 8,
            detail_timeout_secs: 5,
            realty_type: 2,
            operation: 3,
            page_limit: 20,
            page_pause_ms: 500,
            candidate_pause_ms: 200,
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string(),
        }
    }
}

impl MarketplaceConfig {
    pub fn search_timeout(&self) -> Duration {
        Duration::from_secs(self.search_timeout_secs)
    }

    pub fn detail_timeout(&self) -> Duration {
        Duration::from_secs(self.detail_timeout_secs)
    }
}

/// Browser launch options and the fixed settle delays used while driving a listing page.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    pub headless: bool,
    pub window_width: u32,
    pub window_height: u32,
    pub page_settle_ms: u64,
    pub gallery_settle_ms: u64,
    pub advance_settle_ms: u64,
    pub key_settle_ms: u64,
    pub click_settle_ms: u64,
    pub tap_capacity: usize,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: true,
            window_width: 1920,
            window_height: 1080,
            page_settle_ms: 1000,
            gallery_settle_ms: 500,
            advance_settle_ms: 600,
            key_settle_ms: 400,
            click_settle_ms: 500,
            tap_capacity: 512,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub api_base: String,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            api_base: "https://api.telegram.org".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub morning_hour: u32,
    pub window_start: u32,
    pub window_end: u32,
    pub stop_grace_secs: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            morning_hour: 8,
            window_start: 10,
            window_end: 22,
            stop_grace_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CityConfig {
    pub name: String,
    pub city_id: u32,
    pub table: String,
    #[serde(default)]
    pub channels: Vec<String>,
    #[serde(default = "default_hours_limit")]
    pub hours_limit: i64,
}

fn default_hours_limit() -> i64 {
    24
}

impl Config {
    /// Load, apply environment overrides and validate.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let mut config = Self::from_toml(&raw)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        if let Ok(token) = std::env::var(BOT_TOKEN_ENV) {
            if !token.is_empty() {
                config.telegram.bot_token = token;
            }
        }

        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cities.is_empty() {
            return Err(ConfigError::NoCities);
        }

        for city in &self.cities {
            if !is_valid_table_name(&city.table) {
                return Err(ConfigError::InvalidTable {
                    city: city.name.clone(),
                    table: city.table.clone(),
                });
            }
        }

        let s = &self.schedule;
        if s.window_start > s.window_end || s.window_end > 23 {
            return Err(ConfigError::InvalidWindow {
                start: s.window_start,
                end: s.window_end,
            });
        }
        if s.morning_hour > 23 {
            return Err(ConfigError::InvalidMorningHour(s.morning_hour));
        }

        if self.max_photos == 0 || self.max_photos > PHOTO_SLOTS {
            return Err(ConfigError::TooManyPhotos {
                got: self.max_photos,
                max: PHOTO_SLOTS,
            });
        }

        Ok(())
    }

    pub fn blocked_phone_set(&self) -> HashSet<String> {
        self.blocked_phones.iter().cloned().collect()
    }
}
