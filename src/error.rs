use thiserror::Error;

/// Failures of a single marketplace call.
///
/// Kept distinct from "empty page": only a successfully parsed, empty search
/// result ends pagination.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("listing {0} not found")]
    NotFound(u64),

    #[error("malformed response body: {0}")]
    Malformed(String),
}

impl FetchError {
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout(err.to_string())
        } else if err.is_decode() {
            FetchError::Malformed(err.to_string())
        } else {
            FetchError::Http(err.to_string())
        }
    }
}

/// Storage-layer failures.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("invalid table name: {0:?}")]
    InvalidTable(String),

    #[error("store lock poisoned")]
    Poisoned,
}

/// Rejected configuration values.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no cities configured")]
    NoCities,

    #[error("invalid table name for city {city}: {table:?}")]
    InvalidTable { city: String, table: String },

    #[error("invalid posting window {start}..={end}")]
    InvalidWindow { start: u32, end: u32 },

    #[error("invalid morning hour {0}")]
    InvalidMorningHour(u32),

    #[error("max_photos must be between 1 and {max}, got {got}")]
    TooManyPhotos { got: usize, max: usize },
}
