pub mod config;
pub mod error;
pub mod harvest;
pub mod models;
pub mod notify;
pub mod posting;
pub mod scheduler;
pub mod scrapers;
pub mod storage;
pub mod worker;

#[doc(hidden)]
pub mod test_utils;

pub use config::Config;
pub use error::{ConfigError, FetchError, StoreError};
pub use worker::HarvestWorker;
