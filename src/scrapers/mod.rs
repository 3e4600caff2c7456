pub mod browser;
pub mod interception;
pub mod quality;
pub mod ria;
pub mod traits;
pub mod types;

pub use browser::ChromeBrowser;
pub use interception::{Enrichment, InterceptionSession, SessionTimings};
pub use quality::QualityMerger;
pub use ria::ListingFetcher;
pub use traits::{BrowserDriver, ListingSource};
pub use types::{AdvanceMethod, PageResult, SearchParams};
