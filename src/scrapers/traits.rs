use crate::error::FetchError;
use crate::models::ListingDocument;
use crate::scrapers::interception::TapSender;
use crate::scrapers::types::{AdvanceMethod, PageResult, SearchParams};
use anyhow::Result;
use async_trait::async_trait;

/// Plain-HTTP access to the marketplace.
/// Implemented by the live fetcher and by scripted fakes in tests.
#[async_trait]
pub trait ListingSource: Send + Sync {
    /// Fetch one page of candidate ids
    async fn fetch_page(&self, params: &SearchParams, page: u32) -> Result<PageResult, FetchError>;

    /// Fetch the detail document of one listing
    async fn fetch_detail(&self, id: u64) -> Result<ListingDocument, FetchError>;

    /// Resolve an intercepted owner hash to a phone number
    async fn lookup_phone(&self, hash: &str) -> Result<Option<String>, FetchError>;

    /// Download one photo
    async fn fetch_asset(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}

/// Minimal surface of an interactive browser needed to enrich a listing.
///
/// Calls are best-effort: `Ok(false)` means the control was not on the page.
pub trait BrowserDriver: Send {
    /// Route every observed network URL into the tap
    fn attach_tap(&mut self, sender: TapSender) -> Result<()>;

    fn navigate(&mut self, url: &str) -> Result<()>;

    /// Open the full-screen gallery if the page has the control
    fn reveal_gallery(&mut self) -> Result<bool>;

    /// Ask the gallery to show the next photo
    fn advance(&mut self, method: AdvanceMethod) -> Result<bool>;
}
