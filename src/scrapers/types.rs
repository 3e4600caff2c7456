use serde::{Deserialize, Serialize};

/// Search parameters for one city's paginated listing query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchParams {
    /// Region id; the marketplace expects it in both state and city slots
    pub region_id: u32,
    /// Realty type (2 = apartment)
    pub realty_type: u32,
    /// Operation type (3 = long-term rent)
    pub operation: u32,
    /// Page size
    pub limit: u32,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            region_id: 5,
            realty_type: 2,
            operation: 3,
            limit: 20,
        }
    }
}

impl SearchParams {
    /// Query pairs for the search endpoint, newest listings first
    pub fn query(&self, page: u32) -> Vec<(&'static str, String)> {
        vec![
            ("addMoreRealty", "false".to_string()),
            ("excludeSold", "1".to_string()),
            ("category", "1".to_string()),
            ("realty_type", self.realty_type.to_string()),
            ("operation", self.operation.to_string()),
            ("state_id", self.region_id.to_string()),
            ("city_id", self.region_id.to_string()),
            ("price_cur", "1".to_string()),
            ("wo_dupl", "1".to_string()),
            ("sort", "created_at".to_string()),
            ("firstIteraction", "false".to_string()),
            ("limit", self.limit.to_string()),
            ("type", "list".to_string()),
            ("client", "searchV2".to_string()),
            ("page", page.to_string()),
        ]
    }
}

/// One page of candidate ids
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageResult {
    pub ids: Vec<u64>,
    /// True only for a successfully parsed empty page
    pub exhausted: bool,
}

impl PageResult {
    pub fn from_ids(ids: Vec<u64>) -> Self {
        let exhausted = ids.is_empty();
        Self { ids, exhausted }
    }
}

/// How the browser is asked to move to the next gallery photo
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvanceMethod {
    /// Click the gallery's "next" control
    NextButton,
    /// Press the right arrow key on the page body
    ArrowKey,
    /// Click into the gallery, then press the right arrow key
    GalleryClickKey,
}
