pub mod sqlite;

pub use sqlite::SqliteStore;

use crate::error::StoreError;
use crate::models::Candidate;
use chrono::NaiveDateTime;

/// Row counts of one table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TableStats {
    pub total: usize,
    pub posted: usize,
    pub unposted: usize,
}

/// Persistence used by the harvest pipeline and the posting cycle.
pub trait PersistenceSink: Send + Sync {
    /// Create the table if it does not exist yet.
    fn ensure_table(&self, table: &str) -> Result<(), StoreError>;

    fn exists(&self, table: &str, id: u64) -> Result<bool, StoreError>;

    /// Insert unless a row with the same id exists. Returns whether a row was written.
    fn insert_if_absent(&self, table: &str, candidate: &Candidate) -> Result<bool, StoreError>;

    /// Returns false when the id is unknown.
    fn mark_posted(&self, table: &str, id: u64) -> Result<bool, StoreError>;

    /// Unposted rows published at or after `since`, newest first.
    fn unposted_since(
        &self,
        table: &str,
        since: NaiveDateTime,
        limit: usize,
    ) -> Result<Vec<Candidate>, StoreError>;

    /// Delete every row. Returns the number removed.
    fn clear_table(&self, table: &str) -> Result<usize, StoreError>;

    fn table_stats(&self, table: &str) -> Result<TableStats, StoreError>;
}

/// Table names are interpolated into SQL, so only plain identifiers pass.
pub fn is_valid_table_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    name.len() <= 64 && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_name_validation() {
        assert!(is_valid_table_name("Apartments_Lviv"));
        assert!(is_valid_table_name("_t1"));
        assert!(!is_valid_table_name(""));
        assert!(!is_valid_table_name("1table"));
        assert!(!is_valid_table_name("a b"));
        assert!(!is_valid_table_name("a;DROP TABLE b"));
        assert!(!is_valid_table_name(&"a".repeat(65)));
    }
}
