use crate::error::StoreError;
use crate::storage::PersistenceSink;
use std::collections::HashSet;
use tracing::warn;

/// Why an id was or was not let through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Fresh,
    SeenThisRun,
    Persisted,
}

/// Run-scoped duplicate filter.
///
/// Both checks are advisory. Two invocations on the same table can both admit
/// an id; the store's insert-if-absent settles it.
#[derive(Debug, Default)]
pub struct DedupGate {
    seen: HashSet<u64>,
}

impl DedupGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// The id is remembered on first check, whatever the store says.
    pub fn check(
        &mut self,
        store: &dyn PersistenceSink,
        table: &str,
        id: u64,
    ) -> Result<Admission, StoreError> {
        if !self.seen.insert(id) {
            return Ok(Admission::SeenThisRun);
        }
        if store.exists(table, id)? {
            return Ok(Admission::Persisted);
        }
        Ok(Admission::Fresh)
    }

    /// A storage failure counts as "do not process".
    pub fn should_process(&mut self, store: &dyn PersistenceSink, table: &str, id: u64) -> bool {
        match self.check(store, table, id) {
            Ok(admission) => admission == Admission::Fresh,
            Err(e) => {
                warn!("⚠️ Existence check for {} failed: {}", id, e);
                false
            }
        }
    }

    pub fn clear(&mut self) {
        self.seen.clear();
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
