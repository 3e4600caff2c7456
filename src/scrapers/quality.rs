use crate::models::{AssetRef, QualityTier};
use std::collections::HashMap;

/// Outcome of feeding one URL to the merger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// First sighting of this logical photo.
    New,
    /// Known photo, replaced in place by a better tier.
    Upgraded,
    /// Known photo, tier not better than the stored one.
    Unchanged,
    /// Not a tiered photo URL.
    Ignored,
}

/// Collapses tiered observations of the same photo to the best one seen,
/// keeping each photo at the position where it first appeared.
#[derive(Debug, Default)]
pub struct QualityMerger {
    assets: Vec<AssetRef>,
    index: HashMap<String, usize>,
}

impl QualityMerger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, url: &str) -> Observation {
        let Some((logical_key, tier)) = split_tier(url) else {
            return Observation::Ignored;
        };

        match self.index.get(&logical_key) {
            Some(&pos) => {
                let current = &mut self.assets[pos];
                if tier.outranks(current.tier) {
                    current.tier = tier;
                    current.source_url = url.to_string();
                    Observation::Upgraded
                } else {
                    Observation::Unchanged
                }
            }
            None => {
                self.index.insert(logical_key.clone(), self.assets.len());
                self.assets.push(AssetRef {
                    logical_key,
                    tier,
                    source_url: url.to_string(),
                    local_path: None,
                });
                Observation::New
            }
        }
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }

    pub fn assets(&self) -> &[AssetRef] {
        &self.assets
    }

    pub fn clear(&mut self) {
        self.assets.clear();
        self.index.clear();
    }

    pub fn into_assets(self) -> Vec<AssetRef> {
        self.assets
    }
}

/// Split `.../abc_lg.webp?x=1` into (`.../abc`, Lg).
pub fn split_tier(url: &str) -> Option<(String, QualityTier)> {
    let clean = url.split('?').next().unwrap_or(url);
    let stem = clean.strip_suffix(".webp")?;
    let (key, suffix) = stem.rsplit_once('_')?;
    let tier = QualityTier::parse(suffix)?;
    if key.is_empty() {
        return None;
    }
    Some((key.to_string(), tier))
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "https://cdn.riastatic.com/photosnew/dom/photo/kvartira";

    fn url(name: &str, tier: &str) -> String {
        format!("{BASE}/{name}_{tier}.webp")
    }

    #[test]
    fn test_best_tier_wins_at_first_position() {
        let mut merger = QualityMerger::new();
        merger.observe(&url("x", "lg"));
        merger.observe(&url("y", "md"));
        merger.observe(&url("x", "thumb"));
        merger.observe(&url("x", "fx"));

        let assets = merger.assets();
        assert_eq!(assets.len(), 2);
        assert_eq!(assets[0].logical_key, format!("{BASE}/x"));
        assert_eq!(assets[0].tier, QualityTier::Fx);
        assert_eq!(assets[0].source_url, url("x", "fx"));
        assert_eq!(assets[1].tier, QualityTier::Md);
    }

    #[test]
    fn test_observation_kinds() {
        let mut merger = QualityMerger::new();
        assert_eq!(merger.observe(&url("a", "md")), Observation::New);
        assert_eq!(merger.observe(&url("a", "sm")), Observation::Unchanged);
        assert_eq!(merger.observe(&url("a", "md")), Observation::Unchanged);
        assert_eq!(merger.observe(&url("a", "lg")), Observation::Upgraded);
        assert_eq!(
            merger.observe("https://cdn.example.com/logo.png"),
            Observation::Ignored
        );
        assert_eq!(
            merger.observe(&format!("{BASE}/a_huge.webp")),
            Observation::Ignored
        );
        assert_eq!(merger.len(), 1);
    }

    #[test]
    fn test_query_string_does_not_split_keys() {
        let mut merger = QualityMerger::new();
        merger.observe(&format!("{}?v=1", url("p", "xs")));
        merger.observe(&format!("{}?v=2", url("p", "lg")));
        assert_eq!(merger.len(), 1);
        assert_eq!(merger.assets()[0].tier, QualityTier::Lg);
    }

    #[test]
    fn test_clear_resets_positions() {
        let mut merger = QualityMerger::new();
        merger.observe(&url("a", "lg"));
        merger.clear();
        assert!(merger.is_empty());
        merger.observe(&url("b", "lg"));
        merger.observe(&url("a", "lg"));
        assert_eq!(merger.assets()[1].logical_key, format!("{BASE}/a"));
    }
}
