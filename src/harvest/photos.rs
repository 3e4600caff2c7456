use crate::models::{AssetRef, QualityTier};
use crate::scrapers::quality::split_tier;
use crate::scrapers::traits::ListingSource;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Local photo directory.
#[derive(Debug, Clone)]
pub struct PhotoStore {
    dir: PathBuf,
}

impl PhotoStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Download assets in order as `{id}_{tier}_{seq}.jpg`.
    ///
    /// `seq` counts successful downloads from 1. Failed assets are dropped;
    /// existing files with the same name are overwritten.
    pub async fn download(
        &self,
        source: &dyn ListingSource,
        id: u64,
        assets: Vec<AssetRef>,
    ) -> Vec<AssetRef> {
        self.save(source, id, assets, |asset| asset.tier.as_str()).await
    }

    /// Download photos listed in the detail document as `{id}_api_{seq}.jpg`.
    /// Used when the browser found nothing.
    pub async fn download_listed(
        &self,
        source: &dyn ListingSource,
        id: u64,
        urls: &[String],
        limit: usize,
    ) -> Vec<AssetRef> {
        let assets = urls
            .iter()
            .take(limit)
            .map(|url| {
                let tier = split_tier(url)
                    .map(|(_, tier)| tier)
                    .unwrap_or(QualityTier::Thumb);
                AssetRef {
                    logical_key: url.clone(),
                    tier,
                    source_url: url.clone(),
                    local_path: None,
                }
            })
            .collect();
        let saved = self.save(source, id, assets, |_| "api").await;
        if !saved.is_empty() {
            info!("📸 Saved {} listed photos for {}", saved.len(), id);
        }
        saved
    }

    async fn save(
        &self,
        source: &dyn ListingSource,
        id: u64,
        assets: Vec<AssetRef>,
        label: fn(&AssetRef) -> &'static str,
    ) -> Vec<AssetRef> {
        if assets.is_empty() {
            return assets;
        }
        if let Err(e) = tokio::fs::create_dir_all(&self.dir).await {
            warn!("⚠️ Cannot create photo directory {}: {}", self.dir.display(), e);
            return Vec::new();
        }

        let mut saved = Vec::with_capacity(assets.len());
        for mut asset in assets {
            let bytes = match source.fetch_asset(&asset.source_url).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!("⚠️ Photo download failed for {}: {}", id, e);
                    continue;
                }
            };

            let seq = saved.len() + 1;
            let path = self.dir.join(format!("{}_{}_{}.jpg", id, label(&asset), seq));
            if let Err(e) = tokio::fs::write(&path, &bytes).await {
                warn!("⚠️ Cannot write {}: {}", path.display(), e);
                continue;
            }

            debug!("💾 Saved {} ({} bytes)", path.display(), bytes.len());
            asset.local_path = Some(path);
            saved.push(asset);
        }
        saved
    }

    /// Delete every file in the directory, keeping the directory itself.
    pub async fn wipe(&self) -> Result<usize> {
        if !tokio::fs::try_exists(&self.dir).await.unwrap_or(false) {
            return Ok(0);
        }

        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .with_context(|| format!("Failed to list {}", self.dir.display()))?;

        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                match tokio::fs::remove_file(entry.path()).await {
                    Ok(()) => removed += 1,
                    Err(e) => warn!("⚠️ Cannot delete {}: {}", entry.path().display(), e),
                }
            }
        }

        info!("🗑 Deleted {} photos from {}", removed, self.dir.display());
        Ok(removed)
    }
}
