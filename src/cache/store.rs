//! On-disk layout for cached resources.
//!
//! Each resource occupies two files named by its key: `<key>.img` holds the
//! original downloaded bytes and `<key>.thumb` the PNG-encoded thumbnail.
//! Existence of the files is the index; there is no manifest.

use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::util::unique_temp_path;

/// Disk read/write failure in the cache directory.
///
/// Distinct from a miss: an absent file is a normal outcome, not an error.
#[derive(Debug, Error)]
pub enum CacheIoError {
    #[error("cache I/O failure: {0}")]
    Io(#[from] std::io::Error),
}

/// Raw-bytes store under one cache directory.
///
/// The store is deliberately dumb: keys in, bytes out. Decoding, thumbnail
/// derivation, and concurrency live a layer up in the cache service.
pub struct CacheStore {
    dir: PathBuf,
}

impl CacheStore {
    /// Opens a store rooted at `dir`, creating the directory if needed.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, CacheIoError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn image_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.img"))
    }

    fn thumbnail_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.thumb"))
    }

    /// Reads the full-image bytes for `key`. `None` is a miss.
    pub async fn read_image(&self, key: &str) -> Result<Option<Vec<u8>>, CacheIoError> {
        read_optional(&self.image_path(key)).await
    }

    /// Reads the thumbnail bytes for `key`. `None` is a miss.
    pub async fn read_thumbnail(&self, key: &str) -> Result<Option<Vec<u8>>, CacheIoError> {
        read_optional(&self.thumbnail_path(key)).await
    }

    /// Returns true if both files for `key` exist.
    pub async fn contains(&self, key: &str) -> bool {
        let img = tokio::fs::try_exists(self.image_path(key)).await.unwrap_or(false);
        let thumb = tokio::fs::try_exists(self.thumbnail_path(key)).await.unwrap_or(false);
        img && thumb
    }

    /// Commits both files for `key`, or neither.
    ///
    /// Both payloads are written to temp files first, then renamed into
    /// place. If anything fails partway, temps are removed and an
    /// already-renamed image file is rolled back, so a later load never
    /// observes a thumbnail without its full image or vice versa.
    ///
    /// Temp names are unpredictable per call, so two concurrent saves of
    /// the same key cannot corrupt each other; last rename wins.
    pub async fn commit(
        &self,
        key: &str,
        image_bytes: &[u8],
        thumbnail_bytes: &[u8],
    ) -> Result<(), CacheIoError> {
        let image_path = self.image_path(key);
        let thumb_path = self.thumbnail_path(key);
        let image_tmp = unique_temp_path(&image_path);
        let thumb_tmp = unique_temp_path(&thumb_path);

        if let Err(e) = write_synced(&image_tmp, image_bytes).await {
            let _ = tokio::fs::remove_file(&image_tmp).await;
            return Err(e.into());
        }
        if let Err(e) = write_synced(&thumb_tmp, thumbnail_bytes).await {
            let _ = tokio::fs::remove_file(&image_tmp).await;
            let _ = tokio::fs::remove_file(&thumb_tmp).await;
            return Err(e.into());
        }

        if let Err(e) = tokio::fs::rename(&image_tmp, &image_path).await {
            let _ = tokio::fs::remove_file(&image_tmp).await;
            let _ = tokio::fs::remove_file(&thumb_tmp).await;
            return Err(e.into());
        }
        if let Err(e) = tokio::fs::rename(&thumb_tmp, &thumb_path).await {
            // Roll back the first rename so no partial entry is claimed as cached
            let _ = tokio::fs::remove_file(&image_path).await;
            let _ = tokio::fs::remove_file(&thumb_tmp).await;
            return Err(e.into());
        }

        tracing::debug!(
            key = %key,
            image_size = image_bytes.len(),
            thumbnail_size = thumbnail_bytes.len(),
            "Committed cache entry"
        );
        Ok(())
    }
}

async fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, CacheIoError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => {
            tracing::trace!(path = %path.display(), "Cache file hit");
            Ok(Some(bytes))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::trace!(path = %path.display(), "Cache file miss");
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

async fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    use tokio::io::AsyncWriteExt;
    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await?;
    file.write_all(bytes).await?;
    file.sync_all().await
}
