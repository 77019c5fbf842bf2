//! Gallery layer: the ordered photo collection and its per-item state
//! machines.
//!
//! - [`photo`] - One item's load lifecycle, events, and memory management
//! - [`download`] - Streaming image download with progress reporting
//!
//! The gallery owns its items; the cache never holds a reference back to an
//! item, only to URLs.

mod download;
mod photo;

pub use download::NetworkError;
pub use photo::{LoadState, PhotoEvent, PhotoItem};

use std::sync::Arc;
use std::time::Duration;

use crate::cache::ResourceCache;

/// The ordered photo collection built from a feed result.
///
/// Construction validates each URL and skips unusable entries (including
/// the empty strings an empty `<image>` element produces) with a warning;
/// indices reflect positions in the constructed list. Teardown cancels all
/// in-flight work.
pub struct Gallery {
    items: Vec<Arc<PhotoItem>>,
}

impl Gallery {
    /// Builds one [`PhotoItem`] per usable URL, in feed order.
    pub fn from_urls(
        urls: &[String],
        cache: Arc<ResourceCache>,
        client: reqwest::Client,
        timeout: Duration,
        thumbnail_max_dim: u32,
    ) -> Self {
        let mut items = Vec::with_capacity(urls.len());
        for raw in urls {
            match url::Url::parse(raw) {
                Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => {
                    items.push(PhotoItem::new(
                        raw.clone(),
                        items.len(),
                        cache.clone(),
                        client.clone(),
                        timeout,
                        thumbnail_max_dim,
                    ));
                }
                Ok(parsed) => {
                    tracing::warn!(url = %raw, scheme = %parsed.scheme(), "Skipping feed entry with unsupported scheme");
                }
                Err(e) => {
                    tracing::warn!(url = %raw, error = %e, "Skipping invalid feed entry");
                }
            }
        }
        tracing::info!(total = urls.len(), usable = items.len(), "Gallery built");
        Self { items }
    }

    /// The ordered item list, for the presentation layer.
    pub fn items(&self) -> &[Arc<PhotoItem>] {
        &self.items
    }

    pub fn get(&self, index: usize) -> Option<&Arc<PhotoItem>> {
        self.items.get(index)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Cancels in-flight work for every item. Late completions become
    /// no-ops rather than mutating torn-down items.
    pub fn shutdown(&self) {
        for item in &self.items {
            item.cancel();
        }
    }
}

impl Drop for Gallery {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheConfig, CacheStore};

    async fn test_cache() -> (Arc<ResourceCache>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::open(dir.path().join("images")).await.unwrap();
        (ResourceCache::new(store, CacheConfig::default()), dir)
    }

    #[tokio::test]
    async fn test_from_urls_preserves_order_and_indices() {
        let (cache, _dir) = test_cache().await;
        let urls = vec![
            "http://a/1.jpg".to_string(),
            "http://a/2.jpg".to_string(),
            "http://a/3.jpg".to_string(),
        ];

        let gallery = Gallery::from_urls(
            &urls,
            cache,
            reqwest::Client::new(),
            Duration::from_secs(5),
            120,
        );

        assert_eq!(gallery.len(), 3);
        for (i, item) in gallery.items().iter().enumerate() {
            assert_eq!(item.index(), i);
            assert_eq!(item.url(), urls[i]);
            assert_eq!(item.state(), LoadState::Idle);
            assert!(item.image().is_none());
            assert!(item.thumbnail().is_none());
        }
    }

    #[tokio::test]
    async fn test_from_urls_skips_empty_and_invalid_entries() {
        let (cache, _dir) = test_cache().await;
        let urls = vec![
            String::new(),
            "not a url".to_string(),
            "ftp://a/1.jpg".to_string(),
            "http://a/ok.jpg".to_string(),
        ];

        let gallery = Gallery::from_urls(
            &urls,
            cache,
            reqwest::Client::new(),
            Duration::from_secs(5),
            120,
        );

        assert_eq!(gallery.len(), 1);
        assert_eq!(gallery.get(0).unwrap().url(), "http://a/ok.jpg");
    }
}
