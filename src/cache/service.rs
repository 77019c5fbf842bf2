//! Process-wide resource cache with asynchronous load and save pipelines.
//!
//! The cache is a pass-through coordinator over [`CacheStore`]: it holds no
//! decoded state, so repeated loads re-read from disk. Each pipeline is a
//! dispatcher task draining a queue, spawning one task per request under a
//! semaphore so disk work stays bounded when many items ask at once.

use std::sync::Arc;

use image::DynamicImage;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, Semaphore};

use super::key::resource_key;
use super::store::{CacheIoError, CacheStore};
use super::thumbnail;

/// Queue depth per pipeline. Requests beyond this apply backpressure on the
/// enqueuing task, never on the event consumer.
const PIPELINE_QUEUE_DEPTH: usize = 256;

/// Tuning for the cache pipelines.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Concurrent disk reads in the load pipeline.
    pub load_workers: usize,
    /// Concurrent decode-and-commit tasks in the save pipeline.
    pub save_workers: usize,
    /// Thumbnails fit within a square of this many pixels.
    pub thumbnail_max_dim: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            load_workers: 2,
            save_workers: 2,
            thumbnail_max_dim: thumbnail::DEFAULT_THUMBNAIL_MAX_DIM,
        }
    }
}

/// Result of a cache load.
///
/// A miss is a normal, expected outcome for first-time loads. It is not an
/// error and callers fall through to the next tier.
#[derive(Debug, Clone)]
pub enum CacheOutcome {
    Hit(Arc<DynamicImage>),
    Miss,
}

/// Failure of a cache load (a miss is [`CacheOutcome::Miss`], not an error).
#[derive(Debug, Error)]
pub enum CacheError {
    #[error(transparent)]
    Io(#[from] CacheIoError),
    /// The pipeline shut down before the request completed.
    #[error("cache operation cancelled")]
    Cancelled,
}

/// Failure of a cache save.
#[derive(Debug, Error)]
pub enum SaveError {
    /// The downloaded bytes do not decode as an image.
    #[error("image decode failed: {0}")]
    Decode(#[from] image::ImageError),
    #[error(transparent)]
    Io(#[from] CacheIoError),
    /// The pipeline shut down before the request completed.
    #[error("cache operation cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, Copy)]
enum Variant {
    Image,
    Thumbnail,
}

struct LoadRequest {
    url: String,
    variant: Variant,
    reply: oneshot::Sender<Result<CacheOutcome, CacheError>>,
}

struct SaveRequest {
    url: String,
    bytes: Vec<u8>,
    reply: oneshot::Sender<Result<(), SaveError>>,
}

/// Asynchronous image cache keyed by resource URL.
///
/// Constructed once and shared by reference (`Arc`), injectable rather than
/// global, so tests can run against a throwaway directory. Dropping the last
/// handle drains and shuts down both pipelines.
pub struct ResourceCache {
    load_tx: mpsc::Sender<LoadRequest>,
    save_tx: mpsc::Sender<SaveRequest>,
}

impl ResourceCache {
    /// Wraps `store` in load/save pipelines and starts their dispatchers.
    pub fn new(store: CacheStore, config: CacheConfig) -> Arc<Self> {
        let store = Arc::new(store);
        let (load_tx, load_rx) = mpsc::channel(PIPELINE_QUEUE_DEPTH);
        let (save_tx, save_rx) = mpsc::channel(PIPELINE_QUEUE_DEPTH);

        tokio::spawn(run_load_pipeline(
            store.clone(),
            load_rx,
            config.load_workers.max(1),
        ));
        tokio::spawn(run_save_pipeline(
            store,
            save_rx,
            config.save_workers.max(1),
            config.thumbnail_max_dim,
        ));

        Arc::new(Self { load_tx, save_tx })
    }

    /// Loads the full image for `url` from disk.
    pub async fn load_image(&self, url: &str) -> Result<CacheOutcome, CacheError> {
        self.enqueue_load(url, Variant::Image).await
    }

    /// Loads the thumbnail for `url` from disk.
    pub async fn load_thumbnail(&self, url: &str) -> Result<CacheOutcome, CacheError> {
        self.enqueue_load(url, Variant::Thumbnail).await
    }

    /// Saves downloaded bytes for `url`: decodes the image, derives its
    /// thumbnail, and commits both files atomically. Resolves only once
    /// both writes are durably committed.
    pub async fn save(&self, url: &str, bytes: Vec<u8>) -> Result<(), SaveError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let request = SaveRequest {
            url: url.to_string(),
            bytes,
            reply: reply_tx,
        };
        if self.save_tx.send(request).await.is_err() {
            return Err(SaveError::Cancelled);
        }
        reply_rx.await.map_err(|_| SaveError::Cancelled)?
    }

    async fn enqueue_load(&self, url: &str, variant: Variant) -> Result<CacheOutcome, CacheError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let request = LoadRequest {
            url: url.to_string(),
            variant,
            reply: reply_tx,
        };
        if self.load_tx.send(request).await.is_err() {
            return Err(CacheError::Cancelled);
        }
        reply_rx.await.map_err(|_| CacheError::Cancelled)?
    }
}

async fn run_load_pipeline(
    store: Arc<CacheStore>,
    mut rx: mpsc::Receiver<LoadRequest>,
    workers: usize,
) {
    let semaphore = Arc::new(Semaphore::new(workers));
    while let Some(request) = rx.recv().await {
        let Ok(permit) = semaphore.clone().acquire_owned().await else {
            break;
        };
        let store = store.clone();
        tokio::spawn(async move {
            let result = load_one(&store, &request.url, request.variant).await;
            // Requester may have been torn down; a dropped reply is a no-op
            let _ = request.reply.send(result);
            drop(permit);
        });
    }
    tracing::debug!("Cache load pipeline shut down");
}

async fn run_save_pipeline(
    store: Arc<CacheStore>,
    mut rx: mpsc::Receiver<SaveRequest>,
    workers: usize,
    thumbnail_max_dim: u32,
) {
    let semaphore = Arc::new(Semaphore::new(workers));
    while let Some(request) = rx.recv().await {
        let Ok(permit) = semaphore.clone().acquire_owned().await else {
            break;
        };
        let store = store.clone();
        tokio::spawn(async move {
            let result = save_one(&store, &request.url, request.bytes, thumbnail_max_dim).await;
            let _ = request.reply.send(result);
            drop(permit);
        });
    }
    tracing::debug!("Cache save pipeline shut down");
}

/// Reads one variant from disk at dequeue time (read-committed: a save in
/// flight for the same URL is not awaited).
async fn load_one(
    store: &CacheStore,
    url: &str,
    variant: Variant,
) -> Result<CacheOutcome, CacheError> {
    let key = resource_key(url);
    let bytes = match variant {
        Variant::Image => store.read_image(&key).await?,
        Variant::Thumbnail => store.read_thumbnail(&key).await?,
    };

    let Some(bytes) = bytes else {
        return Ok(CacheOutcome::Miss);
    };

    let decoded = tokio::task::spawn_blocking(move || thumbnail::decode(&bytes))
        .await
        .map_err(|_| CacheError::Cancelled)?;

    match decoded {
        Ok(img) => {
            tracing::debug!(url = %url, variant = ?variant, "Cache hit");
            Ok(CacheOutcome::Hit(Arc::new(img)))
        }
        Err(e) => {
            // A corrupt file reads as a miss so the caller falls through to
            // the next tier and eventually overwrites it with a fresh save.
            tracing::warn!(url = %url, error = %e, "Undecodable cache entry treated as miss");
            Ok(CacheOutcome::Miss)
        }
    }
}

async fn save_one(
    store: &CacheStore,
    url: &str,
    bytes: Vec<u8>,
    thumbnail_max_dim: u32,
) -> Result<(), SaveError> {
    let key = resource_key(url);

    let (bytes, thumb_png) = tokio::task::spawn_blocking(move || {
        let img = thumbnail::decode(&bytes)?;
        let thumb = thumbnail::derive_thumbnail(&img, thumbnail_max_dim);
        let png = thumbnail::encode_png(&thumb)?;
        Ok::<_, image::ImageError>((bytes, png))
    })
    .await
    .map_err(|_| SaveError::Cancelled)??;

    store.commit(&key, &bytes, &thumb_png).await?;
    tracing::debug!(url = %url, "Saved image and thumbnail to cache");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_png(width: u32, height: u32) -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(image::RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([(x * 3 % 256) as u8, (y * 5 % 256) as u8, 7])
        }));
        thumbnail::encode_png(&img).unwrap()
    }

    async fn test_cache() -> (Arc<ResourceCache>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::open(dir.path().join("images")).await.unwrap();
        let cache = ResourceCache::new(store, CacheConfig::default());
        (cache, dir)
    }

    #[tokio::test]
    async fn test_save_then_load_image_hits() {
        let (cache, _dir) = test_cache().await;
        let url = "http://example.com/a.png";

        cache.save(url, sample_png(64, 48)).await.unwrap();

        match cache.load_image(url).await.unwrap() {
            CacheOutcome::Hit(img) => assert_eq!((img.width(), img.height()), (64, 48)),
            CacheOutcome::Miss => panic!("expected hit after save"),
        }
    }

    #[tokio::test]
    async fn test_save_then_load_thumbnail_is_downscaled() {
        let (cache, _dir) = test_cache().await;
        let url = "http://example.com/big.png";

        cache.save(url, sample_png(640, 480)).await.unwrap();

        match cache.load_thumbnail(url).await.unwrap() {
            CacheOutcome::Hit(thumb) => {
                assert!(thumb.width() <= thumbnail::DEFAULT_THUMBNAIL_MAX_DIM);
                assert!(thumb.height() <= thumbnail::DEFAULT_THUMBNAIL_MAX_DIM);
            }
            CacheOutcome::Miss => panic!("expected thumbnail hit after save"),
        }
    }

    #[tokio::test]
    async fn test_never_saved_url_misses_both_variants() {
        let (cache, _dir) = test_cache().await;
        let url = "http://example.com/nope.png";

        assert!(matches!(
            cache.load_image(url).await.unwrap(),
            CacheOutcome::Miss
        ));
        assert!(matches!(
            cache.load_thumbnail(url).await.unwrap(),
            CacheOutcome::Miss
        ));
    }

    #[tokio::test]
    async fn test_save_undecodable_bytes_fails_and_commits_nothing() {
        let (cache, _dir) = test_cache().await;
        let url = "http://example.com/garbage.png";

        let result = cache.save(url, b"not an image at all".to_vec()).await;
        assert!(matches!(result, Err(SaveError::Decode(_))));

        assert!(matches!(
            cache.load_image(url).await.unwrap(),
            CacheOutcome::Miss
        ));
    }

    #[tokio::test]
    async fn test_many_concurrent_loads_complete() {
        let (cache, _dir) = test_cache().await;

        for i in 0..4 {
            cache
                .save(&format!("http://example.com/{i}.png"), sample_png(32, 32))
                .await
                .unwrap();
        }

        let mut handles = Vec::new();
        for i in 0..32 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .load_image(&format!("http://example.com/{}.png", i % 8))
                    .await
                    .unwrap()
            }));
        }

        let mut hits = 0;
        let mut misses = 0;
        for handle in handles {
            match handle.await.unwrap() {
                CacheOutcome::Hit(_) => hits += 1,
                CacheOutcome::Miss => misses += 1,
            }
        }
        assert_eq!(hits, 16);
        assert_eq!(misses, 16);
    }
}
