use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use image::DynamicImage;
use tokio::sync::broadcast;

use crate::cache::{thumbnail, CacheError, CacheOutcome, ResourceCache};

use super::download::download_image;

/// Where a photo currently is in its load lifecycle.
///
/// At most one of the three `Loading*` states is active per item at a time;
/// the tiers fall through in the order thumbnail-cache → image-cache →
/// network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    Idle,
    LoadingThumbnailFromCache,
    LoadingImageFromCache,
    LoadingFromNetwork,
    Loaded,
    Failed,
}

/// Item-level events republished from cache and network activity.
///
/// Subscribers receive these on the item's broadcast channel; payloads are
/// fetched through the snapshot getters rather than carried in the event.
#[derive(Debug, Clone)]
pub enum PhotoEvent {
    /// A load chain has started for this item.
    LoadStarted,
    /// Download progress changed; fraction in [0,1], non-decreasing.
    ProgressChanged(f32),
    /// The thumbnail became available.
    ThumbnailLoaded,
    /// The full image became available.
    ImageLoaded,
    /// The load chain failed; carries a displayable cause.
    LoadFailed(String),
}

/// Which tier a load chain enters at.
#[derive(Debug, Clone, Copy)]
enum StartTier {
    Thumbnail,
    Image,
}

struct Inner {
    state: LoadState,
    image: Option<Arc<DynamicImage>>,
    thumbnail: Option<Arc<DynamicImage>>,
    progress: f32,
    // Bumped on cancellation; stale driver callbacks compare and no-op.
    generation: u64,
    task: Option<tokio::task::JoinHandle<()>>,
}

/// One row of the gallery: a URL, its position, and the lazily loaded image
/// and thumbnail payloads.
///
/// Nothing loads on construction. A consumer requests the thumbnail when a
/// row becomes visible and the full image when the user opens it; the item
/// then walks the tiers for itself and republishes every cache/network event
/// as a [`PhotoEvent`].
///
/// A request made while another operation is in flight for this item is
/// rejected (`false`), never queued, so handling is deterministic.
pub struct PhotoItem {
    url: String,
    index: usize,
    cache: Arc<ResourceCache>,
    client: reqwest::Client,
    timeout: Duration,
    thumbnail_max_dim: u32,
    inner: Mutex<Inner>,
    events: broadcast::Sender<PhotoEvent>,
}

impl PhotoItem {
    pub fn new(
        url: String,
        index: usize,
        cache: Arc<ResourceCache>,
        client: reqwest::Client,
        timeout: Duration,
        thumbnail_max_dim: u32,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(64);
        Arc::new(Self {
            url,
            index,
            cache,
            client,
            timeout,
            thumbnail_max_dim,
            inner: Mutex::new(Inner {
                state: LoadState::Idle,
                image: None,
                thumbnail: None,
                progress: 0.0,
                generation: 0,
                task: None,
            }),
            events,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Subscribes to this item's event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<PhotoEvent> {
        self.events.subscribe()
    }

    pub fn state(&self) -> LoadState {
        self.lock().state
    }

    pub fn progress(&self) -> f32 {
        self.lock().progress
    }

    pub fn image(&self) -> Option<Arc<DynamicImage>> {
        self.lock().image.clone()
    }

    pub fn thumbnail(&self) -> Option<Arc<DynamicImage>> {
        self.lock().thumbnail.clone()
    }

    pub fn is_loading(&self) -> bool {
        is_loading_state(self.lock().state)
    }

    /// Requests the thumbnail, entering at the thumbnail-cache tier.
    ///
    /// Returns `false` without side effects when another operation is in
    /// flight or the thumbnail is already present.
    pub fn request_thumbnail(self: &Arc<Self>) -> bool {
        self.start_chain(StartTier::Thumbnail)
    }

    /// Requests the full image, entering at the image-cache tier.
    ///
    /// Returns `false` without side effects when another operation is in
    /// flight or the image is already present.
    pub fn request_full_image(self: &Arc<Self>) -> bool {
        self.start_chain(StartTier::Image)
    }

    /// Drops the in-memory image and thumbnail to bound memory.
    ///
    /// Load history is unaffected: a later request re-enters via the cache
    /// first and only re-downloads if the cache entry is absent too.
    /// Refused (`false`) while a load is in flight.
    pub fn release_memory(&self) -> bool {
        let mut inner = self.lock();
        if is_loading_state(inner.state) {
            return false;
        }
        inner.image = None;
        inner.thumbnail = None;
        inner.progress = 0.0;
        if inner.state == LoadState::Loaded {
            inner.state = LoadState::Idle;
        }
        true
    }

    /// Retries after a failure, re-entering at the appropriate tier.
    ///
    /// Only valid from `Failed`; never triggered automatically.
    pub fn retry(self: &Arc<Self>) -> bool {
        {
            let mut inner = self.lock();
            if inner.state != LoadState::Failed {
                return false;
            }
            inner.state = LoadState::Idle;
        }
        if self.thumbnail().is_none() {
            self.request_thumbnail()
        } else {
            self.request_full_image()
        }
    }

    /// Cancels any in-flight operation and invalidates late callbacks.
    ///
    /// Called on gallery teardown; completions belonging to the old
    /// generation become no-ops rather than mutating a dead item.
    pub fn cancel(&self) {
        let mut inner = self.lock();
        inner.generation += 1;
        if let Some(task) = inner.task.take() {
            task.abort();
        }
        if is_loading_state(inner.state) {
            inner.state = LoadState::Idle;
            inner.progress = 0.0;
        }
    }

    fn start_chain(self: &Arc<Self>, tier: StartTier) -> bool {
        let generation = {
            let mut inner = self.lock();
            if is_loading_state(inner.state) {
                return false;
            }
            match tier {
                StartTier::Thumbnail => {
                    if inner.thumbnail.is_some() {
                        return false;
                    }
                    inner.state = LoadState::LoadingThumbnailFromCache;
                }
                StartTier::Image => {
                    if inner.image.is_some() {
                        return false;
                    }
                    inner.state = LoadState::LoadingImageFromCache;
                }
            }
            inner.generation
        };

        let item = self.clone();
        let handle = tokio::spawn(async move {
            item.run_chain(generation, tier).await;
        });
        self.lock().task = Some(handle);
        true
    }

    async fn run_chain(self: Arc<Self>, generation: u64, tier: StartTier) {
        self.emit(PhotoEvent::LoadStarted);

        if matches!(tier, StartTier::Thumbnail) {
            match self.cache.load_thumbnail(&self.url).await {
                Ok(CacheOutcome::Hit(thumb)) => {
                    // Partial Loaded: thumbnail satisfied, full image still absent
                    let applied = self.apply(generation, |inner| {
                        inner.thumbnail = Some(thumb.clone());
                        inner.state = LoadState::Loaded;
                    });
                    if applied {
                        self.emit(PhotoEvent::ThumbnailLoaded);
                    }
                    return;
                }
                Ok(CacheOutcome::Miss) => {
                    if !self.apply(generation, |inner| {
                        inner.state = LoadState::LoadingImageFromCache;
                    }) {
                        return;
                    }
                }
                Err(CacheError::Cancelled) => return,
                Err(e) => {
                    self.fail(generation, e.to_string());
                    return;
                }
            }
        }

        match self.cache.load_image(&self.url).await {
            Ok(CacheOutcome::Hit(img)) => {
                self.finish_with_image(generation, img, None).await;
                return;
            }
            Ok(CacheOutcome::Miss) => {
                if !self.apply(generation, |inner| {
                    inner.state = LoadState::LoadingFromNetwork;
                    inner.progress = 0.0;
                }) {
                    return;
                }
            }
            Err(CacheError::Cancelled) => return,
            Err(e) => {
                self.fail(generation, e.to_string());
                return;
            }
        }

        self.load_from_network(generation).await;
    }

    async fn load_from_network(self: &Arc<Self>, generation: u64) {
        let progress_item = self.clone();
        let result = download_image(&self.client, &self.url, self.timeout, |fraction| {
            progress_item.publish_progress(generation, fraction);
        })
        .await;

        let bytes = match result {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(url = %self.url, index = self.index, error = %e, "Image download failed");
                self.fail(generation, e.to_string());
                return;
            }
        };

        let decoded = tokio::task::spawn_blocking(move || {
            thumbnail::decode(&bytes).map(|img| (bytes, img))
        })
        .await;

        let (bytes, img) = match decoded {
            Ok(Ok(pair)) => pair,
            Ok(Err(e)) => {
                tracing::warn!(url = %self.url, error = %e, "Downloaded bytes do not decode");
                self.fail(generation, e.to_string());
                return;
            }
            Err(_) => return, // task aborted during teardown
        };

        self.finish_with_image(generation, Arc::new(img), Some(bytes))
            .await;
    }

    /// Stores the full image, deriving the thumbnail when absent, and
    /// optionally queues the raw bytes for a cache save.
    async fn finish_with_image(
        self: &Arc<Self>,
        generation: u64,
        img: Arc<DynamicImage>,
        save_bytes: Option<Vec<u8>>,
    ) {
        let needs_thumbnail = self.lock().thumbnail.is_none();

        let derived = if needs_thumbnail {
            let source = img.clone();
            let max_dim = self.thumbnail_max_dim;
            match tokio::task::spawn_blocking(move || {
                thumbnail::derive_thumbnail(&source, max_dim)
            })
            .await
            {
                Ok(thumb) => Some(Arc::new(thumb)),
                Err(_) => return, // task aborted during teardown
            }
        } else {
            None
        };

        let applied = self.apply(generation, |inner| {
            inner.image = Some(img.clone());
            if let Some(thumb) = derived.clone() {
                inner.thumbnail = Some(thumb);
            }
            inner.progress = 1.0;
            inner.state = LoadState::Loaded;
        });
        if !applied {
            return;
        }

        if derived.is_some() {
            self.emit(PhotoEvent::ThumbnailLoaded);
        }
        self.emit(PhotoEvent::ImageLoaded);

        // Fire-and-forget: a save failure is logged but never fails the
        // load; the consumer already has the image in memory.
        if let Some(bytes) = save_bytes {
            let cache = self.cache.clone();
            let url = self.url.clone();
            tokio::spawn(async move {
                if let Err(e) = cache.save(&url, bytes).await {
                    tracing::warn!(url = %url, error = %e, "Cache save failed");
                }
            });
        }
    }

    fn publish_progress(&self, generation: u64, fraction: f32) {
        let changed = {
            let mut inner = self.lock();
            if inner.generation != generation || fraction <= inner.progress {
                false
            } else {
                inner.progress = fraction;
                true
            }
        };
        if changed {
            self.emit(PhotoEvent::ProgressChanged(fraction));
        }
    }

    fn fail(&self, generation: u64, cause: String) {
        let applied = self.apply(generation, |inner| {
            inner.state = LoadState::Failed;
        });
        if applied {
            self.emit(PhotoEvent::LoadFailed(cause));
        }
    }

    /// Runs `f` against the item state unless `generation` is stale.
    fn apply(&self, generation: u64, f: impl FnOnce(&mut Inner)) -> bool {
        let mut inner = self.lock();
        if inner.generation != generation {
            return false;
        }
        f(&mut inner);
        true
    }

    fn emit(&self, event: PhotoEvent) {
        // No subscribers is fine; events are best-effort notifications
        let _ = self.events.send(event);
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn is_loading_state(state: LoadState) -> bool {
    matches!(
        state,
        LoadState::LoadingThumbnailFromCache
            | LoadState::LoadingImageFromCache
            | LoadState::LoadingFromNetwork
    )
}
