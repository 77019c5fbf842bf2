use crate::feed::parser::{parse_image_urls, ParseError};
use crate::util::atomic_write;
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

/// Feed documents larger than this are rejected outright.
const MAX_FEED_SIZE: usize = 10 * 1024 * 1024; // 10MB

/// Errors that can occur during a feed fetch.
///
/// These cover the full lifecycle of one attempt: network issues, HTTP
/// errors, parse failures, and persisting the result list to disk.
#[derive(Debug, Error)]
pub enum FeedError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Request exceeded the configured timeout
    #[error("Request timed out")]
    Timeout,
    /// Response body exceeded the feed size limit
    #[error("Feed document too large")]
    ResponseTooLarge,
    /// Feed XML could not be parsed
    #[error(transparent)]
    Parse(#[from] ParseError),
    /// Writing the parsed URL list to disk failed
    #[error("Failed to persist URL list: {0}")]
    Persist(#[from] std::io::Error),
}

/// Lifecycle signals published while a fetch is in progress.
///
/// Exactly one of `Finished` / `Failed` follows a `Started`.
#[derive(Debug, Clone)]
pub enum FeedEvent {
    /// The network request has been issued.
    Started,
    /// Fetch, parse, and persist all succeeded.
    Finished(Vec<String>),
    /// The attempt failed; carries a displayable cause.
    Failed(String),
}

/// Downloads the photo feed, parses it off-thread, and persists the URL list.
///
/// One `FeedFetcher` serves one fetch attempt and is consumed by it; retry
/// means constructing a new fetcher. Completion reaches the caller both as
/// the return value of [`fetch`](Self::fetch) and as [`FeedEvent`]s on the
/// channel supplied at construction, so an interactive consumer can stay on
/// its own thread.
pub struct FeedFetcher {
    client: reqwest::Client,
    feed_url: String,
    list_path: PathBuf,
    timeout: Duration,
    events: mpsc::Sender<FeedEvent>,
}

impl FeedFetcher {
    pub fn new(
        client: reqwest::Client,
        feed_url: impl Into<String>,
        list_path: impl Into<PathBuf>,
        timeout: Duration,
        events: mpsc::Sender<FeedEvent>,
    ) -> Self {
        Self {
            client,
            feed_url: feed_url.into(),
            list_path: list_path.into(),
            timeout,
            events,
        }
    }

    /// Fetches the feed, parses it, and overwrites the persisted URL list.
    ///
    /// Event order: `Started`, then exactly one of `Finished` / `Failed`.
    /// No automatic retries; whether and when to retry is the caller's
    /// decision.
    ///
    /// # Errors
    ///
    /// - [`FeedError::Network`] / [`FeedError::Timeout`] - request-level failure
    /// - [`FeedError::HttpStatus`] - non-2xx response
    /// - [`FeedError::ResponseTooLarge`] - body over the feed size limit
    /// - [`FeedError::Parse`] - malformed feed document
    /// - [`FeedError::Persist`] - URL list could not be written
    pub async fn fetch(self) -> Result<Vec<String>, FeedError> {
        self.emit(FeedEvent::Started).await;

        match self.fetch_inner().await {
            Ok(urls) => {
                tracing::info!(
                    feed = %self.feed_url,
                    count = urls.len(),
                    "Feed fetched and parsed"
                );
                self.emit(FeedEvent::Finished(urls.clone())).await;
                Ok(urls)
            }
            Err(e) => {
                tracing::warn!(feed = %self.feed_url, error = %e, "Feed fetch failed");
                self.emit(FeedEvent::Failed(e.to_string())).await;
                Err(e)
            }
        }
    }

    async fn fetch_inner(&self) -> Result<Vec<String>, FeedError> {
        let response = tokio::time::timeout(self.timeout, self.client.get(&self.feed_url).send())
            .await
            .map_err(|_| FeedError::Timeout)?
            .map_err(FeedError::Network)?;

        if !response.status().is_success() {
            return Err(FeedError::HttpStatus(response.status().as_u16()));
        }

        let bytes = read_limited_bytes(response, MAX_FEED_SIZE).await?;

        // Parsing is CPU-bound; keep it off the runtime's reactor threads.
        let urls = tokio::task::spawn_blocking(move || parse_image_urls(&bytes))
            .await
            .map_err(|e| {
                FeedError::Persist(std::io::Error::other(format!("parse task failed: {e}")))
            })??;

        self.persist_urls(&urls).await?;

        Ok(urls)
    }

    /// Overwrites the persisted list file with `urls`, one per line.
    /// Last successful fetch wins; there is no merging.
    async fn persist_urls(&self, urls: &[String]) -> Result<(), std::io::Error> {
        let mut content = urls.join("\n");
        if !content.is_empty() {
            content.push('\n');
        }
        atomic_write(&self.list_path, content.as_bytes()).await?;
        tracing::debug!(path = %self.list_path.display(), count = urls.len(), "Persisted URL list");
        Ok(())
    }

    /// Reads a previously persisted URL list.
    ///
    /// Returns `Ok(None)` when no list has been saved yet, a normal
    /// first-run condition, distinct from an I/O failure.
    pub async fn load_saved_urls(path: &Path) -> Result<Option<Vec<String>>, std::io::Error> {
        match tokio::fs::read_to_string(path).await {
            Ok(content) => {
                let urls: Vec<String> = content.lines().map(|l| l.to_string()).collect();
                Ok(Some(urls))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn emit(&self, event: FeedEvent) {
        if let Err(e) = self.events.send(event).await {
            tracing::debug!(error = %e, "Feed event receiver dropped");
        }
    }
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FeedError> {
    // Fast path: reject on Content-Length before reading anything
    if let Some(len) = response.content_length() {
        if len as usize > limit {
            return Err(FeedError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(FeedError::Network)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FeedError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    Ok(bytes)
}
