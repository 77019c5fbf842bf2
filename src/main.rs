use anyhow::{Context, Result};
use clap::Parser;
use futures::StreamExt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use photofeed::cache::{CacheConfig, CacheStore, ResourceCache};
use photofeed::config::Config;
use photofeed::feed::{FeedEvent, FeedFetcher};
use photofeed::gallery::{Gallery, PhotoEvent, PhotoItem};

#[derive(Parser, Debug)]
#[command(name = "photofeed", about = "Prefetch a photo feed into the local image cache")]
struct Args {
    /// Path to the config file (defaults to the platform config directory)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Feed URL (overrides the config file)
    #[arg(long, value_name = "URL")]
    feed_url: Option<String>,

    /// Data directory for the URL list and image cache
    #[arg(long, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// Ignore the saved URL list and refetch the feed
    #[arg(long)]
    refresh: bool,
}

/// How many items are driven through their load chains at once.
const DRIVE_CONCURRENCY: usize = 4;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let dirs = directories::ProjectDirs::from("", "", "photofeed");

    let config_path = match &args.config {
        Some(path) => path.clone(),
        None => dirs
            .as_ref()
            .map(|d| d.config_dir().join("config.toml"))
            .unwrap_or_else(|| PathBuf::from("photofeed.toml")),
    };
    let config = Config::load(&config_path).context("Failed to load configuration")?;

    let feed_url = args
        .feed_url
        .clone()
        .or_else(|| (!config.feed_url.is_empty()).then(|| config.feed_url.clone()));
    let Some(feed_url) = feed_url else {
        eprintln!("Error: no feed URL configured.");
        eprintln!();
        eprintln!("Pass one with --feed-url, or set feed_url in {}", config_path.display());
        std::process::exit(1);
    };

    let data_dir = args
        .data_dir
        .clone()
        .or_else(|| config.data_dir.clone())
        .or_else(|| dirs.as_ref().map(|d| d.data_dir().to_path_buf()))
        .unwrap_or_else(|| PathBuf::from(".photofeed"));
    std::fs::create_dir_all(&data_dir).context("Failed to create data directory")?;

    let list_path = data_dir.join("feed_urls.txt");
    let timeout = Duration::from_secs(config.request_timeout_secs);

    let store = CacheStore::open(data_dir.join("images"))
        .await
        .context("Failed to open image cache")?;
    let cache = ResourceCache::new(
        store,
        CacheConfig {
            load_workers: config.load_workers,
            save_workers: config.save_workers,
            thumbnail_max_dim: config.thumbnail_max_dim,
        },
    );

    let client = reqwest::Client::builder()
        .build()
        .context("Failed to create HTTP client")?;

    // Prefer the saved list unless asked for a fresh fetch
    let saved = if args.refresh {
        None
    } else {
        FeedFetcher::load_saved_urls(&list_path)
            .await
            .context("Failed to read saved URL list")?
    };

    let urls = match saved {
        Some(urls) => {
            println!("Using saved URL list ({} entries); pass --refresh to refetch", urls.len());
            urls
        }
        None => {
            let (event_tx, mut event_rx) = mpsc::channel::<FeedEvent>(8);
            tokio::spawn(async move {
                while let Some(event) = event_rx.recv().await {
                    match event {
                        FeedEvent::Started => println!("Downloading feed..."),
                        FeedEvent::Finished(urls) => {
                            println!("Feed parsed: {} entries", urls.len())
                        }
                        FeedEvent::Failed(cause) => eprintln!("Feed fetch failed: {cause}"),
                    }
                }
            });

            let fetcher = FeedFetcher::new(
                client.clone(),
                feed_url.clone(),
                &list_path,
                timeout,
                event_tx,
            );
            fetcher.fetch().await.context("Feed fetch failed")?
        }
    };

    let gallery = Gallery::from_urls(
        &urls,
        cache,
        client,
        timeout,
        config.thumbnail_max_dim,
    );
    if gallery.is_empty() {
        println!("Nothing to do: the feed contained no usable image URLs.");
        return Ok(());
    }

    let results: Vec<(usize, Result<(), String>)> = futures::stream::iter(
        gallery.items().iter().cloned(),
    )
    .map(|item| async move {
        let index = item.index();
        let result = drive_item(&item).await;
        match &result {
            Ok(()) => tracing::info!(index = index, url = %item.url(), "Item loaded"),
            Err(cause) => {
                tracing::warn!(index = index, url = %item.url(), cause = %cause, "Item failed")
            }
        }
        (index, result)
    })
    .buffer_unordered(DRIVE_CONCURRENCY)
    .collect()
    .await;

    let failed: Vec<&(usize, Result<(), String>)> =
        results.iter().filter(|(_, r)| r.is_err()).collect();
    println!(
        "Done: {} loaded, {} failed, cache at {}",
        results.len() - failed.len(),
        failed.len(),
        data_dir.join("images").display()
    );
    for (index, result) in &failed {
        if let Err(cause) = result {
            eprintln!("  item {index}: {cause}");
        }
    }

    Ok(())
}

/// Walks one item through thumbnail and full-image loading, waiting on its
/// event stream for completion.
async fn drive_item(item: &Arc<PhotoItem>) -> Result<(), String> {
    let mut rx = item.subscribe();

    if item.request_thumbnail() {
        wait_for_settle(item, &mut rx).await?;
    }

    if item.image().is_some() {
        return Ok(());
    }

    if item.request_full_image() {
        loop {
            match rx.recv().await {
                Ok(PhotoEvent::ImageLoaded) => break,
                Ok(PhotoEvent::LoadFailed(cause)) => return Err(cause),
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    Ok(())
}

/// Waits until the in-flight chain produces a thumbnail, a full image, or a
/// failure.
async fn wait_for_settle(
    item: &Arc<PhotoItem>,
    rx: &mut tokio::sync::broadcast::Receiver<PhotoEvent>,
) -> Result<(), String> {
    loop {
        match rx.recv().await {
            Ok(PhotoEvent::ThumbnailLoaded) | Ok(PhotoEvent::ImageLoaded) => return Ok(()),
            Ok(PhotoEvent::LoadFailed(cause)) => return Err(cause),
            Ok(_) => {}
            Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
            Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                return if item.is_loading() {
                    Err("event stream closed".to_string())
                } else {
                    Ok(())
                };
            }
        }
    }
}
