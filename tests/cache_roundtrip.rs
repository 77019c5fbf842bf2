//! Integration tests for the resource cache: round-trip, miss semantics,
//! and the no-partial-entry commit guarantee.
//!
//! Each test runs against its own throwaway cache directory.

use std::io::Cursor;
use std::sync::Arc;

use image::DynamicImage;
use photofeed::cache::{CacheConfig, CacheOutcome, CacheStore, ResourceCache, SaveError};

fn sample_image(width: u32, height: u32) -> DynamicImage {
    DynamicImage::ImageRgb8(image::RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x * 7 % 256) as u8, (y * 11 % 256) as u8, 42])
    }))
}

fn png_bytes(img: &DynamicImage) -> Vec<u8> {
    let mut bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
        .unwrap();
    bytes
}

async fn open_cache(dir: &tempfile::TempDir) -> Arc<ResourceCache> {
    let store = CacheStore::open(dir.path().join("images")).await.unwrap();
    ResourceCache::new(store, CacheConfig::default())
}

// ============================================================================
// Round-Trip
// ============================================================================

#[tokio::test]
async fn test_save_then_load_round_trips_pixels() {
    let dir = tempfile::tempdir().unwrap();
    let cache = open_cache(&dir).await;
    let url = "http://photos.example.com/full.png";

    let original = sample_image(80, 60);
    cache.save(url, png_bytes(&original)).await.unwrap();

    let loaded = match cache.load_image(url).await.unwrap() {
        CacheOutcome::Hit(img) => img,
        CacheOutcome::Miss => panic!("expected hit after save"),
    };
    assert_eq!(loaded.to_rgba8().into_raw(), original.to_rgba8().into_raw());
}

#[tokio::test]
async fn test_saved_thumbnail_fits_bounds_and_keeps_aspect() {
    let dir = tempfile::tempdir().unwrap();
    let cache = open_cache(&dir).await;
    let url = "http://photos.example.com/wide.png";

    cache.save(url, png_bytes(&sample_image(600, 300))).await.unwrap();

    let thumb = match cache.load_thumbnail(url).await.unwrap() {
        CacheOutcome::Hit(img) => img,
        CacheOutcome::Miss => panic!("expected thumbnail hit after save"),
    };
    assert_eq!(thumb.width(), 120);
    assert_eq!(thumb.height(), 60);
}

#[tokio::test]
async fn test_cache_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let url = "http://photos.example.com/persist.png";

    {
        let cache = open_cache(&dir).await;
        cache.save(url, png_bytes(&sample_image(32, 32))).await.unwrap();
    }

    // A fresh cache over the same directory sees the committed entry
    let cache = open_cache(&dir).await;
    assert!(matches!(
        cache.load_image(url).await.unwrap(),
        CacheOutcome::Hit(_)
    ));
    assert!(matches!(
        cache.load_thumbnail(url).await.unwrap(),
        CacheOutcome::Hit(_)
    ));
}

// ============================================================================
// Miss Semantics
// ============================================================================

#[tokio::test]
async fn test_never_saved_url_reports_miss_not_error() {
    let dir = tempfile::tempdir().unwrap();
    let cache = open_cache(&dir).await;
    let url = "http://photos.example.com/never-saved.png";

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
async fn test_distinct_urls_do_not_alias() {
    let dir = tempfile::tempdir().unwrap();
    let cache = open_cache(&dir).await;

    cache
        .save("http://a/1.png", png_bytes(&sample_image(16, 16)))
        .await
        .unwrap();

    assert!(matches!(
        cache.load_image("http://a/1.png").await.unwrap(),
        CacheOutcome::Hit(_)
    ));
    assert!(matches!(
        cache.load_image("http://a/2.png").await.unwrap(),
        CacheOutcome::Miss
    ));
}

// ============================================================================
// No Partial Entries
// ============================================================================

#[tokio::test]
async fn test_failed_save_leaves_no_partial_entry() {
    let dir = tempfile::tempdir().unwrap();
    let cache = open_cache(&dir).await;
    let url = "http://photos.example.com/broken.png";

    let result = cache.save(url, b"these bytes are not an image".to_vec()).await;
    assert!(matches!(result, Err(SaveError::Decode(_))));

    // A subsequent load reports a clean miss, never corrupt data
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
async fn test_failed_save_does_not_clobber_existing_entry() {
    let dir = tempfile::tempdir().unwrap();
    let cache = open_cache(&dir).await;
    let url = "http://photos.example.com/keep.png";

    cache.save(url, png_bytes(&sample_image(24, 24))).await.unwrap();
    let result = cache.save(url, b"garbage".to_vec()).await;
    assert!(result.is_err());

    match cache.load_image(url).await.unwrap() {
        CacheOutcome::Hit(img) => assert_eq!((img.width(), img.height()), (24, 24)),
        CacheOutcome::Miss => panic!("existing entry should have survived the failed save"),
    }
}
