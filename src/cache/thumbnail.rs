//! Image decoding and thumbnail derivation.
//!
//! Everything here is CPU-bound; callers run these functions under
//! `tokio::task::spawn_blocking`.

use image::DynamicImage;
use std::io::Cursor;

/// Default maximum thumbnail dimension in pixels.
pub const DEFAULT_THUMBNAIL_MAX_DIM: u32 = 120;

/// Decodes raw downloaded bytes into an image, sniffing the format.
pub fn decode(bytes: &[u8]) -> Result<DynamicImage, image::ImageError> {
    image::load_from_memory(bytes)
}

/// Derives a thumbnail that fits within `max_dim` x `max_dim`, preserving
/// aspect ratio. Deterministic for a given input, so the cached thumbnail
/// and an in-memory re-derivation agree.
pub fn derive_thumbnail(img: &DynamicImage, max_dim: u32) -> DynamicImage {
    img.thumbnail(max_dim, max_dim)
}

/// Encodes a thumbnail as PNG for the on-disk cache.
pub fn encode_png(img: &DynamicImage) -> Result<Vec<u8>, image::ImageError> {
    let mut bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_image(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(image::RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([(x % 256) as u8, (y % 256) as u8, 0])
        }))
    }

    #[test]
    fn test_thumbnail_fits_within_bounds() {
        let img = test_image(640, 480);
        let thumb = derive_thumbnail(&img, 120);
        assert!(thumb.width() <= 120);
        assert!(thumb.height() <= 120);
    }

    #[test]
    fn test_thumbnail_preserves_aspect_ratio() {
        let img = test_image(400, 200);
        let thumb = derive_thumbnail(&img, 100);
        assert_eq!(thumb.width(), 100);
        assert_eq!(thumb.height(), 50);
    }

    #[test]
    fn test_small_image_not_upscaled() {
        let img = test_image(40, 30);
        let thumb = derive_thumbnail(&img, 120);
        assert_eq!((thumb.width(), thumb.height()), (40, 30));
    }

    #[test]
    fn test_png_round_trip() {
        let img = test_image(16, 16);
        let bytes = encode_png(&img).unwrap();
        let decoded = decode(&bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (16, 16));
    }

    #[test]
    fn test_decode_garbage_fails() {
        assert!(decode(b"definitely not an image").is_err());
    }
}
