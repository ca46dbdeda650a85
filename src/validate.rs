//! Frame payload validation.
//!
//! Upstream cameras sometimes answer HTTP 200 with a tiny placeholder or
//! error image. Decoding plus cheap size heuristics catch that class of
//! false success without looking at scene content.

use anyhow::{anyhow, Result};
use image::GenericImageView;

/// Minimum decoded width in pixels.
pub const MIN_WIDTH: u32 = 300;
/// Minimum decoded height in pixels.
pub const MIN_HEIGHT: u32 = 200;
/// Minimum payload size in bytes. Real traffic-cam frames run well above this.
pub const MIN_PAYLOAD_BYTES: usize = 50_000;

/// Check that `bytes` looks like a genuine camera frame.
///
/// Returns a diagnostic describing the accepted frame, or an error naming
/// the violated rule.
pub fn validate_frame(bytes: &[u8]) -> Result<String> {
    let img = image::load_from_memory(bytes)
        .map_err(|e| anyhow!("payload is not a decodable image: {e}"))?;

    let (width, height) = img.dimensions();
    if width < MIN_WIDTH || height < MIN_HEIGHT {
        return Err(anyhow!(
            "image too small: {}x{} (minimum {}x{})",
            width,
            height,
            MIN_WIDTH,
            MIN_HEIGHT
        ));
    }

    if bytes.len() < MIN_PAYLOAD_BYTES {
        return Err(anyhow!(
            "payload too small: {} bytes (minimum {})",
            bytes.len(),
            MIN_PAYLOAD_BYTES
        ));
    }

    Ok(format!(
        "valid image: {}x{}, {:.1}KB",
        width,
        height,
        bytes.len() as f64 / 1024.0
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::codecs::jpeg::JpegEncoder;
    use image::{ExtendedColorType, RgbImage};
    use std::io::Cursor;

    fn encode_jpeg(img: &RgbImage, quality: u8) -> Vec<u8> {
        let mut out = Cursor::new(Vec::new());
        JpegEncoder::new_with_quality(&mut out, quality)
            .encode(
                img.as_raw(),
                img.width(),
                img.height(),
                ExtendedColorType::Rgb8,
            )
            .expect("jpeg encode");
        out.into_inner()
    }

    fn noise_image(width: u32, height: u32) -> RgbImage {
        // Poorly compressible noise so the payload clears the byte floor.
        let mut state = 0x2545f491u32;
        RgbImage::from_fn(width, height, |_, _| {
            state = state.wrapping_mul(1664525).wrapping_add(1013904223);
            let b = state.to_le_bytes();
            image::Rgb([b[0], b[1], b[2]])
        })
    }

    #[test]
    fn rejects_undecodable_payload() {
        let err = validate_frame(&[0u8; 100]).unwrap_err();
        assert!(err.to_string().contains("not a decodable image"));
    }

    #[test]
    fn rejects_tiny_dimensions() {
        let bytes = encode_jpeg(&noise_image(10, 10), 90);
        let err = validate_frame(&bytes).unwrap_err();
        assert!(err.to_string().contains("image too small: 10x10"));
    }

    #[test]
    fn rejects_small_payload_with_valid_dimensions() {
        // Solid color compresses to almost nothing.
        let img = RgbImage::from_pixel(400, 300, image::Rgb([40, 40, 40]));
        let bytes = encode_jpeg(&img, 60);
        assert!(bytes.len() < MIN_PAYLOAD_BYTES);
        let err = validate_frame(&bytes).unwrap_err();
        assert!(err.to_string().contains("payload too small"));
    }

    #[test]
    fn accepts_large_frame() {
        let bytes = encode_jpeg(&noise_image(800, 1000), 95);
        assert!(bytes.len() >= MIN_PAYLOAD_BYTES);
        let diagnostic = validate_frame(&bytes).unwrap();
        assert!(diagnostic.starts_with("valid image: 800x1000"));
    }
}
