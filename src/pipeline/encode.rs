//! Image encoding: `DynamicImage` → resized JPEG → base64 `ImageData`.
//!
//! Pages are rendered at 2× scale for legibility and then shrunk to
//! `max_image_width`, which keeps the request body small while small print
//! stays readable. JPEG is used because the payload is a photographed or
//! scanned page far more often than crisp vector text.

use crate::output::{CompressedImage, ImageEncoding};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::DynamicImage;
use tracing::debug;

/// Resize (never upscale) and JPEG-encode one rendered page.
pub fn compress_page(
    img: &DynamicImage,
    page_num: usize,
    max_width: u32,
    quality: u8,
) -> Result<CompressedImage, image::ImageError> {
    let resized;
    let source = if img.width() > max_width {
        let height = scaled_height(img.width(), img.height(), max_width);
        resized = img.resize_exact(max_width, height, FilterType::Lanczos3);
        &resized
    } else {
        img
    };

    // JPEG has no alpha channel.
    let rgb = source.to_rgb8();
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100)).encode_image(&rgb)?;

    debug!(
        "Page {}: {}x{} → {}x{} JPEG, {} bytes",
        page_num,
        img.width(),
        img.height(),
        rgb.width(),
        rgb.height(),
        buf.len()
    );

    Ok(CompressedImage {
        page_num,
        data: buf,
        encoding: ImageEncoding::Jpeg,
        width: rgb.width(),
        height: rgb.height(),
    })
}

/// Height for `target_width` with the aspect ratio preserved, at least 1 px.
fn scaled_height(width: u32, height: u32, target_width: u32) -> u32 {
    let h = (height as u64 * target_width as u64 + width as u64 / 2) / width.max(1) as u64;
    h.max(1) as u32
}

/// Wrap a compressed page for the model API.
///
/// `detail: "high"` asks vision models to tile the full image rather than a
/// single low-resolution overview.
pub fn to_image_data(page: &CompressedImage) -> ImageData {
    let b64 = STANDARD.encode(&page.data);
    ImageData::new(b64, page.encoding.mime_type()).with_detail("high")
}
