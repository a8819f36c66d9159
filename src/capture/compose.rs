//! Stitching scrolled viewport captures into one full-page image.

use anyhow::{Context, Result};
use image::{imageops, DynamicImage, ImageBuffer, ImageOutputFormat, Rgb};

/// JPEG quality of composited screenshots.
pub const FULL_PAGE_JPEG_QUALITY: u8 = 85;

/// One viewport capture taken with the page scrolled to `offset` pixels.
#[derive(Debug, Clone)]
pub struct Slice {
    pub offset: u32,
    pub image: Vec<u8>,
}

/// Composite `slices` onto a `width` x `height` canvas and encode it as JPEG.
///
/// Slices are drawn in order, so later ones win where they overlap. Anything
/// below `height` is cut off.
///
/// # Errors
///
/// Returns an error if a slice cannot be decoded or the result cannot be encoded.
pub fn compose_full_page(slices: &[Slice], width: u32, height: u32, quality: u8) -> Result<Vec<u8>> {
    let mut canvas = ImageBuffer::from_pixel(width.max(1), height.max(1), Rgb([255u8, 255, 255]));

    for (i, slice) in slices.iter().enumerate() {
        if slice.offset >= height {
            break;
        }
        let decoded = image::load_from_memory(&slice.image)
            .with_context(|| format!("Failed to decode screenshot slice {i}"))?
            .to_rgb8();
        imageops::overlay(&mut canvas, &decoded, 0, slice.offset);
    }

    let mut out = Vec::new();
    DynamicImage::ImageRgb8(canvas)
        .write_to(&mut out, ImageOutputFormat::Jpeg(quality))
        .context("Failed to encode full-page screenshot")?;
    Ok(out)
}

/// Scroll offsets needed to cover `page_height` with a `viewport_height` window.
#[must_use]
pub fn slice_offsets(page_height: u32, viewport_height: u32) -> Vec<u32> {
    if viewport_height == 0 {
        return vec![0];
    }
    (0..page_height.max(1))
        .step_by(viewport_height as usize)
        .collect()
}
