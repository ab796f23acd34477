use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{ColorType, GenericImageView};

use crate::config::ImageConfig;
use crate::error::Result;

/// Decodes `bytes`, shrinks the image so its longer side is at most
/// `max_dimension` (aspect preserved, never enlarged) and re-encodes it as JPEG.
pub fn prepare_image(bytes: &[u8], config: &ImageConfig) -> Result<Vec<u8>> {
    if !config.resize {
        return Ok(bytes.to_vec());
    }

    let decoded = image::load_from_memory(bytes)?;
    let (width, height) = decoded.dimensions();
    let resized = if width.max(height) > config.max_dimension {
        decoded.resize(config.max_dimension, config.max_dimension, FilterType::Triangle)
    } else {
        decoded
    };
    log::debug!(
        "Prepared image {}x{} -> {}x{}",
        width,
        height,
        resized.width(),
        resized.height()
    );

    let rgb = resized.to_rgb8();
    let mut out = Vec::with_capacity(bytes.len());
    JpegEncoder::new_with_quality(&mut out, config.jpeg_quality).encode(
        rgb.as_raw(),
        rgb.width(),
        rgb.height(),
        ColorType::Rgb8,
    )?;
    Ok(out)
}
