use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, ImageReader};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{PipelineError, Result};

/// Resizes `source` so its width is at most `target_width` and writes it to `output`.
///
/// The aspect ratio is kept and images are never upscaled: anything already narrower
/// than the target keeps its size but is still re-encoded. The output format follows
/// the extension of `output`, falling back to the format detected in `source`.
///
/// Returns the size of the written file in bytes.
pub fn transform(source: &Path, output: &Path, target_width: u32) -> Result<u64> {
    let img_reader = ImageReader::open(source)
        .and_then(|reader| reader.with_guessed_format())
        .map_err(|e| {
            PipelineError::transform(format!("Failed to open {}: {}", source.display(), e))
        })?;
    let source_format = img_reader.format();
    let og_img = img_reader
        .decode()
        .map_err(|e| PipelineError::unsupported(format!("{}: {}", source.display(), e)))?;

    let (width, height) = fit_width(og_img.width(), og_img.height(), target_width);
    let transformed_img = if width == og_img.width() {
        og_img
    } else {
        og_img.resize_exact(width, height, FilterType::Lanczos3)
    };

    let format = ImageFormat::from_path(output)
        .ok()
        .or(source_format)
        .ok_or_else(|| {
            PipelineError::unsupported(format!("no output format for {}", output.display()))
        })?;

    encodable(transformed_img, format)
        .save_with_format(output, format)
        .map_err(|e| {
            PipelineError::transform(format!("Failed to write {}: {}", output.display(), e))
        })?;

    let size = fs::metadata(output)
        .map_err(|e| {
            PipelineError::transform(format!("Failed to stat {}: {}", output.display(), e))
        })?
        .len();

    Ok(size)
}

/// Runs [`transform`] on the blocking pool; decoding and resampling are CPU bound.
pub async fn transform_blocking(
    source: PathBuf,
    output: PathBuf,
    target_width: u32,
) -> Result<u64> {
    tokio::task::spawn_blocking(move || transform(&source, &output, target_width))
        .await
        .map_err(|e| PipelineError::transform(format!("transform task failed: {}", e)))?
}

/// New dimensions with width capped at `target_width`, height rounded down.
pub fn fit_width(width: u32, height: u32, target_width: u32) -> (u32, u32) {
    if width <= target_width {
        return (width, height);
    }

    let scaled = (u64::from(height) * u64::from(target_width)) / u64::from(width);

    (target_width, scaled.max(1) as u32)
}

// JPEG has no alpha and only 8-bit samples.
fn encodable(img: DynamicImage, format: ImageFormat) -> DynamicImage {
    if format != ImageFormat::Jpeg {
        return img;
    }

    match img {
        DynamicImage::ImageLuma8(_) | DynamicImage::ImageRgb8(_) => img,
        other => DynamicImage::ImageRgb8(other.to_rgb8()),
    }
}
