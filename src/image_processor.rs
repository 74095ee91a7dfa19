use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType as PngFilter, PngEncoder};
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, ImageReader};
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use crate::errors::{AppError, AppResult};
use crate::security::FileSystemGuard;

pub const DEFAULT_SCALE_FACTOR: f32 = 0.85;
pub const DEFAULT_QUALITY: f32 = 0.45;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReduceParams {
    pub scale_factor: f32,
    pub quality: f32,
}

impl Default for ReduceParams {
    fn default() -> Self {
        Self {
            scale_factor: DEFAULT_SCALE_FACTOR,
            quality: DEFAULT_QUALITY,
        }
    }
}

/// Produces a smaller copy of an image.
///
/// Implementations must leave the original untouched, produce the same output
/// for the same input and parameters, and remove any partial artifact when
/// they fail.
pub trait ImageReducer {
    fn reduce(&self, image: &Path, params: ReduceParams) -> AppResult<PathBuf>;

    /// Delete a copy produced by `reduce` once nothing refers to it.
    fn discard(&self, reduced: &Path) {
        FileSystemGuard::remove_temp_artifact(reduced);
    }
}

/// Scales both dimensions and re-encodes in the source format
#[derive(Debug, Default, Clone, Copy)]
pub struct ScalingReducer;

impl ImageReducer for ScalingReducer {
    fn reduce(&self, image: &Path, params: ReduceParams) -> AppResult<PathBuf> {
        let output_path = FileSystemGuard::create_secure_temp_file(image)?;

        match reduce_into(image, &output_path, params) {
            Ok(()) => Ok(output_path),
            Err(e) => {
                if output_path.exists() {
                    FileSystemGuard::remove_temp_artifact(&output_path);
                }
                Err(AppError::compression_failed(image, e))
            }
        }
    }
}

fn reduce_into(source: &Path, output_path: &Path, params: ReduceParams) -> AppResult<()> {
    let reader = ImageReader::open(source)?.with_guessed_format()?;
    let format = reader
        .format()
        .ok_or_else(|| AppError::validation("image", "Unrecognised image format"))?;
    let img = reader.decode()?;

    let (width, height) = (img.width(), img.height());
    let scaled = scale_image(&img, params.scale_factor);

    log::debug!(
        "Scaled {} from {}x{} to {}x{}",
        source.display(),
        width,
        height,
        scaled.width(),
        scaled.height()
    );

    let encoded = encode(&scaled, format, params.quality)?;
    fs::write(output_path, encoded)?;

    log::info!(
        "Compressed {} to {} (scale: {}, quality: {})",
        source.display(),
        output_path.display(),
        params.scale_factor,
        params.quality
    );

    Ok(())
}

pub fn scaled_dimension(dimension: u32, scale_factor: f32) -> u32 {
    ((dimension as f32 * scale_factor) as u32).max(1)
}

fn scale_image(img: &DynamicImage, scale_factor: f32) -> DynamicImage {
    img.resize_exact(
        scaled_dimension(img.width(), scale_factor),
        scaled_dimension(img.height(), scale_factor),
        FilterType::Triangle,
    )
}

/// Maps the fractional quality target onto the JPEG 1..=100 scale.
pub fn jpeg_quality(quality: f32) -> u8 {
    (quality * 100.0).round().clamp(1.0, 100.0) as u8
}

fn encode(img: &DynamicImage, format: ImageFormat, quality: f32) -> AppResult<Vec<u8>> {
    let mut output = Vec::new();

    match format {
        ImageFormat::Jpeg => {
            // JPEG has no alpha channel
            let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
            let encoder = JpegEncoder::new_with_quality(&mut output, jpeg_quality(quality));
            rgb.write_with_encoder(encoder)?;
        }
        ImageFormat::Png => {
            let encoder =
                PngEncoder::new_with_quality(&mut output, CompressionType::Best, PngFilter::Adaptive);
            img.write_with_encoder(encoder)?;
        }
        other => {
            img.write_to(&mut Cursor::new(&mut output), other)?;
        }
    }

    Ok(output)
}
