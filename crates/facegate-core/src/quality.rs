//! Numeric image-quality gate.
//!
//! Rejects poorly lit, blurry, or too-small face crops before any
//! embedding work is spent on them. Pure functions of the input image,
//! no side effects.

use image::RgbImage;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Reason a face crop failed the quality gate.
///
/// Each variant carries a short human-readable string so the UI can
/// give actionable re-capture feedback instead of a generic failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QualityReject {
    #[error("poor lighting conditions")]
    PoorLighting,
    #[error("image too blurry")]
    TooBlurry,
    #[error("face too small")]
    FaceTooSmall,
}

/// Quality thresholds, tunable per deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityConfig {
    /// Minimum mean grayscale intensity (0-255 scale).
    pub brightness_min: f64,
    /// Maximum mean grayscale intensity.
    pub brightness_max: f64,
    /// Minimum variance of the Laplacian response (focus measure).
    pub blur_min: f64,
    /// Minimum width and height of the face crop in pixels.
    pub min_face_px: u32,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            brightness_min: 50.0,
            brightness_max: 200.0,
            blur_min: 100.0,
            min_face_px: 100,
        }
    }
}

/// Assess a face crop against the quality thresholds.
///
/// Checks run in order: lighting, sharpness, size. The first failing
/// check wins, so a dark *and* blurry crop reports "poor lighting".
pub fn assess(image: &RgbImage, cfg: &QualityConfig) -> Result<(), QualityReject> {
    let gray = grayscale(image);

    let brightness = mean(&gray);
    if brightness < cfg.brightness_min || brightness > cfg.brightness_max {
        return Err(QualityReject::PoorLighting);
    }

    let focus = laplacian_variance(&gray, image.width() as usize);
    if focus < cfg.blur_min {
        return Err(QualityReject::TooBlurry);
    }

    if image.width() < cfg.min_face_px || image.height() < cfg.min_face_px {
        return Err(QualityReject::FaceTooSmall);
    }

    Ok(())
}

/// Convert to single-channel intensity using the ITU-R 601 luma weights.
pub(crate) fn grayscale(image: &RgbImage) -> Vec<f64> {
    image
        .pixels()
        .map(|p| 0.299 * p.0[0] as f64 + 0.587 * p.0[1] as f64 + 0.114 * p.0[2] as f64)
        .collect()
}

pub(crate) fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Variance of a 4-neighbor Laplacian filter response over the interior
/// pixels. High-frequency detail (edges, texture) drives the variance
/// up; defocused crops score near zero.
fn laplacian_variance(gray: &[f64], width: usize) -> f64 {
    if width < 3 || gray.len() / width < 3 {
        return 0.0;
    }
    let height = gray.len() / width;

    let mut responses = Vec::with_capacity((width - 2) * (height - 2));
    for y in 1..height - 1 {
        for x in 1..width - 1 {
            let c = gray[y * width + x];
            let up = gray[(y - 1) * width + x];
            let down = gray[(y + 1) * width + x];
            let left = gray[y * width + x - 1];
            let right = gray[y * width + x + 1];
            responses.push(4.0 * c - up - down - left - right);
        }
    }

    let m = mean(&responses);
    responses.iter().map(|r| (r - m).powi(2)).sum::<f64>() / responses.len() as f64
}
