//! Coarse liveness / anti-spoofing heuristic.
//!
//! Flags flat, low-texture images typical of printed photos or screens
//! held in front of a camera. These are statistical guardrails only —
//! NOT a biometric security control. A determined attacker with a
//! high-quality display will pass; the gate exists to stop the casual
//! printed-photo case.
//!
//! Because the false-reject rate can climb in poor hardware conditions
//! (cheap sensors, heavy compression), the stage can be disabled
//! entirely via configuration.

use crate::quality::{grayscale, mean};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Reason a face crop was flagged as a probable reproduction.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SpoofReject {
    #[error("possible photo/screen attack")]
    FlatTexture,
    #[error("suspicious color distribution")]
    UniformColor,
}

/// Liveness heuristic thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LivenessConfig {
    /// When false, [`assess`] accepts unconditionally.
    pub enabled: bool,
    /// Minimum grayscale standard deviation. Live skin has texture;
    /// reproductions tend toward uniform tone.
    pub texture_min: f64,
    /// Minimum variance across the three per-channel means. Genuine
    /// skin tones vary more across channels than screen or print
    /// reproductions do.
    pub channel_variance_min: f64,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            texture_min: 20.0,
            channel_variance_min: 10.0,
        }
    }
}

/// Assess a face crop for signs of a photo/screen reproduction.
pub fn assess(image: &RgbImage, cfg: &LivenessConfig) -> Result<(), SpoofReject> {
    if !cfg.enabled {
        return Ok(());
    }

    // A pixel-less crop would turn every statistic below into NaN,
    // and NaN comparisons never trip a threshold.
    if image.width() == 0 || image.height() == 0 {
        return Err(SpoofReject::FlatTexture);
    }

    let gray = grayscale(image);
    if std_dev(&gray) < cfg.texture_min {
        return Err(SpoofReject::FlatTexture);
    }

    let (mut r_sum, mut g_sum, mut b_sum) = (0.0f64, 0.0f64, 0.0f64);
    for p in image.pixels() {
        r_sum += p.0[0] as f64;
        g_sum += p.0[1] as f64;
        b_sum += p.0[2] as f64;
    }
    let n = (image.width() * image.height()) as f64;
    let channel_means = [r_sum / n, g_sum / n, b_sum / n];
    if variance(&channel_means) < cfg.channel_variance_min {
        return Err(SpoofReject::UniformColor);
    }

    Ok(())
}

fn variance(values: &[f64]) -> f64 {
    let m = mean(values);
    values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64
}

fn std_dev(values: &[f64]) -> f64 {
    variance(values).sqrt()
}
