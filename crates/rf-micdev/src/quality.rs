//! Per-channel measurement quality
//!
//! The score is comparative between the two channels of one speaker pair.
//! Its absolute value means nothing and it is never compared across speakers.

use serde::{Deserialize, Serialize};

use crate::bands::BandClass;
use crate::extract::BandResponse;

/// Ceiling of the high-band SNR term; identical high bands saturate here
pub const MAX_SNR_ESTIMATE: f64 = 1000.0;

/// Quality score and the terms it was built from
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityScore {
    pub score: f64,
    /// Mean linear band magnitude
    pub avg_magnitude: f64,
    /// Spread of log-magnitude steps between adjacent bands (lower is smoother)
    pub smoothness: f64,
    /// Mean over spread of the high-band magnitudes, capped at
    /// [`MAX_SNR_ESTIMATE`]; 0 with fewer than two high bands
    pub snr_estimate: f64,
    pub band_count: usize,
}

impl QualityScore {
    /// Score one channel's valid band responses; `None` if there are none
    pub fn evaluate(responses: &[BandResponse]) -> Option<Self> {
        if responses.is_empty() {
            return None;
        }

        let magnitudes: Vec<f64> = responses.iter().map(|r| r.magnitude).collect();
        let avg_magnitude = mean(&magnitudes);

        let log_steps: Vec<f64> = magnitudes
            .windows(2)
            .map(|w| w[1].ln() - w[0].ln())
            .collect();
        let smoothness = if log_steps.is_empty() {
            0.0
        } else {
            std_dev(&log_steps)
        };

        let high: Vec<f64> = responses
            .iter()
            .filter(|r| r.class == BandClass::High)
            .map(|r| r.magnitude)
            .collect();
        let snr_estimate = if high.len() >= 2 {
            let spread = std_dev(&high);
            if spread > 0.0 {
                (mean(&high) / spread).min(MAX_SNR_ESTIMATE)
            } else {
                MAX_SNR_ESTIMATE
            }
        } else {
            0.0
        };

        let score = 0.3 * avg_magnitude.log10()
            + 0.4 / (smoothness + 0.1)
            + 0.3 * (snr_estimate + 1.0).log10();

        Some(Self {
            score,
            avg_magnitude,
            smoothness,
            snr_estimate,
            band_count: responses.len(),
        })
    }
}

pub(crate) fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation
pub(crate) fn std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    let variance = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}
