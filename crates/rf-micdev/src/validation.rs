//! Anatomical plausibility of the measured ITD
//!
//! Annotation only: a failed check never blocks or alters the correction.

use serde::{Deserialize, Serialize};

use crate::config::CorrectorConfig;
use crate::deviation::DeviationRecord;
use crate::quality::{mean, std_dev};

pub const WARNING_ABNORMAL_ITD: &str = "ITD anatomically abnormal — check microphone placement";
pub const WARNING_INCONSISTENT_ITD: &str = "ITD consistency low — possible measurement noise";

/// One band's contribution to the ITD checks
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ItdSample {
    pub center_freq: f64,
    pub itd_ms: f64,
}

/// Result of the anatomical checks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItdValidation {
    pub valid: bool,
    pub warnings: Vec<String>,
    pub samples: Vec<ItdSample>,
    /// Mean of `samples` (0 when there are none)
    pub mean_itd_ms: f64,
    /// Population standard deviation of `samples`
    pub itd_std_ms: f64,
    /// Nominal largest ITD for the configured head
    pub expected_max_itd_ms: f64,
}

/// Checks ITD against a plausible range and for consistency across bands
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnatomicalValidator {
    itd_range_ms: (f64, f64),
    consistency_ms: f64,
    expected_max_itd_ms: f64,
}

/// Nominal maximum ITD: ear-to-ear distance over the speed of sound
pub fn expected_max_itd_ms(head_radius_cm: f64, speed_of_sound_m_s: f64) -> f64 {
    (2.0 * head_radius_cm / 100.0) / speed_of_sound_m_s * 1000.0
}

impl AnatomicalValidator {
    pub fn from_config(config: &CorrectorConfig) -> Self {
        Self {
            itd_range_ms: config.itd_range_ms,
            consistency_ms: config.itd_consistency_ms,
            expected_max_itd_ms: expected_max_itd_ms(
                config.head_radius_cm,
                config.speed_of_sound_m_s,
            ),
        }
    }

    pub fn expected_max_itd_ms(&self) -> f64 {
        self.expected_max_itd_ms
    }

    /// Validate the ITD samples carried by `records`
    pub fn validate(&self, records: &[DeviationRecord]) -> ItdValidation {
        let samples: Vec<ItdSample> = records
            .iter()
            .filter_map(|r| {
                r.itd_ms.map(|itd_ms| ItdSample {
                    center_freq: r.center_freq,
                    itd_ms,
                })
            })
            .collect();

        let values: Vec<f64> = samples.iter().map(|s| s.itd_ms).collect();
        let mean_itd_ms = mean(&values);
        let itd_std_ms = std_dev(&values);

        let mut warnings = Vec::new();
        if !values.is_empty() {
            let (min, max) = self.itd_range_ms;
            if mean_itd_ms < min || mean_itd_ms > max {
                log::warn!(
                    "{WARNING_ABNORMAL_ITD} (mean {mean_itd_ms:.3} ms, range {min}..{max} ms)"
                );
                warnings.push(WARNING_ABNORMAL_ITD.to_string());
            }
            if itd_std_ms > self.consistency_ms {
                log::warn!(
                    "{WARNING_INCONSISTENT_ITD} (std {itd_std_ms:.3} ms > {} ms)",
                    self.consistency_ms
                );
                warnings.push(WARNING_INCONSISTENT_ITD.to_string());
            }
        }

        ItdValidation {
            valid: warnings.is_empty(),
            warnings,
            samples,
            mean_itd_ms,
            itd_std_ms,
            expected_max_itd_ms: self.expected_max_itd_ms,
        }
    }
}
