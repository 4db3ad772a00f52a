//! Cross-validated microphone error across all speakers
//!
//! A microphone mismatch shows up as the same left/right level difference in
//! every speaker direction, while head-related asymmetry follows the speaker
//! position. Using the expected ILD sign of each speaker, the direction-
//! independent part is separated out and only that part is corrected, with
//! one shared magnitude-only filter pair applied to every speaker.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::batch::{BatchCorrector, SpeakerPair};
use crate::design::{split_magnitude_curve, BandCorrection};
use crate::deviation::DeviationRecord;
use crate::MicDevResult;

/// Lateral speakers have an expected ILD sign magnitude above this
pub const LATERAL_SIGN_THRESHOLD: f64 = 0.5;

/// Speakers scored by the consistency check have a sign magnitude above this
pub const SCORED_SIGN_THRESHOLD: f64 = 0.3;

/// Share of the overall median used when every deviation matches expectation
pub const ATTENUATED_SHARE: f64 = 0.3;

/// Residuals smaller than this count as neutral (dB)
pub const NEUTRAL_RESIDUAL_DB: f64 = 1.0;

/// Minimum consistency score for a valid estimate
pub const VALID_CONSISTENCY: f64 = 0.4;

/// Expected sign of left-minus-right level for a speaker label.
///
/// Positive: the left ear is nearer. Unknown labels are treated as centred.
pub fn expected_ild_sign(label: &str) -> f64 {
    match label.trim().to_ascii_uppercase().as_str() {
        "FL" | "SL" => 1.0,
        "FR" | "SR" => -1.0,
        "BL" => 0.8,
        "BR" => -0.8,
        "TFL" | "TBL" | "TSL" => 0.5,
        "TFR" | "TBR" | "TSR" => -0.5,
        _ => 0.0,
    }
}

/// Median; mean of the two middle values for even counts, 0 when empty
pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Measured left/right deviation of one speaker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeakerDeviation {
    pub label: String,
    pub expected_sign: f64,
    pub records: Vec<DeviationRecord>,
}

impl SpeakerDeviation {
    pub fn new(label: impl Into<String>, records: Vec<DeviationRecord>) -> Self {
        let label = label.into();
        Self {
            expected_sign: expected_ild_sign(&label),
            label,
            records,
        }
    }

    /// Level difference at a band (dB)
    pub fn deviation_at(&self, center_freq: f64) -> Option<f64> {
        self.records
            .iter()
            .find(|r| r.center_freq == center_freq)
            .map(|r| r.magnitude_diff_db)
    }

    fn is_anomalous(&self, deviation: f64) -> bool {
        (self.expected_sign > LATERAL_SIGN_THRESHOLD && deviation < 0.0)
            || (self.expected_sign < -LATERAL_SIGN_THRESHOLD && deviation > 0.0)
    }
}

/// Which evidence a band's estimate came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EstimateBasis {
    /// Median of deviations opposite to the expected sign
    Anomalous,
    /// Median of centred-speaker deviations
    Neutral,
    /// Fraction of the median of all deviations
    Attenuated,
    /// A single speaker's own deviation
    SingleSpeaker,
    /// No speaker measured this band
    Unavailable,
}

/// Estimated microphone error in one band
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BandMicError {
    pub center_freq: f64,
    /// Left-minus-right error (dB)
    pub error_db: f64,
    pub basis: EstimateBasis,
}

/// Per-band microphone error estimate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MicErrorEstimate {
    pub bands: Vec<BandMicError>,
}

impl MicErrorEstimate {
    /// Separate the direction-independent error from a set of speakers
    pub fn estimate(speakers: &[SpeakerDeviation], band_freqs: &[f64]) -> Self {
        let bands = band_freqs
            .iter()
            .map(|&center_freq| {
                let mut anomalous = Vec::new();
                let mut neutral = Vec::new();
                let mut all = Vec::new();

                for speaker in speakers {
                    let Some(deviation) = speaker.deviation_at(center_freq) else {
                        continue;
                    };
                    all.push(deviation);
                    if speaker.is_anomalous(deviation) {
                        anomalous.push(deviation);
                    } else if speaker.expected_sign.abs() <= LATERAL_SIGN_THRESHOLD {
                        neutral.push(deviation);
                    }
                }

                let (error_db, basis) = if !anomalous.is_empty() {
                    (median(&anomalous), EstimateBasis::Anomalous)
                } else if !neutral.is_empty() {
                    (median(&neutral), EstimateBasis::Neutral)
                } else if !all.is_empty() {
                    (median(&all) * ATTENUATED_SHARE, EstimateBasis::Attenuated)
                } else {
                    (0.0, EstimateBasis::Unavailable)
                };

                BandMicError {
                    center_freq,
                    error_db,
                    basis,
                }
            })
            .collect();

        Self { bands }
    }

    /// Use one speaker's deviation as the estimate
    pub fn from_single_speaker(speaker: &SpeakerDeviation) -> Self {
        Self {
            bands: speaker
                .records
                .iter()
                .map(|r| BandMicError {
                    center_freq: r.center_freq,
                    error_db: r.magnitude_diff_db,
                    basis: EstimateBasis::SingleSpeaker,
                })
                .collect(),
        }
    }

    pub fn error_at(&self, center_freq: f64) -> Option<f64> {
        self.bands
            .iter()
            .find(|b| b.center_freq == center_freq)
            .map(|b| b.error_db)
    }

    pub fn avg_error_db(&self) -> f64 {
        if self.bands.is_empty() {
            return 0.0;
        }
        self.bands.iter().map(|b| b.error_db.abs()).sum::<f64>() / self.bands.len() as f64
    }

    pub fn max_error_db(&self) -> f64 {
        self.bands.iter().map(|b| b.error_db.abs()).fold(0.0, f64::max)
    }

    /// Clipped correction curve `(center_freq, db)` at the given strength
    pub fn correction_curve(&self, strength: f64, max_correction_db: f64) -> Vec<(f64, f64)> {
        self.bands
            .iter()
            .filter(|b| b.basis != EstimateBasis::Unavailable)
            .map(|b| {
                let db = (b.error_db * strength).clamp(-max_correction_db, max_correction_db);
                (b.center_freq, db)
            })
            .collect()
    }
}

/// Confidence in a microphone error estimate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl Confidence {
    pub fn from_score(score: f64) -> Self {
        if score > 0.7 {
            Confidence::High
        } else if score > 0.5 {
            Confidence::Medium
        } else {
            Confidence::Low
        }
    }
}

/// One scored speaker/band residual
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsistencyDetail {
    pub label: String,
    pub center_freq: f64,
    pub raw_db: f64,
    /// Deviation left after removing the estimated error
    pub residual_db: f64,
    pub expected_sign: f64,
    /// 1 for the expected sign, 0.5 for a near-zero residual, else 0
    pub score: f64,
}

/// Physical plausibility of what remains after removing the estimate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsistencyReport {
    pub score: f64,
    pub valid: bool,
    pub confidence: Confidence,
    pub details: Vec<ConsistencyDetail>,
}

impl ConsistencyReport {
    pub fn evaluate(estimate: &MicErrorEstimate, speakers: &[SpeakerDeviation]) -> Self {
        let mut details = Vec::new();

        for band in &estimate.bands {
            for speaker in speakers {
                if speaker.expected_sign.abs() <= SCORED_SIGN_THRESHOLD {
                    continue;
                }
                let Some(raw_db) = speaker.deviation_at(band.center_freq) else {
                    continue;
                };

                let residual_db = raw_db - band.error_db;
                let score = if residual_db * speaker.expected_sign > 0.0 {
                    1.0
                } else if residual_db.abs() < NEUTRAL_RESIDUAL_DB {
                    0.5
                } else {
                    0.0
                };

                details.push(ConsistencyDetail {
                    label: speaker.label.clone(),
                    center_freq: band.center_freq,
                    raw_db,
                    residual_db,
                    expected_sign: speaker.expected_sign,
                    score,
                });
            }
        }

        let score = if details.is_empty() {
            0.5
        } else {
            details.iter().map(|d| d.score).sum::<f64>() / details.len() as f64
        };

        Self {
            score,
            valid: score > VALID_CONSISTENCY,
            confidence: Confidence::from_score(score),
            details,
        }
    }
}

/// A speaker after the shared correction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectedSpeaker {
    pub label: String,
    pub left: Vec<f64>,
    pub right: Vec<f64>,
    /// False for a pair that could not be analysed; its IRs are unmodified copies
    pub corrected: bool,
}

/// Result of a cross-validated correction run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossValidatedOutcome {
    /// Per-speaker deviations that fed the estimate
    pub speakers: Vec<SpeakerDeviation>,
    pub estimate: MicErrorEstimate,
    /// `None` in single-speaker mode
    pub consistency: Option<ConsistencyReport>,
    /// False when fewer than two speakers could be analysed
    pub cross_validated: bool,
    /// Strength actually used (halved for an inconsistent estimate)
    pub effective_strength: f64,
    pub corrections: Vec<BandCorrection>,
    pub left_filter_taps: usize,
    pub right_filter_taps: usize,
    /// One entry per input pair, in input order
    pub corrected: Vec<CorrectedSpeaker>,
    /// Labels of pairs that could not be analysed, returned untouched
    pub skipped: Vec<String>,
}

impl BatchCorrector {
    /// Estimate the microphone error across all speakers and remove it with
    /// one magnitude-only filter pair shared by every speaker
    pub fn correct_cross_validated(
        &self,
        pairs: &[SpeakerPair],
    ) -> MicDevResult<CrossValidatedOutcome> {
        let corrector = self.corrector();
        let config = corrector.config();

        let analyses: Vec<(&SpeakerPair, MicDevResult<Vec<DeviationRecord>>)> =
            self.install(|| {
                pairs
                    .par_iter()
                    .map(|pair| {
                        let records = corrector
                            .analyze(&pair.left, &pair.right)
                            .map(|analysis| analysis.deviations);
                        (pair, records)
                    })
                    .collect()
            });

        let mut speakers = Vec::new();
        let mut usable = Vec::with_capacity(pairs.len());
        let mut skipped = Vec::new();
        for (pair, records) in analyses {
            match records {
                Ok(records) => {
                    speakers.push(SpeakerDeviation::new(pair.label.clone(), records));
                    usable.push(true);
                }
                Err(e) => {
                    log::warn!("Speaker {}: skipped ({e})", pair.label);
                    skipped.push(pair.label.clone());
                    usable.push(false);
                }
            }
        }

        let mut strength = config.correction_strength;
        let (estimate, consistency, cross_validated) = match speakers.as_slice() {
            [] => {
                log::warn!("No speaker pair could be analysed, nothing to correct");
                (MicErrorEstimate { bands: Vec::new() }, None, false)
            }
            [single] => {
                log::warn!(
                    "Only one speaker ({}): using its own deviation as the microphone error",
                    single.label
                );
                (MicErrorEstimate::from_single_speaker(single), None, false)
            }
            _ => {
                let estimate =
                    MicErrorEstimate::estimate(&speakers, &corrector.bands().center_frequencies());
                let consistency = ConsistencyReport::evaluate(&estimate, &speakers);
                if !consistency.valid {
                    log::warn!(
                        "Microphone error estimate inconsistent (score {:.2}), halving strength",
                        consistency.score
                    );
                    strength *= 0.5;
                }
                (estimate, Some(consistency), true)
            }
        };

        for band in &estimate.bands {
            log::debug!(
                "Microphone error {} Hz: {:+.2} dB ({:?})",
                band.center_freq,
                band.error_db,
                band.basis
            );
        }

        let curve = estimate.correction_curve(strength, config.max_correction_db);
        let corrections = split_magnitude_curve(&curve);
        let (left_filter, right_filter) = corrector.design_filters(&corrections)?;

        let corrected = self.install(|| {
            pairs
                .par_iter()
                .zip(usable.par_iter())
                .map(|(pair, &analysed)| -> MicDevResult<CorrectedSpeaker> {
                    if !analysed {
                        return Ok(CorrectedSpeaker {
                            label: pair.label.clone(),
                            left: pair.left.clone(),
                            right: pair.right.clone(),
                            corrected: false,
                        });
                    }
                    Ok(CorrectedSpeaker {
                        label: pair.label.clone(),
                        left: left_filter.apply(&pair.left)?,
                        right: right_filter.apply(&pair.right)?,
                        corrected: true,
                    })
                })
                .collect::<MicDevResult<Vec<_>>>()
        })?;

        log::info!(
            "Cross-validated microphone error: avg {:.2} dB, max {:.2} dB over {} speakers",
            estimate.avg_error_db(),
            estimate.max_error_db(),
            speakers.len()
        );

        Ok(CrossValidatedOutcome {
            speakers,
            estimate,
            consistency,
            cross_validated,
            effective_strength: strength,
            corrections,
            left_filter_taps: left_filter.len(),
            right_filter_taps: right_filter.len(),
            corrected,
            skipped,
        })
    }
}
