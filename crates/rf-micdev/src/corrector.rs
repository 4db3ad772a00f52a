//! Microphone deviation corrector
//!
//! Runs the full pipeline for one speaker's binaural pair:
//! gate -> extract -> quality -> deviation -> validate -> design -> apply.
//! The corrector holds only immutable state and can be shared across threads.

use serde::{Deserialize, Serialize};

use crate::bands::BandTable;
use crate::config::CorrectorConfig;
use crate::design::{plan_corrections, Apportionment, BandCorrection, FilterDesigner};
use crate::deviation::{analyze_deviation, avg_deviation_db, max_deviation_db, DeviationRecord};
use crate::extract::{extract_band_response, find_peak, BandExclusion, BandResponse, ExcludedBand};
use crate::filter::BandpassFilter;
use crate::fir::CorrectionFilter;
use crate::quality::QualityScore;
use crate::report::{CorrectionReport, FeatureFlags};
use crate::spectrum::{AnalysisSpectra, ResponseSpectrum};
use crate::validation::AnatomicalValidator;
use crate::{Channel, MicDevError, MicDevResult};

/// Per-call options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrectOptions {
    /// Attach before/after spectra and target curves to the report
    pub plot_analysis: bool,
}

impl CorrectOptions {
    pub fn with_plot_analysis() -> Self {
        Self {
            plot_analysis: true,
        }
    }
}

/// Measurement stage of a pass, before any correction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviationAnalysis {
    pub left_responses: Vec<BandResponse>,
    pub right_responses: Vec<BandResponse>,
    pub excluded_bands: Vec<ExcludedBand>,
    pub deviations: Vec<DeviationRecord>,
    pub left_quality: Option<QualityScore>,
    pub right_quality: Option<QualityScore>,
    /// Direct-sound peak of each channel; every band gate starts there
    pub left_peak: usize,
    pub right_peak: usize,
    /// Earlier of the two peaks; both channels' phases are measured from it
    pub phase_origin: usize,
    /// Samples analysed per channel (common prefix of the pair)
    pub analysed_len: usize,
}

impl DeviationAnalysis {
    pub fn avg_deviation_db(&self) -> f64 {
        avg_deviation_db(&self.deviations)
    }

    pub fn max_deviation_db(&self) -> f64 {
        max_deviation_db(&self.deviations)
    }

    pub fn deviation_at(&self, center_freq: f64) -> Option<&DeviationRecord> {
        self.deviations.iter().find(|d| d.center_freq == center_freq)
    }
}

/// Corrected pair plus report
#[derive(Debug, Clone, PartialEq)]
pub struct CorrectionOutput {
    pub left: Vec<f64>,
    pub right: Vec<f64>,
    pub report: CorrectionReport,
}

/// Estimates and removes left/right microphone mismatch
#[derive(Debug, Clone)]
pub struct MicrophoneDeviationCorrector {
    config: CorrectorConfig,
    bands: BandTable,
    filters: Vec<BandpassFilter>,
    validator: AnatomicalValidator,
    designer: FilterDesigner,
}

impl MicrophoneDeviationCorrector {
    /// Validate the configuration and precompute the band table
    pub fn new(config: CorrectorConfig) -> MicDevResult<Self> {
        config.validate()?;
        let bands = BandTable::new(&config)?;
        let sample_rate = config.sample_rate as f64;
        let filters = bands
            .iter()
            .map(|b| BandpassFilter::third_octave(b.center_freq, sample_rate))
            .collect();
        let validator = AnatomicalValidator::from_config(&config);
        let designer = FilterDesigner::new(&config);

        log::debug!(
            "Corrector ready: {} Hz, {} bands, strength {:.2}",
            config.sample_rate,
            bands.len(),
            config.correction_strength
        );

        Ok(Self {
            config,
            bands,
            filters,
            validator,
            designer,
        })
    }

    pub fn config(&self) -> &CorrectorConfig {
        &self.config
    }

    pub fn bands(&self) -> &BandTable {
        &self.bands
    }

    pub fn designer(&self) -> &FilterDesigner {
        &self.designer
    }

    pub fn validator(&self) -> &AnatomicalValidator {
        &self.validator
    }

    /// Measure the deviation of a pair without correcting it
    pub fn analyze(&self, left: &[f64], right: &[f64]) -> MicDevResult<DeviationAnalysis> {
        check_finite(left, Channel::Left)?;
        check_finite(right, Channel::Right)?;

        let analysed_len = left.len().min(right.len());
        let left = &left[..analysed_len];
        let right = &right[..analysed_len];

        let left_peak = find_peak(left).unwrap_or(analysed_len);
        let right_peak = find_peak(right).unwrap_or(analysed_len);
        let phase_origin = left_peak.min(right_peak);

        let sample_rate = self.config.sample_rate as f64;
        let mut left_responses = Vec::with_capacity(self.bands.len());
        let mut right_responses = Vec::with_capacity(self.bands.len());
        let mut excluded_bands = Vec::new();

        for (band, filter) in self.bands.iter().zip(&self.filters) {
            let l = extract_band_response(left, left_peak, band, filter, sample_rate)
                .map(|resp| resp.referenced_to(left_peak - phase_origin, sample_rate));
            let r = extract_band_response(right, right_peak, band, filter, sample_rate)
                .map(|resp| resp.referenced_to(right_peak - phase_origin, sample_rate));

            match (l, r) {
                (Err(BandExclusion::GateUnavailable), Err(BandExclusion::GateUnavailable)) => {
                    excluded_bands.push(ExcludedBand {
                        center_freq: band.center_freq,
                        channel: None,
                        reason: BandExclusion::GateUnavailable,
                    });
                }
                (l, r) => {
                    for (channel, result, responses) in [
                        (Channel::Left, l, &mut left_responses),
                        (Channel::Right, r, &mut right_responses),
                    ] {
                        match result {
                            Ok(response) => responses.push(response),
                            Err(reason) => excluded_bands.push(ExcludedBand {
                                center_freq: band.center_freq,
                                channel: Some(channel),
                                reason,
                            }),
                        }
                    }
                }
            }
        }

        for excluded in &excluded_bands {
            log::debug!(
                "Excluding {} Hz band: {}",
                excluded.center_freq,
                excluded.reason
            );
        }

        let left_quality = QualityScore::evaluate(&left_responses);
        let right_quality = QualityScore::evaluate(&right_responses);
        log::debug!(
            "Quality scores: left {:?}, right {:?}",
            left_quality.map(|q| q.score),
            right_quality.map(|q| q.score)
        );

        let deviations = analyze_deviation(&left_responses, &right_responses);

        Ok(DeviationAnalysis {
            left_responses,
            right_responses,
            excluded_bands,
            deviations,
            left_quality,
            right_quality,
            left_peak,
            right_peak,
            phase_origin,
            analysed_len,
        })
    }

    /// Correct a pair with default options
    pub fn correct(&self, left: &[f64], right: &[f64]) -> MicDevResult<CorrectionOutput> {
        self.correct_with_options(left, right, &CorrectOptions::default())
    }

    /// Correct a pair. Inputs are never modified; each output keeps its
    /// input's length.
    pub fn correct_with_options(
        &self,
        left: &[f64],
        right: &[f64],
        options: &CorrectOptions,
    ) -> MicDevResult<CorrectionOutput> {
        let analysis = self.analyze(left, right)?;

        let apportionment = if self.config.enable_adaptive_correction {
            Apportionment::adaptive(analysis.left_quality.as_ref(), analysis.right_quality.as_ref())
        } else {
            Apportionment::symmetric()
        };
        let corrections = plan_corrections(&analysis.deviations, &apportionment, &self.config);

        let left_filter = self.designer.design(&corrections, Channel::Left)?;
        let right_filter = self.designer.design(&corrections, Channel::Right)?;
        let corrected_left = left_filter.apply(left)?;
        let corrected_right = right_filter.apply(right)?;

        let itd_validation = self
            .config
            .enable_anatomical_validation
            .then(|| self.validator.validate(&analysis.deviations));

        let spectra = if options.plot_analysis {
            Some(self.analysis_spectra(left, right, &corrected_left, &corrected_right, &corrections)?)
        } else {
            None
        };

        let report = CorrectionReport {
            avg_deviation_db: analysis.avg_deviation_db(),
            max_deviation_db: analysis.max_deviation_db(),
            deviations: analysis.deviations,
            corrections,
            excluded_bands: analysis.excluded_bands,
            itd_validation,
            left_quality: analysis.left_quality,
            right_quality: analysis.right_quality,
            reference_side: apportionment.reference,
            features: FeatureFlags::from_config(&self.config),
            correction_strength: self.config.correction_strength,
            correction_applied: !(left_filter.is_identity() && right_filter.is_identity()),
            left_filter_taps: left_filter.len(),
            right_filter_taps: right_filter.len(),
            spectra,
        };

        log::info!(
            "Microphone deviation: avg {:.2} dB, max {:.2} dB, reference {}, ITD {}",
            report.avg_deviation_db,
            report.max_deviation_db,
            report
                .reference_side
                .map_or_else(|| "none".to_string(), |c| c.to_string()),
            match &report.itd_validation {
                Some(v) if v.valid => "valid",
                Some(_) => "invalid",
                None => "not checked",
            }
        );

        Ok(CorrectionOutput {
            left: corrected_left,
            right: corrected_right,
            report,
        })
    }

    /// Kernels for a given set of per-band targets
    pub fn design_filters(
        &self,
        corrections: &[BandCorrection],
    ) -> MicDevResult<(CorrectionFilter, CorrectionFilter)> {
        Ok((
            self.designer.design(corrections, Channel::Left)?,
            self.designer.design(corrections, Channel::Right)?,
        ))
    }

    fn analysis_spectra(
        &self,
        left: &[f64],
        right: &[f64],
        corrected_left: &[f64],
        corrected_right: &[f64],
        corrections: &[BandCorrection],
    ) -> MicDevResult<AnalysisSpectra> {
        let sample_rate = self.config.sample_rate as f64;
        Ok(AnalysisSpectra {
            before: ResponseSpectrum::compute(left, right, sample_rate)?,
            after: ResponseSpectrum::compute(corrected_left, corrected_right, sample_rate)?,
            left_target: self.designer.target_curve(corrections, Channel::Left),
            right_target: self.designer.target_curve(corrections, Channel::Right),
        })
    }
}

fn check_finite(ir: &[f64], channel: Channel) -> MicDevResult<()> {
    match ir.iter().position(|x| !x.is_finite()) {
        Some(index) => Err(MicDevError::NonFiniteSample { channel, index }),
        None => Ok(()),
    }
}
