//! Structured correction report

use std::fmt::Write as _;
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::CorrectorConfig;
use crate::design::BandCorrection;
use crate::deviation::DeviationRecord;
use crate::extract::ExcludedBand;
use crate::quality::QualityScore;
use crate::spectrum::AnalysisSpectra;
use crate::validation::ItdValidation;
use crate::{Channel, MicDevResult};

/// Report format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    /// Plain text report
    Text,
    /// JSON report
    Json,
}

/// Features that were enabled for a pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureFlags {
    pub phase_correction: bool,
    pub adaptive_correction: bool,
    pub anatomical_validation: bool,
}

impl FeatureFlags {
    pub fn from_config(config: &CorrectorConfig) -> Self {
        Self {
            phase_correction: config.enable_phase_correction,
            adaptive_correction: config.enable_adaptive_correction,
            anatomical_validation: config.enable_anatomical_validation,
        }
    }

    /// Names of the enabled features
    pub fn enabled(&self) -> Vec<&'static str> {
        [
            (self.phase_correction, "phase_correction"),
            (self.adaptive_correction, "adaptive_correction"),
            (self.anatomical_validation, "anatomical_validation"),
        ]
        .into_iter()
        .filter_map(|(on, name)| on.then_some(name))
        .collect()
    }
}

/// Result of one correction pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectionReport {
    /// Per-band deviation table (bands valid in both channels)
    pub deviations: Vec<DeviationRecord>,
    /// Per-band targets that went into the kernels
    pub corrections: Vec<BandCorrection>,
    pub excluded_bands: Vec<ExcludedBand>,
    /// `None` when anatomical validation is disabled
    pub itd_validation: Option<ItdValidation>,
    pub left_quality: Option<QualityScore>,
    pub right_quality: Option<QualityScore>,
    /// Higher-quality channel under adaptive correction
    pub reference_side: Option<Channel>,
    pub avg_deviation_db: f64,
    pub max_deviation_db: f64,
    pub features: FeatureFlags,
    pub correction_strength: f64,
    /// False when both kernels are the unit impulse
    pub correction_applied: bool,
    pub left_filter_taps: usize,
    pub right_filter_taps: usize,
    /// Present only when analysis spectra were requested
    pub spectra: Option<AnalysisSpectra>,
}

impl CorrectionReport {
    /// Deviation record for a band, if it was analysed
    pub fn deviation_at(&self, center_freq: f64) -> Option<&DeviationRecord> {
        self.deviations.iter().find(|d| d.center_freq == center_freq)
    }

    pub fn correction_at(&self, center_freq: f64) -> Option<&BandCorrection> {
        self.corrections.iter().find(|c| c.center_freq == center_freq)
    }

    /// Whether the ITD checks passed (true when not run)
    pub fn itd_valid(&self) -> bool {
        self.itd_validation.as_ref().is_none_or(|v| v.valid)
    }

    /// Generate report in specified format
    pub fn generate(&self, format: ReportFormat) -> MicDevResult<String> {
        match format {
            ReportFormat::Text => Ok(self.to_text()),
            ReportFormat::Json => self.to_json(),
        }
    }

    /// Save report to file
    pub fn save<P: AsRef<Path>>(&self, path: P, format: ReportFormat) -> MicDevResult<()> {
        let content = self.generate(format)?;
        let mut file = std::fs::File::create(path)?;
        file.write_all(content.as_bytes())?;
        Ok(())
    }

    pub fn to_json(&self) -> MicDevResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn to_text(&self) -> String {
        let mut out = String::new();
        let title = "Microphone Deviation Correction";
        let _ = writeln!(out, "{title}");
        let _ = writeln!(out, "{}\n", "=".repeat(title.len()));

        let _ = writeln!(
            out,
            "Average deviation: {:.2} dB | Max deviation: {:.2} dB",
            self.avg_deviation_db, self.max_deviation_db
        );
        let _ = writeln!(
            out,
            "Quality: left {} | right {}",
            format_quality(self.left_quality.as_ref()),
            format_quality(self.right_quality.as_ref())
        );
        let reference = self
            .reference_side
            .map_or_else(|| "none (symmetric)".to_string(), |c| c.to_string());
        let _ = writeln!(out, "Reference: {reference}");
        let _ = writeln!(
            out,
            "Strength: {:.2} | Features: {}",
            self.correction_strength,
            self.features.enabled().join(", ")
        );
        let _ = writeln!(
            out,
            "Correction applied: {} ({} / {} taps)\n",
            if self.correction_applied { "yes" } else { "no" },
            self.left_filter_taps,
            self.right_filter_taps
        );

        out.push_str("   Band |  Diff dB | Phase rad |  ITD ms |  Left dB | Right dB\n");
        out.push_str(&"-".repeat(64));
        out.push('\n');
        for d in &self.deviations {
            let itd = d.itd_ms.map_or_else(|| "-".to_string(), |v| format!("{v:.3}"));
            let (left_db, right_db) = self
                .correction_at(d.center_freq)
                .map_or((0.0, 0.0), |c| (c.left_magnitude_db, c.right_magnitude_db));
            let _ = writeln!(
                out,
                "{:>7} | {:>8.2} | {:>9.3} | {:>7} | {:>8.2} | {:>8.2}",
                d.center_freq, d.magnitude_diff_db, d.phase_diff_rad, itd, left_db, right_db
            );
        }

        if !self.excluded_bands.is_empty() {
            out.push_str("\nExcluded bands:\n");
            for band in &self.excluded_bands {
                let channel = band
                    .channel
                    .map_or_else(|| "both".to_string(), |c| c.to_string());
                let _ = writeln!(out, "  {} Hz ({channel}): {}", band.center_freq, band.reason);
            }
        }

        if let Some(validation) = &self.itd_validation {
            let _ = writeln!(
                out,
                "\nITD validation: {} (mean {:.3} ms, std {:.3} ms, nominal max {:.3} ms)",
                if validation.valid { "valid" } else { "INVALID" },
                validation.mean_itd_ms,
                validation.itd_std_ms,
                validation.expected_max_itd_ms
            );
            for warning in &validation.warnings {
                let _ = writeln!(out, "  ! {warning}");
            }
        }

        out
    }
}

fn format_quality(quality: Option<&QualityScore>) -> String {
    quality.map_or_else(|| "n/a".to_string(), |q| format!("{:.3}", q.score))
}
