//! Correction filter design
//!
//! - Quality-based apportionment of the correction between the two channels
//! - Weighted, clipped per-band magnitude and phase targets
//! - Smoothed continuous target curve on a log-frequency grid
//! - Kernel synthesis: inverse FFT, centring, Hann window

use std::f64::consts::PI;
use std::sync::Arc;

use num_complex::Complex64;
use realfft::{ComplexToReal, RealFftPlanner};
use serde::{Deserialize, Serialize};

use crate::config::CorrectorConfig;
use crate::deviation::DeviationRecord;
use crate::fir::CorrectionFilter;
use crate::quality::QualityScore;
use crate::{Channel, MicDevResult};

/// Share of the correction pushed onto the higher-quality channel
pub const REFERENCE_SHARE: f64 = 0.2;

/// Lowest frequency of the target-curve grid (Hz)
pub const CURVE_START_HZ: f64 = 20.0;

/// Ratio between neighbouring target-curve grid points
pub const CURVE_STEP_RATIO: f64 = 1.01;

// ============ Apportionment ============

/// How the correction is split between left and right (shares sum to 1)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Apportionment {
    pub left: f64,
    pub right: f64,
    /// Higher-quality channel, `None` when the split is symmetric
    pub reference: Option<Channel>,
}

impl Apportionment {
    pub fn symmetric() -> Self {
        Self {
            left: 0.5,
            right: 0.5,
            reference: None,
        }
    }

    /// The higher-quality channel becomes the reference and moves least.
    /// Ties, and channels without a score, favour left.
    pub fn adaptive(left: Option<&QualityScore>, right: Option<&QualityScore>) -> Self {
        let left_score = left.map_or(f64::NEG_INFINITY, |q| q.score);
        let right_score = right.map_or(f64::NEG_INFINITY, |q| q.score);
        let reference = if left_score >= right_score {
            Channel::Left
        } else {
            Channel::Right
        };
        Self::with_reference(reference)
    }

    pub fn with_reference(reference: Channel) -> Self {
        let (left, right) = match reference {
            Channel::Left => (REFERENCE_SHARE, 1.0 - REFERENCE_SHARE),
            Channel::Right => (1.0 - REFERENCE_SHARE, REFERENCE_SHARE),
        };
        Self {
            left,
            right,
            reference: Some(reference),
        }
    }

    pub fn share(&self, channel: Channel) -> f64 {
        match channel {
            Channel::Left => self.left,
            Channel::Right => self.right,
        }
    }
}

// ============ Per-band Targets ============

/// Correction targets for one band
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BandCorrection {
    pub center_freq: f64,
    pub left_magnitude_db: f64,
    pub right_magnitude_db: f64,
    pub left_phase_rad: f64,
    pub right_phase_rad: f64,
}

impl BandCorrection {
    pub fn magnitude_db(&self, channel: Channel) -> f64 {
        match channel {
            Channel::Left => self.left_magnitude_db,
            Channel::Right => self.right_magnitude_db,
        }
    }

    pub fn phase_rad(&self, channel: Channel) -> f64 {
        match channel {
            Channel::Left => self.left_phase_rad,
            Channel::Right => self.right_phase_rad,
        }
    }
}

/// Per-band targets. Left is pulled down and right pulled up by the
/// measured difference, so both move towards each other.
pub fn plan_corrections(
    records: &[DeviationRecord],
    apportionment: &Apportionment,
    config: &CorrectorConfig,
) -> Vec<BandCorrection> {
    let strength = config.correction_strength;
    let limit = config.max_correction_db;

    records
        .iter()
        .map(|record| {
            let weights = record.class.weights();
            let magnitude = record.magnitude_diff_db * strength * weights.magnitude;
            let phase = if config.enable_phase_correction {
                record.phase_diff_rad * strength * weights.phase
            } else {
                0.0
            };

            BandCorrection {
                center_freq: record.center_freq,
                left_magnitude_db: (-magnitude * apportionment.left).clamp(-limit, limit),
                right_magnitude_db: (magnitude * apportionment.right).clamp(-limit, limit),
                left_phase_rad: -phase * apportionment.left,
                right_phase_rad: phase * apportionment.right,
            }
        })
        .collect()
}

/// Magnitude-only targets: `-curve/2` on left, `+curve/2` on right
pub fn split_magnitude_curve(curve: &[(f64, f64)]) -> Vec<BandCorrection> {
    curve
        .iter()
        .map(|&(center_freq, db)| BandCorrection {
            center_freq,
            left_magnitude_db: -db / 2.0,
            right_magnitude_db: db / 2.0,
            left_phase_rad: 0.0,
            right_phase_rad: 0.0,
        })
        .collect()
}

// ============ Target Curve ============

/// Smoothed continuous target response for one channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetCurve {
    pub channel: Channel,
    /// Log-spaced grid (Hz)
    pub frequencies: Vec<f64>,
    pub magnitude_db: Vec<f64>,
    pub phase_rad: Vec<f64>,
}

impl TargetCurve {
    /// Interpolated `(magnitude_db, phase_rad)` at `freq`, held at the ends
    pub fn value_at(&self, freq: f64) -> (f64, f64) {
        (
            interp_log(&self.frequencies, &self.magnitude_db, freq),
            interp_log(&self.frequencies, &self.phase_rad, freq),
        )
    }
}

/// Linear interpolation on a ln-frequency axis; values held beyond the ends
fn interp_log(freqs: &[f64], values: &[f64], freq: f64) -> f64 {
    let (Some(&first), Some(&last)) = (freqs.first(), freqs.last()) else {
        return 0.0;
    };
    if freq <= first {
        return values[0];
    }
    if freq >= last {
        return values[values.len() - 1];
    }

    let upper = freqs.partition_point(|&f| f <= freq);
    let lower = upper - 1;
    let t = (freq / freqs[lower]).ln() / (freqs[upper] / freqs[lower]).ln();
    values[lower] + (values[upper] - values[lower]) * t
}

/// Centred moving average; the window shrinks at the ends of the grid
fn moving_average(values: &[f64], half_width: usize) -> Vec<f64> {
    if half_width == 0 {
        return values.to_vec();
    }
    let mut prefix = Vec::with_capacity(values.len() + 1);
    prefix.push(0.0);
    for v in values {
        prefix.push(prefix[prefix.len() - 1] + v);
    }
    (0..values.len())
        .map(|i| {
            let lo = i.saturating_sub(half_width);
            let hi = (i + half_width + 1).min(values.len());
            (prefix[hi] - prefix[lo]) / (hi - lo) as f64
        })
        .collect()
}

// ============ Filter Designer ============

/// Turns per-band targets into correction kernels
#[derive(Clone)]
pub struct FilterDesigner {
    sample_rate: f64,
    fir_length: usize,
    fft_size: usize,
    smoothing_points: usize,
    grid: Vec<f64>,
    fft_inverse: Arc<dyn ComplexToReal<f64>>,
}

impl std::fmt::Debug for FilterDesigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterDesigner")
            .field("sample_rate", &self.sample_rate)
            .field("fir_length", &self.fir_length)
            .field("fft_size", &self.fft_size)
            .field("smoothing_points", &self.smoothing_points)
            .finish()
    }
}

impl FilterDesigner {
    pub fn new(config: &CorrectorConfig) -> Self {
        let sample_rate = config.sample_rate as f64;
        let nyquist = config.nyquist();
        let fir_length = config.fir_length;
        let fft_size = (2 * fir_length).next_power_of_two();

        let lowest_band = config.octave_bands.first().copied().unwrap_or(CURVE_START_HZ);
        let mut grid = Vec::new();
        let mut freq = CURVE_START_HZ.min(lowest_band);
        while freq < nyquist {
            grid.push(freq);
            freq *= CURVE_STEP_RATIO;
        }

        let smoothing_points =
            ((config.smoothing_window / 2.0) / CURVE_STEP_RATIO.log2()).round() as usize;

        let mut planner = RealFftPlanner::<f64>::new();
        let fft_inverse = planner.plan_fft_inverse(fft_size);

        log::debug!(
            "Filter designer: {fir_length} taps, FFT {fft_size}, {} grid points, smoothing +/-{smoothing_points}",
            grid.len()
        );

        Self {
            sample_rate,
            fir_length,
            fft_size,
            smoothing_points,
            grid,
            fft_inverse,
        }
    }

    pub fn fir_length(&self) -> usize {
        self.fir_length
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    /// Smoothed target curve for one channel
    pub fn target_curve(&self, corrections: &[BandCorrection], channel: Channel) -> TargetCurve {
        let points: Vec<(f64, f64, f64)> = corrections
            .iter()
            .map(|c| (c.center_freq, c.magnitude_db(channel), c.phase_rad(channel)))
            .collect();

        let band_freqs: Vec<f64> = points.iter().map(|p| p.0).collect();
        let band_mags: Vec<f64> = points.iter().map(|p| p.1).collect();
        let band_phases: Vec<f64> = points.iter().map(|p| p.2).collect();

        let (raw_mag, raw_phase): (Vec<f64>, Vec<f64>) = self
            .grid
            .iter()
            .map(|&f| match points.first() {
                None => (0.0, 0.0),
                // Phase ramps from 0 at DC up to the lowest band
                Some(&(f0, m0, p0)) if f < f0 => (m0, p0 * f / f0),
                Some(_) => (
                    interp_log(&band_freqs, &band_mags, f),
                    interp_log(&band_freqs, &band_phases, f),
                ),
            })
            .unzip();

        TargetCurve {
            channel,
            frequencies: self.grid.clone(),
            magnitude_db: moving_average(&raw_mag, self.smoothing_points),
            phase_rad: moving_average(&raw_phase, self.smoothing_points),
        }
    }

    /// Synthesize one channel's kernel. All-zero targets give the unit impulse.
    pub fn design(
        &self,
        corrections: &[BandCorrection],
        channel: Channel,
    ) -> MicDevResult<CorrectionFilter> {
        let is_flat = corrections
            .iter()
            .all(|c| c.magnitude_db(channel) == 0.0 && c.phase_rad(channel) == 0.0);
        if is_flat || self.grid.is_empty() {
            return Ok(CorrectionFilter::identity(self.sample_rate));
        }

        let curve = self.target_curve(corrections, channel);
        let num_bins = self.fft_size / 2 + 1;
        let bin_width = self.sample_rate / self.fft_size as f64;

        let mut spectrum: Vec<Complex64> = (0..num_bins)
            .map(|k| {
                let (db, phase) = curve.value_at(k as f64 * bin_width);
                let gain = 10.0_f64.powf(db / 20.0);
                // DC and Nyquist stay real
                if k == 0 || k == num_bins - 1 {
                    Complex64::new(gain, 0.0)
                } else {
                    Complex64::from_polar(gain, phase)
                }
            })
            .collect();

        let mut impulse = self.fft_inverse.make_output_vec();
        self.fft_inverse.process(&mut spectrum, &mut impulse)?;

        let norm = 1.0 / self.fft_size as f64;
        let half = (self.fir_length - 1) / 2;
        let window_len = (self.fir_length + 1) as f64;

        // Time zero moves to the centre tap
        let taps: Vec<f64> = (0..self.fir_length)
            .map(|j| {
                let src = (j + self.fft_size - half) % self.fft_size;
                let window = 0.5 - 0.5 * (2.0 * PI * (j + 1) as f64 / window_len).cos();
                impulse[src] * norm * window
            })
            .collect();

        log::debug!(
            "Designed {channel} kernel: {} taps, centre gain {:.3}",
            taps.len(),
            taps[half]
        );

        Ok(CorrectionFilter::from_taps(taps, self.sample_rate))
    }
}
