//! Band-limited direct-sound response extraction
//!
//! For one channel and one band: band-limit the impulse response, cut the
//! gate window that starts at that channel's own direct-sound peak, taper its
//! tail, and evaluate a single-frequency DFT at the band centre.

use std::f64::consts::PI;
use std::fmt;

use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use crate::bands::{BandClass, OctaveBand};
use crate::filter::BandpassFilter;
use crate::Channel;

/// Longest tail taper applied to a gate window (samples)
pub const MAX_TAPER_SAMPLES: usize = 32;

/// Complex response of one channel in one band
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BandResponse {
    /// Index into the band table
    pub band_index: usize,
    pub center_freq: f64,
    pub class: BandClass,
    /// Linear magnitude at the centre frequency
    pub magnitude: f64,
    /// Phase at the centre frequency (radians), relative to the gate start
    /// unless re-referenced with [`BandResponse::referenced_to`]
    pub phase: f64,
    /// Gate length actually used (samples)
    pub gate_samples: usize,
}

impl BandResponse {
    pub fn value(&self) -> Complex64 {
        Complex64::from_polar(self.magnitude, self.phase)
    }

    pub fn magnitude_db(&self) -> f64 {
        20.0 * self.magnitude.log10()
    }

    /// Same response with its phase measured from `lag` samples before the
    /// gate start, so both channels of a pair share one time reference
    pub fn referenced_to(self, lag: usize, sample_rate: f64) -> Self {
        if lag == 0 {
            return self;
        }
        let shift = -2.0 * PI * self.center_freq * lag as f64 / sample_rate;
        Self {
            phase: Complex64::from_polar(1.0, self.phase + shift).arg(),
            ..self
        }
    }
}

/// Why a band was left out of the analysis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BandExclusion {
    /// Fewer than one sample available after the gate origin
    GateUnavailable,
    /// The gated window carries no energy at the band centre
    ZeroEnergy,
}

impl fmt::Display for BandExclusion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BandExclusion::GateUnavailable => f.write_str("gate unavailable"),
            BandExclusion::ZeroEnergy => f.write_str("zero energy"),
        }
    }
}

/// A band left out of one pair's analysis
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExcludedBand {
    pub center_freq: f64,
    /// Affected channel; `None` when the band is unusable for both
    pub channel: Option<Channel>,
    pub reason: BandExclusion,
}

/// Index of the largest absolute sample (first one on ties)
pub fn find_peak(ir: &[f64]) -> Option<usize> {
    let mut peak: Option<(usize, f64)> = None;
    for (i, &x) in ir.iter().enumerate() {
        let level = x.abs();
        match peak {
            Some((_, best)) if level <= best => {}
            _ => peak = Some((i, level)),
        }
    }
    peak.map(|(i, _)| i)
}

/// Linear fade-out weights for the last samples of a window
fn taper_weight(i: usize, len: usize) -> f64 {
    let fade = (len / 4).min(MAX_TAPER_SAMPLES);
    let fade_start = len - fade;
    if fade == 0 || i < fade_start {
        1.0
    } else {
        (len - 1 - i) as f64 / fade as f64
    }
}

/// Single-bin DFT of `window` at `freq`, phase referenced to its first sample
pub fn dft_at(window: &[f64], freq: f64, sample_rate: f64) -> Complex64 {
    let step = -2.0 * PI * freq / sample_rate;
    window
        .iter()
        .enumerate()
        .map(|(n, &x)| Complex64::from_polar(x, step * n as f64))
        .sum()
}

/// Extract one channel's response in one band.
///
/// `peak` is this channel's direct-sound peak. The window `[peak, peak + gate)`
/// is truncated at the end of the signal, never zero-padded.
pub fn extract_band_response(
    ir: &[f64],
    peak: usize,
    band: &OctaveBand,
    filter: &BandpassFilter,
    sample_rate: f64,
) -> Result<BandResponse, BandExclusion> {
    let available = ir.len().saturating_sub(peak);
    let gate = band
        .gate_samples(available)
        .ok_or(BandExclusion::GateUnavailable)?;

    // Only samples up to the end of the gate influence the window
    let filtered = filter.apply(&ir[..peak + gate]);
    let window = &filtered[peak..peak + gate];

    let energy: f64 = window.iter().map(|x| x * x).sum();
    if energy <= 0.0 {
        return Err(BandExclusion::ZeroEnergy);
    }

    let tapered: Vec<f64> = window
        .iter()
        .enumerate()
        .map(|(i, &x)| x * taper_weight(i, gate))
        .collect();

    let value = dft_at(&tapered, band.center_freq, sample_rate);
    let magnitude = value.norm();
    if !(magnitude > f64::MIN_POSITIVE && magnitude.is_finite()) {
        return Err(BandExclusion::ZeroEnergy);
    }

    Ok(BandResponse {
        band_index: band.index,
        center_freq: band.center_freq,
        class: band.class,
        magnitude,
        phase: value.arg(),
        gate_samples: gate,
    })
}
