//! Band-limiting filters
//!
//! Two identical RBJ bandpass sections (constant 0 dB peak gain) in series,
//! processed in Transposed Direct Form II. The section Q is chosen so the
//! cascade's -3 dB width equals the requested fraction of an octave.

use std::f64::consts::{PI, SQRT_2};

use num_complex::Complex64;

/// Width of the analysis filters (octaves)
pub const BAND_FILTER_WIDTH_OCTAVES: f64 = 1.0 / 3.0;

/// Biquad coefficients (normalized, a0 = 1)
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BiquadCoeffs {
    pub b0: f64,
    pub b1: f64,
    pub b2: f64,
    pub a1: f64,
    pub a2: f64,
}

impl BiquadCoeffs {
    /// Bandpass with constant 0 dB peak gain
    pub fn bandpass(freq: f64, q: f64, sample_rate: f64) -> Self {
        let omega = 2.0 * PI * freq / sample_rate;
        let sin_omega = omega.sin();
        let cos_omega = omega.cos();
        let alpha = sin_omega / (2.0 * q);

        let b0 = alpha;
        let b1 = 0.0;
        let b2 = -alpha;
        let a0 = 1.0 + alpha;
        let a1 = -2.0 * cos_omega;
        let a2 = 1.0 - alpha;

        Self {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: a1 / a0,
            a2: a2 / a0,
        }
    }

    /// Complex response at `freq`
    pub fn response_at(&self, freq: f64, sample_rate: f64) -> Complex64 {
        let omega = 2.0 * PI * freq / sample_rate;
        let z1 = Complex64::from_polar(1.0, -omega);
        let z2 = z1 * z1;
        let num = self.b0 + self.b1 * z1 + self.b2 * z2;
        let den = 1.0 + self.a1 * z1 + self.a2 * z2;
        num / den
    }
}

/// Single biquad section, TDF-II
#[derive(Debug, Clone)]
pub struct BiquadTDF2 {
    coeffs: BiquadCoeffs,
    z1: f64,
    z2: f64,
}

impl BiquadTDF2 {
    pub fn new(coeffs: BiquadCoeffs) -> Self {
        Self {
            coeffs,
            z1: 0.0,
            z2: 0.0,
        }
    }

    #[inline(always)]
    pub fn process_sample(&mut self, input: f64) -> f64 {
        let output = self.coeffs.b0 * input + self.z1;
        self.z1 = self.coeffs.b1 * input - self.coeffs.a1 * output + self.z2;
        self.z2 = self.coeffs.b2 * input - self.coeffs.a2 * output;
        output
    }

    pub fn reset(&mut self) {
        self.z1 = 0.0;
        self.z2 = 0.0;
    }
}

/// Section Q giving a cascade of two identical sections the requested
/// -3 dB bandwidth (each section contributes -1.5 dB at the edges).
pub fn cascade_q(width_octaves: f64) -> f64 {
    let edge = 2.0_f64.powf(width_octaves / 2.0) - 2.0_f64.powf(-width_octaves / 2.0);
    (SQRT_2 - 1.0).sqrt() / edge
}

/// Fourth-order band-limiting filter centred on an analysis band
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BandpassFilter {
    coeffs: BiquadCoeffs,
    center_freq: f64,
    sample_rate: f64,
}

impl BandpassFilter {
    /// Third-octave filter around `center_freq`
    pub fn third_octave(center_freq: f64, sample_rate: f64) -> Self {
        Self::with_width(center_freq, BAND_FILTER_WIDTH_OCTAVES, sample_rate)
    }

    pub fn with_width(center_freq: f64, width_octaves: f64, sample_rate: f64) -> Self {
        let q = cascade_q(width_octaves);
        Self {
            coeffs: BiquadCoeffs::bandpass(center_freq, q, sample_rate),
            center_freq,
            sample_rate,
        }
    }

    pub fn center_freq(&self) -> f64 {
        self.center_freq
    }

    /// Filter a whole signal from rest; output has the input's length
    pub fn apply(&self, input: &[f64]) -> Vec<f64> {
        let mut first = BiquadTDF2::new(self.coeffs);
        let mut second = BiquadTDF2::new(self.coeffs);
        input
            .iter()
            .map(|&x| second.process_sample(first.process_sample(x)))
            .collect()
    }

    /// Cascade magnitude at `freq` (linear)
    pub fn magnitude_at(&self, freq: f64) -> f64 {
        let section = self.coeffs.response_at(freq, self.sample_rate);
        (section * section).norm()
    }
}
