//! Correction kernels and "same"-mode FIR application

use std::f64::consts::PI;

use num_complex::Complex64;
use realfft::RealFftPlanner;
use serde::{Deserialize, Serialize};

use crate::MicDevResult;

/// Odd-length, centred correction kernel for one channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectionFilter {
    taps: Vec<f64>,
    sample_rate: f64,
}

impl CorrectionFilter {
    /// Unit impulse: leaves the signal untouched
    pub fn identity(sample_rate: f64) -> Self {
        Self {
            taps: vec![1.0],
            sample_rate,
        }
    }

    /// Wrap synthesized taps; the centre tap `(len - 1) / 2` is time zero
    pub fn from_taps(taps: Vec<f64>, sample_rate: f64) -> Self {
        if taps.is_empty() {
            return Self::identity(sample_rate);
        }
        Self { taps, sample_rate }
    }

    pub fn taps(&self) -> &[f64] {
        &self.taps
    }

    pub fn len(&self) -> usize {
        self.taps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.taps.is_empty()
    }

    pub fn is_identity(&self) -> bool {
        self.taps == [1.0]
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Complex response at `freq`, referenced to the centre tap
    pub fn response_at(&self, freq: f64) -> Complex64 {
        let center = (self.taps.len() - 1) as f64 / 2.0;
        let omega = 2.0 * PI * freq / self.sample_rate;
        self.taps
            .iter()
            .enumerate()
            .map(|(n, &h)| Complex64::from_polar(h, -omega * (n as f64 - center)))
            .sum()
    }

    /// Realized gain at `freq` (dB)
    pub fn response_db_at(&self, freq: f64) -> f64 {
        20.0 * self.response_at(freq).norm().max(1e-12).log10()
    }

    /// Filter an impulse response; the output keeps the input length
    pub fn apply(&self, input: &[f64]) -> MicDevResult<Vec<f64>> {
        convolve_same(input, &self.taps)
    }
}

/// Linear convolution cropped to the input length, aligned on the kernel centre.
///
/// Equivalent to `numpy.convolve(input, kernel, mode="same")` for odd kernels.
pub fn convolve_same(input: &[f64], kernel: &[f64]) -> MicDevResult<Vec<f64>> {
    if input.is_empty() {
        return Ok(Vec::new());
    }
    match kernel {
        [] => return Ok(input.to_vec()),
        [gain] => return Ok(input.iter().map(|x| x * gain).collect()),
        _ => {}
    }

    let full_len = input.len() + kernel.len() - 1;
    let fft_size = full_len.next_power_of_two();

    let mut planner = RealFftPlanner::<f64>::new();
    let forward = planner.plan_fft_forward(fft_size);
    let inverse = planner.plan_fft_inverse(fft_size);

    let mut signal = vec![0.0; fft_size];
    signal[..input.len()].copy_from_slice(input);
    let mut signal_spectrum = forward.make_output_vec();
    forward.process(&mut signal, &mut signal_spectrum)?;

    let mut padded_kernel = vec![0.0; fft_size];
    padded_kernel[..kernel.len()].copy_from_slice(kernel);
    let mut kernel_spectrum = forward.make_output_vec();
    forward.process(&mut padded_kernel, &mut kernel_spectrum)?;

    for (s, k) in signal_spectrum.iter_mut().zip(&kernel_spectrum) {
        *s *= k;
    }
    // DC and Nyquist bins must be real for the inverse transform
    if let Some(first) = signal_spectrum.first_mut() {
        first.im = 0.0;
    }
    if let Some(last) = signal_spectrum.last_mut() {
        last.im = 0.0;
    }

    let mut full = inverse.make_output_vec();
    inverse.process(&mut signal_spectrum, &mut full)?;

    let norm = 1.0 / fft_size as f64;
    let offset = (kernel.len() - 1) / 2;
    Ok(full[offset..offset + input.len()]
        .iter()
        .map(|x| x * norm)
        .collect())
}
