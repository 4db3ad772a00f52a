//! Before/after spectra for downstream visualization

use realfft::RealFftPlanner;
use serde::{Deserialize, Serialize};

use crate::design::TargetCurve;
use crate::MicDevResult;

/// Smallest FFT used for plotting spectra
pub const MIN_SPECTRUM_FFT: usize = 8192;

const MAGNITUDE_FLOOR: f64 = 1e-12;

/// Magnitude spectra of one left/right pair (dB)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseSpectrum {
    pub frequencies: Vec<f64>,
    pub left_db: Vec<f64>,
    pub right_db: Vec<f64>,
}

impl ResponseSpectrum {
    /// Zero-padded magnitude spectra of both impulse responses
    pub fn compute(left: &[f64], right: &[f64], sample_rate: f64) -> MicDevResult<Self> {
        let longest = left.len().max(right.len());
        let fft_size = (2 * longest).max(MIN_SPECTRUM_FFT).next_power_of_two();

        let mut planner = RealFftPlanner::<f64>::new();
        let fft = planner.plan_fft_forward(fft_size);

        let magnitude_db = |ir: &[f64]| -> MicDevResult<Vec<f64>> {
            let mut input = fft.make_input_vec();
            input[..ir.len()].copy_from_slice(ir);
            let mut spectrum = fft.make_output_vec();
            fft.process(&mut input, &mut spectrum)?;
            Ok(spectrum
                .iter()
                .map(|c| 20.0 * c.norm().max(MAGNITUDE_FLOOR).log10())
                .collect())
        };

        let left_db = magnitude_db(left)?;
        let right_db = magnitude_db(right)?;
        let frequencies = (0..left_db.len())
            .map(|k| k as f64 * sample_rate / fft_size as f64)
            .collect();

        Ok(Self {
            frequencies,
            left_db,
            right_db,
        })
    }

    /// Left minus right, per bin (dB)
    pub fn difference_db(&self) -> Vec<f64> {
        self.left_db
            .iter()
            .zip(&self.right_db)
            .map(|(l, r)| l - r)
            .collect()
    }
}

/// Everything a plotting collaborator needs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSpectra {
    pub before: ResponseSpectrum,
    pub after: ResponseSpectrum,
    pub left_target: TargetCurve,
    pub right_target: TargetCurve,
}
