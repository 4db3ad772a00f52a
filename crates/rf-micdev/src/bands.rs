//! Octave band table and gate scheduling
//!
//! The table is computed once per corrector: each band carries its gate
//! length in cycles, the unclipped gate length in samples, and its
//! classification (which fixes the correction weights).

use serde::{Deserialize, Serialize};

use crate::config::CorrectorConfig;
use crate::{MicDevError, MicDevResult};

/// Upper edge of the low class (exclusive)
pub const LOW_MID_SPLIT_HZ: f64 = 700.0;

/// Upper edge of the mid class (inclusive)
pub const MID_HIGH_SPLIT_HZ: f64 = 4000.0;

/// Band classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BandClass {
    /// Below 700 Hz, ITD dominated
    Low,
    /// 700-4000 Hz
    Mid,
    /// Above 4000 Hz, ILD dominated
    High,
}

/// Correction weights for a band class
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BandWeights {
    pub magnitude: f64,
    pub phase: f64,
}

impl BandClass {
    /// Classify a centre frequency
    pub fn classify(center_freq: f64) -> Self {
        if center_freq < LOW_MID_SPLIT_HZ {
            BandClass::Low
        } else if center_freq <= MID_HIGH_SPLIT_HZ {
            BandClass::Mid
        } else {
            BandClass::High
        }
    }

    /// Fixed (magnitude, phase) weight table
    pub fn weights(self) -> BandWeights {
        match self {
            BandClass::Low => BandWeights {
                magnitude: 0.3,
                phase: 1.0,
            },
            BandClass::Mid => BandWeights {
                magnitude: 0.7,
                phase: 0.6,
            },
            BandClass::High => BandWeights {
                magnitude: 1.0,
                phase: 0.2,
            },
        }
    }
}

/// One analysis band
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OctaveBand {
    /// Position in the band table
    pub index: usize,
    /// Centre frequency (Hz)
    pub center_freq: f64,
    /// Gate length in cycles of the centre frequency
    pub gate_cycles: f64,
    /// Gate length in samples before clipping to the available signal
    pub nominal_gate: usize,
    pub class: BandClass,
}

impl OctaveBand {
    /// Gate length for a signal with `available` samples after the gate origin.
    ///
    /// `None` when the clipped gate is shorter than one sample; the band is
    /// then excluded for this pair.
    pub fn gate_samples(&self, available: usize) -> Option<usize> {
        let gate = self.nominal_gate.min(available);
        (gate >= 1).then_some(gate)
    }

    pub fn weights(&self) -> BandWeights {
        self.class.weights()
    }
}

/// Gate cycles for a band, interpolated on a log-frequency axis from
/// `max_cycles` at the lowest band down to `min_cycles` at the highest.
pub fn gate_cycles(
    center_freq: f64,
    lowest: f64,
    highest: f64,
    min_cycles: f64,
    max_cycles: f64,
) -> f64 {
    let position = if highest > lowest {
        ((center_freq / lowest).ln() / (highest / lowest).ln()).clamp(0.0, 1.0)
    } else {
        0.5
    };
    max_cycles - (max_cycles - min_cycles) * position
}

/// Immutable band table derived from the configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BandTable {
    bands: Vec<OctaveBand>,
}

impl BandTable {
    /// Build the table; bands at or above Nyquist are dropped
    pub fn new(config: &CorrectorConfig) -> MicDevResult<Self> {
        let nyquist = config.nyquist();
        let usable: Vec<f64> = config
            .octave_bands
            .iter()
            .copied()
            .filter(|&f| {
                let keep = f < nyquist;
                if !keep {
                    log::warn!(
                        "Dropping {f} Hz band: at or above Nyquist ({nyquist} Hz)"
                    );
                }
                keep
            })
            .collect();

        let (Some(&lowest), Some(&highest)) = (usable.first(), usable.last()) else {
            return Err(MicDevError::InvalidConfig(format!(
                "no octave band below Nyquist ({nyquist} Hz)"
            )));
        };

        let sample_rate = config.sample_rate as f64;
        let bands: Vec<OctaveBand> = usable
            .iter()
            .enumerate()
            .map(|(index, &center_freq)| {
                let cycles = gate_cycles(
                    center_freq,
                    lowest,
                    highest,
                    config.min_gate_cycles,
                    config.max_gate_cycles,
                );
                let nominal_gate = (cycles * sample_rate / center_freq).round() as usize;
                log::debug!(
                    "Band {center_freq} Hz: {cycles:.2} cycles, {nominal_gate} samples"
                );

                OctaveBand {
                    index,
                    center_freq,
                    gate_cycles: cycles,
                    nominal_gate,
                    class: BandClass::classify(center_freq),
                }
            })
            .collect();

        Ok(Self { bands })
    }

    pub fn bands(&self) -> &[OctaveBand] {
        &self.bands
    }

    pub fn len(&self) -> usize {
        self.bands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bands.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &OctaveBand> {
        self.bands.iter()
    }

    /// Look up a band by centre frequency
    pub fn find(&self, center_freq: f64) -> Option<&OctaveBand> {
        self.bands.iter().find(|b| b.center_freq == center_freq)
    }

    /// Centre frequencies in table order
    pub fn center_frequencies(&self) -> Vec<f64> {
        self.bands.iter().map(|b| b.center_freq).collect()
    }
}
