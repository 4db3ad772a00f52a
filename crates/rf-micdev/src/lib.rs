//! rf-micdev: Binaural microphone deviation correction
//!
//! Estimates and removes left/right microphone mismatch (insertion depth,
//! capsule orientation) from binaural impulse response pairs before they are
//! used for headphone virtualization.
//!
//! ## Pipeline (per speaker pair)
//! - `bands` - octave band table and gate scheduling
//! - `extract` - band-limited, gated direct-sound response per channel
//! - `quality` - per-channel reliability score
//! - `deviation` - ILD / phase / ITD per band
//! - `validation` - anatomical plausibility of the measured ITD
//! - `design` - adaptive, frequency-weighted correction targets and kernels
//! - `fir` - "same"-mode FIR application
//!
//! ## Around the pipeline
//! - `batch` - many speaker pairs in parallel against one shared corrector
//! - `cross_validation` - microphone error estimated across all speakers
//! - `report` / `spectrum` - structured results for downstream tooling
//!
//! ## Example
//!
//! ```rust,ignore
//! use rf_micdev::{CorrectorConfig, MicrophoneDeviationCorrector};
//!
//! let corrector = MicrophoneDeviationCorrector::new(CorrectorConfig::new(48000))?;
//! let output = corrector.correct(&left_ir, &right_ir)?;
//! println!("{}", output.report.to_text());
//! ```

pub mod bands;
pub mod batch;
pub mod config;
pub mod corrector;
pub mod cross_validation;
pub mod design;
pub mod deviation;
pub mod extract;
pub mod filter;
pub mod fir;
pub mod quality;
pub mod report;
pub mod spectrum;
pub mod validation;

mod error;

pub use bands::{BandClass, BandTable, BandWeights, OctaveBand};
pub use batch::{BatchCorrector, SpeakerCorrection, SpeakerPair};
pub use config::CorrectorConfig;
pub use corrector::{CorrectOptions, CorrectionOutput, DeviationAnalysis, MicrophoneDeviationCorrector};
pub use cross_validation::{
    ConsistencyReport, CrossValidatedOutcome, MicErrorEstimate, SpeakerDeviation,
};
pub use deviation::DeviationRecord;
pub use error::{MicDevError, MicDevResult};
pub use extract::{BandExclusion, BandResponse, ExcludedBand};
pub use fir::CorrectionFilter;
pub use quality::QualityScore;
pub use report::{CorrectionReport, FeatureFlags, ReportFormat};
pub use validation::ItdValidation;

use serde::{Deserialize, Serialize};
use std::fmt;

/// Ear / microphone channel of a binaural pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Channel {
    Left,
    Right,
}

impl Channel {
    /// The opposite ear
    pub fn other(self) -> Self {
        match self {
            Channel::Left => Channel::Right,
            Channel::Right => Channel::Left,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Left => f.write_str("left"),
            Channel::Right => f.write_str("right"),
        }
    }
}
