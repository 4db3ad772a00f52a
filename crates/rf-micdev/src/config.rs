//! Corrector configuration
//!
//! Built once, validated once, then shared read-only by every correction pass.

use serde::{Deserialize, Serialize};

use crate::{MicDevError, MicDevResult};

/// Default octave band centres (Hz)
pub const DEFAULT_OCTAVE_BANDS: [f64; 8] =
    [125.0, 250.0, 500.0, 1000.0, 2000.0, 4000.0, 8000.0, 16000.0];

/// Configuration for microphone deviation correction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectorConfig {
    /// Sample rate of both impulse responses (Hz)
    pub sample_rate: u32,

    /// Octave band centre frequencies, strictly ascending (Hz)
    #[serde(default = "default_octave_bands")]
    pub octave_bands: Vec<f64>,

    /// Gate length in cycles at the highest band
    #[serde(default = "default_min_gate_cycles")]
    pub min_gate_cycles: f64,

    /// Gate length in cycles at the lowest band
    #[serde(default = "default_max_gate_cycles")]
    pub max_gate_cycles: f64,

    /// Fraction of the measured deviation to correct (0.0-1.0)
    #[serde(default = "default_correction_strength")]
    pub correction_strength: f64,

    /// Target curve smoothing width (octaves)
    #[serde(default = "default_smoothing_window")]
    pub smoothing_window: f64,

    /// Per-band, per-channel correction limit (dB)
    #[serde(default = "default_max_correction_db")]
    pub max_correction_db: f64,

    #[serde(default = "default_true")]
    pub enable_phase_correction: bool,

    /// Push most of the correction onto the lower-quality channel
    #[serde(default = "default_true")]
    pub enable_adaptive_correction: bool,

    #[serde(default = "default_true")]
    pub enable_anatomical_validation: bool,

    /// Plausible mean ITD range (ms)
    #[serde(default = "default_itd_range_ms")]
    pub itd_range_ms: (f64, f64),

    /// Head radius used for the nominal maximum ITD (cm)
    #[serde(default = "default_head_radius_cm")]
    pub head_radius_cm: f64,

    /// Speed of sound (m/s)
    #[serde(default = "default_speed_of_sound")]
    pub speed_of_sound_m_s: f64,

    /// Maximum ITD standard deviation across low bands (ms)
    #[serde(default = "default_itd_consistency_ms")]
    pub itd_consistency_ms: f64,

    /// Correction kernel length in taps (odd)
    #[serde(default = "default_fir_length")]
    pub fir_length: usize,
}

fn default_octave_bands() -> Vec<f64> {
    DEFAULT_OCTAVE_BANDS.to_vec()
}

fn default_min_gate_cycles() -> f64 {
    2.0
}

fn default_max_gate_cycles() -> f64 {
    8.0
}

fn default_correction_strength() -> f64 {
    0.7
}

fn default_smoothing_window() -> f64 {
    1.0 / 3.0
}

fn default_max_correction_db() -> f64 {
    6.0
}

fn default_true() -> bool {
    true
}

fn default_itd_range_ms() -> (f64, f64) {
    (-0.7, 0.7)
}

fn default_head_radius_cm() -> f64 {
    8.75
}

fn default_speed_of_sound() -> f64 {
    343.0
}

fn default_itd_consistency_ms() -> f64 {
    0.3
}

fn default_fir_length() -> usize {
    1023
}

impl CorrectorConfig {
    /// Default configuration for the given sample rate
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            octave_bands: default_octave_bands(),
            min_gate_cycles: default_min_gate_cycles(),
            max_gate_cycles: default_max_gate_cycles(),
            correction_strength: default_correction_strength(),
            smoothing_window: default_smoothing_window(),
            max_correction_db: default_max_correction_db(),
            enable_phase_correction: true,
            enable_adaptive_correction: true,
            enable_anatomical_validation: true,
            itd_range_ms: default_itd_range_ms(),
            head_radius_cm: default_head_radius_cm(),
            speed_of_sound_m_s: default_speed_of_sound(),
            itd_consistency_ms: default_itd_consistency_ms(),
            fir_length: default_fir_length(),
        }
    }

    /// Conservative correction: half strength, 3 dB ceiling
    pub fn gentle(sample_rate: u32) -> Self {
        Self {
            correction_strength: 0.4,
            max_correction_db: 3.0,
            ..Self::new(sample_rate)
        }
    }

    /// Level-only correction, phase left untouched
    pub fn magnitude_only(sample_rate: u32) -> Self {
        Self {
            enable_phase_correction: false,
            ..Self::new(sample_rate)
        }
    }

    /// Builder pattern: set correction strength
    pub fn with_strength(mut self, strength: f64) -> Self {
        self.correction_strength = strength;
        self
    }

    /// Builder pattern: set octave band centres
    pub fn with_octave_bands(mut self, bands: Vec<f64>) -> Self {
        self.octave_bands = bands;
        self
    }

    /// Builder pattern: set correction ceiling
    pub fn with_max_correction_db(mut self, db: f64) -> Self {
        self.max_correction_db = db;
        self
    }

    /// Builder pattern: set gate cycle range
    pub fn with_gate_cycles(mut self, min: f64, max: f64) -> Self {
        self.min_gate_cycles = min;
        self.max_gate_cycles = max;
        self
    }

    /// Builder pattern: set smoothing width (octaves)
    pub fn with_smoothing_window(mut self, octaves: f64) -> Self {
        self.smoothing_window = octaves;
        self
    }

    /// Builder pattern: set plausible ITD range
    pub fn with_itd_range_ms(mut self, min: f64, max: f64) -> Self {
        self.itd_range_ms = (min, max);
        self
    }

    /// Builder pattern: set head radius
    pub fn with_head_radius_cm(mut self, radius: f64) -> Self {
        self.head_radius_cm = radius;
        self
    }

    /// Builder pattern: set kernel length
    pub fn with_fir_length(mut self, taps: usize) -> Self {
        self.fir_length = taps;
        self
    }

    /// Builder pattern: disable phase correction
    pub fn without_phase_correction(mut self) -> Self {
        self.enable_phase_correction = false;
        self
    }

    /// Builder pattern: disable adaptive apportionment
    pub fn without_adaptive_correction(mut self) -> Self {
        self.enable_adaptive_correction = false;
        self
    }

    /// Builder pattern: disable anatomical validation
    pub fn without_anatomical_validation(mut self) -> Self {
        self.enable_anatomical_validation = false;
        self
    }

    /// Nyquist frequency (Hz)
    pub fn nyquist(&self) -> f64 {
        self.sample_rate as f64 / 2.0
    }

    /// Check every constraint; any violation is fatal
    pub fn validate(&self) -> MicDevResult<()> {
        if self.sample_rate == 0 {
            return Err(invalid("sample_rate must be > 0"));
        }

        if self.octave_bands.is_empty() {
            return Err(invalid("octave_bands must not be empty"));
        }
        if let Some(&bad) = self
            .octave_bands
            .iter()
            .find(|f| !f.is_finite() || **f <= 0.0)
        {
            return Err(invalid(format!("octave band {bad} Hz is not a positive frequency")));
        }
        if let Some(pair) = self.octave_bands.windows(2).find(|w| w[1] <= w[0]) {
            return Err(invalid(format!(
                "octave_bands must be strictly increasing ({} Hz followed by {} Hz)",
                pair[0], pair[1]
            )));
        }

        if !(self.min_gate_cycles.is_finite() && self.min_gate_cycles > 0.0) {
            return Err(invalid(format!(
                "min_gate_cycles must be > 0, got {}",
                self.min_gate_cycles
            )));
        }
        if !(self.max_gate_cycles.is_finite() && self.max_gate_cycles >= self.min_gate_cycles) {
            return Err(invalid(format!(
                "max_gate_cycles ({}) must be >= min_gate_cycles ({})",
                self.max_gate_cycles, self.min_gate_cycles
            )));
        }

        if !(0.0..=1.0).contains(&self.correction_strength) {
            return Err(invalid(format!(
                "correction_strength must be within [0, 1], got {}",
                self.correction_strength
            )));
        }

        require_positive("smoothing_window", self.smoothing_window)?;
        require_positive("max_correction_db", self.max_correction_db)?;
        require_positive("head_radius_cm", self.head_radius_cm)?;
        require_positive("speed_of_sound_m_s", self.speed_of_sound_m_s)?;
        require_positive("itd_consistency_ms", self.itd_consistency_ms)?;

        let (min_itd, max_itd) = self.itd_range_ms;
        if !(min_itd.is_finite() && max_itd.is_finite() && min_itd < max_itd) {
            return Err(invalid(format!(
                "itd_range_ms must satisfy min < max, got ({min_itd}, {max_itd})"
            )));
        }

        if self.fir_length == 0 || self.fir_length % 2 == 0 {
            return Err(invalid(format!(
                "fir_length must be odd and >= 1, got {}",
                self.fir_length
            )));
        }

        Ok(())
    }

    /// Parse and validate a JSON configuration
    pub fn from_json(json: &str) -> MicDevResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Render as pretty JSON
    pub fn to_json(&self) -> MicDevResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

fn invalid(msg: impl Into<String>) -> MicDevError {
    MicDevError::InvalidConfig(msg.into())
}

fn require_positive(name: &str, value: f64) -> MicDevResult<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(invalid(format!("{name} must be > 0, got {value}")))
    }
}
