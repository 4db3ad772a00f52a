//! Interaural deviation per band (ILD, phase, ITD)

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

use crate::bands::BandClass;
use crate::extract::BandResponse;

/// Bands below this frequency carry an ITD estimate
pub const ITD_MAX_FREQ_HZ: f64 = 1500.0;

/// Left/right deviation in one band
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeviationRecord {
    pub center_freq: f64,
    pub class: BandClass,
    /// 20*log10(|left| / |right|)
    pub magnitude_diff_db: f64,
    /// angle(left) - angle(right), wrapped to (-pi, pi]
    pub phase_diff_rad: f64,
    /// Phase-derived time difference, low bands only
    pub itd_ms: Option<f64>,
    pub left_magnitude: f64,
    pub right_magnitude: f64,
}

/// Wrap an angle to (-pi, pi]
pub fn wrap_phase(angle: f64) -> f64 {
    let wrapped = (angle + PI).rem_euclid(2.0 * PI) - PI;
    if wrapped <= -PI { wrapped + 2.0 * PI } else { wrapped }
}

impl DeviationRecord {
    /// Compare the two channels' responses in the same band
    pub fn between(left: &BandResponse, right: &BandResponse) -> Self {
        let center_freq = left.center_freq;
        let magnitude_diff_db = 20.0 * (left.magnitude / right.magnitude).log10();
        let phase_diff_rad = wrap_phase(left.phase - right.phase);
        let itd_ms = (center_freq < ITD_MAX_FREQ_HZ)
            .then(|| phase_diff_rad / (2.0 * PI * center_freq) * 1000.0);

        Self {
            center_freq,
            class: left.class,
            magnitude_diff_db,
            phase_diff_rad,
            itd_ms,
            left_magnitude: left.magnitude,
            right_magnitude: right.magnitude,
        }
    }
}

/// Deviation records for every band valid in both channels, in band order
pub fn analyze_deviation(left: &[BandResponse], right: &[BandResponse]) -> Vec<DeviationRecord> {
    left.iter()
        .filter_map(|l| {
            right
                .iter()
                .find(|r| r.band_index == l.band_index)
                .map(|r| DeviationRecord::between(l, r))
        })
        .collect()
}

/// Mean absolute magnitude difference (0 with no bands)
pub fn avg_deviation_db(records: &[DeviationRecord]) -> f64 {
    if records.is_empty() {
        return 0.0;
    }
    records.iter().map(|r| r.magnitude_diff_db.abs()).sum::<f64>() / records.len() as f64
}

/// Largest absolute magnitude difference (0 with no bands)
pub fn max_deviation_db(records: &[DeviationRecord]) -> f64 {
    records
        .iter()
        .map(|r| r.magnitude_diff_db.abs())
        .fold(0.0, f64::max)
}
