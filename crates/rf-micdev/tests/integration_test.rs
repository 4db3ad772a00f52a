//! Microphone Deviation Correction Integration Tests
//!
//! End-to-end behaviour of the correction pipeline on synthetic pairs:
//! - No-op guarantees (identical channels, zero strength)
//! - Clipping and strength monotonicity
//! - Adaptive apportionment
//! - Interaural delay kept out of the level difference
//! - Anatomical ITD validation
//! - Re-application convergence
//! - Batch and cross-validated multi-speaker correction

use approx::assert_relative_eq;
use rf_micdev::cross_validation::{Confidence, EstimateBasis};
use rf_micdev::{
    BatchCorrector, Channel, CorrectOptions, CorrectorConfig, MicrophoneDeviationCorrector,
    SpeakerPair,
};

const SAMPLE_RATE: u32 = 48000;
const IR_LENGTH: usize = 4800;
const PEAK_INDEX: usize = 1000;

/// Band-limited impulse at a fractional position (Hann-windowed sinc)
fn fractional_impulse(len: usize, position: f64, amplitude: f64) -> Vec<f64> {
    const HALF_WIDTH: i64 = 32;
    let mut ir = vec![0.0; len];
    let whole = position.floor() as i64;
    for i in (whole - HALF_WIDTH)..=(whole + HALF_WIDTH + 1) {
        let d = i as f64 - position;
        if d.abs() > HALF_WIDTH as f64 || i < 0 || i as usize >= len {
            continue;
        }
        let sinc = if d == 0.0 {
            1.0
        } else {
            (std::f64::consts::PI * d).sin() / (std::f64::consts::PI * d)
        };
        let window = 0.5 + 0.5 * (std::f64::consts::PI * d / (HALF_WIDTH + 1) as f64).cos();
        ir[i as usize] += amplitude * sinc * window;
    }
    ir
}

fn impulse(len: usize, at: usize, amplitude: f64) -> Vec<f64> {
    let mut ir = vec![0.0; len];
    ir[at] = amplitude;
    ir
}

fn corrector(config: CorrectorConfig) -> MicrophoneDeviationCorrector {
    MicrophoneDeviationCorrector::new(config).expect("valid configuration")
}

/// Right channel at half level, 100 us later
fn offset_pair() -> (Vec<f64>, Vec<f64>) {
    let left = impulse(IR_LENGTH, PEAK_INDEX, 1.0);
    let delay = 100e-6 * SAMPLE_RATE as f64;
    let right = fractional_impulse(IR_LENGTH, PEAK_INDEX as f64 + delay, 0.5);
    (left, right)
}

fn diff_at(corrector: &MicrophoneDeviationCorrector, left: &[f64], right: &[f64], freq: f64) -> f64 {
    corrector
        .analyze(left, right)
        .unwrap()
        .deviation_at(freq)
        .expect("band analysed")
        .magnitude_diff_db
}

// ═══════════════════════════════════════════════════════════════════════════════
// END-TO-END
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_end_to_end_depth_offset() {
    let corrector = corrector(CorrectorConfig::new(SAMPLE_RATE));
    let (left, right) = offset_pair();

    let before = diff_at(&corrector, &left, &right, 1000.0);
    assert!((before - 20.0 * 2.0_f64.log10()).abs() < 0.1, "before: {before}");

    let output = corrector.correct(&left, &right).unwrap();
    assert_eq!(output.left.len(), IR_LENGTH);
    assert_eq!(output.right.len(), IR_LENGTH);

    let after = diff_at(&corrector, &output.left, &output.right, 1000.0);
    assert!(after.abs() < before.abs(), "after: {after}, before: {before}");

    let report = &output.report;
    assert!(report.correction_applied);
    assert_eq!(report.deviations.len(), 8);
    assert!(report.avg_deviation_db > 0.0);
    assert!(report.max_deviation_db >= report.avg_deviation_db);
    assert_eq!(report.features.enabled().len(), 3);
    assert!(report.itd_validation.is_some());
}

#[test]
fn test_inputs_are_not_modified() {
    let corrector = corrector(CorrectorConfig::new(SAMPLE_RATE));
    let (left, right) = offset_pair();
    let (left_copy, right_copy) = (left.clone(), right.clone());

    let first = corrector.correct(&left, &right).unwrap();
    let second = corrector.correct(&left, &right).unwrap();

    assert_eq!(left, left_copy);
    assert_eq!(right, right_copy);
    assert_eq!(first.left, second.left);
    assert_eq!(first.right, second.right);
}

// ═══════════════════════════════════════════════════════════════════════════════
// NO-OP GUARANTEES
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_identical_channels_are_untouched() {
    let ir = fractional_impulse(IR_LENGTH, PEAK_INDEX as f64 + 0.3, 0.8);

    for strength in [0.0, 0.35, 0.7, 1.0] {
        let corrector = corrector(CorrectorConfig::new(SAMPLE_RATE).with_strength(strength));
        let output = corrector.correct(&ir, &ir).unwrap();

        assert_eq!(output.report.avg_deviation_db, 0.0);
        assert_eq!(output.report.max_deviation_db, 0.0);
        assert_eq!(output.left, ir);
        assert_eq!(output.right, ir);
        assert!(!output.report.correction_applied);
    }
}

#[test]
fn test_zero_strength_is_exact_noop() {
    let (left, right) = offset_pair();

    let configs = [
        CorrectorConfig::new(SAMPLE_RATE).with_strength(0.0),
        CorrectorConfig::magnitude_only(SAMPLE_RATE).with_strength(0.0),
        CorrectorConfig::new(SAMPLE_RATE)
            .with_strength(0.0)
            .without_adaptive_correction()
            .without_anatomical_validation(),
    ];

    for config in configs {
        let output = corrector(config).correct(&left, &right).unwrap();
        assert_eq!(output.left, left);
        assert_eq!(output.right, right);
        assert_eq!(output.report.left_filter_taps, 1);
        assert_eq!(output.report.right_filter_taps, 1);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// STRENGTH AND CLIPPING
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_strength_is_monotonic_until_saturation() {
    let left = impulse(IR_LENGTH, PEAK_INDEX, 1.0);
    let right = impulse(IR_LENGTH, PEAK_INDEX, 0.1);

    let mut previous_target = 0.0;
    let mut previous_realized = 0.0;
    for strength in [0.0, 0.1, 0.2, 0.3, 0.4, 0.6, 0.8, 1.0] {
        let corrector = corrector(CorrectorConfig::new(SAMPLE_RATE).with_strength(strength));
        let output = corrector.correct(&left, &right).unwrap();
        let band = output.report.correction_at(8000.0).unwrap();

        let target = band.right_magnitude_db.abs() + band.left_magnitude_db.abs();
        assert!(target >= previous_target - 1e-12, "strength {strength}");
        assert!(band.right_magnitude_db <= 6.0);

        let (left_filter, right_filter) = corrector
            .design_filters(&output.report.corrections)
            .unwrap();
        let realized = right_filter.response_db_at(8000.0) - left_filter.response_db_at(8000.0);
        assert!(realized >= previous_realized - 1e-6, "strength {strength}");

        previous_target = target;
        previous_realized = realized;
    }

    // 20 dB at full strength saturates the ceiling on the moved channel
    assert_relative_eq!(previous_target, 6.0 + 4.0, epsilon = 1e-9);
}

#[test]
fn test_large_deviation_is_clipped() {
    let left = impulse(IR_LENGTH, PEAK_INDEX, 1.0);
    let right = impulse(IR_LENGTH, PEAK_INDEX, 0.1);

    for strength in [0.5, 0.8, 1.0] {
        let config = CorrectorConfig::new(SAMPLE_RATE).with_strength(strength);
        let max_db = config.max_correction_db;
        let corrector = corrector(config);
        let output = corrector.correct(&left, &right).unwrap();

        let at_1k = output.report.deviation_at(1000.0).unwrap();
        assert_relative_eq!(at_1k.magnitude_diff_db, 20.0, epsilon = 1e-9);

        for band in &output.report.corrections {
            assert!(band.left_magnitude_db.abs() <= max_db);
            assert!(band.right_magnitude_db.abs() <= max_db);
        }

        let (left_filter, right_filter) = corrector
            .design_filters(&output.report.corrections)
            .unwrap();
        for filter in [&left_filter, &right_filter] {
            let realized = filter.response_db_at(1000.0);
            assert!(realized.abs() <= max_db + 0.05, "realized {realized} dB");
        }
    }
}

#[test]
fn test_gentle_preset_respects_its_ceiling() {
    let left = impulse(IR_LENGTH, PEAK_INDEX, 1.0);
    let right = impulse(IR_LENGTH, PEAK_INDEX, 0.1);
    let output = corrector(CorrectorConfig::gentle(SAMPLE_RATE))
        .correct(&left, &right)
        .unwrap();
    for band in &output.report.corrections {
        assert!(band.right_magnitude_db <= 3.0);
        assert!(band.left_magnitude_db >= -3.0);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ADAPTIVE APPORTIONMENT
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_higher_quality_channel_moves_less() {
    let corrector = corrector(CorrectorConfig::new(SAMPLE_RATE));
    let strong = impulse(IR_LENGTH, PEAK_INDEX, 1.0);
    let weak = impulse(IR_LENGTH, PEAK_INDEX, 0.5);

    let output = corrector.correct(&strong, &weak).unwrap();
    let report = &output.report;
    assert!(report.left_quality.unwrap().score > report.right_quality.unwrap().score);
    assert_eq!(report.reference_side, Some(Channel::Left));
    for band in &report.corrections {
        assert!(band.left_magnitude_db.abs() < band.right_magnitude_db.abs());
    }

    // Swapping the channels swaps the roles
    let swapped = corrector.correct(&weak, &strong).unwrap();
    let report = &swapped.report;
    assert_eq!(report.reference_side, Some(Channel::Right));
    for band in &report.corrections {
        assert!(band.right_magnitude_db.abs() < band.left_magnitude_db.abs());
    }
}

#[test]
fn test_symmetric_without_adaptive_correction() {
    let config = CorrectorConfig::new(SAMPLE_RATE).without_adaptive_correction();
    let output = corrector(config)
        .correct(
            &impulse(IR_LENGTH, PEAK_INDEX, 1.0),
            &impulse(IR_LENGTH, PEAK_INDEX, 0.5),
        )
        .unwrap();

    assert_eq!(output.report.reference_side, None);
    for band in &output.report.corrections {
        assert_relative_eq!(band.left_magnitude_db, -band.right_magnitude_db, epsilon = 1e-12);
    }
}

#[test]
fn test_magnitude_only_leaves_phase_targets_at_zero() {
    let (left, right) = offset_pair();
    let output = corrector(CorrectorConfig::magnitude_only(SAMPLE_RATE))
        .correct(&left, &right)
        .unwrap();
    assert!(!output.report.features.phase_correction);
    for band in &output.report.corrections {
        assert_eq!(band.left_phase_rad, 0.0);
        assert_eq!(band.right_phase_rad, 0.0);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// INTERAURAL DELAY
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_interaural_delay_is_not_a_level_difference() {
    let corrector = corrector(CorrectorConfig::new(SAMPLE_RATE));
    let left = impulse(IR_LENGTH, PEAK_INDEX, 1.0);

    // 0.1 ms to 0.6 ms at 48 kHz
    for delay in [5, 12, 20, 28] {
        let right = impulse(IR_LENGTH, PEAK_INDEX + delay, 1.0);
        let analysis = corrector.analyze(&left, &right).unwrap();
        for freq in [4000.0, 8000.0, 16000.0] {
            let diff = analysis.deviation_at(freq).unwrap().magnitude_diff_db;
            assert!(diff.abs() < 1e-9, "{delay} samples, {freq} Hz: {diff} dB");
        }

        let output = corrector.correct(&left, &right).unwrap();
        for band in &output.report.corrections {
            assert!(band.left_magnitude_db.abs() < 1e-9);
            assert!(band.right_magnitude_db.abs() < 1e-9);
        }
    }
}

#[test]
fn test_fractional_delay_keeps_high_band_levels() {
    let corrector = corrector(CorrectorConfig::new(SAMPLE_RATE));
    let left = impulse(IR_LENGTH, PEAK_INDEX, 1.0);
    let right = fractional_impulse(IR_LENGTH, PEAK_INDEX as f64 + 4.8, 1.0);
    let analysis = corrector.analyze(&left, &right).unwrap();

    for freq in [4000.0, 8000.0] {
        let diff = analysis.deviation_at(freq).unwrap().magnitude_diff_db;
        assert!(diff.abs() < 0.15, "{freq} Hz: {diff} dB");
    }
    // Shortest gate: only the band-limited impulse's own pre-ringing is cut
    let diff = analysis.deviation_at(16000.0).unwrap().magnitude_diff_db;
    assert!(diff.abs() < 2.0, "16000 Hz: {diff} dB");
}

// ═══════════════════════════════════════════════════════════════════════════════
// ANATOMICAL VALIDATION
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_two_millisecond_itd_is_flagged() {
    let corrector = corrector(CorrectorConfig::new(SAMPLE_RATE));
    let len = 9600;
    let left = impulse(len, PEAK_INDEX, 1.0);
    let right = impulse(len, PEAK_INDEX + 96, 1.0);

    let output = corrector.correct(&left, &right).unwrap();
    let validation = output.report.itd_validation.as_ref().unwrap();
    assert!(!validation.valid);
    assert!(!validation.warnings.is_empty());
    assert_eq!(validation.samples.len(), 4);

    // Validation never blocks the correction
    assert_eq!(output.left.len(), len);
    assert!(output.report.correction_applied);
}

#[test]
fn test_plausible_consistent_itd_is_valid() {
    let corrector = corrector(CorrectorConfig::new(SAMPLE_RATE));
    let len = 9600;
    let direct = impulse(len, PEAK_INDEX, 1.0);

    for delay_samples in [9.6_f64, -9.6, 20.0] {
        // Positive: right ear later; negative: left ear later
        let delayed = fractional_impulse(len, PEAK_INDEX as f64 + delay_samples.abs(), 0.9);
        let (left, right) = if delay_samples > 0.0 {
            (direct.clone(), delayed)
        } else {
            (delayed, direct.clone())
        };
        let output = corrector.correct(&left, &right).unwrap();
        let validation = output.report.itd_validation.as_ref().unwrap();

        let expected_ms = delay_samples / SAMPLE_RATE as f64 * 1000.0;
        assert!(validation.valid, "delay {delay_samples}: {:?}", validation.warnings);
        assert!(validation.warnings.is_empty());
        assert!((validation.mean_itd_ms - expected_ms).abs() < 0.02);
        assert!(validation.mean_itd_ms.abs() <= 0.5);
    }
}

#[test]
fn test_validation_can_be_disabled() {
    let config = CorrectorConfig::new(SAMPLE_RATE).without_anatomical_validation();
    let output = corrector(config)
        .correct(
            &impulse(9600, PEAK_INDEX, 1.0),
            &impulse(9600, PEAK_INDEX + 96, 1.0),
        )
        .unwrap();
    assert!(output.report.itd_validation.is_none());
    assert!(output.report.itd_valid());
}

// ═══════════════════════════════════════════════════════════════════════════════
// CONVERGENCE
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_reapplication_does_not_increase_deviation() {
    let corrector = corrector(CorrectorConfig::new(SAMPLE_RATE));
    let (left, right) = offset_pair();

    let before = corrector.analyze(&left, &right).unwrap();
    let once = corrector.correct(&left, &right).unwrap();
    let after_once = corrector.analyze(&once.left, &once.right).unwrap();
    let twice = corrector.correct(&once.left, &once.right).unwrap();
    let after_twice = corrector.analyze(&twice.left, &twice.right).unwrap();

    assert!(after_once.avg_deviation_db() < before.avg_deviation_db());
    assert!(after_twice.avg_deviation_db() < after_once.avg_deviation_db());

    for record in &before.deviations {
        let freq = record.center_freq;
        let b = record.magnitude_diff_db.abs();
        let a1 = after_once.deviation_at(freq).unwrap().magnitude_diff_db.abs();
        let a2 = after_twice.deviation_at(freq).unwrap().magnitude_diff_db.abs();
        assert!(a1 < b, "{freq} Hz: {a1} vs {b}");
        assert!(a2 < a1, "{freq} Hz: {a2} vs {a1}");
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// REPORT
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_report_with_analysis_spectra() {
    let corrector = corrector(CorrectorConfig::new(SAMPLE_RATE));
    let (left, right) = offset_pair();
    let output = corrector
        .correct_with_options(&left, &right, &CorrectOptions::with_plot_analysis())
        .unwrap();

    let spectra = output.report.spectra.as_ref().unwrap();
    assert_eq!(spectra.before.frequencies.len(), spectra.after.frequencies.len());

    // Around 1 kHz the left/right gap narrows after correction
    let bin = spectra
        .before
        .frequencies
        .iter()
        .position(|&f| f >= 1000.0)
        .unwrap();
    let gap_before = spectra.before.difference_db()[bin].abs();
    let gap_after = spectra.after.difference_db()[bin].abs();
    assert!(gap_after < gap_before);

    let text = output.report.to_text();
    assert!(text.contains("Reference: left"));
    let json = output.report.to_json().unwrap();
    assert!(json.contains("\"deviations\""));
}

// ═══════════════════════════════════════════════════════════════════════════════
// MULTI-SPEAKER
// ═══════════════════════════════════════════════════════════════════════════════

/// Speaker pairs whose right microphone reads 0.8x (about 1.94 dB low)
fn speaker_set() -> Vec<SpeakerPair> {
    let mic = 0.8;
    let pair = |label: &str, left_gain: f64, right_gain: f64| {
        SpeakerPair::new(
            label,
            impulse(IR_LENGTH, PEAK_INDEX, left_gain),
            impulse(IR_LENGTH, PEAK_INDEX, right_gain * mic),
        )
    };
    vec![
        pair("FL", 1.0, 0.5),
        pair("FR", 0.5, 1.0),
        pair("FC", 1.0, 1.0),
    ]
}

#[test]
fn test_batch_preserves_order() {
    let batch = BatchCorrector::new(CorrectorConfig::new(SAMPLE_RATE))
        .unwrap()
        .with_max_parallel(2);
    let pairs = speaker_set();
    let results = batch.correct_all(&pairs);

    let labels: Vec<_> = results.iter().map(|r| r.label.as_str()).collect();
    assert_eq!(labels, vec!["FL", "FR", "FC"]);
    assert!(results.iter().all(|r| r.is_ok()));
}

#[test]
fn test_cross_validated_correction() {
    let batch = BatchCorrector::new(CorrectorConfig::new(SAMPLE_RATE)).unwrap();
    let pairs = speaker_set();
    let outcome = batch.correct_cross_validated(&pairs).unwrap();

    let mic_error_db = 20.0 * (1.0_f64 / 0.8).log10();
    assert!(outcome.cross_validated);
    assert!(outcome.skipped.is_empty());
    for band in &outcome.estimate.bands {
        assert_eq!(band.basis, EstimateBasis::Neutral);
        assert_relative_eq!(band.error_db, mic_error_db, epsilon = 1e-6);
    }

    let consistency = outcome.consistency.as_ref().unwrap();
    assert!(consistency.valid);
    assert_eq!(consistency.confidence, Confidence::High);
    assert_relative_eq!(outcome.effective_strength, 0.7);

    // The centre speaker keeps only the uncorrected share of the error
    let corrector = batch.corrector();
    let centre = &outcome.corrected[2];
    assert_eq!(centre.label, "FC");
    let residual = diff_at(corrector, &centre.left, &centre.right, 1000.0);
    assert!((residual - mic_error_db * 0.3).abs() < 0.05, "residual {residual}");
}

#[test]
fn test_single_speaker_fallback() {
    let batch = BatchCorrector::new(CorrectorConfig::new(SAMPLE_RATE)).unwrap();
    let pairs = vec![SpeakerPair::new(
        "FL",
        impulse(IR_LENGTH, PEAK_INDEX, 1.0),
        impulse(IR_LENGTH, PEAK_INDEX, 0.5),
    )];
    let outcome = batch.correct_cross_validated(&pairs).unwrap();

    assert!(!outcome.cross_validated);
    assert!(outcome.consistency.is_none());
    assert!(outcome
        .estimate
        .bands
        .iter()
        .all(|b| b.basis == EstimateBasis::SingleSpeaker));
    assert_eq!(outcome.corrected.len(), 1);
}

#[test]
fn test_unusable_pairs_are_skipped() {
    let batch = BatchCorrector::new(CorrectorConfig::new(SAMPLE_RATE)).unwrap();
    let mut pairs = speaker_set();
    pairs[1].right[10] = f64::NAN;

    let outcome = batch.correct_cross_validated(&pairs).unwrap();
    assert_eq!(outcome.skipped, vec!["FR".to_string()]);

    // One entry per input pair, in input order
    let labels: Vec<_> = outcome.corrected.iter().map(|s| s.label.as_str()).collect();
    assert_eq!(labels, vec!["FL", "FR", "FC"]);
    let flags: Vec<_> = outcome.corrected.iter().map(|s| s.corrected).collect();
    assert_eq!(flags, vec![true, false, true]);

    // The skipped pair comes back bit-for-bit unmodified
    let skipped = &outcome.corrected[1];
    assert_eq!(skipped.left, pairs[1].left);
    assert!(skipped
        .right
        .iter()
        .zip(&pairs[1].right)
        .all(|(a, b)| a.to_bits() == b.to_bits()));
    assert_ne!(outcome.corrected[0].right, pairs[0].right);
}
