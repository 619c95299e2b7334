//! Daily training-load score and risk banding.
//!
//! The score is a duration × intensity proxy: minutes spanned by the samples
//! multiplied by the mean heart rate scaled down by 100. It is not a
//! physiological model, and the constants below are part of the contract.

use crate::models::{HeartRateSample, RiskLevel};

/// Milliseconds per minute
const MILLIS_PER_MINUTE: f64 = 60_000.0;

/// Heart-rate normalisation divisor
const HR_NORMALIZATION: f64 = 100.0;

/// Scores below this are GREEN
pub const YELLOW_THRESHOLD: f64 = 40.0;

/// Scores at or above this are RED
pub const RED_THRESHOLD: f64 = 80.0;

/// Mean heart rate over the samples
pub fn average_heart_rate(samples: &[HeartRateSample]) -> Option<f64> {
    if samples.is_empty() {
        return None;
    }

    // Integer sum keeps the mean independent of sample order
    let total: u64 = samples.iter().map(|s| u64::from(s.heart_rate)).sum();
    Some(total as f64 / samples.len() as f64)
}

/// Minutes between the earliest and latest sample
pub fn duration_minutes(samples: &[HeartRateSample]) -> f64 {
    let min = samples.iter().map(|s| s.timestamp).min();
    let max = samples.iter().map(|s| s.timestamp).max();

    match (min, max) {
        (Some(min), Some(max)) => max.abs_diff(min) as f64 / MILLIS_PER_MINUTE,
        _ => 0.0,
    }
}

/// Training score for a sample set. Empty or zero-length sets score `0.0`.
pub fn score(samples: &[HeartRateSample]) -> f64 {
    let Some(avg_hr) = average_heart_rate(samples) else {
        return 0.0;
    };

    let minutes = duration_minutes(samples);
    if minutes <= 0.0 {
        return 0.0;
    }

    minutes * (avg_hr / HR_NORMALIZATION)
}

/// Map a score onto its risk band. Each band is closed on its lower bound.
pub fn classify(score: f64) -> RiskLevel {
    if score < YELLOW_THRESHOLD {
        RiskLevel::Green
    } else if score < RED_THRESHOLD {
        RiskLevel::Yellow
    } else {
        RiskLevel::Red
    }
}

/// Score and classify in one step
pub fn assess(samples: &[HeartRateSample]) -> (f64, RiskLevel) {
    let score = score(samples);
    (score, classify(score))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    /// Samples every `step_ms` from zero to `span_ms` inclusive at a constant bpm
    fn steady_session(span_ms: i64, step_ms: i64, bpm: u16) -> Vec<HeartRateSample> {
        (0..=span_ms / step_ms)
            .map(|i| HeartRateSample::new(i * step_ms, bpm))
            .collect()
    }

    #[test]
    fn test_empty_samples_score_zero() {
        assert_eq!(score(&[]), 0.0);
    }

    #[test]
    fn test_single_sample_scores_zero() {
        let samples = vec![HeartRateSample::new(1_700_000_000_000, 180)];
        assert_eq!(score(&samples), 0.0);
    }

    #[test]
    fn test_identical_timestamps_score_zero() {
        let samples = vec![
            HeartRateSample::new(5_000, 150),
            HeartRateSample::new(5_000, 170),
        ];
        assert_eq!(score(&samples), 0.0);
    }

    #[test]
    fn test_extreme_timestamps_do_not_overflow() {
        let samples = vec![
            HeartRateSample::new(i64::MIN, 100),
            HeartRateSample::new(i64::MAX, 100),
        ];
        let expected = u64::MAX as f64 / MILLIS_PER_MINUTE;
        assert_eq!(duration_minutes(&samples), expected);
        assert_eq!(score(&samples), expected);
        assert_eq!(classify(score(&samples)), RiskLevel::Red);
    }

    #[test]
    fn test_ten_minutes_at_150_bpm() {
        let samples = steady_session(10 * 60_000, 1_000, 150);
        let score = score(&samples);

        assert_eq!(score, 15.0);
        assert_eq!(classify(score), RiskLevel::Green);
    }

    #[test]
    fn test_sixty_minutes_at_150_bpm() {
        let samples = steady_session(60 * 60_000, 5_000, 150);
        let score = score(&samples);

        assert_eq!(score, 90.0);
        assert_eq!(classify(score), RiskLevel::Red);
    }

    #[test]
    fn test_mean_uses_every_sample() {
        let samples = vec![
            HeartRateSample::new(0, 100),
            HeartRateSample::new(30_000, 120),
            HeartRateSample::new(60_000, 200),
        ];
        // 1 minute × (140 / 100)
        assert!((score(&samples) - 1.4).abs() < 1e-12);
    }

    #[test]
    fn test_classification_boundaries() {
        assert_eq!(classify(0.0), RiskLevel::Green);
        assert_eq!(classify(39.999), RiskLevel::Green);
        assert_eq!(classify(40.0), RiskLevel::Yellow);
        assert_eq!(classify(79.999), RiskLevel::Yellow);
        assert_eq!(classify(80.0), RiskLevel::Red);
        assert_eq!(classify(250.0), RiskLevel::Red);
    }

    #[test]
    fn test_assess_matches_parts() {
        let samples = steady_session(30 * 60_000, 10_000, 160);
        let (score_value, risk) = assess(&samples);

        assert_eq!(score_value, score(&samples));
        assert_eq!(risk, classify(score_value));
        assert_eq!(risk, RiskLevel::Yellow);
    }

    proptest! {
        #[test]
        fn prop_score_is_order_independent(
            points in prop::collection::vec((0i64..7_200_000, 30u16..230), 1..64),
            seed in any::<u64>(),
        ) {
            let samples: Vec<HeartRateSample> = points
                .iter()
                .map(|&(ts, hr)| HeartRateSample::new(ts, hr))
                .collect();

            let mut reordered = samples.clone();
            reordered.reverse();
            let len = reordered.len();
            reordered.rotate_left((seed as usize) % len);

            let forward = score(&samples);
            let backward = score(&reordered);

            prop_assert_eq!(forward, backward);
            prop_assert_eq!(classify(forward), classify(backward));
        }

        #[test]
        fn prop_score_is_never_negative(
            points in prop::collection::vec((any::<i32>(), 1u16..300), 0..32),
        ) {
            let samples: Vec<HeartRateSample> = points
                .iter()
                .map(|&(ts, hr)| HeartRateSample::new(i64::from(ts), hr))
                .collect();

            prop_assert!(score(&samples) >= 0.0);
        }
    }
}
