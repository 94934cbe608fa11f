//! Calibrated, self-adapting motion threshold.
//!
//! Lifecycle:
//! 1. Calibration: for the first `calibration_s` seconds of sample time, or the
//!    first `calibration_samples` samples if that comes sooner, every window
//!    variance feeds a Welford accumulator; motion is never reported.
//! 2. Tracking: baseline mean/variance of the window variance decay
//!    exponentially toward new non-motion readings, and the live threshold
//!    moves toward `max(mean + k * std, floor)` at the same rate.

use contracts::ConditionerConfig;
use tracing::info;

/// Fewer samples than this and the window variance is not meaningful
pub const MIN_SAMPLES: usize = 5;

#[derive(Debug, Clone, Copy, Default)]
struct Welford {
    count: u64,
    mean: f64,
    m2: f64,
}

impl Welford {
    fn push(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
    }

    fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / self.count as f64
        }
    }
}

/// Exponentially weighted baseline of the window variance
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Baseline {
    pub mean: f64,
    pub variance: f64,
}

impl Baseline {
    pub fn std_dev(&self) -> f64 {
        self.variance.max(0.0).sqrt()
    }

    fn decay_toward(&mut self, value: f64, alpha: f64) {
        let diff = value - self.mean;
        let incr = alpha * diff;
        self.mean += incr;
        self.variance = (1.0 - alpha) * (self.variance + diff * incr);
    }
}

/// Outcome of one evaluation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Verdict {
    pub motion: bool,
    pub calibrating: bool,
    pub threshold: f64,
}

#[derive(Debug, Clone)]
pub struct MotionDetector {
    config: ConditionerConfig,
    started_at: Option<f64>,
    calibration_seen: usize,
    calibration: Welford,
    baseline: Option<Baseline>,
    threshold: f64,
}

impl MotionDetector {
    pub fn new(config: ConditionerConfig) -> Self {
        let threshold = config.variance_threshold;
        Self {
            config,
            started_at: None,
            calibration_seen: 0,
            calibration: Welford::default(),
            baseline: None,
            threshold,
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn baseline(&self) -> Option<Baseline> {
        self.baseline
    }

    pub fn is_calibrated(&self) -> bool {
        self.baseline.is_some()
    }

    /// Classify one window variance observed at `timestamp`.
    ///
    /// `ready` is false while the window holds fewer than [`MIN_SAMPLES`].
    pub fn evaluate(&mut self, timestamp: f64, variance: f64, ready: bool) -> Verdict {
        let started_at = *self.started_at.get_or_insert(timestamp);

        if self.baseline.is_none() {
            if timestamp - started_at < self.config.calibration_s
                && self.calibration_seen < self.config.calibration_samples
            {
                self.calibration_seen += 1;
                if ready {
                    self.calibration.push(variance);
                }
                return Verdict {
                    motion: false,
                    calibrating: true,
                    threshold: self.threshold,
                };
            }
            self.finish_calibration();
        }

        if !ready {
            return Verdict {
                motion: false,
                calibrating: false,
                threshold: self.threshold,
            };
        }

        let motion = variance > self.threshold;
        if !motion {
            self.adapt(variance);
        }
        Verdict {
            motion,
            calibrating: false,
            threshold: self.threshold,
        }
    }

    fn finish_calibration(&mut self) {
        let baseline = Baseline {
            mean: self.calibration.mean,
            variance: self.calibration.variance(),
        };
        self.threshold = self.target(&baseline);
        self.baseline = Some(baseline);
        info!(
            samples = self.calibration.count,
            baseline_mean = baseline.mean,
            baseline_std = baseline.std_dev(),
            threshold = self.threshold,
            "calibration complete"
        );
    }

    fn adapt(&mut self, variance: f64) {
        let alpha = self.config.decay_rate;
        let Some(baseline) = self.baseline.as_mut() else {
            return;
        };
        baseline.decay_toward(variance, alpha);
        let snapshot = *baseline;
        let target = self.target(&snapshot);
        self.threshold += alpha * (target - self.threshold);
    }

    fn target(&self, baseline: &Baseline) -> f64 {
        (baseline.mean + self.config.k_sigma * baseline.std_dev()).max(self.config.variance_threshold)
    }
}

/// Map a variance onto [0, 1] relative to the threshold
pub fn motion_confidence(variance: f64, threshold: f64) -> f64 {
    if threshold <= f64::EPSILON {
        return if variance > 0.0 { 1.0 } else { 0.0 };
    }
    (variance / (2.0 * threshold)).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(calibration_s: f64) -> ConditionerConfig {
        ConditionerConfig {
            window_size: 50,
            calibration_s,
            calibration_samples: 100_000,
            k_sigma: 3.0,
            decay_rate: 0.05,
            variance_threshold: 5.0,
        }
    }

    #[test]
    fn never_reports_motion_while_calibrating() {
        let mut d = MotionDetector::new(config(2.0));
        for i in 0..100 {
            let v = d.evaluate(i as f64 * 0.01, 1_000.0, true);
            assert!(v.calibrating);
            assert!(!v.motion);
        }
        assert!(!d.is_calibrated());
    }

    #[test]
    fn sample_bound_ends_calibration_before_time() {
        let mut d = MotionDetector::new(ConditionerConfig {
            calibration_samples: 20,
            ..config(10.0)
        });
        for i in 0..20 {
            assert!(d.evaluate(i as f64 * 0.02, 1.0, true).calibrating);
        }
        let v = d.evaluate(0.4, 1.0, true);
        assert!(!v.calibrating);
        assert!(d.is_calibrated());
    }

    #[test]
    fn threshold_learned_from_noisy_baseline() {
        let mut d = MotionDetector::new(config(1.0));
        for i in 0..100 {
            // variance oscillates between 10 and 14
            let var = if i % 2 == 0 { 10.0 } else { 14.0 };
            d.evaluate(i as f64 * 0.02, var, true);
        }
        let baseline = d.baseline().unwrap();
        assert!((baseline.mean - 12.0).abs() < 0.1);
        // 12 + 3 * 2
        assert!((d.threshold() - 18.0).abs() < 0.5);
    }

    #[test]
    fn floor_applies_to_quiet_baseline() {
        let mut d = MotionDetector::new(config(0.5));
        for i in 0..60 {
            d.evaluate(i as f64 * 0.02, 0.0, true);
        }
        assert_eq!(d.threshold(), 5.0);
        assert!(d.evaluate(1.3, 6.0, true).motion);
    }

    #[test]
    fn motion_does_not_raise_threshold() {
        let mut d = MotionDetector::new(config(0.1));
        for i in 0..10 {
            d.evaluate(i as f64 * 0.02, 1.0, true);
        }
        let before = d.threshold();
        for i in 10..500 {
            assert!(d.evaluate(i as f64 * 0.02, 100.0, true).motion);
        }
        assert_eq!(d.threshold(), before);
    }

    #[test]
    fn baseline_drift_follows_non_motion_readings() {
        let mut d = MotionDetector::new(ConditionerConfig {
            variance_threshold: 0.0,
            ..config(0.1)
        });
        for i in 0..10 {
            let var = if i % 2 == 0 { 0.5 } else { 1.5 };
            d.evaluate(i as f64 * 0.02, var, true);
        }
        let early = d.baseline().unwrap().mean;
        // slow upward drift stays under the threshold and is absorbed
        let mut var = 1.0;
        for i in 10..400 {
            var += 0.001;
            d.evaluate(i as f64 * 0.02, var, true);
        }
        assert!(d.baseline().unwrap().mean > early + 0.1);
    }

    #[test]
    fn confidence_is_clamped() {
        assert_eq!(motion_confidence(0.0, 5.0), 0.0);
        assert!((motion_confidence(5.0, 5.0) - 0.5).abs() < 1e-12);
        assert_eq!(motion_confidence(100.0, 5.0), 1.0);
        assert_eq!(motion_confidence(1.0, 0.0), 1.0);
    }
}
