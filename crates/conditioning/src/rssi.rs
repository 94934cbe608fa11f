use contracts::{ConditionerConfig, SignalSample};
use tracing::trace;

use crate::detector::{motion_confidence, MotionDetector, MIN_SAMPLES};
use crate::{ConditionError, SignalWindow};

/// Valid RSSI range in dBm (fits `i8`)
pub const RSSI_MIN_DBM: i32 = -127;
pub const RSSI_MAX_DBM: i32 = 0;

/// Output of one conditioning step
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignalReading {
    pub variance: f64,
    pub mean: f64,
    pub threshold: f64,
    pub motion: bool,
    pub calibrating: bool,
    pub confidence: f64,
    /// Samples currently in the window
    pub samples: usize,
}

impl SignalReading {
    /// Event payload for a scalar RSSI reading
    pub fn to_sample(&self, rssi: i8) -> SignalSample {
        SignalSample {
            rssi: Some(rssi),
            csi: None,
            variance: self.variance,
            threshold: self.threshold,
            motion: self.motion,
            confidence: self.confidence,
            calibrating: self.calibrating,
            activity: None,
        }
    }
}

/// Sliding-window RSSI variance conditioner with auto-calibrated threshold.
///
/// Used for both the ESP8266 RSSI stream and the monitor-mode capture stream,
/// each with its own instance and window size.
#[derive(Debug)]
pub struct RssiConditioner {
    window: SignalWindow,
    detector: MotionDetector,
}

impl RssiConditioner {
    pub fn new(config: ConditionerConfig) -> Self {
        Self {
            window: SignalWindow::new(config.window_size),
            detector: MotionDetector::new(config),
        }
    }

    /// Append one sample and re-evaluate motion.
    ///
    /// Out-of-range samples are rejected and leave the window untouched.
    pub fn ingest(&mut self, timestamp: f64, sample: i32) -> Result<SignalReading, ConditionError> {
        if !(RSSI_MIN_DBM..=RSSI_MAX_DBM).contains(&sample) {
            return Err(ConditionError::OutOfRange {
                value: sample as i64,
                min: RSSI_MIN_DBM as i64,
                max: RSSI_MAX_DBM as i64,
            });
        }

        self.window.push(sample as f64);
        let samples = self.window.len();
        let ready = samples >= MIN_SAMPLES;
        let variance = if ready { self.window.variance() } else { 0.0 };
        let verdict = self.detector.evaluate(timestamp, variance, ready);

        trace!(sample, variance, threshold = verdict.threshold, motion = verdict.motion, "rssi sample");

        Ok(SignalReading {
            variance,
            mean: self.window.mean(),
            threshold: verdict.threshold,
            motion: verdict.motion,
            calibrating: verdict.calibrating,
            confidence: if verdict.calibrating {
                0.0
            } else {
                motion_confidence(variance, verdict.threshold)
            },
            samples,
        })
    }

    pub fn is_calibrated(&self) -> bool {
        self.detector.is_calibrated()
    }

    pub fn threshold(&self) -> f64 {
        self.detector.threshold()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    fn config() -> ConditionerConfig {
        ConditionerConfig {
            window_size: 50,
            calibration_s: 2.0,
            calibration_samples: 100_000,
            k_sigma: 3.0,
            decay_rate: 0.01,
            variance_threshold: 5.0,
        }
    }

    #[test]
    fn rejects_out_of_range() {
        let mut c = RssiConditioner::new(config());
        assert!(matches!(
            c.ingest(0.0, 5),
            Err(ConditionError::OutOfRange { value: 5, .. })
        ));
        assert!(c.ingest(0.0, -128).is_err());
        assert!(c.ingest(0.0, -127).is_ok());
        assert!(c.ingest(0.02, 0).is_ok());
    }

    #[test]
    fn variance_reported_from_fifth_sample() {
        let mut c = RssiConditioner::new(config());
        for (i, s) in [-50, -60, -50, -60].into_iter().enumerate() {
            let r = c.ingest(i as f64 * 0.02, s).unwrap();
            assert_eq!(r.variance, 0.0);
        }
        let r = c.ingest(0.08, -50).unwrap();
        assert_eq!(r.samples, 5);
        assert!(r.variance > 0.0);
    }

    #[test]
    fn calibration_masks_motion() {
        let mut c = RssiConditioner::new(config());
        // wild swings during the first 2s never count as motion
        for i in 0..100 {
            let s = if i % 2 == 0 { -30 } else { -90 };
            let r = c.ingest(i as f64 * 0.02, s).unwrap();
            assert!(r.calibrating);
            assert!(!r.motion);
            assert_eq!(r.confidence, 0.0);
        }
    }

    #[test]
    fn step_change_detected_within_one_window() {
        let mut c = RssiConditioner::new(config());
        let mut t = 0.0;
        // 200 quiet samples at 50Hz cover calibration and settle the window
        for _ in 0..200 {
            let r = c.ingest(t, -70).unwrap();
            assert!(!r.motion);
            t += 0.02;
        }
        assert!(c.is_calibrated());

        let mut first_motion = None;
        for i in 0..50 {
            let s = if i % 2 == 0 { -70 } else { -40 };
            let r = c.ingest(t, s).unwrap();
            if r.motion && first_motion.is_none() {
                first_motion = Some(i);
            }
            t += 0.02;
        }
        let idx = first_motion.expect("motion within one window");
        assert!(idx < 50);
    }

    #[test]
    fn default_tuning_detects_step_at_producer_rate() {
        // 50Hz, the ESP forwarder's send rate
        let mut c = RssiConditioner::new(ConditionerConfig::rssi());
        let mut t = 0.0;
        for _ in 0..200 {
            let r = c.ingest(t, -70).unwrap();
            assert!(!r.motion);
            t += 0.02;
        }

        let mut first_motion = None;
        for i in 0..50 {
            let s = if i % 2 == 0 { -70 } else { -40 };
            let r = c.ingest(t, s).unwrap();
            assert!(!r.calibrating);
            if r.motion && first_motion.is_none() {
                first_motion = Some(i);
            }
            t += 0.02;
        }
        assert!(c.is_calibrated());
        assert_eq!(first_motion, Some(1));
    }

    #[test]
    fn simulated_noise_stays_quiet() {
        let mut rng = rand::rng();
        let mut c = RssiConditioner::new(config());
        let mut false_positives = 0;
        for i in 0..1_000 {
            let s = -50 + rng.random_range(-2..=2);
            let r = c.ingest(i as f64 * 0.02, s).unwrap();
            if r.motion {
                false_positives += 1;
            }
        }
        assert_eq!(false_positives, 0);
    }

    #[test]
    fn reading_maps_to_event_sample() {
        let mut c = RssiConditioner::new(config());
        let r = c.ingest(0.0, -42).unwrap();
        let sample = r.to_sample(-42);
        assert_eq!(sample.rssi, Some(-42));
        assert!(sample.calibrating);
        assert!(sample.csi.is_none());
    }
}
