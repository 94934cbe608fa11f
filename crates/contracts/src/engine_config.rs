//! Engine and conditioner tuning shared across crates.

use serde::{Deserialize, Serialize};
use validator::Validate;

/// Fusion engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct EngineConfig {
    /// Tick cadence in milliseconds
    #[validate(range(min = 1, max = 10_000))]
    pub tick_interval_ms: u64,

    /// Grace period after the last camera detection before a track is lost,
    /// unless WiFi motion claims it first
    #[validate(range(max = 60_000))]
    pub handoff_delay_ms: u64,

    /// Seconds without WiFi motion before a WiFi-owned track is lost
    #[validate(range(exclusive_min = 0.0))]
    pub tracking_timeout_s: f64,

    /// Seconds a lost track stays in snapshots before it is purged
    #[validate(range(min = 0.0))]
    pub lost_grace_s: f64,

    /// Max bbox center distance (px) to keep a camera-owned track
    #[validate(range(exclusive_min = 0.0))]
    pub association_gate_px: f64,

    /// Max bbox center distance (px) to re-acquire a WiFi-owned track
    #[validate(range(exclusive_min = 0.0))]
    pub reentry_gate_px: f64,

    /// Detections below this confidence are ignored
    #[validate(range(min = 0.0, max = 1.0))]
    pub min_confidence: f64,

    /// Attribute WiFi motion to a camera-owned track instead of spawning a WiFi-only one
    pub camera_priority: bool,

    /// Seconds without events before a modality is reported stale
    #[validate(range(exclusive_min = 0.0))]
    pub stale_after_s: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 100,
            handoff_delay_ms: 500,
            tracking_timeout_s: 5.0,
            lost_grace_s: 2.0,
            association_gate_px: 100.0,
            reentry_gate_px: 250.0,
            min_confidence: 0.4,
            camera_priority: true,
            stale_after_s: 3.0,
        }
    }
}

impl EngineConfig {
    pub fn tick_interval_s(&self) -> f64 {
        self.tick_interval_ms as f64 / 1000.0
    }

    pub fn handoff_delay_s(&self) -> f64 {
        self.handoff_delay_ms as f64 / 1000.0
    }
}

/// Sliding-window variance conditioner configuration (RSSI and monitor sources)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ConditionerConfig {
    /// Window capacity in samples
    #[validate(range(min = 5, max = 100_000))]
    pub window_size: usize,

    /// Seconds of sample time spent learning the baseline
    #[validate(range(min = 0.0))]
    pub calibration_s: f64,

    /// Calibration also ends after this many samples, whichever comes first
    #[validate(range(min = 1))]
    pub calibration_samples: usize,

    /// Threshold = baseline mean + k_sigma * baseline stddev
    #[validate(range(min = 0.0))]
    pub k_sigma: f64,

    /// Exponential decay applied to the baseline and threshold per sample
    #[validate(range(exclusive_min = 0.0, max = 1.0))]
    pub decay_rate: f64,

    /// Floor for the adaptive threshold
    #[validate(range(min = 0.0))]
    pub variance_threshold: f64,
}

impl ConditionerConfig {
    pub fn rssi() -> Self {
        Self {
            window_size: 50,
            calibration_s: 10.0,
            calibration_samples: 200,
            k_sigma: 3.0,
            decay_rate: 0.01,
            variance_threshold: 5.0,
        }
    }

    pub fn monitor() -> Self {
        Self {
            window_size: 200,
            calibration_samples: 500,
            variance_threshold: 10.0,
            ..Self::rssi()
        }
    }
}

impl Default for ConditionerConfig {
    fn default() -> Self {
        Self::rssi()
    }
}

/// CSI conditioner configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct CsiConfig {
    #[validate(range(min = 5, max = 100_000))]
    pub window_size: usize,

    #[validate(range(min = 0.0))]
    pub calibration_s: f64,

    #[validate(range(min = 1))]
    pub calibration_samples: usize,

    #[validate(range(min = 0.0))]
    pub k_sigma: f64,

    #[validate(range(exclusive_min = 0.0, max = 1.0))]
    pub decay_rate: f64,

    #[validate(range(min = 0.0))]
    pub variance_threshold: f64,

    /// Forward full windows to the activity classifier
    pub use_classifier: bool,

    /// Classify every N samples once the window is full
    #[validate(range(min = 1))]
    pub classifier_stride: usize,
}

impl Default for CsiConfig {
    fn default() -> Self {
        Self {
            window_size: 100,
            calibration_s: 10.0,
            calibration_samples: 200,
            k_sigma: 3.0,
            decay_rate: 0.01,
            variance_threshold: 0.3,
            use_classifier: true,
            classifier_stride: 10,
        }
    }
}

impl CsiConfig {
    /// Windowing parameters shared with the scalar conditioner
    pub fn window(&self) -> ConditionerConfig {
        ConditionerConfig {
            window_size: self.window_size,
            calibration_s: self.calibration_s,
            calibration_samples: self.calibration_samples,
            k_sigma: self.k_sigma,
            decay_rate: self.decay_rate,
            variance_threshold: self.variance_threshold,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_pass_validation() {
        assert!(EngineConfig::default().validate().is_ok());
        assert!(ConditionerConfig::rssi().validate().is_ok());
        assert!(ConditionerConfig::monitor().validate().is_ok());
        assert!(CsiConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_decay_is_rejected() {
        let cfg = ConditionerConfig {
            decay_rate: 0.0,
            ..ConditionerConfig::rssi()
        };
        let err = cfg.validate().unwrap_err();
        assert!(err.field_errors().contains_key("decay_rate"));
    }

    #[test]
    fn partial_toml_style_override_keeps_defaults() {
        let cfg: EngineConfig = serde_json::from_str(r#"{"handoff_delay_ms": 750}"#).unwrap();
        assert_eq!(cfg.handoff_delay_ms, 750);
        assert_eq!(cfg.tick_interval_ms, 100);
        assert!((cfg.handoff_delay_s() - 0.75).abs() < 1e-12);
    }
}
