//! # Conditioning
//!
//! Per-modality signal conditioners: raw WiFi samples in, motion verdicts out.
//!
//! - [`RssiConditioner`]: scalar RSSI (and monitor-mode capture) variance
//! - [`CsiConditioner`]: 64-subcarrier amplitude variance, optional activity label
//!
//! Each conditioner owns its window exclusively and is driven by a single
//! producer task; nothing here is shared or locked.

mod classifier;
mod csi;
mod detector;
mod error;
mod rssi;
mod window;

pub use classifier::{ActivityClassifier, ClassifierInput, VarianceBandClassifier};
pub use csi::{CsiConditioner, CsiReading};
pub use detector::{motion_confidence, Baseline, MotionDetector, Verdict, MIN_SAMPLES};
pub use error::{ClassifierError, ConditionError};
pub use rssi::{RssiConditioner, SignalReading, RSSI_MAX_DBM, RSSI_MIN_DBM};
pub use window::{SignalWindow, VectorWindow};
