use contracts::{CsiConfig, SignalSample, CSI_SUBCARRIERS};
use tracing::debug;

use crate::classifier::{ActivityClassifier, ClassifierInput};
use crate::detector::{motion_confidence, MotionDetector, MIN_SAMPLES};
use crate::{ConditionError, SignalReading, VectorWindow};

/// Output of one CSI conditioning step
#[derive(Debug, Clone, PartialEq)]
pub struct CsiReading {
    pub reading: SignalReading,
    /// The amplitudes that were ingested
    pub raw: Vec<f64>,
    /// Latest classifier label, `None` without a working classifier
    pub activity: Option<String>,
}

impl CsiReading {
    pub fn to_sample(&self) -> SignalSample {
        SignalSample {
            rssi: None,
            csi: Some(self.raw.clone()),
            variance: self.reading.variance,
            threshold: self.reading.threshold,
            motion: self.reading.motion,
            confidence: self.reading.confidence,
            calibrating: self.reading.calibrating,
            activity: self.activity.clone(),
        }
    }
}

/// CSI amplitude conditioner.
///
/// Window variance is the mean of per-subcarrier variances. Calibration and
/// threshold adaptation follow the RSSI conditioner.
pub struct CsiConditioner {
    window: VectorWindow,
    detector: MotionDetector,
    classifier: Option<Box<dyn ActivityClassifier>>,
    stride: usize,
    since_classified: usize,
    activity: Option<String>,
    classifier_failures: u64,
}

impl std::fmt::Debug for CsiConditioner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CsiConditioner")
            .field("window", &self.window)
            .field("threshold", &self.detector.threshold())
            .field("classifier", &self.classifier.as_ref().map(|c| c.name().to_string()))
            .finish()
    }
}

impl CsiConditioner {
    pub fn new(config: &CsiConfig) -> Self {
        Self {
            window: VectorWindow::new(config.window_size, CSI_SUBCARRIERS),
            detector: MotionDetector::new(config.window()),
            classifier: None,
            stride: config.classifier_stride.max(1),
            since_classified: 0,
            activity: None,
            classifier_failures: 0,
        }
    }

    pub fn with_classifier(mut self, classifier: Box<dyn ActivityClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn ingest(
        &mut self,
        timestamp: f64,
        amplitudes: &[f64],
    ) -> Result<CsiReading, ConditionError> {
        if amplitudes.len() != CSI_SUBCARRIERS {
            return Err(ConditionError::Malformed(format!(
                "expected {CSI_SUBCARRIERS} subcarriers, got {}",
                amplitudes.len()
            )));
        }
        if let Some(idx) = amplitudes.iter().position(|v| !v.is_finite()) {
            return Err(ConditionError::Malformed(format!(
                "non-finite amplitude at subcarrier {idx}"
            )));
        }

        self.window.push(amplitudes.to_vec());
        let samples = self.window.len();
        let ready = samples >= MIN_SAMPLES;
        let variance = if ready {
            self.window.aggregate_variance()
        } else {
            0.0
        };
        let verdict = self.detector.evaluate(timestamp, variance, ready);

        self.since_classified += 1;
        if self.window.is_full() && self.since_classified >= self.stride {
            self.since_classified = 0;
            self.classify(variance, verdict.threshold);
        }

        Ok(CsiReading {
            reading: SignalReading {
                variance,
                mean: 0.0,
                threshold: verdict.threshold,
                motion: verdict.motion,
                calibrating: verdict.calibrating,
                confidence: if verdict.calibrating {
                    0.0
                } else {
                    motion_confidence(variance, verdict.threshold)
                },
                samples,
            },
            raw: amplitudes.to_vec(),
            activity: self.activity.clone(),
        })
    }

    fn classify(&mut self, variance: f64, threshold: f64) {
        let Some(classifier) = self.classifier.as_mut() else {
            return;
        };
        let input = ClassifierInput {
            rows: self.window.rows(),
            variance,
            threshold,
        };
        match classifier.classify(&input) {
            Ok(label) => self.activity = Some(label),
            Err(e) => {
                self.classifier_failures += 1;
                self.activity = None;
                debug!(classifier = classifier.name(), error = %e, "activity classification failed");
            }
        }
    }

    pub fn classifier_failures(&self) -> u64 {
        self.classifier_failures
    }

    pub fn is_calibrated(&self) -> bool {
        self.detector.is_calibrated()
    }
}
