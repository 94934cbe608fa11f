//! Activity classification over full CSI windows.
//!
//! The model is an external collaborator; anything implementing
//! [`ActivityClassifier`] can be plugged into the CSI conditioner. A failing
//! classifier only costs the label, never the sample.

use crate::ClassifierError;

/// View of a full CSI window handed to a classifier
#[derive(Debug)]
pub struct ClassifierInput<'a> {
    /// Amplitude rows, oldest first
    pub rows: Vec<&'a [f64]>,
    /// Aggregate window variance
    pub variance: f64,
    /// Current motion threshold
    pub threshold: f64,
}

pub trait ActivityClassifier: Send {
    fn name(&self) -> &str;

    fn classify(&mut self, input: &ClassifierInput<'_>) -> Result<String, ClassifierError>;
}

/// Coarse labels from the variance / threshold ratio, no model required.
#[derive(Debug, Clone)]
pub struct VarianceBandClassifier {
    /// Ratio at or above which the label is `RUNNING`
    pub running_ratio: f64,
}

impl Default for VarianceBandClassifier {
    fn default() -> Self {
        Self { running_ratio: 3.0 }
    }
}

impl ActivityClassifier for VarianceBandClassifier {
    fn name(&self) -> &str {
        "variance_band"
    }

    fn classify(&mut self, input: &ClassifierInput<'_>) -> Result<String, ClassifierError> {
        if input.rows.is_empty() {
            return Err(ClassifierError::Failed("empty window".into()));
        }
        if input.threshold <= 0.0 {
            return Err(ClassifierError::Unavailable("threshold not established".into()));
        }
        let ratio = input.variance / input.threshold;
        let label = if ratio < 1.0 {
            "STILL"
        } else if ratio < self.running_ratio {
            "WALKING"
        } else {
            "RUNNING"
        };
        Ok(label.to_string())
    }
}
