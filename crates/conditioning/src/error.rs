use thiserror::Error;

/// Per-sample conditioning failure. The sample is dropped, the stream continues.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConditionError {
    #[error("sample {value} outside valid range [{min}, {max}]")]
    OutOfRange { value: i64, min: i64, max: i64 },

    #[error("malformed sample: {0}")]
    Malformed(String),
}

/// Activity classifier failure, surfaced as "no label"
#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("classifier unavailable: {0}")]
    Unavailable(String),

    #[error("classification failed: {0}")]
    Failed(String),
}
