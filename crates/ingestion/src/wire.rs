//! Wire formats of the producer boundaries.
//!
//! | source       | payload                                        |
//! |--------------|------------------------------------------------|
//! | wifi_rssi    | `RSS:<signed-int>`                             |
//! | wifi_monitor | `WIFI:<rssi>,<type>,<subtype>`                 |
//! | wifi_csi     | `timestamp,amp0,...,amp63` (exactly 65 fields) |
//! | camera       | JSON frame, see [`parse_camera`]               |

use contracts::{BoundingBox, CameraDetection, CameraFrame, CSI_SUBCARRIERS, POSE_KEYPOINTS};
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum WireError {
    #[error("payload is not valid UTF-8")]
    Utf8,

    #[error("expected prefix '{expected}'")]
    MissingPrefix { expected: &'static str },

    #[error("invalid {field}: '{value}'")]
    InvalidNumber { field: &'static str, value: String },

    #[error("expected {expected} fields, got {got}")]
    FieldCount { expected: usize, got: usize },

    #[error("invalid JSON: {0}")]
    Json(String),

    #[error("invalid detection #{index}: {message}")]
    InvalidDetection { index: usize, message: String },

    #[error("timestamp {got} not after previous {previous}")]
    StaleTimestamp { previous: f64, got: f64 },
}

/// Decoded monitor-mode capture record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorRecord {
    pub rssi: i32,
    pub frame_type: u8,
    pub subtype: u8,
}

/// Decoded CSI record
#[derive(Debug, Clone, PartialEq)]
pub struct CsiRecord {
    /// Producer-side timestamp
    pub timestamp: f64,
    pub amplitudes: Vec<f64>,
}

/// Decoded camera message
#[derive(Debug, Clone)]
pub struct CameraMessage {
    /// Producer-side capture timestamp, if sent
    pub timestamp: Option<f64>,
    pub frame: CameraFrame,
}

fn text(payload: &[u8]) -> Result<&str, WireError> {
    std::str::from_utf8(payload)
        .map(str::trim)
        .map_err(|_| WireError::Utf8)
}

fn number<T: std::str::FromStr>(field: &'static str, value: &str) -> Result<T, WireError> {
    value.trim().parse().map_err(|_| WireError::InvalidNumber {
        field,
        value: value.to_string(),
    })
}

/// `RSS:-50`
pub fn parse_rssi(payload: &[u8]) -> Result<i32, WireError> {
    let body = text(payload)?
        .strip_prefix("RSS:")
        .ok_or(WireError::MissingPrefix { expected: "RSS:" })?;
    number("rssi", body)
}

/// `WIFI:-61,0,8`
pub fn parse_monitor(payload: &[u8]) -> Result<MonitorRecord, WireError> {
    let body = text(payload)?
        .strip_prefix("WIFI:")
        .ok_or(WireError::MissingPrefix { expected: "WIFI:" })?;
    let fields: Vec<&str> = body.split(',').collect();
    if fields.len() != 3 {
        return Err(WireError::FieldCount {
            expected: 3,
            got: fields.len(),
        });
    }
    Ok(MonitorRecord {
        rssi: number("rssi", fields[0])?,
        frame_type: number("frame type", fields[1])?,
        subtype: number("frame subtype", fields[2])?,
    })
}

/// `timestamp,amp0,...,amp63`
pub fn parse_csi(payload: &[u8]) -> Result<CsiRecord, WireError> {
    let body = text(payload)?;
    let fields: Vec<&str> = body.split(',').collect();
    let expected = CSI_SUBCARRIERS + 1;
    if fields.len() != expected {
        return Err(WireError::FieldCount {
            expected,
            got: fields.len(),
        });
    }
    let timestamp: f64 = number("timestamp", fields[0])?;
    let amplitudes = fields[1..]
        .iter()
        .map(|f| number::<f64>("amplitude", f))
        .collect::<Result<Vec<_>, _>>()?;
    if !timestamp.is_finite() || amplitudes.iter().any(|a| !a.is_finite()) {
        return Err(WireError::InvalidNumber {
            field: "amplitude",
            value: "non-finite".into(),
        });
    }
    Ok(CsiRecord {
        timestamp,
        amplitudes,
    })
}

#[derive(Deserialize)]
struct WireFrame {
    #[serde(default)]
    timestamp: Option<f64>,
    #[serde(default)]
    detections: Vec<WireDetection>,
}

#[derive(Deserialize)]
struct WireDetection {
    bbox: [f64; 4],
    #[serde(alias = "class_name")]
    class: String,
    confidence: f64,
    #[serde(default)]
    keypoints: Option<Vec<[f64; 2]>>,
}

/// Camera frame JSON:
///
/// ```json
/// {"timestamp": 12.5,
///  "detections": [{"bbox": [x0, y0, x1, y1], "class": "person", "confidence": 0.91,
///                  "keypoints": [[x, y], ...]}]}
/// ```
///
/// Boxes must be ordered, confidence within [0, 1], and keypoints, when
/// present, exactly 17 pairs.
pub fn parse_camera(payload: &[u8]) -> Result<CameraMessage, WireError> {
    let wire: WireFrame =
        serde_json::from_slice(payload).map_err(|e| WireError::Json(e.to_string()))?;

    let mut detections = Vec::with_capacity(wire.detections.len());
    for (index, d) in wire.detections.into_iter().enumerate() {
        let bbox = BoundingBox::from(d.bbox);
        if !bbox.is_well_formed() {
            return Err(WireError::InvalidDetection {
                index,
                message: format!("bbox {:?} is not ordered", d.bbox),
            });
        }
        if !(0.0..=1.0).contains(&d.confidence) {
            return Err(WireError::InvalidDetection {
                index,
                message: format!("confidence {} outside [0, 1]", d.confidence),
            });
        }
        if let Some(kp) = &d.keypoints {
            if kp.len() != POSE_KEYPOINTS {
                return Err(WireError::InvalidDetection {
                    index,
                    message: format!("expected {POSE_KEYPOINTS} keypoints, got {}", kp.len()),
                });
            }
        }
        detections.push(CameraDetection {
            bbox,
            class_name: d.class,
            confidence: d.confidence,
            keypoints: d.keypoints,
        });
    }

    Ok(CameraMessage {
        timestamp: wire.timestamp.filter(|t| t.is_finite()),
        frame: CameraFrame { detections },
    })
}
