//! SensorEvent - ingestion output, fusion engine input
//!
//! Immutable, timestamped observations from one producer stream.

use serde::{Deserialize, Serialize};

use crate::SourceId;

/// Number of amplitude values in one CSI vector.
pub const CSI_SUBCARRIERS: usize = 64;

/// Number of keypoints in one pose estimate.
pub const POSE_KEYPOINTS: usize = 17;

/// Sensing modality that produced an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// External vision pipeline (object detection + pose)
    Camera,
    /// Signal strength samples (ESP8266)
    WifiRssi,
    /// Channel state information (ESP32)
    WifiCsi,
    /// Monitor-mode packet capture forwarder
    WifiMonitor,
}

impl SourceKind {
    pub const ALL: [SourceKind; 4] = [
        SourceKind::Camera,
        SourceKind::WifiRssi,
        SourceKind::WifiCsi,
        SourceKind::WifiMonitor,
    ];

    /// Whether this modality carries WiFi motion rather than detections
    pub fn is_wifi(self) -> bool {
        !matches!(self, SourceKind::Camera)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SourceKind::Camera => "camera",
            SourceKind::WifiRssi => "wifi_rssi",
            SourceKind::WifiCsi => "wifi_csi",
            SourceKind::WifiMonitor => "wifi_monitor",
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One observation entering the fusion engine.
///
/// `timestamp` is capture time in seconds on the process monotonic clock
/// (see [`crate::MonotonicClock`]) and strictly increases per `source_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorEvent {
    pub source_id: SourceId,
    pub source: SourceKind,
    pub timestamp: f64,
    pub payload: EventPayload,
}

impl SensorEvent {
    pub fn camera(source_id: impl Into<SourceId>, timestamp: f64, frame: CameraFrame) -> Self {
        Self {
            source_id: source_id.into(),
            source: SourceKind::Camera,
            timestamp,
            payload: EventPayload::Camera(frame),
        }
    }

    pub fn signal(
        source_id: impl Into<SourceId>,
        source: SourceKind,
        timestamp: f64,
        sample: SignalSample,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            source,
            timestamp,
            payload: EventPayload::Signal(sample),
        }
    }

    /// True for a conditioned WiFi sample that reports motion
    pub fn is_motion(&self) -> bool {
        matches!(&self.payload, EventPayload::Signal(s) if s.motion)
    }
}

/// Event payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    /// All detections of one camera frame
    Camera(CameraFrame),
    /// One conditioned WiFi sample
    Signal(SignalSample),
}

/// Detections produced for one camera frame
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CameraFrame {
    pub detections: Vec<CameraDetection>,
}

/// A single object detection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraDetection {
    pub bbox: BoundingBox,
    pub class_name: String,
    /// Detector confidence in [0, 1]
    pub confidence: f64,
    /// Pose keypoints (x, y) in pixels, [`POSE_KEYPOINTS`] entries when present
    #[serde(default)]
    pub keypoints: Option<Vec<[f64; 2]>>,
}

/// Axis-aligned box in pixel coordinates, serialized as `[x0, y0, x1, y1]`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 4]", into = "[f64; 4]")]
pub struct BoundingBox {
    pub x0: f64,
    pub y0: f64,
    pub x1: f64,
    pub y1: f64,
}

impl BoundingBox {
    pub fn new(x0: f64, y0: f64, x1: f64, y1: f64) -> Self {
        Self { x0, y0, x1, y1 }
    }

    pub fn center(&self) -> [f64; 2] {
        [(self.x0 + self.x1) / 2.0, (self.y0 + self.y1) / 2.0]
    }

    /// Euclidean distance between the centers of two boxes
    pub fn center_distance(&self, other: &BoundingBox) -> f64 {
        let [ax, ay] = self.center();
        let [bx, by] = other.center();
        ((ax - bx).powi(2) + (ay - by).powi(2)).sqrt()
    }

    pub fn is_well_formed(&self) -> bool {
        [self.x0, self.y0, self.x1, self.y1]
            .iter()
            .all(|v| v.is_finite())
            && self.x1 >= self.x0
            && self.y1 >= self.y0
    }
}

impl From<[f64; 4]> for BoundingBox {
    fn from([x0, y0, x1, y1]: [f64; 4]) -> Self {
        Self { x0, y0, x1, y1 }
    }
}

impl From<BoundingBox> for [f64; 4] {
    fn from(b: BoundingBox) -> Self {
        [b.x0, b.y0, b.x1, b.y1]
    }
}

/// Conditioned WiFi sample
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SignalSample {
    /// Raw RSSI in dBm (RSSI and monitor sources)
    pub rssi: Option<i8>,
    /// Raw amplitude vector (CSI source)
    pub csi: Option<Vec<f64>>,
    /// Rolling window variance
    pub variance: f64,
    /// Motion threshold the variance was compared against
    pub threshold: f64,
    pub motion: bool,
    /// Motion confidence in [0, 1]
    pub confidence: f64,
    /// Still learning the baseline; `motion` is always false while set
    pub calibrating: bool,
    /// Classifier label, absent when no classifier ran or it failed
    pub activity: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bbox_serializes_as_array() {
        let bbox = BoundingBox::new(10.0, 20.0, 110.0, 220.0);
        let json = serde_json::to_string(&bbox).unwrap();
        assert_eq!(json, "[10.0,20.0,110.0,220.0]");
        assert_eq!(bbox.center(), [60.0, 120.0]);
    }

    #[test]
    fn bbox_rejects_inverted_corners() {
        assert!(BoundingBox::new(0.0, 0.0, 5.0, 5.0).is_well_formed());
        assert!(!BoundingBox::new(5.0, 0.0, 0.0, 5.0).is_well_formed());
        assert!(!BoundingBox::new(0.0, f64::NAN, 5.0, 5.0).is_well_formed());
    }

    #[test]
    fn motion_flag_only_on_signal_events() {
        let sample = SignalSample {
            motion: true,
            ..Default::default()
        };
        let ev = SensorEvent::signal("esp8266", SourceKind::WifiRssi, 1.0, sample);
        assert!(ev.is_motion());

        let cam = SensorEvent::camera("cam0", 1.0, CameraFrame::default());
        assert!(!cam.is_motion());
        assert!(!SourceKind::Camera.is_wifi());
    }
}
