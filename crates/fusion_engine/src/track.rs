//! Track - the engine's notion of one physical entity.

use contracts::{
    BoundingBox, CameraDetection, ContractError, PositionHint, SignalSample, TrackState,
    TrackSummary,
};

/// RSSI at 1 m for the distance proxy (dBm)
const REFERENCE_RSSI_DBM: f64 = -40.0;
/// Indoor path-loss exponent
const PATH_LOSS_EXPONENT: f64 = 2.7;

/// Log-distance path-loss estimate. A coarse 1-D proxy, not a localization.
pub fn distance_proxy_m(rssi_dbm: i8) -> f64 {
    10f64.powf((REFERENCE_RSSI_DBM - rssi_dbm as f64) / (10.0 * PATH_LOSS_EXPONENT))
}

#[derive(Debug, Clone)]
pub struct Track {
    pub(crate) id: u64,
    pub(crate) state: TrackState,
    pub(crate) class_name: Option<String>,
    pub(crate) confidence: f64,
    pub(crate) position: Option<PositionHint>,
    /// Kept across WiFi intervals for re-acquisition gating
    pub(crate) last_bbox: Option<BoundingBox>,
    pub(crate) keypoints: Option<Vec<[f64; 2]>>,
    pub(crate) out_of_frame: bool,
    pub(crate) last_camera_seen: Option<f64>,
    pub(crate) last_wifi_motion: Option<f64>,
    pub(crate) handoff_deadline: Option<f64>,
    pub(crate) activity: Option<String>,
    pub(crate) created_at: f64,
    pub(crate) lost_at: Option<f64>,
}

impl Track {
    pub fn from_detection(id: u64, detection: &CameraDetection, timestamp: f64) -> Self {
        let mut track = Self::empty(id, TrackState::CameraActive, timestamp);
        track.class_name = Some(detection.class_name.clone());
        track.observe_detection(detection, timestamp);
        track
    }

    /// WiFi-born track: no class, no bbox
    pub fn from_motion(id: u64, sample: &SignalSample, timestamp: f64) -> Self {
        let mut track = Self::empty(id, TrackState::WifiActive, timestamp);
        track.out_of_frame = true;
        track.observe_motion(sample, timestamp);
        track
    }

    fn empty(id: u64, state: TrackState, created_at: f64) -> Self {
        Self {
            id,
            state,
            class_name: None,
            confidence: 0.0,
            position: None,
            last_bbox: None,
            keypoints: None,
            out_of_frame: false,
            last_camera_seen: None,
            last_wifi_motion: None,
            handoff_deadline: None,
            activity: None,
            created_at,
            lost_at: None,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> TrackState {
        self.state
    }

    pub fn last_bbox(&self) -> Option<&BoundingBox> {
        self.last_bbox.as_ref()
    }

    pub fn class_name(&self) -> Option<&str> {
        self.class_name.as_deref()
    }

    /// Class compatibility: equal, or the track has none yet
    pub fn accepts_class(&self, class_name: &str) -> bool {
        self.class_name.as_deref().is_none_or(|c| c == class_name)
    }

    /// Refresh camera-derived fields; state is left to the caller.
    pub fn observe_detection(&mut self, detection: &CameraDetection, timestamp: f64) {
        self.last_camera_seen = Some(self.last_camera_seen.map_or(timestamp, |t| t.max(timestamp)));
        if self.class_name.is_none() {
            self.class_name = Some(detection.class_name.clone());
        }
        self.confidence = detection.confidence;
        self.last_bbox = Some(detection.bbox);
        self.position = Some(PositionHint::Camera {
            center: detection.bbox.center(),
        });
        self.keypoints = detection.keypoints.clone();
    }

    /// Refresh WiFi-derived fields; state is left to the caller.
    pub fn observe_motion(&mut self, sample: &SignalSample, timestamp: f64) {
        self.last_wifi_motion = Some(self.last_wifi_motion.map_or(timestamp, |t| t.max(timestamp)));
        if sample.activity.is_some() {
            self.activity = sample.activity.clone();
        }
        if self.state != TrackState::CameraActive {
            if let Some(rssi) = sample.rssi {
                self.position = Some(PositionHint::Signal {
                    distance_proxy_m: distance_proxy_m(rssi),
                });
            }
            if self.last_bbox.is_none() {
                self.confidence = sample.confidence;
            }
        }
    }

    /// Motion observed after the camera lost the track and no later than the deadline
    pub fn has_motion_within_handoff(&self) -> bool {
        match (self.last_wifi_motion, self.handoff_deadline) {
            (Some(motion), Some(deadline)) => {
                motion <= deadline && self.last_camera_seen.is_none_or(|seen| motion > seen)
            }
            _ => false,
        }
    }

    /// Move to `next` if it is an edge of the handoff state machine.
    ///
    /// Bookkeeping tied to a state (handoff deadline, frame flag, loss time)
    /// is applied here so it cannot drift from the state.
    pub fn transition(&mut self, next: TrackState, now: f64) -> Result<TrackState, ContractError> {
        let from = self.state;
        if !from.can_transition_to(next) {
            return Err(ContractError::InvalidTransition {
                track_id: self.id,
                from,
                to: next,
            });
        }
        self.state = next;
        match next {
            TrackState::CameraActive => {
                self.out_of_frame = false;
                self.handoff_deadline = None;
            }
            TrackState::HandoffPending => {}
            TrackState::WifiActive => {
                self.out_of_frame = true;
                self.handoff_deadline = None;
            }
            TrackState::Lost => {
                self.handoff_deadline = None;
                self.lost_at = Some(now);
            }
        }
        Ok(from)
    }

    pub fn summary(&self) -> TrackSummary {
        TrackSummary {
            id: self.id,
            state: self.state,
            class_name: self.class_name.clone(),
            confidence: self.confidence,
            position: self.position,
            bbox: self.last_bbox,
            keypoints: self.keypoints.clone(),
            out_of_frame: self.out_of_frame,
            last_camera_seen: self.last_camera_seen,
            last_wifi_motion: self.last_wifi_motion,
            handoff_deadline: self.handoff_deadline,
            activity: self.activity.clone(),
            created_at: self.created_at,
        }
    }
}
