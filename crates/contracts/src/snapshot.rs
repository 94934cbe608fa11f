//! FusedSnapshot - fusion engine output
//!
//! Read-only copy of the track set and latest signal metrics, emitted once per tick.

use serde::{Deserialize, Serialize};

use crate::{BoundingBox, SignalSample, SourceId};

/// Which modality currently owns a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrackState {
    CameraActive,
    HandoffPending,
    WifiActive,
    Lost,
}

impl TrackState {
    pub fn as_str(self) -> &'static str {
        match self {
            TrackState::CameraActive => "CAMERA_ACTIVE",
            TrackState::HandoffPending => "HANDOFF_PENDING",
            TrackState::WifiActive => "WIFI_ACTIVE",
            TrackState::Lost => "LOST",
        }
    }

    /// Whether `self -> next` is an edge of the handoff state machine.
    ///
    /// Staying in the same state is allowed for every non-terminal state.
    pub fn can_transition_to(self, next: TrackState) -> bool {
        use TrackState::*;
        matches!(
            (self, next),
            (CameraActive, CameraActive | HandoffPending)
                | (HandoffPending, HandoffPending | CameraActive | WifiActive | Lost)
                | (WifiActive, WifiActive | CameraActive | Lost)
        )
    }

    /// Tracks that WiFi motion may be attributed to
    pub fn is_wifi_eligible(self) -> bool {
        matches!(self, TrackState::HandoffPending | TrackState::WifiActive)
    }
}

impl std::fmt::Display for TrackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse location of a tracked entity
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionHint {
    /// Bbox center in pixels
    Camera { center: [f64; 2] },
    /// 1-D distance proxy derived from signal strength, not a localization
    Signal { distance_proxy_m: f64 },
}

/// Per-track entry of a snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackSummary {
    pub id: u64,
    pub state: TrackState,
    pub class_name: Option<String>,
    pub confidence: f64,
    pub position: Option<PositionHint>,
    pub bbox: Option<BoundingBox>,
    pub keypoints: Option<Vec<[f64; 2]>>,
    pub out_of_frame: bool,
    pub last_camera_seen: Option<f64>,
    pub last_wifi_motion: Option<f64>,
    pub handoff_deadline: Option<f64>,
    pub activity: Option<String>,
    pub created_at: f64,
}

/// Latest sample of one WiFi modality
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModalityMetrics {
    pub source_id: SourceId,
    pub timestamp: f64,
    pub sample: SignalSample,
    /// No event for longer than the staleness limit
    pub stale: bool,
}

/// Latest camera frame summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraMetrics {
    pub source_id: SourceId,
    pub timestamp: f64,
    pub detections: usize,
    pub stale: bool,
}

/// Latest per-modality signal metrics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SignalMetrics {
    pub camera: Option<CameraMetrics>,
    pub rssi: Option<ModalityMetrics>,
    pub csi: Option<ModalityMetrics>,
    pub monitor: Option<ModalityMetrics>,
}

/// Cumulative engine counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineDiagnostics {
    pub events_processed: u64,
    pub out_of_order_dropped: u64,
    pub low_confidence_dropped: u64,
    pub refused_transitions: u64,
    pub tracks_created: u64,
    pub tracks_purged: u64,
    pub handoffs_started: u64,
    pub handoffs_completed: u64,
    pub reacquisitions: u64,
    pub tracks_lost: u64,
}

/// One tick of fused output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FusedSnapshot {
    /// Tick sequence number (monotonically increasing)
    pub tick_id: u64,
    pub timestamp: f64,
    /// Live tracks ordered by id
    pub tracks: Vec<TrackSummary>,
    pub signals: SignalMetrics,
    pub diagnostics: EngineDiagnostics,
    /// Set only on the final snapshot emitted at shutdown
    pub terminal: bool,
}

impl FusedSnapshot {
    /// Snapshot with no tracks and no signal metrics
    pub fn empty(tick_id: u64, timestamp: f64) -> Self {
        Self {
            tick_id,
            timestamp,
            tracks: Vec::new(),
            signals: SignalMetrics::default(),
            diagnostics: EngineDiagnostics::default(),
            terminal: false,
        }
    }

    pub fn track(&self, id: u64) -> Option<&TrackSummary> {
        self.tracks
            .binary_search_by_key(&id, |t| t.id)
            .ok()
            .map(|idx| &self.tracks[idx])
    }

    pub fn count_in(&self, state: TrackState) -> usize {
        self.tracks.iter().filter(|t| t.state == state).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lost_is_terminal() {
        for next in [
            TrackState::CameraActive,
            TrackState::HandoffPending,
            TrackState::WifiActive,
            TrackState::Lost,
        ] {
            assert!(!TrackState::Lost.can_transition_to(next));
        }
    }

    #[test]
    fn camera_active_cannot_skip_handoff() {
        assert!(!TrackState::CameraActive.can_transition_to(TrackState::WifiActive));
        assert!(!TrackState::CameraActive.can_transition_to(TrackState::Lost));
        assert!(TrackState::HandoffPending.can_transition_to(TrackState::WifiActive));
        assert!(TrackState::WifiActive.can_transition_to(TrackState::CameraActive));
    }

    #[test]
    fn state_serializes_upper_case() {
        let json = serde_json::to_string(&TrackState::HandoffPending).unwrap();
        assert_eq!(json, "\"HANDOFF_PENDING\"");
    }
}
