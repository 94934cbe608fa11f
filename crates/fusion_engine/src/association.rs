//! Greedy nearest-center association of camera detections to tracks.

use contracts::{CameraDetection, EngineConfig, TrackState};

use crate::track::Track;

/// Outcome for one detection, in the order detections were considered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Assignment {
    pub detection: usize,
    /// Matched track id, `None` spawns a new track
    pub track: Option<u64>,
}

/// Gate for a candidate track, `None` if the track cannot take camera detections
fn gate_px(state: TrackState, config: &EngineConfig) -> Option<f64> {
    match state {
        TrackState::CameraActive | TrackState::HandoffPending => Some(config.association_gate_px),
        TrackState::WifiActive => Some(config.reentry_gate_px),
        TrackState::Lost => None,
    }
}

/// Cost of matching `detection` to `track`, `None` when outside the gate.
///
/// Tracks without any bbox (WiFi-born) are always plausible but rank behind
/// every in-gate track with a bbox.
fn cost(track: &Track, detection: &CameraDetection, config: &EngineConfig) -> Option<f64> {
    let gate = gate_px(track.state(), config)?;
    if !track.accepts_class(&detection.class_name) {
        return None;
    }
    match track.last_bbox() {
        Some(bbox) => {
            let d = bbox.center_distance(&detection.bbox);
            (d < gate).then_some(d)
        }
        None => Some(config.reentry_gate_px.max(gate)),
    }
}

/// Match detections to tracks.
///
/// Detections are taken in descending confidence; each takes the cheapest
/// still-unmatched track, so a track is matched at most once per frame.
pub fn associate<'a>(
    tracks: impl Iterator<Item = &'a Track> + Clone,
    detections: &[CameraDetection],
    config: &EngineConfig,
) -> Vec<Assignment> {
    let mut order: Vec<usize> = (0..detections.len()).collect();
    order.sort_by(|&a, &b| {
        detections[b]
            .confidence
            .total_cmp(&detections[a].confidence)
    });

    let mut taken: Vec<u64> = Vec::with_capacity(detections.len());
    order
        .into_iter()
        .map(|index| {
            let detection = &detections[index];
            let best = tracks
                .clone()
                .filter(|t| !taken.contains(&t.id()))
                .filter_map(|t| cost(t, detection, config).map(|c| (c, t.id())))
                .min_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)))
                .map(|(_, id)| id);
            if let Some(id) = best {
                taken.push(id);
            }
            Assignment {
                detection: index,
                track: best,
            }
        })
        .collect()
}
