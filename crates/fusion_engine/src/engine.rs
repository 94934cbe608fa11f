//! Fusion engine: track association, handoff state machine and snapshots.

use std::collections::{BTreeMap, HashMap};

use contracts::{
    CameraFrame, CameraMetrics, EngineConfig, EngineDiagnostics, EventPayload, FusedSnapshot,
    ModalityMetrics, SensorEvent, SignalMetrics, SignalSample, SourceId, SourceKind, TrackState,
    TrackSummary,
};
use tracing::{debug, error, info, instrument, trace};

use crate::association::associate;
use crate::track::Track;

/// Single-owner fusion state. All mutation happens through `push` and `tick`.
#[derive(Debug)]
pub struct FusionEngine {
    config: EngineConfig,
    /// Live tracks keyed (and therefore ordered) by id
    tracks: BTreeMap<u64, Track>,
    /// Ids are never reused
    next_id: u64,
    /// Last accepted timestamp per source stream
    last_seen: HashMap<SourceId, f64>,
    signals: SignalMetrics,
    diagnostics: EngineDiagnostics,
    tick_id: u64,
    last_tick: Option<f64>,
}

impl FusionEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            tracks: BTreeMap::new(),
            next_id: 1,
            last_seen: HashMap::new(),
            signals: SignalMetrics::default(),
            diagnostics: EngineDiagnostics::default(),
            tick_id: 0,
            last_tick: None,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Apply one event. Never fails; unusable events are counted and dropped.
    #[instrument(
        level = "trace",
        name = "fusion_engine_push",
        skip(self, event),
        fields(source_id = %event.source_id, timestamp = event.timestamp)
    )]
    pub fn push(&mut self, event: SensorEvent) {
        let SensorEvent {
            source_id,
            source,
            timestamp,
            payload,
        } = event;

        if let Some(&previous) = self.last_seen.get(&source_id) {
            if timestamp <= previous {
                self.diagnostics.out_of_order_dropped += 1;
                metrics::counter!(
                    "echosense_events_out_of_order_total",
                    "source_id" => source_id.to_string()
                )
                .increment(1);
                debug!(
                    source_id = %source_id,
                    previous,
                    timestamp,
                    "out-of-order event dropped"
                );
                return;
            }
        }
        self.last_seen.insert(source_id.clone(), timestamp);
        self.diagnostics.events_processed += 1;

        match payload {
            EventPayload::Camera(frame) => {
                self.record_camera(&source_id, timestamp, &frame);
                self.apply_frame(timestamp, frame);
            }
            EventPayload::Signal(sample) => {
                if sample.motion {
                    self.apply_motion(timestamp, &sample);
                }
                self.record_signal(source, source_id, timestamp, sample);
            }
        }
    }

    /// Time-based transitions, purge, snapshot
    #[instrument(level = "trace", name = "fusion_engine_tick", skip(self))]
    pub fn tick(&mut self, now: f64) -> FusedSnapshot {
        self.advance(now, false)
    }

    /// Final snapshot at shutdown, flagged terminal
    pub fn finish(&mut self, now: f64) -> FusedSnapshot {
        info!(ticks = self.tick_id, tracks = self.tracks.len(), "fusion engine finishing");
        self.advance(now, true)
    }

    pub fn track(&self, id: u64) -> Option<TrackSummary> {
        self.tracks.get(&id).map(Track::summary)
    }

    pub fn tracks(&self) -> Vec<TrackSummary> {
        self.tracks.values().map(Track::summary).collect()
    }

    pub fn diagnostics(&self) -> EngineDiagnostics {
        self.diagnostics
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_id
    }

    fn advance(&mut self, now: f64, terminal: bool) -> FusedSnapshot {
        // tick time never runs backwards
        let now = self.last_tick.map_or(now, |t| t.max(now));
        self.last_tick = Some(now);
        self.tick_id += 1;

        let ids: Vec<u64> = self.tracks.keys().copied().collect();
        for id in ids {
            self.expire(id, now);
        }
        self.purge(now);

        FusedSnapshot {
            tick_id: self.tick_id,
            timestamp: now,
            tracks: self.tracks(),
            signals: self.signals_at(now),
            diagnostics: self.diagnostics,
            terminal,
        }
    }

    /// Time-driven transitions for one track; may advance several states at once
    fn expire(&mut self, id: u64, now: f64) {
        let tick_interval = self.config.tick_interval_s();
        let handoff_delay = self.config.handoff_delay_s();
        let timeout = self.config.tracking_timeout_s;

        let Some(track) = self.tracks.get(&id) else {
            return;
        };

        if track.state == TrackState::CameraActive {
            let last_seen = track.last_camera_seen.unwrap_or(track.created_at);
            if now - last_seen > tick_interval
                && self.apply_transition(id, TrackState::HandoffPending, now)
            {
                self.diagnostics.handoffs_started += 1;
                if let Some(t) = self.tracks.get_mut(&id) {
                    t.handoff_deadline = Some(last_seen + handoff_delay);
                }
            }
        }

        let Some(track) = self.tracks.get(&id) else {
            return;
        };
        if track.state == TrackState::HandoffPending {
            if track.has_motion_within_handoff() {
                self.complete_handoff(id, now);
            } else if track.handoff_deadline.is_none_or(|deadline| now > deadline) {
                self.lose(id, now);
            }
        }

        let Some(track) = self.tracks.get(&id) else {
            return;
        };
        if track.state == TrackState::WifiActive {
            let last_motion = track.last_wifi_motion.unwrap_or(track.created_at);
            if now - last_motion > timeout {
                self.lose(id, now);
            }
        }
    }

    fn purge(&mut self, now: f64) {
        let grace = self.config.lost_grace_s;
        let before = self.tracks.len();
        self.tracks.retain(|id, t| {
            let keep = t.lost_at.is_none_or(|lost_at| now - lost_at <= grace);
            if !keep {
                debug!(track_id = id, "lost track purged");
            }
            keep
        });
        let purged = (before - self.tracks.len()) as u64;
        self.diagnostics.tracks_purged += purged;
    }

    fn apply_frame(&mut self, timestamp: f64, frame: CameraFrame) {
        let min_confidence = self.config.min_confidence;
        let (detections, rejected): (Vec<_>, Vec<_>) = frame
            .detections
            .into_iter()
            .partition(|d| d.confidence >= min_confidence);
        self.diagnostics.low_confidence_dropped += rejected.len() as u64;

        let assignments = associate(self.tracks.values(), &detections, &self.config);
        for assignment in assignments {
            let detection = &detections[assignment.detection];
            match assignment.track {
                Some(id) => {
                    let from = self.tracks.get(&id).map(|t| t.state);
                    if from != Some(TrackState::CameraActive)
                        && self.apply_transition(id, TrackState::CameraActive, timestamp)
                        && from == Some(TrackState::WifiActive)
                    {
                        self.diagnostics.reacquisitions += 1;
                        info!(track_id = id, "track re-acquired by camera");
                    }
                    if let Some(track) = self.tracks.get_mut(&id) {
                        track.observe_detection(detection, timestamp);
                    }
                }
                None => {
                    let id = self.allocate_id();
                    let track = Track::from_detection(id, detection, timestamp);
                    debug!(track_id = id, class = %detection.class_name, "camera track created");
                    self.insert(track);
                }
            }
        }
    }

    fn apply_motion(&mut self, timestamp: f64, sample: &SignalSample) {
        // camera-owned tracks record motion for a later handoff
        for track in self.tracks.values_mut() {
            if track.state == TrackState::CameraActive {
                track.observe_motion(sample, timestamp);
            }
        }

        let eligible: Vec<u64> = self
            .tracks
            .values()
            .filter(|t| t.state.is_wifi_eligible())
            .map(|t| t.id)
            .collect();

        if eligible.is_empty() {
            let camera_owned = self
                .tracks
                .values()
                .any(|t| t.state == TrackState::CameraActive);
            if camera_owned && self.config.camera_priority {
                trace!("motion attributed to camera-owned track");
                return;
            }
            let id = self.allocate_id();
            debug!(track_id = id, "wifi track created");
            self.insert(Track::from_motion(id, sample, timestamp));
            return;
        }

        // single-occupant assumption: every eligible track takes the motion
        for id in eligible {
            let Some(track) = self.tracks.get_mut(&id) else {
                continue;
            };
            match track.state {
                TrackState::HandoffPending => {
                    let deadline = track.handoff_deadline.unwrap_or(f64::NEG_INFINITY);
                    let after_camera = track.last_camera_seen.is_none_or(|seen| timestamp > seen);
                    if timestamp <= deadline && after_camera {
                        track.observe_motion(sample, timestamp);
                        self.complete_handoff(id, timestamp);
                    }
                }
                TrackState::WifiActive => track.observe_motion(sample, timestamp),
                _ => {}
            }
        }
    }

    fn complete_handoff(&mut self, id: u64, now: f64) {
        if self.apply_transition(id, TrackState::WifiActive, now) {
            self.diagnostics.handoffs_completed += 1;
            info!(track_id = id, "handoff to wifi completed");
        }
    }

    fn lose(&mut self, id: u64, now: f64) {
        if self.apply_transition(id, TrackState::Lost, now) {
            self.diagnostics.tracks_lost += 1;
            info!(track_id = id, "track lost");
        }
    }

    /// Returns whether the transition happened; refusals are logged and counted.
    fn apply_transition(&mut self, id: u64, next: TrackState, now: f64) -> bool {
        let Some(track) = self.tracks.get_mut(&id) else {
            return false;
        };
        match track.transition(next, now) {
            Ok(from) => {
                if from != next {
                    metrics::counter!(
                        "echosense_track_transitions_total",
                        "from" => from.as_str(),
                        "to" => next.as_str()
                    )
                    .increment(1);
                    debug!(track_id = id, from = %from, to = %next, "track transition");
                }
                true
            }
            Err(e) => {
                self.diagnostics.refused_transitions += 1;
                metrics::counter!("echosense_refused_transitions_total").increment(1);
                error!(track_id = id, error = %e, "refused track transition");
                false
            }
        }
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn insert(&mut self, track: Track) {
        self.diagnostics.tracks_created += 1;
        metrics::counter!("echosense_tracks_created_total", "state" => track.state.as_str())
            .increment(1);
        self.tracks.insert(track.id, track);
    }

    fn record_camera(&mut self, source_id: &SourceId, timestamp: f64, frame: &CameraFrame) {
        let newer = self
            .signals
            .camera
            .as_ref()
            .is_none_or(|m| timestamp >= m.timestamp);
        if newer {
            self.signals.camera = Some(CameraMetrics {
                source_id: source_id.clone(),
                timestamp,
                detections: frame.detections.len(),
                stale: false,
            });
        }
    }

    fn record_signal(
        &mut self,
        kind: SourceKind,
        source_id: SourceId,
        timestamp: f64,
        sample: SignalSample,
    ) {
        let slot = match kind {
            SourceKind::WifiRssi => &mut self.signals.rssi,
            SourceKind::WifiCsi => &mut self.signals.csi,
            SourceKind::WifiMonitor => &mut self.signals.monitor,
            SourceKind::Camera => return,
        };
        if slot.as_ref().is_none_or(|m| timestamp >= m.timestamp) {
            *slot = Some(ModalityMetrics {
                source_id,
                timestamp,
                sample,
                stale: false,
            });
        }
    }

    fn signals_at(&self, now: f64) -> SignalMetrics {
        let stale_after = self.config.stale_after_s;
        let mut signals = self.signals.clone();
        if let Some(m) = signals.camera.as_mut() {
            m.stale = now - m.timestamp > stale_after;
        }
        for m in [&mut signals.rssi, &mut signals.csi, &mut signals.monitor]
            .into_iter()
            .flatten()
        {
            m.stale = now - m.timestamp > stale_after;
        }
        signals
    }
}
