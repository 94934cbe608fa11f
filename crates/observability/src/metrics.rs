//! Fusion metrics recording and in-memory aggregation
//!
//! Recorded once per emitted `FusedSnapshot`.

use std::collections::HashMap;

use contracts::{FusedSnapshot, ModalityMetrics, TrackState};
use metrics::{counter, gauge, histogram};
use serde::Serialize;

const STATES: [TrackState; 4] = [
    TrackState::CameraActive,
    TrackState::HandoffPending,
    TrackState::WifiActive,
    TrackState::Lost,
];

/// Record gauges for one snapshot
///
/// ```ignore
/// while let Ok(snapshot) = rx.recv().await {
///     observability::record_snapshot_metrics(&snapshot);
/// }
/// ```
pub fn record_snapshot_metrics(snapshot: &FusedSnapshot) {
    counter!("echosense_snapshots_total").increment(1);
    gauge!("echosense_last_tick_id").set(snapshot.tick_id as f64);

    for state in STATES {
        gauge!("echosense_tracks", "state" => state.as_str())
            .set(snapshot.count_in(state) as f64);
    }

    let signals = &snapshot.signals;
    for (modality, metrics) in [
        ("wifi_rssi", &signals.rssi),
        ("wifi_csi", &signals.csi),
        ("wifi_monitor", &signals.monitor),
    ] {
        if let Some(m) = metrics {
            record_modality(modality, m);
        }
    }

    if let Some(camera) = &signals.camera {
        gauge!("echosense_camera_detections").set(camera.detections as f64);
        gauge!("echosense_signal_stale", "modality" => "camera").set(stale_value(camera.stale));
    }
}

fn record_modality(modality: &'static str, m: &ModalityMetrics) {
    gauge!("echosense_signal_variance", "modality" => modality).set(m.sample.variance);
    gauge!("echosense_signal_threshold", "modality" => modality).set(m.sample.threshold);
    gauge!("echosense_signal_motion", "modality" => modality)
        .set(if m.sample.motion { 1.0 } else { 0.0 });
    gauge!("echosense_signal_stale", "modality" => modality).set(stale_value(m.stale));
    histogram!("echosense_signal_variance_hist", "modality" => modality).record(m.sample.variance);
}

fn stale_value(stale: bool) -> f64 {
    if stale {
        1.0
    } else {
        0.0
    }
}

/// Aggregates snapshots in memory for the end-of-run summary
#[derive(Debug, Clone, Default)]
pub struct FusionMetricsAggregator {
    pub total_snapshots: u64,
    /// Snapshots in which at least one modality was stale
    pub snapshots_with_stale: u64,
    pub max_tracks: usize,
    /// Track-ticks spent in each state
    pub state_ticks: HashMap<TrackState, u64>,
    pub track_count_stats: RunningStats,
    /// Time from HANDOFF_PENDING to WIFI_ACTIVE as seen at tick granularity
    pub handoff_latency_ms: RunningStats,
    pub variance_stats: HashMap<&'static str, RunningStats>,
    /// Tracks currently pending, with the first tick time they were seen pending
    pending_since: HashMap<u64, f64>,
    last: Option<FusedSnapshot>,
}

impl FusionMetricsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, snapshot: &FusedSnapshot) {
        self.total_snapshots += 1;
        self.max_tracks = self.max_tracks.max(snapshot.tracks.len());
        self.track_count_stats.push(snapshot.tracks.len() as f64);

        for track in &snapshot.tracks {
            *self.state_ticks.entry(track.state).or_insert(0) += 1;
            match track.state {
                TrackState::HandoffPending => {
                    self.pending_since
                        .entry(track.id)
                        .or_insert(snapshot.timestamp);
                }
                TrackState::WifiActive => {
                    if let Some(since) = self.pending_since.remove(&track.id) {
                        self.handoff_latency_ms
                            .push((snapshot.timestamp - since) * 1000.0);
                    }
                }
                _ => {
                    self.pending_since.remove(&track.id);
                }
            }
        }
        self.pending_since
            .retain(|id, _| snapshot.track(*id).is_some());

        let signals = &snapshot.signals;
        let mut any_stale = signals.camera.as_ref().is_some_and(|c| c.stale);
        for (modality, metrics) in [
            ("wifi_rssi", &signals.rssi),
            ("wifi_csi", &signals.csi),
            ("wifi_monitor", &signals.monitor),
        ] {
            if let Some(m) = metrics {
                any_stale |= m.stale;
                if !m.sample.calibrating {
                    self.variance_stats
                        .entry(modality)
                        .or_default()
                        .push(m.sample.variance);
                }
            }
        }
        if any_stale {
            self.snapshots_with_stale += 1;
        }

        self.last = Some(snapshot.clone());
    }

    pub fn summary(&self) -> FusionSummary {
        let diagnostics = self
            .last
            .as_ref()
            .map(|s| s.diagnostics)
            .unwrap_or_default();
        let mut variance: Vec<_> = self
            .variance_stats
            .iter()
            .map(|(k, v)| (k.to_string(), StatsSummary::from(v)))
            .collect();
        variance.sort_by(|a, b| a.0.cmp(&b.0));

        FusionSummary {
            total_snapshots: self.total_snapshots,
            last_tick_id: self.last.as_ref().map_or(0, |s| s.tick_id),
            max_tracks: self.max_tracks,
            final_tracks: self.last.as_ref().map_or(0, |s| s.tracks.len()),
            stale_rate: percent(self.snapshots_with_stale, self.total_snapshots),
            state_ticks: STATES
                .iter()
                .map(|s| (s.as_str().to_string(), self.state_ticks.get(s).copied().unwrap_or(0)))
                .collect(),
            track_count: StatsSummary::from(&self.track_count_stats),
            handoff_latency_ms: StatsSummary::from(&self.handoff_latency_ms),
            variance,
            tracks_created: diagnostics.tracks_created,
            handoffs_started: diagnostics.handoffs_started,
            handoffs_completed: diagnostics.handoffs_completed,
            reacquisitions: diagnostics.reacquisitions,
            tracks_lost: diagnostics.tracks_lost,
            out_of_order_dropped: diagnostics.out_of_order_dropped,
            refused_transitions: diagnostics.refused_transitions,
        }
    }
}

fn percent(part: u64, total: u64) -> f64 {
    if total > 0 {
        part as f64 / total as f64 * 100.0
    } else {
        0.0
    }
}

/// End-of-run summary
#[derive(Debug, Clone, Default, Serialize)]
pub struct FusionSummary {
    pub total_snapshots: u64,
    pub last_tick_id: u64,
    pub max_tracks: usize,
    pub final_tracks: usize,
    pub stale_rate: f64,
    pub state_ticks: Vec<(String, u64)>,
    pub track_count: StatsSummary,
    pub handoff_latency_ms: StatsSummary,
    pub variance: Vec<(String, StatsSummary)>,
    pub tracks_created: u64,
    pub handoffs_started: u64,
    pub handoffs_completed: u64,
    pub reacquisitions: u64,
    pub tracks_lost: u64,
    pub out_of_order_dropped: u64,
    pub refused_transitions: u64,
}

impl std::fmt::Display for FusionSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Fusion Summary ===")?;
        writeln!(f, "Snapshots: {} (last tick {})", self.total_snapshots, self.last_tick_id)?;
        writeln!(f, "Tracks: created {}, max live {}, at end {}", self.tracks_created, self.max_tracks, self.final_tracks)?;
        writeln!(
            f,
            "Handoffs: started {}, completed {}, reacquired {}, lost {}",
            self.handoffs_started, self.handoffs_completed, self.reacquisitions, self.tracks_lost
        )?;
        writeln!(f, "Handoff latency (ms): {}", self.handoff_latency_ms)?;
        writeln!(f, "Tracks per tick: {}", self.track_count)?;
        writeln!(f, "Snapshots with stale signals: {:.2}%", self.stale_rate)?;
        for (state, ticks) in &self.state_ticks {
            writeln!(f, "  {state}: {ticks} track-ticks")?;
        }
        for (modality, stats) in &self.variance {
            writeln!(f, "  {modality} variance: {stats}")?;
        }
        if self.out_of_order_dropped > 0 || self.refused_transitions > 0 {
            writeln!(
                f,
                "Dropped out-of-order events: {}, refused transitions: {}",
                self.out_of_order_dropped, self.refused_transitions
            )?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct StatsSummary {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
}

impl From<&RunningStats> for StatsSummary {
    fn from(stats: &RunningStats) -> Self {
        Self {
            count: stats.count,
            min: stats.min,
            max: stats.max,
            mean: stats.mean(),
            std_dev: stats.std_dev(),
        }
    }
}

impl std::fmt::Display for StatsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.count == 0 {
            write!(f, "N/A")
        } else {
            write!(
                f,
                "min={:.3}, max={:.3}, mean={:.3}, std={:.3} (n={})",
                self.min, self.max, self.mean, self.std_dev, self.count
            )
        }
    }
}

/// Online mean/variance (Welford)
#[derive(Debug, Clone, Default)]
pub struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl RunningStats {
    pub fn push(&mut self, value: f64) {
        self.count += 1;
        if self.count == 1 {
            self.min = value;
            self.max = value;
            self.mean = value;
            self.m2 = 0.0;
            return;
        }
        self.min = self.min.min(value);
        self.max = self.max.max(value);

        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.mean
        }
    }

    /// Sample variance, 0 below two samples
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }
}
