//! Mock signal sources
//!
//! For running without ESP boards or a camera. Payloads are generated in the
//! real wire formats and go through the same decoders as UDP traffic.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use contracts::{
    MonotonicClock, SensorEventCallback, SignalSource, SourceId, SourceKind, CSI_SUBCARRIERS,
    POSE_KEYPOINTS,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace, warn};

use crate::config::IngestionMetrics;
use crate::decoder::{EventDecoder, StreamClock};

/// Walk-through scenario shared by all mock sources.
///
/// Phases are positions within `period_s` on the process clock, so every
/// mock source in the process agrees on where the person is.
#[derive(Debug, Clone)]
pub struct SimulationScript {
    pub period_s: f64,
    /// Person inside the camera frame during `[start, end)`
    pub in_view: (f64, f64),
    /// WiFi motion during `[start, end)`
    pub motion: (f64, f64),
    /// Horizontal walking speed in the frame (px/s)
    pub speed_px_s: f64,
}

impl Default for SimulationScript {
    fn default() -> Self {
        Self {
            period_s: 24.0,
            in_view: (2.0, 12.0),
            motion: (11.5, 18.0),
            speed_px_s: 15.0,
        }
    }
}

impl SimulationScript {
    fn phase(&self, t: f64) -> f64 {
        t.rem_euclid(self.period_s)
    }

    pub fn in_view(&self, t: f64) -> bool {
        let p = self.phase(t);
        p >= self.in_view.0 && p < self.in_view.1
    }

    pub fn motion(&self, t: f64) -> bool {
        let p = self.phase(t);
        p >= self.motion.0 && p < self.motion.1
    }

    /// Person bbox at `t` while in view
    pub fn bbox(&self, t: f64) -> [f64; 4] {
        let x0 = 100.0 + self.speed_px_s * (self.phase(t) - self.in_view.0).max(0.0);
        [x0, 120.0, x0 + 120.0, 420.0]
    }

    /// Wire payload a producer of `kind` would send at `t`
    pub fn payload(&self, kind: SourceKind, t: f64, rng: &mut StdRng) -> Vec<u8> {
        let sway = if self.motion(t) { (t * 25.0).sin() } else { 0.0 };
        match kind {
            SourceKind::WifiRssi => {
                let rssi = -50.0 + rng.random_range(-2.0..=2.0) + sway * 10.0;
                format!("RSS:{}", rssi.round() as i32).into_bytes()
            }
            SourceKind::WifiMonitor => {
                let rssi = -60.0 + rng.random_range(-2.0..=2.0) + sway * 10.0;
                format!("WIFI:{},0,8", rssi.round() as i32).into_bytes()
            }
            SourceKind::WifiCsi => {
                let mut line = format!("{t:.6}");
                for k in 0..CSI_SUBCARRIERS {
                    let wobble = if self.motion(t) {
                        (t * 25.0 + k as f64 * 0.1).sin() * 2.0
                    } else {
                        0.0
                    };
                    let amp = 10.0 + rng.random_range(-0.05..=0.05) + wobble;
                    line.push_str(&format!(",{amp:.4}"));
                }
                line.into_bytes()
            }
            SourceKind::Camera => {
                let detections = if self.in_view(t) {
                    let [x0, y0, x1, y1] = self.bbox(t);
                    let keypoints: Vec<[f64; 2]> = (0..POSE_KEYPOINTS)
                        .map(|i| {
                            let side = if i % 2 == 0 { 0.35 } else { 0.65 };
                            [
                                x0 + (x1 - x0) * side,
                                y0 + (y1 - y0) * (i as f64 + 0.5) / POSE_KEYPOINTS as f64,
                            ]
                        })
                        .collect();
                    serde_json::json!([{
                        "bbox": [x0, y0, x1, y1],
                        "class": "person",
                        "confidence": 0.85 + rng.random_range(0.0..0.1),
                        "keypoints": keypoints,
                    }])
                } else {
                    serde_json::json!([])
                };
                serde_json::json!({ "timestamp": t, "detections": detections })
                    .to_string()
                    .into_bytes()
            }
        }
    }
}

/// Mock source configuration
#[derive(Debug, Clone)]
pub struct MockSourceConfig {
    pub source_id: String,
    pub kind: SourceKind,
    pub rate_hz: f64,
    pub script: SimulationScript,
    pub seed: u64,
}

impl MockSourceConfig {
    /// Typical producer rate per modality
    pub fn for_kind(source_id: impl Into<String>, kind: SourceKind) -> Self {
        let rate_hz = match kind {
            SourceKind::Camera => 10.0,
            SourceKind::WifiRssi | SourceKind::WifiMonitor => 50.0,
            SourceKind::WifiCsi => 20.0,
        };
        Self {
            source_id: source_id.into(),
            kind,
            rate_hz,
            script: SimulationScript::default(),
            seed: 0x5eed,
        }
    }
}

/// Mock signal source
pub struct MockSignalSource {
    config: MockSourceConfig,
    source_id: SourceId,
    decoder: Mutex<Option<EventDecoder>>,
    running: Arc<AtomicBool>,
    metrics: Arc<IngestionMetrics>,
}

impl MockSignalSource {
    pub fn new(
        config: MockSourceConfig,
        decoder: EventDecoder,
        metrics: Arc<IngestionMetrics>,
    ) -> Self {
        Self {
            source_id: SourceId::from(config.source_id.as_str()),
            config,
            decoder: Mutex::new(Some(decoder)),
            running: Arc::new(AtomicBool::new(false)),
            metrics,
        }
    }

    fn take_decoder(&self) -> Option<EventDecoder> {
        match self.decoder.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }
}

impl SignalSource for MockSignalSource {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    fn kind(&self) -> SourceKind {
        self.config.kind
    }

    fn listen(&self, callback: SensorEventCallback) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let Some(mut decoder) = self.take_decoder() else {
            warn!(source_id = %self.source_id, "mock source was stopped and cannot restart");
            self.running.store(false, Ordering::SeqCst);
            return;
        };

        let config = self.config.clone();
        let source_id = self.source_id.clone();
        let running = self.running.clone();
        let metrics = self.metrics.clone();

        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(Duration::from_secs_f64(1.0 / config.rate_hz.max(0.1)));
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut rng = StdRng::seed_from_u64(config.seed);
            let mut stream_clock = StreamClock::global();
            let script_clock = MonotonicClock::global();

            debug!(
                source_id = %source_id,
                kind = %config.kind,
                rate_hz = config.rate_hz,
                "mock signal source started"
            );

            while running.load(Ordering::Relaxed) {
                interval.tick().await;
                if !running.load(Ordering::Relaxed) {
                    break;
                }
                let payload = config.script.payload(config.kind, script_clock.now(), &mut rng);
                match decoder.decode(&source_id, stream_clock.next(), &payload) {
                    Ok(event) => {
                        trace!(source_id = %source_id, ts = event.timestamp, "mock event");
                        callback(event);
                    }
                    Err(e) => {
                        metrics.record_parse_error();
                        debug!(source_id = %source_id, error = %e, "mock payload dropped");
                    }
                }
            }

            debug!(source_id = %source_id, "mock signal source stopped");
        });
    }

    fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        drop(self.take_decoder());
    }

    fn is_listening(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }
}
