//! Payload -> `SensorEvent` decoding, including per-modality conditioning.
//!
//! A decoder is owned by exactly one producer task, so conditioner windows
//! are never shared.

use contracts::{
    FusionBlueprint, MonotonicClock, SensorEvent, SignalSample, SourceId, SourceKind,
};
use conditioning::{CsiConditioner, RssiConditioner, VarianceBandClassifier};

use crate::error::{IngestionError, Result};
use crate::wire::{self, WireError};

/// Stamps arrivals on the shared monotonic clock, strictly increasing per stream
#[derive(Debug, Clone, Copy)]
pub struct StreamClock {
    clock: MonotonicClock,
    last: f64,
}

impl StreamClock {
    pub fn new(clock: MonotonicClock) -> Self {
        Self {
            clock,
            last: f64::NEG_INFINITY,
        }
    }

    pub fn global() -> Self {
        Self::new(MonotonicClock::global())
    }

    pub fn next(&mut self) -> f64 {
        let now = self.clock.now();
        let ts = if now > self.last { now } else { self.last + 1e-6 };
        self.last = ts;
        ts
    }
}

/// Modality-specific decoder
pub enum EventDecoder {
    Camera {
        last_capture: Option<f64>,
    },
    Rssi(RssiConditioner),
    Monitor(RssiConditioner),
    Csi {
        conditioner: CsiConditioner,
        last_capture: Option<f64>,
    },
}

impl std::fmt::Debug for EventDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EventDecoder({})", self.kind())
    }
}

impl EventDecoder {
    /// Decoder with the blueprint's tuning for `kind`
    pub fn for_kind(kind: SourceKind, blueprint: &FusionBlueprint) -> Self {
        match kind {
            SourceKind::Camera => Self::Camera { last_capture: None },
            SourceKind::WifiRssi => Self::Rssi(RssiConditioner::new(blueprint.rssi.clone())),
            SourceKind::WifiMonitor => {
                Self::Monitor(RssiConditioner::new(blueprint.monitor.clone()))
            }
            SourceKind::WifiCsi => {
                let mut conditioner = CsiConditioner::new(&blueprint.csi);
                if blueprint.csi.use_classifier {
                    conditioner =
                        conditioner.with_classifier(Box::new(VarianceBandClassifier::default()));
                }
                Self::Csi {
                    conditioner,
                    last_capture: None,
                }
            }
        }
    }

    pub fn kind(&self) -> SourceKind {
        match self {
            Self::Camera { .. } => SourceKind::Camera,
            Self::Rssi(_) => SourceKind::WifiRssi,
            Self::Monitor(_) => SourceKind::WifiMonitor,
            Self::Csi { .. } => SourceKind::WifiCsi,
        }
    }

    /// Decode one datagram received at `timestamp`.
    ///
    /// Producer-side timestamps (camera, CSI) must strictly increase; replays
    /// and reordered datagrams are rejected.
    pub fn decode(
        &mut self,
        source_id: &SourceId,
        timestamp: f64,
        payload: &[u8],
    ) -> Result<SensorEvent> {
        let kind = self.kind();
        match self {
            Self::Camera { last_capture } => {
                let msg = wire::parse_camera(payload)
                    .map_err(|e| IngestionError::malformed(source_id.as_str(), e))?;
                if let Some(capture) = msg.timestamp {
                    check_capture(last_capture, capture)
                        .map_err(|e| IngestionError::malformed(source_id.as_str(), e))?;
                }
                Ok(SensorEvent::camera(source_id.clone(), timestamp, msg.frame))
            }
            Self::Rssi(conditioner) => {
                let rssi = wire::parse_rssi(payload)
                    .map_err(|e| IngestionError::malformed(source_id.as_str(), e))?;
                scalar_event(conditioner, source_id, kind, timestamp, rssi)
            }
            Self::Monitor(conditioner) => {
                let record = wire::parse_monitor(payload)
                    .map_err(|e| IngestionError::malformed(source_id.as_str(), e))?;
                scalar_event(conditioner, source_id, kind, timestamp, record.rssi)
            }
            Self::Csi {
                conditioner,
                last_capture,
            } => {
                let record = wire::parse_csi(payload)
                    .map_err(|e| IngestionError::malformed(source_id.as_str(), e))?;
                check_capture(last_capture, record.timestamp)
                    .map_err(|e| IngestionError::malformed(source_id.as_str(), e))?;
                let reading = conditioner
                    .ingest(timestamp, &record.amplitudes)
                    .map_err(|e| IngestionError::rejected(source_id.as_str(), e))?;
                Ok(SensorEvent::signal(
                    source_id.clone(),
                    kind,
                    timestamp,
                    reading.to_sample(),
                ))
            }
        }
    }
}

fn check_capture(last: &mut Option<f64>, capture: f64) -> std::result::Result<(), WireError> {
    if let Some(previous) = *last {
        if capture <= previous {
            return Err(WireError::StaleTimestamp {
                previous,
                got: capture,
            });
        }
    }
    *last = Some(capture);
    Ok(())
}

fn scalar_event(
    conditioner: &mut RssiConditioner,
    source_id: &SourceId,
    kind: SourceKind,
    timestamp: f64,
    rssi: i32,
) -> Result<SensorEvent> {
    let reading = conditioner
        .ingest(timestamp, rssi)
        .map_err(|e| IngestionError::rejected(source_id.as_str(), e))?;
    // range-checked by the conditioner
    let sample: SignalSample = reading.to_sample(rssi as i8);
    Ok(SensorEvent::signal(source_id.clone(), kind, timestamp, sample))
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::EventPayload;

    fn blueprint() -> FusionBlueprint {
        FusionBlueprint::empty()
    }

    #[test]
    fn stream_clock_strictly_increases() {
        let mut clock = StreamClock::global();
        let mut last = clock.next();
        for _ in 0..1_000 {
            let t = clock.next();
            assert!(t > last);
            last = t;
        }
    }

    #[test]
    fn rssi_payload_becomes_signal_event() {
        let id: SourceId = "esp8266".into();
        let mut d = EventDecoder::for_kind(SourceKind::WifiRssi, &blueprint());
        let ev = d.decode(&id, 0.5, b"RSS:-55").unwrap();
        assert_eq!(ev.source, SourceKind::WifiRssi);
        assert_eq!(ev.timestamp, 0.5);
        match ev.payload {
            EventPayload::Signal(s) => {
                assert_eq!(s.rssi, Some(-55));
                assert!(s.calibrating);
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn out_of_range_rssi_is_rejected_not_malformed() {
        let id: SourceId = "esp8266".into();
        let mut d = EventDecoder::for_kind(SourceKind::WifiRssi, &blueprint());
        let err = d.decode(&id, 0.5, b"RSS:12").unwrap_err();
        assert!(matches!(err, IngestionError::Rejected { .. }));
        assert!(err.is_per_event());

        let err = d.decode(&id, 0.6, b"garbage").unwrap_err();
        assert!(matches!(err, IngestionError::Malformed { .. }));
    }

    #[test]
    fn monitor_uses_own_window() {
        let id: SourceId = "mon0".into();
        let mut d = EventDecoder::for_kind(SourceKind::WifiMonitor, &blueprint());
        let ev = d.decode(&id, 0.1, b"WIFI:-70,0,8").unwrap();
        assert_eq!(ev.source, SourceKind::WifiMonitor);
    }

    #[test]
    fn camera_replay_is_rejected() {
        let id: SourceId = "cam0".into();
        let mut d = EventDecoder::for_kind(SourceKind::Camera, &blueprint());
        let frame = br#"{"timestamp": 2.0, "detections": []}"#;
        assert!(d.decode(&id, 1.0, frame).is_ok());
        let err = d.decode(&id, 1.1, frame).unwrap_err();
        assert!(matches!(
            err,
            IngestionError::Malformed {
                error: WireError::StaleTimestamp { .. },
                ..
            }
        ));
    }

    #[test]
    fn csi_payload_carries_vector() {
        let id: SourceId = "esp32".into();
        let mut d = EventDecoder::for_kind(SourceKind::WifiCsi, &blueprint());
        let amps = vec!["10.0"; 64].join(",");
        let ev = d.decode(&id, 0.2, format!("0.2,{amps}").as_bytes()).unwrap();
        match ev.payload {
            EventPayload::Signal(s) => assert_eq!(s.csi.map(|v| v.len()), Some(64)),
            other => panic!("unexpected payload {other:?}"),
        }
    }
}
