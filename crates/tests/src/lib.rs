//! # Integration Tests
//!
//! End-to-end checks across crates:
//! - config contracts shared by loader, ingestion and sinks
//! - UDP producers through fusion to dispatcher subscribers
//! - simulated pipeline into file and TCP sinks

#[cfg(test)]
mod contract_tests {
    use config_loader::{ConfigFormat, ConfigLoader};
    use contracts::{
        BoundingBox, CameraDetection, CameraFrame, FusedSnapshot, SensorEvent, SinkType,
        SourceKind,
    };
    use fusion_engine::FusionEngine;
    use ingestion::{IngestionPipeline, SourceMode};

    const DEPLOYMENT_TOML: &str = r#"
[engine]
tick_interval_ms = 50
handoff_delay_ms = 400

[rssi]
calibration_s = 2.0

[[sources]]
id = "cam0"
kind = "camera"
bind = "127.0.0.1:0"

[[sources]]
id = "esp8266"
kind = "wifi_rssi"
bind = "127.0.0.1:0"

[[sources]]
id = "csi0"
kind = "wifi_csi"
bind = "127.0.0.1:0"
enabled = false

[[sinks]]
name = "console"
sink_type = "log"

[[sinks]]
name = "viewer"
sink_type = "tcp"
params = { addr = "127.0.0.1:0" }
"#;

    #[test]
    fn deployment_config_drives_every_crate() {
        let bp = ConfigLoader::load_from_str(DEPLOYMENT_TOML, ConfigFormat::Toml).unwrap();
        assert_eq!(bp.engine.tick_interval_ms, 50);
        assert_eq!(bp.rssi.calibration_s, 2.0);
        assert_eq!(bp.sinks[1].sink_type, SinkType::Tcp);
        assert_eq!(bp.sources_of_kind(SourceKind::WifiCsi).count(), 0);

        let pipeline = IngestionPipeline::from_blueprint(&bp, SourceMode::Simulated).unwrap();
        assert_eq!(pipeline.source_count(), 2);
        let mut ids: Vec<_> = pipeline.source_ids().collect();
        ids.sort();
        assert_eq!(ids, vec!["cam0", "esp8266"]);
    }

    #[test]
    fn snapshot_json_shape_is_stable() {
        let mut engine = FusionEngine::new(Default::default());
        engine.push(SensorEvent::camera(
            "cam0",
            1.0,
            CameraFrame {
                detections: vec![CameraDetection {
                    bbox: BoundingBox::new(10.0, 20.0, 110.0, 220.0),
                    class_name: "person".into(),
                    confidence: 0.8,
                    keypoints: None,
                }],
            },
        ));
        let snapshot = engine.tick(1.05);

        let value = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(value["tick_id"], 1);
        assert_eq!(value["terminal"], false);
        assert_eq!(value["tracks"][0]["state"], "CAMERA_ACTIVE");
        assert_eq!(value["tracks"][0]["class_name"], "person");
        assert_eq!(value["signals"]["camera"]["detections"], 1);

        let back: FusedSnapshot = serde_json::from_value(value).unwrap();
        assert_eq!(back.tracks, snapshot.tracks);
    }
}

#[cfg(test)]
mod e2e_tests {
    use std::collections::HashMap;
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use contracts::{
        EngineConfig, FusedSnapshot, FusionBlueprint, SensorEvent, SensorEventCallback,
        SignalSample, SignalSource, SinkConfig, SinkType, SourceConfig, SourceKind, TrackState,
    };
    use dispatcher::{create_dispatcher, Dispatcher, SinkHandle, TcpSink};
    use fusion_engine::{FusionEngine, FusionRunner, StopReason};
    use ingestion::{
        BackpressureConfig, DropPolicy, EventDecoder, IngestionPipeline, SourceMode,
        UdpSignalSource,
    };
    use observability::FusionMetricsAggregator;
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::net::{TcpStream, UdpSocket};
    use tokio::sync::broadcast::error::RecvError;
    use tokio::sync::{broadcast, mpsc, watch};
    use tokio::time::{sleep, timeout};

    const CAMERA_BOX: [f64; 4] = [300.0, 100.0, 400.0, 400.0];

    fn udp_blueprint(handoff_delay_ms: u64) -> FusionBlueprint {
        let mut bp = FusionBlueprint::empty();
        bp.engine = EngineConfig {
            tick_interval_ms: 50,
            handoff_delay_ms,
            tracking_timeout_s: 10.0,
            ..Default::default()
        };
        // motion detection from the first full window
        bp.rssi.calibration_s = 0.0;
        bp
    }

    /// Register UDP sources on ephemeral ports and return their addresses
    fn udp_pipeline(
        bp: &FusionBlueprint,
        sources: &[(&str, SourceKind)],
    ) -> (IngestionPipeline, HashMap<SourceKind, SocketAddr>) {
        let mut pipeline = IngestionPipeline::new(BackpressureConfig::from(&bp.queue));
        let mut addrs = HashMap::new();
        for (id, kind) in sources {
            let source = UdpSignalSource::bind(
                (*id).into(),
                "127.0.0.1:0".parse().unwrap(),
                EventDecoder::for_kind(*kind, bp),
                pipeline.metrics(),
            )
            .unwrap();
            addrs.insert(*kind, source.local_addr());
            pipeline.register_source(Box::new(source)).unwrap();
        }
        (pipeline, addrs)
    }

    fn camera_frame(timestamp: f64, bbox: [f64; 4]) -> String {
        format!(
            r#"{{"timestamp":{timestamp},"detections":[{{"bbox":[{},{},{},{}],"class":"person","confidence":0.9}}]}}"#,
            bbox[0], bbox[1], bbox[2], bbox[3]
        )
    }

    async fn send_camera_frames(sender: &UdpSocket, addr: SocketAddr, count: usize) {
        for i in 0..count {
            let frame = camera_frame(1.0 + i as f64 * 0.02, CAMERA_BOX);
            sender.send_to(frame.as_bytes(), addr).await.unwrap();
            sleep(Duration::from_millis(20)).await;
        }
    }

    /// Next snapshot for which `pick` yields a value
    async fn wait_for<T>(
        rx: &mut broadcast::Receiver<Arc<FusedSnapshot>>,
        mut pick: impl FnMut(&FusedSnapshot) -> Option<T>,
    ) -> T {
        timeout(Duration::from_secs(5), async {
            loop {
                match rx.recv().await {
                    Ok(snapshot) => {
                        if let Some(value) = pick(&snapshot) {
                            return value;
                        }
                    }
                    Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => panic!("snapshot stream closed"),
                }
            }
        })
        .await
        .expect("condition not reached in time")
    }

    fn camera_track(snapshot: &FusedSnapshot) -> Option<u64> {
        snapshot
            .tracks
            .iter()
            .find(|t| t.state == TrackState::CameraActive)
            .map(|t| t.id)
    }

    /// Camera -> fusion -> subscriber over real UDP, then WiFi motion takes over the track
    #[tokio::test]
    async fn camera_to_wifi_handoff_over_udp() {
        let bp = udp_blueprint(1000);
        let (mut pipeline, addrs) = udp_pipeline(
            &bp,
            &[("cam0", SourceKind::Camera), ("esp8266", SourceKind::WifiRssi)],
        );
        let events = pipeline.take_receiver().unwrap();

        let (snap_tx, snap_rx) = mpsc::channel(64);
        let dispatcher = Dispatcher::with_handles(Vec::new(), snap_rx);
        let mut snapshots = dispatcher.subscribe();
        let dispatcher = dispatcher.spawn();

        let (stop_tx, stop_rx) = watch::channel(false);
        let runner =
            FusionRunner::new(FusionEngine::new(bp.engine.clone()), events, snap_tx, stop_rx)
                .spawn();
        pipeline.start_all();

        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        send_camera_frames(&sender, addrs[&SourceKind::Camera], 10).await;
        let track_id = wait_for(&mut snapshots, camera_track).await;

        // alternating levels give a window variance far above the floor
        for i in 0..20 {
            let rssi = if i % 2 == 0 { -40 } else { -70 };
            sender
                .send_to(format!("RSS:{rssi}").as_bytes(), addrs[&SourceKind::WifiRssi])
                .await
                .unwrap();
            sleep(Duration::from_millis(10)).await;
        }

        let handed_off = wait_for(&mut snapshots, |s| {
            s.track(track_id)
                .filter(|t| t.state == TrackState::WifiActive)
                .cloned()
        })
        .await;
        assert_eq!(handed_off.id, track_id);
        assert!(handed_off.last_wifi_motion.unwrap() > handed_off.last_camera_seen.unwrap());

        stop_tx.send_replace(true);
        pipeline.close();
        let report = runner.await.unwrap();
        assert_eq!(report.reason, StopReason::Shutdown);
        assert!(report.diagnostics.handoffs_completed >= 1);
        assert!(report.final_snapshot.terminal);
        assert_eq!(
            report.final_snapshot.track(track_id).map(|t| t.state),
            Some(TrackState::WifiActive)
        );

        let dispatched = timeout(Duration::from_secs(5), dispatcher)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(dispatched.snapshots, report.snapshots_sent);
    }

    /// No motion during the handoff window: the track ends lost, never WiFi-owned
    #[tokio::test]
    async fn silent_wifi_loses_track_after_handoff_delay() {
        let bp = udp_blueprint(200);
        let (mut pipeline, addrs) = udp_pipeline(&bp, &[("cam0", SourceKind::Camera)]);
        let events = pipeline.take_receiver().unwrap();

        let (snap_tx, snap_rx) = mpsc::channel(64);
        let dispatcher = Dispatcher::with_handles(Vec::new(), snap_rx);
        let mut snapshots = dispatcher.subscribe();
        let dispatcher = dispatcher.spawn();

        let (stop_tx, stop_rx) = watch::channel(false);
        let runner =
            FusionRunner::new(FusionEngine::new(bp.engine.clone()), events, snap_tx, stop_rx)
                .spawn();
        pipeline.start_all();

        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        send_camera_frames(&sender, addrs[&SourceKind::Camera], 5).await;
        let track_id = wait_for(&mut snapshots, camera_track).await;

        let mut seen_states = Vec::new();
        wait_for(&mut snapshots, |s| {
            let state = s.track(track_id)?.state;
            seen_states.push(state);
            (state == TrackState::Lost).then_some(())
        })
        .await;
        assert!(!seen_states.contains(&TrackState::WifiActive));

        stop_tx.send_replace(true);
        pipeline.close();
        let report = runner.await.unwrap();
        assert_eq!(report.diagnostics.tracks_lost, 1);
        assert_eq!(report.diagnostics.handoffs_completed, 0);
        timeout(Duration::from_secs(5), dispatcher)
            .await
            .unwrap()
            .unwrap();
    }

    /// Connected TCP clients get every snapshot as one JSON line, ending with the terminal one
    #[tokio::test]
    async fn tcp_client_receives_snapshot_stream() {
        let sink = TcpSink::bind("viewer", "127.0.0.1:0".parse().unwrap(), 64)
            .await
            .unwrap();
        let addr = sink.local_addr();
        let client = TcpStream::connect(addr).await.unwrap();
        // let the acceptor register the client before the first snapshot
        sleep(Duration::from_millis(100)).await;

        let (snap_tx, snap_rx) = mpsc::channel(64);
        let dispatcher =
            Dispatcher::with_handles(vec![SinkHandle::spawn(sink, 64)], snap_rx).spawn();

        let (_events_tx, events_rx) = async_channel::bounded(8);
        let (_stop_tx, stop_rx) = watch::channel(false);
        let engine = FusionEngine::new(EngineConfig {
            tick_interval_ms: 10,
            ..Default::default()
        });
        let report = FusionRunner::new(engine, events_rx, snap_tx, stop_rx)
            .with_max_ticks(Some(5))
            .run()
            .await;
        assert_eq!(report.reason, StopReason::MaxTicks);

        let dispatched = dispatcher.await.unwrap();
        assert_eq!(dispatched.sinks[0].1.written, report.snapshots_sent);

        let mut lines = BufReader::new(client).lines();
        let mut received = Vec::new();
        while let Some(line) = timeout(Duration::from_secs(5), lines.next_line())
            .await
            .unwrap()
            .unwrap()
        {
            received.push(serde_json::from_str::<FusedSnapshot>(&line).unwrap());
        }

        assert_eq!(received.len() as u64, report.snapshots_sent);
        assert!(received.windows(2).all(|w| w[1].tick_id > w[0].tick_id));
        assert!(received.last().unwrap().terminal);
    }

    /// Simulated producers through the whole chain into a JSON Lines session file
    #[tokio::test]
    async fn simulated_pipeline_writes_session_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut bp = FusionBlueprint::empty();
        bp.engine.tick_interval_ms = 20;
        bp.sources = [("cam0", SourceKind::Camera), ("esp8266", SourceKind::WifiRssi)]
            .into_iter()
            .map(|(id, kind)| SourceConfig {
                id: id.to_string(),
                kind,
                bind: "127.0.0.1:0".to_string(),
                enabled: true,
            })
            .collect();
        bp.sinks = vec![
            SinkConfig {
                name: "console".to_string(),
                sink_type: SinkType::Log,
                queue_capacity: 64,
                params: HashMap::new(),
            },
            SinkConfig {
                name: "archive".to_string(),
                sink_type: SinkType::File,
                queue_capacity: 64,
                params: HashMap::from([
                    (
                        "base_path".to_string(),
                        dir.path().to_string_lossy().into_owned(),
                    ),
                    ("prefix".to_string(), "session".to_string()),
                ]),
            },
        ];

        let mut pipeline = IngestionPipeline::from_blueprint(&bp, SourceMode::Simulated).unwrap();
        let events = pipeline.take_receiver().unwrap();

        let (snap_tx, snap_rx) = mpsc::channel(bp.queue.snapshot_capacity);
        let dispatcher = create_dispatcher(bp.sinks.clone(), snap_rx).await.unwrap();
        let mut subscriber = dispatcher.subscribe();
        let dispatcher = dispatcher.spawn();
        let aggregator = tokio::spawn(async move {
            let mut aggregator = FusionMetricsAggregator::new();
            loop {
                match subscriber.recv().await {
                    Ok(snapshot) => aggregator.update(&snapshot),
                    Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => break,
                }
            }
            aggregator.summary()
        });

        let (_stop_tx, stop_rx) = watch::channel(false);
        pipeline.start_all();
        let report = FusionRunner::new(FusionEngine::new(bp.engine.clone()), events, snap_tx, stop_rx)
            .with_max_ticks(Some(20))
            .run()
            .await;
        pipeline.close();
        assert_eq!(report.reason, StopReason::MaxTicks);
        assert!(report.diagnostics.events_processed > 0);

        let dispatched = timeout(Duration::from_secs(5), dispatcher)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(dispatched.sinks.len(), 2);
        for (name, stats) in &dispatched.sinks {
            assert_eq!(stats.written, report.snapshots_sent, "sink {name}");
        }

        let summary = aggregator.await.unwrap();
        assert_eq!(summary.total_snapshots, report.snapshots_sent);

        let files: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        assert_eq!(files.len(), 1);
        let name = files[0].file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("session_") && name.ends_with(".jsonl"));

        let content = std::fs::read_to_string(&files[0]).unwrap();
        let written: Vec<FusedSnapshot> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(written.len() as u64, report.snapshots_sent);
        assert!(written.windows(2).all(|w| w[1].tick_id > w[0].tick_id));
        assert!(written.last().unwrap().terminal);
        assert!(pipeline.metrics().snapshot().events_received > 0);
    }

    /// Emits its whole burst synchronously from `listen`
    struct BurstSource {
        count: usize,
        listening: AtomicBool,
    }

    impl SignalSource for BurstSource {
        fn source_id(&self) -> &str {
            "esp8266"
        }

        fn kind(&self) -> SourceKind {
            SourceKind::WifiRssi
        }

        fn listen(&self, callback: SensorEventCallback) {
            if self.listening.swap(true, Ordering::SeqCst) {
                return;
            }
            for i in 0..self.count {
                callback(SensorEvent::signal(
                    "esp8266",
                    SourceKind::WifiRssi,
                    1.0 + i as f64 * 0.02,
                    SignalSample {
                        rssi: Some(-60),
                        ..Default::default()
                    },
                ));
            }
        }

        fn stop(&self) {
            self.listening.store(false, Ordering::SeqCst);
        }

        fn is_listening(&self) -> bool {
            self.listening.load(Ordering::Relaxed)
        }
    }

    /// A burst parked in the producer queue behind a tiny merged queue still reaches the engine at shutdown
    #[tokio::test]
    async fn shutdown_drains_producer_queues() {
        let mut pipeline = IngestionPipeline::new(BackpressureConfig {
            per_source_capacity: 256,
            merged_capacity: 4,
            drop_policy: DropPolicy::DropOldest,
        });
        pipeline
            .register_source(Box::new(BurstSource {
                count: 100,
                listening: AtomicBool::new(false),
            }))
            .unwrap();
        let events = pipeline.take_receiver().unwrap();

        let (snap_tx, _snap_rx) = mpsc::channel(64);
        let (stop_tx, stop_rx) = watch::channel(false);
        pipeline.start_all();
        pipeline.close();
        stop_tx.send_replace(true);

        let engine = FusionEngine::new(EngineConfig {
            tick_interval_ms: 10,
            ..Default::default()
        });
        let report = timeout(
            Duration::from_secs(5),
            FusionRunner::new(engine, events, snap_tx, stop_rx).run(),
        )
        .await
        .unwrap();

        assert_eq!(report.reason, StopReason::Shutdown);
        assert!(report.drain_complete);
        assert_eq!(report.events_drained, 100);
        assert_eq!(report.diagnostics.events_processed, 100);
        assert!(report.final_snapshot.terminal);

        let ingested = pipeline.metrics().snapshot();
        assert_eq!(ingested.events_received, 100);
        assert_eq!(ingested.events_forwarded, 100);
        assert_eq!(ingested.events_dropped, 0);
    }
}
