//! Generic source adapter
//!
//! Adapts any `SignalSource` (UDP listener, simulator, test double) to the
//! pipeline's queueing: producer callback -> own bounded queue -> forwarder
//! task -> merged queue.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_channel::{bounded, Sender};
use contracts::{SensorEvent, SensorEventCallback, SignalSource, SourceKind};
use metrics::counter;
use tracing::{debug, trace};

use crate::adapter::SourceAdapter;
use crate::config::{BackpressureConfig, IngestionMetrics};
use crate::queue::{forward, send_event};

pub struct GenericSourceAdapter {
    source_id: String,
    source: Box<dyn SignalSource>,
    config: BackpressureConfig,
    listening: Arc<AtomicBool>,
    /// Closed on stop so the forwarder drains what is queued and exits
    queue: Mutex<Option<Sender<SensorEvent>>>,
}

impl GenericSourceAdapter {
    pub fn new(source: Box<dyn SignalSource>, config: BackpressureConfig) -> Self {
        Self {
            source_id: source.source_id().to_string(),
            source,
            config,
            listening: Arc::new(AtomicBool::new(false)),
            queue: Mutex::new(None),
        }
    }

    fn replace_queue(&self, queue: Option<Sender<SensorEvent>>) -> Option<Sender<SensorEvent>> {
        match self.queue.lock() {
            Ok(mut guard) => std::mem::replace(&mut *guard, queue),
            Err(poisoned) => std::mem::replace(&mut *poisoned.into_inner(), queue),
        }
    }
}

impl SourceAdapter for GenericSourceAdapter {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    fn kind(&self) -> SourceKind {
        self.source.kind()
    }

    fn start(&self, merged: Sender<SensorEvent>, metrics: Arc<IngestionMetrics>) {
        if self.listening.swap(true, Ordering::SeqCst) {
            return;
        }

        let (tx, rx) = bounded(self.config.per_source_capacity);
        self.replace_queue(Some(tx.clone()));
        tokio::spawn(forward(
            self.source_id.clone(),
            rx,
            merged,
            metrics.clone(),
        ));

        let source_id = self.source_id.clone();
        let kind = self.source.kind();
        let drop_policy = self.config.drop_policy;
        let listening = self.listening.clone();

        debug!(source_id = %source_id, kind = %kind, "starting source adapter");

        let callback: SensorEventCallback = Arc::new(move |event| {
            if !listening.load(Ordering::Relaxed) {
                return;
            }
            metrics.record_received();
            counter!(
                "echosense_events_received_total",
                "source_id" => source_id.clone(),
                "kind" => kind.as_str()
            )
            .increment(1);
            trace!(source_id = %source_id, ts = event.timestamp, "adapter received event");
            send_event(&tx, event, &metrics, &source_id, drop_policy);
        });

        self.source.listen(callback);
    }

    fn stop(&self) {
        if self.listening.swap(false, Ordering::SeqCst) {
            debug!(source_id = %self.source_id, "stopping source adapter");
            self.source.stop();
        }
        // the source may keep its callback alive; closing here still ends the forwarder
        if let Some(queue) = self.replace_queue(None) {
            queue.close();
        }
    }

    fn is_listening(&self) -> bool {
        self.listening.load(Ordering::Relaxed) && self.source.is_listening()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DropPolicy;
    use contracts::{SignalSample, SourceKind};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Source that emits a burst synchronously from `listen`
    struct BurstSource {
        count: usize,
        listening: Arc<AtomicBool>,
        callback: Mutex<Option<SensorEventCallback>>,
    }

    impl BurstSource {
        fn new(count: usize) -> Self {
            Self {
                count,
                listening: Arc::new(AtomicBool::new(false)),
                callback: Mutex::new(None),
            }
        }
    }

    impl SignalSource for BurstSource {
        fn source_id(&self) -> &str {
            "burst"
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
                    "burst",
                    SourceKind::WifiRssi,
                    i as f64,
                    SignalSample::default(),
                ));
            }
            *self.callback.lock().unwrap() = Some(callback);
        }

        fn stop(&self) {
            self.listening.store(false, Ordering::SeqCst);
        }

        fn is_listening(&self) -> bool {
            self.listening.load(Ordering::Relaxed)
        }
    }

    #[tokio::test]
    async fn flood_drops_oldest_without_blocking_producer() {
        let adapter = GenericSourceAdapter::new(
            Box::new(BurstSource::new(1_000)),
            BackpressureConfig {
                per_source_capacity: 8,
                merged_capacity: 4,
                drop_policy: DropPolicy::DropOldest,
            },
        );
        // merged queue is never read, so the forwarder stalls after 4 events
        let (merged_tx, merged_rx) = bounded(4);
        let metrics = Arc::new(IngestionMetrics::new());

        // the whole burst is emitted inside `start`; returning proves the producer never blocked
        adapter.start(merged_tx, metrics.clone());
        assert!(adapter.is_listening());

        tokio::time::sleep(Duration::from_millis(50)).await;
        let snap = metrics.snapshot();
        assert_eq!(snap.events_received, 1_000);
        assert!(snap.events_dropped >= 1_000 - 8 - 4 - 1);

        // the newest event survived in the source queue
        let mut last = 0.0;
        while let Ok(ev) = merged_rx.try_recv() {
            last = ev.timestamp;
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(last, 999.0);

        adapter.stop();
        assert!(!adapter.is_listening());
    }

    #[tokio::test]
    async fn stop_lets_forwarder_drain_and_release_merged_queue() {
        let adapter = GenericSourceAdapter::new(
            Box::new(BurstSource::new(20)),
            BackpressureConfig {
                per_source_capacity: 32,
                merged_capacity: 2,
                drop_policy: DropPolicy::DropOldest,
            },
        );
        let (merged_tx, merged_rx) = bounded(2);
        let metrics = Arc::new(IngestionMetrics::new());
        adapter.start(merged_tx, metrics.clone());
        adapter.stop();

        let mut got = Vec::new();
        while let Ok(ev) = tokio::time::timeout(Duration::from_secs(2), merged_rx.recv())
            .await
            .unwrap()
        {
            got.push(ev.timestamp);
        }
        assert_eq!(got, (0..20).map(|i| i as f64).collect::<Vec<_>>());
        assert_eq!(metrics.snapshot().events_forwarded, 20);
        assert_eq!(metrics.snapshot().events_dropped, 0);
    }
}
