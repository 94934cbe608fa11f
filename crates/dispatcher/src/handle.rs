//! SinkHandle - one sink behind its own bounded queue and worker task

use std::sync::Arc;

use contracts::{FusedSnapshot, SnapshotSink};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, instrument, warn};

use crate::metrics::SinkMetrics;

/// Handle to a running sink worker
pub struct SinkHandle {
    name: String,
    tx: mpsc::Sender<Arc<FusedSnapshot>>,
    metrics: Arc<SinkMetrics>,
    worker: JoinHandle<()>,
}

impl SinkHandle {
    /// Spawn the worker for `sink`. Must be called inside a tokio runtime.
    pub fn spawn<S: SnapshotSink + Send + 'static>(sink: S, queue_capacity: usize) -> Self {
        let name = sink.name().to_string();
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        let metrics = Arc::new(SinkMetrics::new());

        let worker = tokio::spawn(sink_worker(sink, rx, Arc::clone(&metrics), name.clone()));

        Self {
            name,
            tx,
            metrics,
            worker,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn metrics(&self) -> &Arc<SinkMetrics> {
        &self.metrics
    }

    /// Queue a snapshot without waiting; a full queue drops it.
    pub fn try_send(&self, snapshot: Arc<FusedSnapshot>) -> bool {
        match self.tx.try_send(snapshot) {
            Ok(()) => {
                self.metrics
                    .set_queue_len(self.tx.max_capacity() - self.tx.capacity());
                true
            }
            Err(mpsc::error::TrySendError::Full(s)) => {
                self.metrics.record_drop();
                metrics::counter!("echosense_sink_dropped_total", "sink" => self.name.clone())
                    .increment(1);
                warn!(sink = %self.name, tick_id = s.tick_id, "sink queue full, snapshot dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                error!(sink = %self.name, "sink worker closed unexpectedly");
                false
            }
        }
    }

    /// Close the queue, let the worker drain it, then flush and close the sink
    #[instrument(name = "sink_handle_shutdown", skip(self), fields(sink = %self.name))]
    pub async fn shutdown(self) {
        drop(self.tx);
        if let Err(e) = self.worker.await {
            error!(sink = %self.name, error = ?e, "sink worker panicked");
        }
        debug!(sink = %self.name, "sink handle shut down");
    }
}

#[instrument(name = "sink_worker_loop", skip(sink, rx, metrics), fields(sink = %name))]
async fn sink_worker<S: SnapshotSink + Send>(
    mut sink: S,
    mut rx: mpsc::Receiver<Arc<FusedSnapshot>>,
    metrics: Arc<SinkMetrics>,
    name: String,
) {
    debug!(sink = %name, "sink worker started");

    while let Some(snapshot) = rx.recv().await {
        metrics.set_queue_len(rx.len());

        match sink.write(&snapshot).await {
            Ok(()) => metrics.record_write(snapshot.tick_id),
            Err(e) => {
                // one failed write never stops the sink
                metrics.record_failure();
                metrics::counter!("echosense_sink_failures_total", "sink" => name.clone())
                    .increment(1);
                error!(sink = %name, tick_id = snapshot.tick_id, error = %e, "sink write failed");
            }
        }
    }

    if let Err(e) = sink.flush().await {
        error!(sink = %name, error = %e, "flush failed on shutdown");
    }
    if let Err(e) = sink.close().await {
        error!(sink = %name, error = %e, "close failed on shutdown");
    }

    debug!(sink = %name, "sink worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::ContractError;
    use std::sync::atomic::{AtomicU64, Ordering};
    use tokio::time::{sleep, Duration};

    struct MockSink {
        name: String,
        written: Arc<AtomicU64>,
        should_fail: bool,
        delay_ms: u64,
    }

    impl MockSink {
        fn new(name: &str, written: Arc<AtomicU64>) -> Self {
            Self {
                name: name.into(),
                written,
                should_fail: false,
                delay_ms: 0,
            }
        }
    }

    impl SnapshotSink for MockSink {
        fn name(&self) -> &str {
            &self.name
        }

        async fn write(&mut self, _snapshot: &FusedSnapshot) -> Result<(), ContractError> {
            if self.delay_ms > 0 {
                sleep(Duration::from_millis(self.delay_ms)).await;
            }
            if self.should_fail {
                return Err(ContractError::sink_write(&self.name, "mock failure"));
            }
            self.written.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }

        async fn flush(&mut self) -> Result<(), ContractError> {
            Ok(())
        }

        async fn close(&mut self) -> Result<(), ContractError> {
            Ok(())
        }
    }

    fn snapshot(tick: u64) -> Arc<FusedSnapshot> {
        Arc::new(FusedSnapshot::empty(tick, tick as f64 * 0.1))
    }

    #[tokio::test]
    async fn delivers_in_order_and_drains_on_shutdown() {
        let written = Arc::new(AtomicU64::new(0));
        let handle = SinkHandle::spawn(MockSink::new("test", written.clone()), 10);

        for i in 1..=5 {
            assert!(handle.try_send(snapshot(i)));
        }
        let metrics = handle.metrics().clone();
        handle.shutdown().await;

        assert_eq!(written.load(Ordering::Relaxed), 5);
        assert_eq!(metrics.snapshot().last_tick_id, 5);
    }

    #[tokio::test]
    async fn slow_sink_drops_instead_of_blocking() {
        let mut sink = MockSink::new("slow", Arc::new(AtomicU64::new(0)));
        sink.delay_ms = 100;
        let handle = SinkHandle::spawn(sink, 2);

        for i in 1..=10 {
            handle.try_send(snapshot(i));
        }
        assert!(handle.metrics().dropped() > 0);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn write_failures_are_counted_not_fatal() {
        let mut sink = MockSink::new("failing", Arc::new(AtomicU64::new(0)));
        sink.should_fail = true;
        let handle = SinkHandle::spawn(sink, 10);

        for i in 1..=3 {
            handle.try_send(snapshot(i));
        }
        sleep(Duration::from_millis(50)).await;
        assert_eq!(handle.metrics().failed(), 3);
        handle.shutdown().await;
    }
}
