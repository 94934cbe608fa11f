//! Per-source bounded queues feeding the merged ingestion queue.

use std::sync::Arc;

use async_channel::{Receiver, Sender, TrySendError};
use contracts::{DropPolicy, SensorEvent};
use metrics::counter;
use tracing::{debug, trace, warn};

use crate::config::IngestionMetrics;

/// Enqueue without ever blocking the producer.
///
/// With `DropOldest` a full queue evicts its oldest event to make room, with
/// `DropNewest` the incoming event is discarded. Returns whether `event` was queued.
#[inline]
pub fn send_event(
    tx: &Sender<SensorEvent>,
    event: SensorEvent,
    metrics: &IngestionMetrics,
    source_id: &str,
    drop_policy: DropPolicy,
) -> bool {
    match drop_policy {
        DropPolicy::DropOldest => match tx.force_send(event) {
            Ok(None) => {
                trace!(source_id = %source_id, "event queued");
                true
            }
            Ok(Some(evicted)) => {
                metrics.record_dropped();
                counter!("echosense_events_dropped_total", "source_id" => source_id.to_string())
                    .increment(1);
                trace!(source_id = %source_id, evicted_ts = evicted.timestamp, "event dropped (oldest)");
                true
            }
            Err(_) => {
                warn!(source_id = %source_id, "source queue closed");
                false
            }
        },
        DropPolicy::DropNewest => match tx.try_send(event) {
            Ok(()) => {
                trace!(source_id = %source_id, "event queued");
                true
            }
            Err(TrySendError::Full(_)) => {
                metrics.record_dropped();
                counter!("echosense_events_dropped_total", "source_id" => source_id.to_string())
                    .increment(1);
                trace!(source_id = %source_id, "event dropped (newest)");
                false
            }
            Err(TrySendError::Closed(_)) => {
                warn!(source_id = %source_id, "source queue closed");
                false
            }
        },
    }
}

/// Move events from one source queue into the merged queue, preserving order.
///
/// Ends once the source queue is closed and empty. If the merged queue closes
/// first, whatever is still queued here is counted as dropped.
///
/// Awaiting the merged queue only ever stalls this task; the producer keeps
/// writing into its own queue and drops per policy when that fills up.
pub async fn forward(
    source_id: String,
    rx: Receiver<SensorEvent>,
    merged: Sender<SensorEvent>,
    metrics: Arc<IngestionMetrics>,
) {
    while let Ok(event) = rx.recv().await {
        if merged.send(event).await.is_err() {
            rx.close();
            let lost = 1 + rx.len() as u64;
            metrics.record_dropped_n(lost);
            counter!("echosense_events_dropped_total", "source_id" => source_id.clone())
                .increment(lost);
            warn!(source_id = %source_id, lost, "merged queue closed, queued events abandoned");
            return;
        }
        metrics.record_forwarded();
        metrics.update_queue_len(merged.len());
    }
    debug!(source_id = %source_id, "source queue drained, forwarder exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_channel::bounded;
    use contracts::{SignalSample, SourceKind};

    fn event(ts: f64) -> SensorEvent {
        SensorEvent::signal("esp8266", SourceKind::WifiRssi, ts, SignalSample::default())
    }

    #[test]
    fn drop_oldest_keeps_latest_events() {
        let (tx, rx) = bounded(4);
        let metrics = IngestionMetrics::new();
        for i in 0..10 {
            assert!(send_event(&tx, event(i as f64), &metrics, "esp8266", DropPolicy::DropOldest));
        }
        let kept: Vec<f64> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|e| e.timestamp)
            .collect();
        assert_eq!(kept, vec![6.0, 7.0, 8.0, 9.0]);
        assert_eq!(metrics.snapshot().events_dropped, 6);
    }

    #[test]
    fn drop_newest_keeps_earliest_events() {
        let (tx, rx) = bounded(4);
        let metrics = IngestionMetrics::new();
        for i in 0..10 {
            send_event(&tx, event(i as f64), &metrics, "esp8266", DropPolicy::DropNewest);
        }
        let kept: Vec<f64> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|e| e.timestamp)
            .collect();
        assert_eq!(kept, vec![0.0, 1.0, 2.0, 3.0]);
        assert_eq!(metrics.snapshot().events_dropped, 6);
    }

    #[test]
    fn closed_queue_reports_failure() {
        let (tx, rx) = bounded(1);
        drop(rx);
        let metrics = IngestionMetrics::new();
        assert!(!send_event(&tx, event(0.0), &metrics, "x", DropPolicy::DropOldest));
    }

    #[tokio::test]
    async fn forwarder_preserves_order_and_exits_when_drained() {
        let (src_tx, src_rx) = bounded(8);
        let (merged_tx, merged_rx) = bounded(8);
        let metrics = Arc::new(IngestionMetrics::new());
        for i in 0..5 {
            src_tx.send(event(i as f64)).await.unwrap();
        }
        drop(src_tx);
        forward("esp8266".into(), src_rx, merged_tx, metrics.clone()).await;

        let got: Vec<f64> = std::iter::from_fn(|| merged_rx.try_recv().ok())
            .map(|e| e.timestamp)
            .collect();
        assert_eq!(got, vec![0.0, 1.0, 2.0, 3.0, 4.0]);
        assert_eq!(metrics.snapshot().events_forwarded, 5);
    }

    #[tokio::test]
    async fn closed_merged_queue_counts_abandoned_events() {
        let (src_tx, src_rx) = bounded(8);
        let (merged_tx, merged_rx) = bounded(8);
        drop(merged_rx);
        let metrics = Arc::new(IngestionMetrics::new());
        for i in 0..3 {
            src_tx.send(event(i as f64)).await.unwrap();
        }
        forward("esp8266".into(), src_rx, merged_tx, metrics.clone()).await;

        let snap = metrics.snapshot();
        assert_eq!(snap.events_forwarded, 0);
        assert_eq!(snap.events_dropped, 3);
        assert!(src_tx.is_closed());
    }
}
