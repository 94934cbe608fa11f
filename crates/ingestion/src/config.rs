//! Backpressure configuration and metrics

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

pub use contracts::DropPolicy;
use contracts::QueueConfig;

/// Backpressure configuration
#[derive(Debug, Clone)]
pub struct BackpressureConfig {
    /// Bounded queue owned by each producer
    pub per_source_capacity: usize,

    /// Merged queue read by the fusion engine
    pub merged_capacity: usize,

    /// What to drop when a producer queue is full
    pub drop_policy: DropPolicy,
}

impl Default for BackpressureConfig {
    fn default() -> Self {
        Self::from(&QueueConfig::default())
    }
}

impl From<&QueueConfig> for BackpressureConfig {
    fn from(queue: &QueueConfig) -> Self {
        Self {
            per_source_capacity: queue.per_source_capacity.max(1),
            merged_capacity: queue.merged_capacity.max(1),
            drop_policy: queue.drop_policy,
        }
    }
}

/// Ingestion metrics shared by all sources of one pipeline
#[derive(Debug, Default)]
pub struct IngestionMetrics {
    /// Events handed to a producer queue
    pub events_received: AtomicU64,

    /// Events evicted (drop-oldest) or refused (drop-newest) by a full producer
    /// queue, or still queued when the consumer went away
    pub events_dropped: AtomicU64,

    /// Events moved into the merged queue
    pub events_forwarded: AtomicU64,

    /// Merged queue length at the last forward
    pub queue_len: AtomicUsize,

    /// Malformed or rejected payloads
    pub parse_errors: AtomicU64,
}

impl IngestionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_received(&self) {
        self.events_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.record_dropped_n(1);
    }

    pub fn record_dropped_n(&self, count: u64) {
        self.events_dropped.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_forwarded(&self) {
        self.events_forwarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_parse_error(&self) {
        self.parse_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn update_queue_len(&self, len: usize) {
        self.queue_len.store(len, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            events_received: self.events_received.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
            events_forwarded: self.events_forwarded.load(Ordering::Relaxed),
            queue_len: self.queue_len.load(Ordering::Relaxed),
            parse_errors: self.parse_errors.load(Ordering::Relaxed),
        }
    }
}

/// Metrics snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub events_received: u64,
    pub events_dropped: u64,
    pub events_forwarded: u64,
    pub queue_len: usize,
    pub parse_errors: u64,
}
