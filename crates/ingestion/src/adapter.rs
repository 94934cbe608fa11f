//! Source adapter trait

use std::sync::Arc;

use async_channel::Sender;
use contracts::{SensorEvent, SourceKind};

use crate::config::IngestionMetrics;

/// Bridges one producer into the ingestion queues:
/// 1. owns the producer's bounded queue
/// 2. registers the producer callback
/// 3. forwards queued events into the merged queue
pub trait SourceAdapter: Send + Sync {
    fn source_id(&self) -> &str;

    fn kind(&self) -> SourceKind;

    /// Start producing into `merged`. Must be called inside a tokio runtime.
    fn start(&self, merged: Sender<SensorEvent>, metrics: Arc<IngestionMetrics>);

    fn stop(&self);

    fn is_listening(&self) -> bool;
}
