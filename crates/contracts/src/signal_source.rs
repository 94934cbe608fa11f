//! SignalSource trait - producer abstraction
//!
//! Decouples the ingestion pipeline from concrete producers (UDP listeners,
//! simulators, replay). Real and simulated sources share one API.

use std::sync::Arc;

use crate::{SensorEvent, SourceKind};

/// Event callback type
///
/// Producers hand every conditioned event to this callback. It must not block.
pub type SensorEventCallback = Arc<dyn Fn(SensorEvent) + Send + Sync>;

/// Producer of `SensorEvent`s for one source stream
///
/// ```ignore
/// let source: Box<dyn SignalSource> = build_source(&cfg)?;
/// source.listen(Arc::new(|event| println!("{} @ {}", event.source_id, event.timestamp)));
/// // ...
/// source.stop();
/// ```
pub trait SignalSource: Send + Sync {
    fn source_id(&self) -> &str;

    fn kind(&self) -> SourceKind;

    /// Start producing into `callback`
    ///
    /// Idempotent: calling again while listening does not register a second callback.
    fn listen(&self, callback: SensorEventCallback);

    /// Stop producing; already delivered events are unaffected
    fn stop(&self);

    /// False once stopped or after the producer task terminated
    fn is_listening(&self) -> bool;
}
