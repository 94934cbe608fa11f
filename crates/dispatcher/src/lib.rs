//! # Dispatcher
//!
//! Snapshot distribution.
//!
//! - Consumes `FusedSnapshot` from the fusion runner
//! - Fans out to every configured sink and in-process subscriber
//! - Isolates slow sinks so they never block the tick loop

pub mod dispatcher;
pub mod error;
pub mod handle;
pub mod metrics;
pub mod sinks;

pub use contracts::{FusedSnapshot, SnapshotSink};
pub use dispatcher::{
    create_dispatcher, DispatchReport, Dispatcher, DispatcherBuilder, DispatcherConfig,
};
pub use error::DispatcherError;
pub use handle::SinkHandle;
pub use metrics::{SinkMetrics, SinkStats};
pub use sinks::{FileSink, LogSink, NetworkSink, TcpSink};
