//! # Ingestion Pipeline
//!
//! Producers of sensor events and the merge queue feeding the fusion engine.
//!
//! Responsibilities:
//! - Decode producer wire formats (`RSS:`, `WIFI:`, CSI lines, camera JSON)
//! - Condition WiFi samples inside the producer task
//! - Register sources (UDP listeners or mocks)
//! - Per-source bounded queues with drop-oldest backpressure
//! - Merge all sources into one channel
//!
//! ## Usage Example
//!
//! ```ignore
//! use ingestion::{IngestionPipeline, SourceMode};
//!
//! let mut pipeline = IngestionPipeline::from_blueprint(&blueprint, SourceMode::Udp)?;
//! let rx = pipeline.take_receiver().unwrap();
//! pipeline.start_all();
//! while let Ok(event) = rx.recv().await {
//!     engine.push(event);
//! }
//! ```

mod adapter;
mod config;
mod decoder;
mod error;
mod generic_adapter;
mod mock;
mod pipeline;
mod queue;
mod udp;
pub mod wire;

// Re-exports
pub use adapter::SourceAdapter;
pub use config::{BackpressureConfig, DropPolicy, IngestionMetrics, MetricsSnapshot};
pub use decoder::{EventDecoder, StreamClock};
pub use error::{IngestionError, Result};
pub use generic_adapter::GenericSourceAdapter;
pub use mock::{MockSignalSource, MockSourceConfig, SimulationScript};
pub use pipeline::{IngestionPipeline, SourceMode};
pub use queue::send_event;
pub use udp::UdpSignalSource;
pub use wire::WireError;
