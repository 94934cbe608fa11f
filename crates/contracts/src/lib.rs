//! # Contracts
//!
//! Frozen interface contracts, defining inter-module data structures and traits.
//! All business crates can only depend on this crate, reverse dependencies are prohibited.
//!
//! ## Time Model
//! - Timestamps are seconds (f64) on the process monotonic clock ([`MonotonicClock`])
//! - Timestamps strictly increase per [`SourceId`]; no ordering is promised across sources

mod blueprint;
mod clock;
mod engine_config;
mod error;
mod event;
mod signal_source;
mod sink;
mod snapshot;
mod source_id;

pub use blueprint::*;
pub use clock::MonotonicClock;
pub use engine_config::*;
pub use error::*;
pub use event::*;
pub use signal_source::{SensorEventCallback, SignalSource};
pub use sink::*;
pub use snapshot::*;
pub use source_id::SourceId;
