//! # Fusion Engine
//!
//! Camera + WiFi track fusion.
//!
//! Responsibilities:
//! - Associate camera detections to tracks (nearest bbox center, class gated)
//! - Run the handoff state machine
//!   `CAMERA_ACTIVE -> HANDOFF_PENDING -> WIFI_ACTIVE -> CAMERA_ACTIVE`, `LOST` terminal
//! - Emit a `FusedSnapshot` per tick
//!
//! ## Usage Example
//!
//! ```ignore
//! use fusion_engine::{FusionEngine, FusionRunner};
//!
//! let engine = FusionEngine::new(blueprint.engine.clone());
//! let report = FusionRunner::new(engine, events_rx, snapshot_tx, shutdown_rx)
//!     .spawn()
//!     .await?;
//! ```
//!
//! WiFi motion cannot tell entities apart: it is attributed to every track
//! currently in `HANDOFF_PENDING` or `WIFI_ACTIVE`.

mod association;
mod engine;
mod runner;
mod track;

pub use association::{associate, Assignment};
pub use engine::FusionEngine;
pub use runner::{FusionRunner, RunnerReport, StopReason};
pub use track::{distance_proxy_m, Track};

pub use contracts::{EngineConfig, FusedSnapshot, TrackState, TrackSummary};
