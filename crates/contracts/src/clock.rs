//! MonotonicClock - shared time base
//!
//! All event timestamps and tick times are seconds (f64) since one process-wide
//! epoch, so producers on different tasks compare consistently.

use std::sync::OnceLock;
use std::time::Instant;

/// Monotonic seconds since a fixed epoch
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    epoch: Instant,
}

impl MonotonicClock {
    /// Clock with its epoch at the moment of the call
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }

    /// Process-wide clock, epoch fixed on first use
    pub fn global() -> Self {
        static GLOBAL: OnceLock<MonotonicClock> = OnceLock::new();
        *GLOBAL.get_or_init(MonotonicClock::new)
    }

    pub fn now(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }

    /// Convert an `Instant` to clock seconds (0 for instants before the epoch)
    pub fn at(&self, instant: Instant) -> f64 {
        instant
            .checked_duration_since(self.epoch)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}
