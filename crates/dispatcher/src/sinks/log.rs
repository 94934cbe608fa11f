//! LogSink - logs a snapshot summary via tracing

use contracts::{ContractError, FusedSnapshot, SnapshotSink, TrackState};
use tracing::{info, instrument};

/// Sink that logs per-tick track counts for debugging
pub struct LogSink {
    name: String,
}

impl LogSink {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    fn log_summary(&self, snapshot: &FusedSnapshot) {
        let motion = |m: &Option<contracts::ModalityMetrics>| {
            m.as_ref().is_some_and(|m| m.sample.motion && !m.stale)
        };

        info!(
            sink = %self.name,
            tick_id = snapshot.tick_id,
            t = snapshot.timestamp,
            tracks = snapshot.tracks.len(),
            camera_active = snapshot.count_in(TrackState::CameraActive),
            handoff_pending = snapshot.count_in(TrackState::HandoffPending),
            wifi_active = snapshot.count_in(TrackState::WifiActive),
            lost = snapshot.count_in(TrackState::Lost),
            rssi_motion = motion(&snapshot.signals.rssi),
            csi_motion = motion(&snapshot.signals.csi),
            terminal = snapshot.terminal,
            "FusedSnapshot received"
        );
    }
}

impl SnapshotSink for LogSink {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(
        name = "log_sink_write",
        skip(self, snapshot),
        fields(sink = %self.name, tick_id = snapshot.tick_id)
    )]
    async fn write(&mut self, snapshot: &FusedSnapshot) -> Result<(), ContractError> {
        self.log_summary(snapshot);
        Ok(())
    }

    #[instrument(name = "log_sink_flush", skip(self))]
    async fn flush(&mut self) -> Result<(), ContractError> {
        Ok(())
    }

    #[instrument(name = "log_sink_close", skip(self))]
    async fn close(&mut self) -> Result<(), ContractError> {
        info!(sink = %self.name, "LogSink closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_never_fails() {
        let mut sink = LogSink::new("test_log");
        let mut snapshot = FusedSnapshot::empty(1, 0.1);
        snapshot.terminal = true;
        assert!(sink.write(&snapshot).await.is_ok());
        assert!(sink.close().await.is_ok());
    }

    #[test]
    fn keeps_its_name() {
        assert_eq!(LogSink::new("my_logger").name(), "my_logger");
    }
}
