//! Pipeline run statistics.

use std::time::Duration;

use dispatcher::SinkStats;
use fusion_engine::StopReason;
use ingestion::MetricsSnapshot;
use observability::FusionSummary;

/// Statistics from a pipeline run
#[derive(Debug, Clone)]
pub struct PipelineStats {
    pub reason: StopReason,
    pub ticks: u64,
    /// Snapshots accepted by the dispatcher, terminal one included
    pub snapshots_sent: u64,
    pub snapshots_dropped: u64,
    pub duration: Duration,
    pub active_sources: usize,
    pub active_sinks: usize,
    pub ingestion: MetricsSnapshot,
    pub sinks: Vec<(String, SinkStats)>,
    pub fusion: FusionSummary,
}

impl PipelineStats {
    pub fn tick_rate(&self) -> f64 {
        if self.duration.as_secs_f64() > 0.0 {
            self.ticks as f64 / self.duration.as_secs_f64()
        } else {
            0.0
        }
    }

    /// Share of received events evicted from producer queues, in percent
    pub fn event_drop_rate(&self) -> f64 {
        if self.ingestion.events_received > 0 {
            self.ingestion.events_dropped as f64 / self.ingestion.events_received as f64 * 100.0
        } else {
            0.0
        }
    }

    pub fn print_summary(&self) {
        println!("\n=== Run Summary ===\n");

        println!("Overview");
        println!("   ├─ Stopped by: {}", reason_label(self.reason));
        println!("   ├─ Duration: {:.2}s", self.duration.as_secs_f64());
        println!("   ├─ Ticks: {} ({:.2}/s)", self.ticks, self.tick_rate());
        println!(
            "   ├─ Snapshots: {} sent, {} dropped",
            self.snapshots_sent, self.snapshots_dropped
        );
        println!("   ├─ Active sources: {}", self.active_sources);
        println!("   └─ Active sinks: {}", self.active_sinks);

        println!("\nIngestion");
        println!("   ├─ Events received: {}", self.ingestion.events_received);
        println!(
            "   ├─ Events dropped: {} ({:.2}%)",
            self.ingestion.events_dropped,
            self.event_drop_rate()
        );
        println!("   ├─ Events forwarded: {}", self.ingestion.events_forwarded);
        println!("   └─ Parse errors: {}", self.ingestion.parse_errors);

        if !self.sinks.is_empty() {
            println!("\nSinks");
            for (i, (name, stats)) in self.sinks.iter().enumerate() {
                let prefix = if i + 1 == self.sinks.len() { "└─" } else { "├─" };
                println!(
                    "   {prefix} {name}: {} written, {} failed, {} dropped",
                    stats.written, stats.failed, stats.dropped
                );
            }
        }

        println!("\n{}", self.fusion);
    }
}

pub fn reason_label(reason: StopReason) -> &'static str {
    match reason {
        StopReason::Shutdown => "shutdown signal",
        StopReason::InputClosed => "all sources closed",
        StopReason::MaxTicks => "tick limit",
    }
}
