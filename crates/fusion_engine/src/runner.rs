//! Tick loop driving a `FusionEngine` from the merged ingestion queue.

use std::time::{Duration, Instant};

use async_channel::Receiver;
use contracts::{EngineDiagnostics, FusedSnapshot, MonotonicClock, SensorEvent};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument, warn};

use crate::engine::FusionEngine;

/// Upper bound on waiting for the distributor to accept the terminal snapshot
const TERMINAL_SEND_TIMEOUT: Duration = Duration::from_secs(1);

/// Default upper bound on waiting for producers to close the queue at shutdown
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Why the loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Shutdown signalled (or its sender dropped)
    Shutdown,
    /// All producers are gone and the queue is drained
    InputClosed,
    /// Configured tick limit reached
    MaxTicks,
}

#[derive(Debug, Clone)]
pub struct RunnerReport {
    pub reason: StopReason,
    pub ticks: u64,
    pub snapshots_sent: u64,
    /// Snapshots refused by a full distributor queue
    pub snapshots_dropped: u64,
    /// Events consumed after the loop ended, before the terminal snapshot
    pub events_drained: u64,
    /// False when the shutdown drain gave up before every producer closed
    pub drain_complete: bool,
    pub diagnostics: EngineDiagnostics,
    pub final_snapshot: FusedSnapshot,
}

/// Single consumer of the event stream; owns the engine for its whole life.
pub struct FusionRunner {
    engine: FusionEngine,
    input: Receiver<SensorEvent>,
    output: mpsc::Sender<FusedSnapshot>,
    shutdown: watch::Receiver<bool>,
    clock: MonotonicClock,
    max_ticks: Option<u64>,
    drain_timeout: Duration,
}

#[derive(Default)]
struct EmitStats {
    sent: u64,
    dropped: u64,
}

impl FusionRunner {
    pub fn new(
        engine: FusionEngine,
        input: Receiver<SensorEvent>,
        output: mpsc::Sender<FusedSnapshot>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            engine,
            input,
            output,
            shutdown,
            clock: MonotonicClock::global(),
            max_ticks: None,
            drain_timeout: DRAIN_TIMEOUT,
        }
    }

    /// Stop after `max_ticks` regular ticks
    pub fn with_max_ticks(mut self, max_ticks: Option<u64>) -> Self {
        self.max_ticks = max_ticks;
        self
    }

    /// How long shutdown waits for producers to close the queue
    pub fn with_drain_timeout(mut self, drain_timeout: Duration) -> Self {
        self.drain_timeout = drain_timeout;
        self
    }

    pub fn spawn(self) -> JoinHandle<RunnerReport> {
        tokio::spawn(self.run())
    }

    #[instrument(name = "fusion_runner_run", skip(self))]
    pub async fn run(self) -> RunnerReport {
        let Self {
            mut engine,
            input,
            output,
            mut shutdown,
            clock,
            max_ticks,
            drain_timeout,
        } = self;

        let tick_every = Duration::from_millis(engine.config().tick_interval_ms.max(1));
        let mut interval = tokio::time::interval(tick_every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut stats = EmitStats::default();

        info!(tick_ms = tick_every.as_millis() as u64, ?max_ticks, "fusion runner started");

        let reason = loop {
            tokio::select! {
                biased;
                _ = shutdown.wait_for(|stop| *stop) => break StopReason::Shutdown,
                _ = interval.tick() => {
                    // events already queued belong to this tick
                    for _ in 0..input.len() {
                        match input.try_recv() {
                            Ok(event) => engine.push(event),
                            Err(_) => break,
                        }
                    }
                    let started = Instant::now();
                    let snapshot = engine.tick(clock.now());
                    metrics::histogram!("echosense_tick_duration_seconds")
                        .record(started.elapsed().as_secs_f64());
                    emit(&output, snapshot, &mut stats);
                    if max_ticks.is_some_and(|max| engine.tick_count() >= max) {
                        break StopReason::MaxTicks;
                    }
                }
                event = input.recv() => match event {
                    Ok(event) => engine.push(event),
                    Err(_) => break StopReason::InputClosed,
                },
            }
        };

        let mut drained = 0u64;
        let mut drain_complete = true;
        if reason == StopReason::Shutdown {
            // producers are stopping; take everything up to the last forwarded event
            let until_closed = async {
                while let Ok(event) = input.recv().await {
                    engine.push(event);
                    drained += 1;
                }
            };
            if tokio::time::timeout(drain_timeout, until_closed).await.is_err() {
                drain_complete = false;
                warn!(
                    timeout_ms = drain_timeout.as_millis() as u64,
                    "input still open after drain timeout"
                );
            }
        }
        // forwarders still holding events count them as dropped once this closes
        input.close();
        while let Ok(event) = input.try_recv() {
            engine.push(event);
            drained += 1;
        }
        debug!(drained, drain_complete, ?reason, "fusion runner drained queue");

        let final_snapshot = engine.finish(clock.now());
        match tokio::time::timeout(TERMINAL_SEND_TIMEOUT, output.send(final_snapshot.clone())).await {
            Ok(Ok(())) => stats.sent += 1,
            Ok(Err(_)) => debug!("distributor gone before terminal snapshot"),
            Err(_) => {
                stats.dropped += 1;
                warn!("distributor did not accept terminal snapshot in time");
            }
        }

        info!(
            ?reason,
            ticks = engine.tick_count(),
            snapshots = stats.sent,
            dropped = stats.dropped,
            "fusion runner stopped"
        );

        RunnerReport {
            reason,
            ticks: engine.tick_count(),
            snapshots_sent: stats.sent,
            snapshots_dropped: stats.dropped,
            events_drained: drained,
            drain_complete,
            diagnostics: engine.diagnostics(),
            final_snapshot,
        }
    }
}

/// Hand a snapshot to the distributor without waiting
fn emit(output: &mpsc::Sender<FusedSnapshot>, snapshot: FusedSnapshot, stats: &mut EmitStats) {
    match output.try_send(snapshot) {
        Ok(()) => stats.sent += 1,
        Err(mpsc::error::TrySendError::Full(snapshot)) => {
            stats.dropped += 1;
            metrics::counter!("echosense_snapshots_dropped_total").increment(1);
            warn!(tick_id = snapshot.tick_id, "distributor queue full, snapshot dropped");
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            stats.dropped += 1;
            debug!("distributor closed, snapshot discarded");
        }
    }
}
