//! Pipeline orchestrator - wires ingestion, the fusion runner and the dispatcher.

use std::future::Future;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use contracts::{FusedSnapshot, FusionBlueprint};
use dispatcher::DispatchReport;
use fusion_engine::{FusionEngine, FusionRunner};
use ingestion::{IngestionPipeline, SourceMode};
use observability::{record_snapshot_metrics, FusionMetricsAggregator};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::PipelineStats;
use crate::error::CliError;

/// Upper bound on sinks draining after the runner stops
const DISPATCHER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub blueprint: FusionBlueprint,
    pub mode: SourceMode,
    /// Stop after this many ticks
    pub max_ticks: Option<u64>,
    /// Stop after this long
    pub timeout: Option<Duration>,
    /// Prometheus port, `None` disables the exporter
    pub metrics_port: Option<u16>,
}

pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    /// Run until `shutdown` resolves, the timeout or tick limit is hit, or
    /// every source is gone.
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> Result<PipelineStats> {
        let start_time = Instant::now();
        let blueprint = &self.config.blueprint;

        if let Some(port) = self.config.metrics_port {
            observability::init_metrics_only(port)?;
        }

        info!(mode = ?self.config.mode, "Setting up ingestion pipeline...");
        let mut ingestion = IngestionPipeline::from_blueprint(blueprint, self.config.mode)
            .context("Failed to set up sources")?;
        if ingestion.source_count() == 0 {
            return Err(CliError::NoSources.into());
        }
        let active_sources = ingestion.source_count();

        info!("Setting up dispatcher...");
        let (snapshot_tx, snapshot_rx) = mpsc::channel::<FusedSnapshot>(blueprint.queue.snapshot_capacity.max(1));
        if blueprint.sinks.is_empty() {
            warn!("No sinks configured - snapshots only feed metrics");
        }
        let dispatcher = dispatcher::create_dispatcher(blueprint.sinks.clone(), snapshot_rx)
            .await
            .context("Failed to create dispatcher")?;
        let active_sinks = blueprint.sinks.len();
        let stats_task = spawn_stats_collector(dispatcher.subscribe());
        let mut dispatcher_task = dispatcher.spawn();
        info!(active_sinks, "Dispatcher started");

        ingestion.start_all();
        let events = ingestion
            .take_receiver()
            .context("Ingestion receiver already taken")?;
        info!(active_sources, "Sources started");

        let (stop_tx, stop_rx) = watch::channel(false);
        let engine = FusionEngine::new(blueprint.engine.clone());
        let mut runner_task = FusionRunner::new(engine, events, snapshot_tx, stop_rx)
            .with_max_ticks(self.config.max_ticks)
            .spawn();

        let timeout = self.config.timeout;
        let deadline = async move {
            match timeout {
                Some(after) => tokio::time::sleep(after).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(shutdown, deadline);

        let finished_early = tokio::select! {
            report = &mut runner_task => Some(report),
            _ = &mut shutdown => {
                warn!("Received shutdown signal, stopping pipeline...");
                None
            }
            _ = &mut deadline => {
                warn!(timeout_secs = timeout.map(|t| t.as_secs()), "Pipeline timeout reached");
                None
            }
        };

        info!("Shutting down pipeline...");
        ingestion.close();
        stop_tx.send_replace(true);

        let report = match finished_early {
            Some(report) => report,
            None => runner_task.await,
        }
        .map_err(|e| CliError::task_failed("fusion runner", e.to_string()))?;

        let dispatch =
            match tokio::time::timeout(DISPATCHER_DRAIN_TIMEOUT, &mut dispatcher_task).await {
                Ok(joined) => {
                    joined.map_err(|e| CliError::task_failed("dispatcher", e.to_string()))?
                }
                Err(_) => {
                    // aborting drops the subscriber channel so the collector ends too
                    warn!("Dispatcher did not drain in time");
                    dispatcher_task.abort();
                    DispatchReport::default()
                }
            };
        let aggregator = stats_task
            .await
            .map_err(|e| CliError::task_failed("stats collector", e.to_string()))?;

        let stats = PipelineStats {
            reason: report.reason,
            ticks: report.ticks,
            snapshots_sent: report.snapshots_sent,
            snapshots_dropped: report.snapshots_dropped,
            duration: start_time.elapsed(),
            active_sources,
            active_sinks,
            ingestion: ingestion.metrics().snapshot(),
            sinks: dispatch.sinks,
            fusion: aggregator.summary(),
        };

        info!(
            reason = ?stats.reason,
            ticks = stats.ticks,
            duration_secs = stats.duration.as_secs_f64(),
            "Pipeline shutdown complete"
        );
        Ok(stats)
    }
}

/// Feed every dispatched snapshot into metrics; ends when the dispatcher does
fn spawn_stats_collector(
    mut rx: broadcast::Receiver<std::sync::Arc<FusedSnapshot>>,
) -> JoinHandle<FusionMetricsAggregator> {
    tokio::spawn(async move {
        let mut aggregator = FusionMetricsAggregator::new();
        loop {
            match rx.recv().await {
                Ok(snapshot) => {
                    record_snapshot_metrics(&snapshot);
                    aggregator.update(&snapshot);
                    if snapshot.terminal {
                        info!(tick_id = snapshot.tick_id, tracks = snapshot.tracks.len(), "Terminal snapshot");
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "Stats collector lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        aggregator
    })
}
