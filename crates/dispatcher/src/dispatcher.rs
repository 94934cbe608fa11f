//! Dispatcher - main loop for fan-out to sinks and in-process subscribers

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument};

use contracts::{FusedSnapshot, SinkConfig, SinkType};

use crate::error::DispatcherError;
use crate::handle::SinkHandle;
use crate::metrics::SinkStats;
use crate::sinks::{FileSink, LogSink, NetworkSink, TcpSink};

/// Capacity of the in-process subscriber channel
pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 64;

/// Dispatcher configuration
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub sinks: Vec<SinkConfig>,
    /// Snapshots buffered per in-process subscriber before it starts skipping
    pub subscriber_capacity: usize,
}

impl DispatcherConfig {
    pub fn new(sinks: Vec<SinkConfig>) -> Self {
        Self {
            sinks,
            subscriber_capacity: DEFAULT_SUBSCRIBER_CAPACITY,
        }
    }
}

/// Builder for creating a Dispatcher
pub struct DispatcherBuilder {
    config: DispatcherConfig,
    input_rx: mpsc::Receiver<FusedSnapshot>,
}

impl DispatcherBuilder {
    pub fn new(config: DispatcherConfig, input_rx: mpsc::Receiver<FusedSnapshot>) -> Self {
        Self { config, input_rx }
    }

    /// Create every configured sink and start its worker.
    ///
    /// Fails on the first sink that cannot be created; workers already
    /// started for earlier sinks are shut down.
    #[instrument(name = "dispatcher_builder_build", skip(self), fields(sink_count = self.config.sinks.len()))]
    pub async fn build(self) -> Result<Dispatcher, DispatcherError> {
        let mut handles = Vec::with_capacity(self.config.sinks.len());
        for sink_config in &self.config.sinks {
            match create_sink_handle(sink_config).await {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    for handle in handles {
                        handle.shutdown().await;
                    }
                    return Err(e);
                }
            }
        }

        let (subscribers, _) = broadcast::channel(self.config.subscriber_capacity.max(1));
        Ok(Dispatcher {
            handles,
            input_rx: self.input_rx,
            subscribers,
        })
    }
}

/// Create a SinkHandle from configuration
#[instrument(
    name = "dispatcher_create_sink_handle",
    skip(config),
    fields(sink = %config.name, sink_type = ?config.sink_type)
)]
async fn create_sink_handle(config: &SinkConfig) -> Result<SinkHandle, DispatcherError> {
    let handle = match config.sink_type {
        SinkType::Log => SinkHandle::spawn(LogSink::new(&config.name), config.queue_capacity),
        SinkType::File => {
            let sink = FileSink::from_params(&config.name, &config.params)
                .map_err(|e| DispatcherError::sink_creation(&config.name, e.to_string()))?;
            SinkHandle::spawn(sink, config.queue_capacity)
        }
        SinkType::Network => {
            let sink = NetworkSink::from_params(&config.name, &config.params).await?;
            SinkHandle::spawn(sink, config.queue_capacity)
        }
        SinkType::Tcp => {
            let sink = TcpSink::from_params(&config.name, &config.params).await?;
            SinkHandle::spawn(sink, config.queue_capacity)
        }
    };
    Ok(handle)
}

/// What the dispatcher delivered before its input closed
#[derive(Debug, Clone, Default, Serialize)]
pub struct DispatchReport {
    pub snapshots: u64,
    pub sinks: Vec<(String, SinkStats)>,
}

/// Fans snapshots out to every sink and in-process subscriber
pub struct Dispatcher {
    handles: Vec<SinkHandle>,
    input_rx: mpsc::Receiver<FusedSnapshot>,
    subscribers: broadcast::Sender<Arc<FusedSnapshot>>,
}

impl Dispatcher {
    /// Create a dispatcher with custom sink handles
    pub fn with_handles(handles: Vec<SinkHandle>, input_rx: mpsc::Receiver<FusedSnapshot>) -> Self {
        let (subscribers, _) = broadcast::channel(DEFAULT_SUBSCRIBER_CAPACITY);
        Self {
            handles,
            input_rx,
            subscribers,
        }
    }

    /// In-process stream of snapshots.
    ///
    /// A receiver that falls behind gets `RecvError::Lagged` and skips ahead;
    /// it never slows the dispatcher down.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<FusedSnapshot>> {
        self.subscribers.subscribe()
    }

    pub fn sink_names(&self) -> Vec<String> {
        self.handles.iter().map(|h| h.name().to_string()).collect()
    }

    pub fn metrics(&self) -> Vec<(String, SinkStats)> {
        self.handles
            .iter()
            .map(|h| (h.name().to_string(), h.metrics().snapshot()))
            .collect()
    }

    /// Run the dispatcher main loop.
    ///
    /// Returns once the input channel is closed and every sink has drained.
    #[instrument(name = "dispatcher_run", skip(self))]
    pub async fn run(mut self) -> DispatchReport {
        info!(sinks = self.handles.len(), "dispatcher started");

        let mut snapshots: u64 = 0;
        while let Some(snapshot) = self.input_rx.recv().await {
            snapshots += 1;
            self.dispatch(Arc::new(snapshot));

            if snapshots.is_multiple_of(100) {
                debug!(snapshots, "dispatcher progress");
            }
        }

        info!(snapshots, "dispatcher input closed, shutting down sinks");

        let mut sinks = Vec::with_capacity(self.handles.len());
        for handle in self.handles {
            let name = handle.name().to_string();
            let metrics = Arc::clone(handle.metrics());
            handle.shutdown().await;
            sinks.push((name, metrics.snapshot()));
        }
        let report = DispatchReport { snapshots, sinks };

        info!("dispatcher shutdown complete");
        report
    }

    pub fn spawn(self) -> JoinHandle<DispatchReport> {
        tokio::spawn(self.run())
    }

    fn dispatch(&self, snapshot: Arc<FusedSnapshot>) {
        metrics::counter!("echosense_snapshots_dispatched_total").increment(1);
        for handle in &self.handles {
            handle.try_send(Arc::clone(&snapshot));
        }
        // no receivers is fine
        let _ = self.subscribers.send(snapshot);
    }
}

/// Build a dispatcher for `sink_configs` reading from `input_rx`
#[instrument(name = "dispatcher_create", skip(sink_configs, input_rx))]
pub async fn create_dispatcher(
    sink_configs: Vec<SinkConfig>,
    input_rx: mpsc::Receiver<FusedSnapshot>,
) -> Result<Dispatcher, DispatcherError> {
    DispatcherBuilder::new(DispatcherConfig::new(sink_configs), input_rx)
        .build()
        .await
}
