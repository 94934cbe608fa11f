//! Ingestion Pipeline main entry

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use async_channel::{bounded, Receiver, Sender};
use contracts::{FusionBlueprint, SensorEvent, SignalSource};
use tracing::{debug, info, instrument};

use crate::adapter::SourceAdapter;
use crate::config::{BackpressureConfig, IngestionMetrics};
use crate::decoder::EventDecoder;
use crate::error::{IngestionError, Result};
use crate::generic_adapter::GenericSourceAdapter;
use crate::mock::{MockSignalSource, MockSourceConfig};
use crate::udp::UdpSignalSource;

/// How blueprint sources are materialized
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceMode {
    /// Bind a UDP listener per source
    Udp,
    /// Replace every source with a mock producing the same wire format
    Simulated,
}

/// Ingestion Pipeline
///
/// Owns one adapter per source stream and the merged queue they feed.
pub struct IngestionPipeline {
    adapters: HashMap<String, Box<dyn SourceAdapter>>,
    metrics: Arc<IngestionMetrics>,
    /// Dropped by `close` so the merged receiver ends once forwarders drain
    tx: Option<Sender<SensorEvent>>,
    rx: Option<Receiver<SensorEvent>>,
    config: BackpressureConfig,
}

impl IngestionPipeline {
    pub fn new(config: BackpressureConfig) -> Self {
        let (tx, rx) = bounded(config.merged_capacity.max(1));
        Self {
            adapters: HashMap::new(),
            metrics: Arc::new(IngestionMetrics::new()),
            tx: Some(tx),
            rx: Some(rx),
            config,
        }
    }

    /// Build a pipeline with every enabled blueprint source registered
    #[instrument(name = "ingestion_from_blueprint", skip(blueprint), fields(sources = blueprint.sources.len()))]
    pub fn from_blueprint(blueprint: &FusionBlueprint, mode: SourceMode) -> Result<Self> {
        let mut pipeline = Self::new(BackpressureConfig::from(&blueprint.queue));

        for (index, cfg) in blueprint.enabled_sources().enumerate() {
            let decoder = EventDecoder::for_kind(cfg.kind, blueprint);
            let source: Box<dyn SignalSource> = match mode {
                SourceMode::Udp => {
                    let addr: SocketAddr =
                        cfg.bind.parse().map_err(|_| IngestionError::InvalidAddress {
                            source_id: cfg.id.clone(),
                            addr: cfg.bind.clone(),
                        })?;
                    Box::new(UdpSignalSource::bind(
                        cfg.id.as_str().into(),
                        addr,
                        decoder,
                        pipeline.metrics(),
                    )?)
                }
                SourceMode::Simulated => {
                    let mut mock = MockSourceConfig::for_kind(cfg.id.clone(), cfg.kind);
                    mock.seed = mock.seed.wrapping_add(index as u64);
                    Box::new(MockSignalSource::new(mock, decoder, pipeline.metrics()))
                }
            };
            pipeline.register_source(source)?;
        }

        Ok(pipeline)
    }

    /// Register a source; ids must be unique
    #[instrument(
        name = "ingestion_register_source",
        skip(self, source),
        fields(source_id = %source.source_id(), kind = %source.kind())
    )]
    pub fn register_source(&mut self, source: Box<dyn SignalSource>) -> Result<()> {
        let source_id = source.source_id().to_string();
        if self.adapters.contains_key(&source_id) {
            return Err(IngestionError::AlreadyRegistered { source_id });
        }
        let adapter = GenericSourceAdapter::new(source, self.config.clone());
        debug!(source_id = %source_id, "registered source");
        self.adapters.insert(source_id, Box::new(adapter));
        Ok(())
    }

    /// Start all registered sources. Must be called inside a tokio runtime.
    #[instrument(name = "ingestion_start_all", skip(self))]
    pub fn start_all(&self) {
        let Some(tx) = &self.tx else {
            debug!("pipeline closed, not starting sources");
            return;
        };
        info!(count = self.adapters.len(), "starting all sources");
        for (source_id, adapter) in &self.adapters {
            if !adapter.is_listening() {
                debug!(source_id = %source_id, "starting adapter");
                adapter.start(tx.clone(), self.metrics.clone());
            }
        }
    }

    #[instrument(name = "ingestion_stop_all", skip(self))]
    pub fn stop_all(&self) {
        info!(count = self.adapters.len(), "stopping all sources");
        for (source_id, adapter) in &self.adapters {
            debug!(source_id = %source_id, "stopping adapter");
            adapter.stop();
        }
    }

    /// Stop all sources and release the pipeline's sender; the merged
    /// receiver closes after already queued events are drained.
    pub fn close(&mut self) {
        self.stop_all();
        self.tx = None;
    }

    /// Merged event stream. Can only be taken once.
    pub fn take_receiver(&mut self) -> Option<Receiver<SensorEvent>> {
        self.rx.take()
    }

    pub fn metrics(&self) -> Arc<IngestionMetrics> {
        self.metrics.clone()
    }

    pub fn source_count(&self) -> usize {
        self.adapters.len()
    }

    pub fn source_ids(&self) -> impl Iterator<Item = &str> {
        self.adapters.keys().map(String::as_str)
    }

    pub fn is_source_listening(&self, source_id: &str) -> bool {
        self.adapters
            .get(source_id)
            .map(|a| a.is_listening())
            .unwrap_or(false)
    }
}

impl Drop for IngestionPipeline {
    fn drop(&mut self) {
        self.stop_all();
    }
}
