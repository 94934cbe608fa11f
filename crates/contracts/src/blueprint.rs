//! FusionBlueprint - config loader output
//!
//! Describes the whole deployment: producer sources, conditioner tuning,
//! engine tuning, queueing and output routing.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use validator::Validate;

use crate::{ConditionerConfig, CsiConfig, EngineConfig, SourceKind};

/// Config version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConfigVersion {
    #[default]
    #[serde(alias = "v1")]
    V1,
}

/// Complete deployment blueprint
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct FusionBlueprint {
    #[serde(default)]
    pub version: ConfigVersion,

    #[serde(default)]
    #[validate(nested)]
    pub engine: EngineConfig,

    #[serde(default = "ConditionerConfig::rssi")]
    #[validate(nested)]
    pub rssi: ConditionerConfig,

    #[serde(default)]
    #[validate(nested)]
    pub csi: CsiConfig,

    #[serde(default = "ConditionerConfig::monitor")]
    #[validate(nested)]
    pub monitor: ConditionerConfig,

    #[serde(default)]
    #[validate(nested)]
    pub queue: QueueConfig,

    /// Producer streams
    #[serde(default)]
    #[validate(nested)]
    pub sources: Vec<SourceConfig>,

    /// Output routing
    #[serde(default)]
    #[validate(nested)]
    pub sinks: Vec<SinkConfig>,
}

impl FusionBlueprint {
    /// Blueprint with default tuning and no sources or sinks
    pub fn empty() -> Self {
        Self {
            version: ConfigVersion::V1,
            engine: EngineConfig::default(),
            rssi: ConditionerConfig::rssi(),
            csi: CsiConfig::default(),
            monitor: ConditionerConfig::monitor(),
            queue: QueueConfig::default(),
            sources: Vec::new(),
            sinks: Vec::new(),
        }
    }

    pub fn enabled_sources(&self) -> impl Iterator<Item = &SourceConfig> {
        self.sources.iter().filter(|s| s.enabled)
    }

    pub fn sources_of_kind(&self, kind: SourceKind) -> impl Iterator<Item = &SourceConfig> {
        self.enabled_sources().filter(move |s| s.kind == kind)
    }
}

/// One producer stream
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SourceConfig {
    /// Unique identifier, becomes the event `source_id`
    #[validate(length(min = 1, max = 64))]
    pub id: String,

    pub kind: SourceKind,

    /// UDP bind address, e.g. "0.0.0.0:8888"
    #[validate(length(min = 1))]
    pub bind: String,

    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// Ingestion queue configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct QueueConfig {
    /// Bounded queue per producer stream
    #[validate(range(min = 1))]
    pub per_source_capacity: usize,

    /// Merged queue feeding the engine
    #[validate(range(min = 1))]
    pub merged_capacity: usize,

    /// Snapshot queue between engine and dispatcher
    #[validate(range(min = 1))]
    pub snapshot_capacity: usize,

    pub drop_policy: DropPolicy,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            per_source_capacity: 256,
            merged_capacity: 1024,
            snapshot_capacity: 64,
            drop_policy: DropPolicy::DropOldest,
        }
    }
}

/// What to drop when a producer queue is full
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropPolicy {
    /// Evict the oldest queued event; the producer never blocks
    #[default]
    DropOldest,
    /// Discard the incoming event
    DropNewest,
}

/// Sink output configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SinkConfig {
    #[validate(length(min = 1))]
    pub name: String,

    pub sink_type: SinkType,

    #[serde(default = "default_queue_capacity")]
    #[validate(range(min = 1))]
    pub queue_capacity: usize,

    /// Type-specific parameters
    #[serde(default)]
    pub params: HashMap<String, String>,
}

fn default_queue_capacity() -> usize {
    100
}

/// Sink type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkType {
    /// Log output
    Log,
    /// JSON Lines file
    File,
    /// UDP datagrams
    Network,
    /// Line-delimited JSON pushed to connected TCP clients
    Tcp,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_json_blueprint_fills_defaults() {
        let json = r#"{
            "sources": [{"id": "esp8266", "kind": "wifi_rssi", "bind": "0.0.0.0:8888"}],
            "sinks": [{"name": "log", "sink_type": "log"}]
        }"#;
        let bp: FusionBlueprint = serde_json::from_str(json).unwrap();
        assert_eq!(bp.rssi.window_size, 50);
        assert_eq!(bp.monitor.window_size, 200);
        assert_eq!(bp.csi.window_size, 100);
        assert_eq!(bp.queue.drop_policy, DropPolicy::DropOldest);
        assert_eq!(bp.sinks[0].queue_capacity, 100);
        assert!(bp.sources[0].enabled);
        assert!(bp.validate().is_ok());
    }

    #[test]
    fn nested_errors_surface() {
        let mut bp = FusionBlueprint::empty();
        bp.rssi.window_size = 2;
        bp.sinks.push(SinkConfig {
            name: String::new(),
            sink_type: SinkType::Log,
            queue_capacity: 10,
            params: HashMap::new(),
        });
        let errors = bp.validate().unwrap_err();
        assert!(errors.errors().contains_key("rssi"));
        assert!(errors.errors().contains_key("sinks"));
    }

    #[test]
    fn filters_disabled_sources() {
        let mut bp = FusionBlueprint::empty();
        bp.sources = vec![
            SourceConfig {
                id: "cam".into(),
                kind: SourceKind::Camera,
                bind: "127.0.0.1:9999".into(),
                enabled: true,
            },
            SourceConfig {
                id: "esp32".into(),
                kind: SourceKind::WifiCsi,
                bind: "127.0.0.1:8889".into(),
                enabled: false,
            },
        ];
        assert_eq!(bp.enabled_sources().count(), 1);
        assert_eq!(bp.sources_of_kind(SourceKind::WifiCsi).count(), 0);
    }
}
