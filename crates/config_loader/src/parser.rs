//! Configuration parsing
//!
//! TOML is the primary format, JSON is accepted as well.

use contracts::{ContractError, FusionBlueprint};

/// Configuration file format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Json,
}

impl ConfigFormat {
    /// Infer the format from a file extension
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "toml" => Some(Self::Toml),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

pub fn parse_toml(content: &str) -> Result<FusionBlueprint, ContractError> {
    toml::from_str(content).map_err(|e| ContractError::ConfigParse {
        message: format!("TOML parse error: {e}"),
        source: Some(Box::new(e)),
    })
}

pub fn parse_json(content: &str) -> Result<FusionBlueprint, ContractError> {
    serde_json::from_str(content).map_err(|e| ContractError::ConfigParse {
        message: format!("JSON parse error: {e}"),
        source: Some(Box::new(e)),
    })
}

pub fn parse(content: &str, format: ConfigFormat) -> Result<FusionBlueprint, ContractError> {
    match format {
        ConfigFormat::Toml => parse_toml(content),
        ConfigFormat::Json => parse_json(content),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{SinkType, SourceKind};

    #[test]
    fn parses_sections_and_arrays() {
        let content = r#"
[engine]
handoff_delay_ms = 800
camera_priority = false

[rssi]
window_size = 64

[[sources]]
id = "esp8266"
kind = "wifi_rssi"
bind = "0.0.0.0:8888"

[[sources]]
id = "cam0"
kind = "camera"
bind = "0.0.0.0:8890"
enabled = false

[[sinks]]
name = "file_out"
sink_type = "file"
[sinks.params]
path = "./out"
"#;
        let bp = parse_toml(content).unwrap();
        assert_eq!(bp.engine.handoff_delay_ms, 800);
        assert!(!bp.engine.camera_priority);
        assert_eq!(bp.engine.tick_interval_ms, 100);
        assert_eq!(bp.rssi.window_size, 64);
        assert_eq!(bp.rssi.variance_threshold, 5.0);
        assert_eq!(bp.sources.len(), 2);
        assert_eq!(bp.sources[1].kind, SourceKind::Camera);
        assert!(!bp.sources[1].enabled);
        assert_eq!(bp.sinks[0].sink_type, SinkType::File);
        assert_eq!(bp.sinks[0].params.get("path").map(String::as_str), Some("./out"));
    }

    #[test]
    fn parses_json() {
        let content = r#"{
            "version": "v1",
            "csi": { "use_classifier": false },
            "sources": [{ "id": "esp32", "kind": "wifi_csi", "bind": "0.0.0.0:8889" }],
            "sinks": [{ "name": "tcp", "sink_type": "tcp", "params": { "addr": "0.0.0.0:8000" } }]
        }"#;
        let bp = parse_json(content).unwrap();
        assert!(!bp.csi.use_classifier);
        assert_eq!(bp.csi.window_size, 100);
        assert_eq!(bp.sinks[0].sink_type, SinkType::Tcp);
    }

    #[test]
    fn unknown_source_kind_is_parse_error() {
        let content = r#"
[[sources]]
id = "x"
kind = "radar"
bind = "0.0.0.0:1"
"#;
        let err = parse_toml(content).unwrap_err();
        assert!(matches!(err, ContractError::ConfigParse { .. }));
    }

    #[test]
    fn syntax_error() {
        let err = parse_toml("invalid toml [[[").unwrap_err();
        assert!(matches!(err, ContractError::ConfigParse { .. }));
    }

    #[test]
    fn format_from_extension() {
        assert_eq!(ConfigFormat::from_extension("TOML"), Some(ConfigFormat::Toml));
        assert_eq!(ConfigFormat::from_extension("json"), Some(ConfigFormat::Json));
        assert_eq!(ConfigFormat::from_extension("yaml"), None);
    }
}
