//! `validate` command implementation.

use anyhow::{Context, Result};
use contracts::{FusionBlueprint, SourceKind};
use serde::Serialize;
use tracing::info;

use crate::cli::ValidateArgs;

#[derive(Serialize)]
struct ValidationResult {
    valid: bool,
    config_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<ConfigSummary>,
}

#[derive(Serialize)]
struct ConfigSummary {
    version: String,
    source_count: usize,
    enabled_sources: usize,
    sink_count: usize,
    tick_interval_ms: u64,
    handoff_delay_ms: u64,
}

pub fn run_validate(args: &ValidateArgs) -> Result<()> {
    info!(config = %args.config.display(), "Validating configuration");

    let result = validate_config(args);

    if args.json {
        let json = serde_json::to_string_pretty(&result)
            .context("Failed to serialize validation result")?;
        println!("{json}");
    } else {
        print_validation_result(&result);
    }

    if result.valid {
        Ok(())
    } else {
        anyhow::bail!("Configuration validation failed")
    }
}

fn validate_config(args: &ValidateArgs) -> ValidationResult {
    let config_path = args.config.display().to_string();

    if !args.config.exists() {
        return ValidationResult {
            valid: false,
            error: Some(format!("File not found: {config_path}")),
            config_path,
            warnings: Vec::new(),
            summary: None,
        };
    }

    match config_loader::ConfigLoader::load_from_path(&args.config) {
        Ok(blueprint) => ValidationResult {
            valid: true,
            config_path,
            error: None,
            warnings: collect_warnings(&blueprint),
            summary: Some(ConfigSummary {
                version: format!("{:?}", blueprint.version),
                source_count: blueprint.sources.len(),
                enabled_sources: blueprint.enabled_sources().count(),
                sink_count: blueprint.sinks.len(),
                tick_interval_ms: blueprint.engine.tick_interval_ms,
                handoff_delay_ms: blueprint.engine.handoff_delay_ms,
            }),
        },
        Err(e) => ValidationResult {
            valid: false,
            config_path,
            error: Some(e.to_string()),
            warnings: Vec::new(),
            summary: None,
        },
    }
}

/// Non-fatal issues
fn collect_warnings(blueprint: &FusionBlueprint) -> Vec<String> {
    let mut warnings = Vec::new();

    if blueprint.enabled_sources().next().is_none() {
        warnings.push("No enabled sources - nothing will be ingested".to_string());
    }
    if blueprint.sources_of_kind(SourceKind::Camera).next().is_none() {
        warnings.push("No camera source - tracks can only be WiFi-born".to_string());
    }
    if !blueprint
        .enabled_sources()
        .any(|s| s.kind.is_wifi())
    {
        warnings.push("No WiFi source - camera handoffs will always end LOST".to_string());
    }
    if blueprint.sinks.is_empty() {
        warnings.push("No sinks configured - snapshots only feed metrics".to_string());
    }
    for source in blueprint.sources.iter().filter(|s| !s.enabled) {
        warnings.push(format!("Source '{}' is disabled", source.id));
    }

    warnings
}

fn print_validation_result(result: &ValidationResult) {
    if result.valid {
        println!("✓ Configuration is valid: {}", result.config_path);

        if let Some(ref summary) = result.summary {
            println!("\n  Version: {}", summary.version);
            println!(
                "  Sources: {} ({} enabled)",
                summary.source_count, summary.enabled_sources
            );
            println!("  Sinks: {}", summary.sink_count);
            println!(
                "  Tick: {}ms, handoff delay: {}ms",
                summary.tick_interval_ms, summary.handoff_delay_ms
            );
        }

        if !result.warnings.is_empty() {
            println!("\n⚠ Warnings:");
            for warning in &result.warnings {
                println!("  - {warning}");
            }
        }
    } else {
        println!("✗ Configuration is invalid: {}", result.config_path);
        if let Some(ref error) = result.error {
            println!("\n  Error: {error}");
        }
    }
}
