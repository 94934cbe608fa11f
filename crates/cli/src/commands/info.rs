//! `info` command implementation.

use anyhow::{Context, Result};
use contracts::{
    ConditionerConfig, CsiConfig, EngineConfig, FusionBlueprint, QueueConfig, SourceKind,
};
use serde::Serialize;
use tracing::info;

use crate::cli::InfoArgs;
use crate::error::CliError;

#[derive(Serialize)]
struct ConfigInfo<'a> {
    version: String,
    engine: &'a EngineConfig,
    queue: &'a QueueConfig,
    sources: Vec<SourceInfo>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    sinks: Vec<SinkInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    conditioners: Option<ConditionerInfo<'a>>,
}

#[derive(Serialize)]
struct SourceInfo {
    id: String,
    kind: SourceKind,
    bind: String,
    enabled: bool,
}

#[derive(Serialize)]
struct SinkInfo {
    name: String,
    sink_type: String,
    queue_capacity: usize,
}

#[derive(Serialize)]
struct ConditionerInfo<'a> {
    rssi: &'a ConditionerConfig,
    csi: &'a CsiConfig,
    monitor: &'a ConditionerConfig,
}

pub fn run_info(args: &InfoArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading configuration info");

    if !args.config.exists() {
        return Err(CliError::config_not_found(args.config.display().to_string()).into());
    }

    let blueprint = config_loader::ConfigLoader::load_from_path(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    if args.json {
        let json = serde_json::to_string_pretty(&build_config_info(&blueprint, args))
            .context("Failed to serialize config info")?;
        println!("{json}");
    } else {
        print_config_info(&blueprint, args);
    }

    Ok(())
}

fn build_config_info<'a>(blueprint: &'a FusionBlueprint, args: &InfoArgs) -> ConfigInfo<'a> {
    ConfigInfo {
        version: format!("{:?}", blueprint.version),
        engine: &blueprint.engine,
        queue: &blueprint.queue,
        sources: blueprint
            .sources
            .iter()
            .map(|s| SourceInfo {
                id: s.id.clone(),
                kind: s.kind,
                bind: s.bind.clone(),
                enabled: s.enabled,
            })
            .collect(),
        sinks: blueprint
            .sinks
            .iter()
            .map(|s| SinkInfo {
                name: s.name.clone(),
                sink_type: format!("{:?}", s.sink_type),
                queue_capacity: s.queue_capacity,
            })
            .collect(),
        conditioners: args.conditioners.then_some(ConditionerInfo {
            rssi: &blueprint.rssi,
            csi: &blueprint.csi,
            monitor: &blueprint.monitor,
        }),
    }
}

fn tree_prefix(index: usize, len: usize) -> &'static str {
    if index + 1 == len {
        "└─"
    } else {
        "├─"
    }
}

fn print_config_info(blueprint: &FusionBlueprint, args: &InfoArgs) {
    println!("=== EchoSense Configuration ({:?}) ===\n", blueprint.version);

    let engine = &blueprint.engine;
    println!("Engine");
    println!("   ├─ Tick: {}ms", engine.tick_interval_ms);
    println!("   ├─ Handoff delay: {}ms", engine.handoff_delay_ms);
    println!("   ├─ Tracking timeout: {}s", engine.tracking_timeout_s);
    println!("   ├─ Lost grace: {}s", engine.lost_grace_s);
    println!(
        "   ├─ Gates: {}px camera, {}px re-entry",
        engine.association_gate_px, engine.reentry_gate_px
    );
    println!("   ├─ Min confidence: {}", engine.min_confidence);
    println!("   └─ Camera priority: {}", engine.camera_priority);

    let queue = &blueprint.queue;
    println!("\nQueues");
    println!("   ├─ Per source: {}", queue.per_source_capacity);
    println!("   ├─ Merged: {}", queue.merged_capacity);
    println!("   └─ Drop policy: {:?}", queue.drop_policy);

    println!("\nSources ({})", blueprint.sources.len());
    for (i, source) in blueprint.sources.iter().enumerate() {
        println!(
            "   {} {} ({}, {}){}",
            tree_prefix(i, blueprint.sources.len()),
            source.id,
            source.kind,
            source.bind,
            if source.enabled { "" } else { " [disabled]" }
        );
    }

    if args.conditioners {
        println!("\nConditioners");
        for (name, c) in [("rssi", &blueprint.rssi), ("monitor", &blueprint.monitor)] {
            println!(
                "   ├─ {name}: window {}, calibration {}s/{} samples, k={}, decay {}, floor {}",
                c.window_size,
                c.calibration_s,
                c.calibration_samples,
                c.k_sigma,
                c.decay_rate,
                c.variance_threshold
            );
        }
        let csi = &blueprint.csi;
        println!(
            "   └─ csi: window {}, calibration {}s/{} samples, k={}, decay {}, floor {}, classifier {} every {}",
            csi.window_size,
            csi.calibration_s,
            csi.calibration_samples,
            csi.k_sigma,
            csi.decay_rate,
            csi.variance_threshold,
            if csi.use_classifier { "on" } else { "off" },
            csi.classifier_stride
        );
    }

    if !blueprint.sinks.is_empty() {
        println!("\nSinks ({})", blueprint.sinks.len());
        for (i, sink) in blueprint.sinks.iter().enumerate() {
            println!(
                "   {} {} ({:?}, queue {})",
                tree_prefix(i, blueprint.sinks.len()),
                sink.name,
                sink.sink_type,
                sink.queue_capacity
            );
        }
    }

    println!();
}
