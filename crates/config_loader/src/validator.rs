//! Configuration validation
//!
//! Field ranges come from the `validator` derives on the contract types.
//! Cross-field rules checked here:
//! - source ids unique, bind addresses parseable and unique (ephemeral port 0 excepted)
//! - sink names unique
//! - handoff_delay_ms >= tick_interval_ms
//! - reentry_gate_px >= association_gate_px

use std::collections::HashSet;
use std::net::SocketAddr;

use ::validator::Validate;
use contracts::{ContractError, FusionBlueprint};

/// Validate a blueprint, returning the first error found.
pub fn validate(blueprint: &FusionBlueprint) -> Result<(), ContractError> {
    blueprint.validate()?;
    validate_sources(blueprint)?;
    validate_engine(blueprint)?;
    validate_sinks(blueprint)?;
    Ok(())
}

fn validate_sources(blueprint: &FusionBlueprint) -> Result<(), ContractError> {
    let mut ids = HashSet::new();
    let mut binds = HashSet::new();
    for source in &blueprint.sources {
        if !ids.insert(source.id.as_str()) {
            return Err(ContractError::config_validation(
                format!("sources[id={}]", source.id),
                "duplicate source id",
            ));
        }
        let addr: SocketAddr = source.bind.parse().map_err(|e| {
            ContractError::config_validation(
                format!("sources[{}].bind", source.id),
                format!("invalid socket address '{}': {e}", source.bind),
            )
        })?;
        // port 0 asks the OS for a fresh port per source
        if source.enabled && addr.port() != 0 && !binds.insert(addr) {
            return Err(ContractError::config_validation(
                format!("sources[{}].bind", source.id),
                format!("address {addr} already bound by another source"),
            ));
        }
    }
    Ok(())
}

fn validate_engine(blueprint: &FusionBlueprint) -> Result<(), ContractError> {
    let engine = &blueprint.engine;

    if engine.handoff_delay_ms < engine.tick_interval_ms {
        return Err(ContractError::config_validation(
            "engine.handoff_delay_ms",
            format!(
                "handoff_delay_ms ({}) must be >= tick_interval_ms ({})",
                engine.handoff_delay_ms, engine.tick_interval_ms
            ),
        ));
    }

    if engine.reentry_gate_px < engine.association_gate_px {
        return Err(ContractError::config_validation(
            "engine.reentry_gate_px",
            format!(
                "reentry_gate_px ({}) must be >= association_gate_px ({})",
                engine.reentry_gate_px, engine.association_gate_px
            ),
        ));
    }

    Ok(())
}

fn validate_sinks(blueprint: &FusionBlueprint) -> Result<(), ContractError> {
    let mut seen = HashSet::new();
    for (idx, sink) in blueprint.sinks.iter().enumerate() {
        if !seen.insert(sink.name.as_str()) {
            return Err(ContractError::config_validation(
                format!("sinks[{idx}].name"),
                format!("duplicate sink name '{}'", sink.name),
            ));
        }
    }
    Ok(())
}
