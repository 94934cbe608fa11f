//! `run` command implementation.

use anyhow::{Context, Result};
use std::time::Duration;
use tracing::{error, info};

use contracts::FusionBlueprint;
use ingestion::SourceMode;

use crate::cli::RunArgs;
use crate::error::CliError;
use crate::pipeline::{Pipeline, PipelineConfig};

pub async fn run_pipeline(args: &RunArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading configuration");

    if !args.config.exists() {
        return Err(CliError::config_not_found(args.config.display().to_string()).into());
    }

    let mut blueprint = config_loader::ConfigLoader::load_from_path(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;
    apply_overrides(&mut blueprint, args)?;

    info!(
        sources = blueprint.enabled_sources().count(),
        sinks = blueprint.sinks.len(),
        tick_ms = blueprint.engine.tick_interval_ms,
        handoff_ms = blueprint.engine.handoff_delay_ms,
        simulate = args.simulate,
        "Configuration loaded"
    );

    let pipeline = Pipeline::new(PipelineConfig {
        blueprint,
        mode: if args.simulate {
            SourceMode::Simulated
        } else {
            SourceMode::Udp
        },
        max_ticks: (args.max_ticks > 0).then_some(args.max_ticks),
        timeout: (args.timeout > 0).then(|| Duration::from_secs(args.timeout)),
        metrics_port: (args.metrics_port > 0).then_some(args.metrics_port),
    });

    info!("Starting pipeline...");
    let stats = pipeline
        .run(shutdown_signal())
        .await
        .context("Pipeline execution failed")?;

    stats.print_summary();
    info!("EchoSense finished");
    Ok(())
}

/// CLI overrides are re-validated like the file itself
fn apply_overrides(blueprint: &mut FusionBlueprint, args: &RunArgs) -> Result<()> {
    if let Some(tick_ms) = args.tick_ms {
        info!(tick_ms, "Overriding tick interval from CLI");
        blueprint.engine.tick_interval_ms = tick_ms;
    }
    if let Some(handoff_ms) = args.handoff_ms {
        info!(handoff_ms, "Overriding handoff delay from CLI");
        blueprint.engine.handoff_delay_ms = handoff_ms;
    }
    if args.tick_ms.is_some() || args.handoff_ms.is_some() {
        config_loader::ConfigLoader::validate(blueprint)
            .context("Invalid configuration after CLI overrides")?;
    }
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn args() -> RunArgs {
        RunArgs {
            config: PathBuf::from("unused.toml"),
            simulate: true,
            max_ticks: 0,
            timeout: 0,
            metrics_port: 0,
            tick_ms: None,
            handoff_ms: None,
        }
    }

    #[test]
    fn overrides_are_applied() {
        let mut bp = FusionBlueprint::empty();
        let mut a = args();
        a.tick_ms = Some(50);
        a.handoff_ms = Some(300);
        apply_overrides(&mut bp, &a).unwrap();
        assert_eq!(bp.engine.tick_interval_ms, 50);
        assert_eq!(bp.engine.handoff_delay_ms, 300);
    }

    #[test]
    fn handoff_shorter_than_tick_is_rejected() {
        let mut bp = FusionBlueprint::empty();
        let mut a = args();
        a.handoff_ms = Some(20);
        assert!(apply_overrides(&mut bp, &a).is_err());
    }

    #[tokio::test]
    async fn missing_config_file_fails() {
        let mut a = args();
        a.config = PathBuf::from("/nonexistent/echosense.toml");
        let err = run_pipeline(&a).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CliError>(),
            Some(CliError::ConfigNotFound { .. })
        ));
    }
}
