// Scheduler binary entry point
// Polls every configured trigger on its schedule until Ctrl+C

use anyhow::Context;
use common::bootstrap::{init_build_trigger, init_script_runner, init_triggers};
use common::config::Settings;
use common::scheduler::{Scheduler, TriggerEngine};
use common::telemetry;
use std::sync::Arc;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Optional first argument: configuration directory
    let settings = match std::env::args().nth(1) {
        Some(config_dir) => Settings::load_from_path(&config_dir)
            .with_context(|| format!("Failed to load configuration from '{}'", config_dir))?,
        None => Settings::load().context("Failed to load configuration from 'config'")?,
    };

    telemetry::init_logging(&settings.observability.log_level)?;
    info!(triggers = settings.triggers.len(), "Starting DOS trigger scheduler");

    if let Some(version) = settings.migrated_from {
        warn!(
            from_version = version,
            to_version = settings.version,
            "Migrated legacy [trigger] table to [[triggers]], update the configuration file"
        );
    }

    settings.validate().map_err(|e| {
        error!(error = %e, "Invalid configuration");
        anyhow::anyhow!(e)
    })?;

    if let Some(port) = settings.observability.metrics_port {
        telemetry::init_metrics(port)?;
    }

    let runner = init_script_runner(&settings.runner);
    let build_trigger = init_build_trigger(&settings.build)?;
    let triggers = init_triggers(&settings, runner, build_trigger)?;
    info!(triggers = triggers.len(), "Triggers initialized");

    let engine = Arc::new(TriggerEngine::new(triggers));

    // Set up graceful shutdown
    let engine_for_shutdown = engine.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            return;
        }
        info!("Received Ctrl+C signal, initiating graceful shutdown");
        engine_for_shutdown.quiet_down();
        if let Err(e) = engine_for_shutdown.stop().await {
            error!(error = %e, "Error during scheduler shutdown");
        }
    });

    if let Err(e) = engine.start().await {
        error!(error = %e, "Scheduler error");
        return Err(anyhow::anyhow!(e));
    }

    info!("Scheduler stopped");
    Ok(())
}
