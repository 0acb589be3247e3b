//! Lambda metrics extension binary.
//!
//! Registers as an external extension, counts invocations, subscribes to
//! the Telemetry API and ships metrics to the configured ingest backend.
//!
//! # Configuration
//!
//! Configuration is loaded from (in order of priority):
//! 1. Default values
//! 2. Config file: `/var/task/metrics-extension.toml`
//! 3. Well-known environment variables (`METRICS_ENDPOINT`,
//!    `ACCESS_TOKEN`, `REPORTING_RATE`, `REPORTING_TIMEOUT`,
//!    `FAST_INGEST`, `FAIL_FAST`, `VERBOSE`)
//! 4. Environment variables with the `LAMBDA_METRICS_` prefix

use anyhow::{Context, Result};
use lambda_metrics_extension::{Config, ExtensionRuntime};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load().context("failed to load configuration")?;

    init_tracing(&config).context("failed to initialise tracing subscriber")?;
    tracing::debug!(config = %config.summary(), "configuration loaded");

    let condition = ExtensionRuntime::new(config).run().await;

    tracing::info!(
        reason = condition.reason_label(),
        message = condition.message(),
        "extension shutting down"
    );

    if condition.is_error() {
        anyhow::bail!("extension terminated abnormally: {condition}");
    }
    Ok(())
}

fn init_tracing(config: &Config) -> Result<()> {
    let crate_level = if config.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("info,lambda_metrics_extension={crate_level}"))
    });

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).without_time())
        .with(filter)
        .try_init()
        .context("failed to initialise tracing registry")?;

    Ok(())
}
