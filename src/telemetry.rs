//! Logging and metrics setup

use anyhow::{Context, Result};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset
pub const DEFAULT_LOG_FILTER: &str = "plcbridge=info,tower_http=info";

/// Install the global tracing subscriber
pub fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Install the Prometheus recorder and register metric descriptions.
///
/// Only one recorder can exist per process.
pub fn install_metrics() -> Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .with_context(|| "Failed to install Prometheus recorder")?;

    metrics::describe_counter!(
        "plcbridge_reads_total",
        "Successful device reads"
    );
    metrics::describe_counter!(
        "plcbridge_read_errors_total",
        "Device reads that returned an error"
    );
    metrics::describe_counter!(
        "plcbridge_simulated_values_total",
        "Values synthesized by the simulator"
    );
    metrics::describe_counter!(
        "plcbridge_connect_attempts_total",
        "Connect attempts by outcome"
    );
    metrics::describe_gauge!(
        "plcbridge_connected",
        "1 while connected, including simulated mode"
    );
    metrics::describe_histogram!(
        "plcbridge_poll_duration_seconds",
        metrics::Unit::Seconds,
        "Duration of one polling pass"
    );

    Ok(handle)
}
