// Telemetry module for structured logging and metrics

use anyhow::Result;
use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Initialize structured logging with JSON formatting
///
/// `RUST_LOG` takes precedence over the configured level.
pub fn init_logging(log_level: &str) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .map_err(|e| anyhow::anyhow!("Failed to create env filter: {}", e))?;

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_target(true)
        .with_thread_names(true)
        .with_filter(env_filter);

    tracing_subscriber::registry()
        .with(json_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize tracing subscriber: {}", e))?;

    tracing::info!(log_level, "Structured logging initialized with JSON formatting");
    Ok(())
}

/// Initialize the Prometheus metrics exporter and describe all metrics
pub fn init_metrics(metrics_port: u16) -> Result<()> {
    let addr: SocketAddr = format!("0.0.0.0:{}", metrics_port)
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid metrics port: {}", e))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus exporter: {}", e))?;

    describe_counter!("dos_trigger_polls_total", "Total number of trigger polls");
    describe_counter!(
        "dos_trigger_builds_scheduled_total",
        "Total number of builds scheduled by triggers"
    );
    describe_counter!(
        "dos_trigger_poll_failures_total",
        "Total number of polls that failed"
    );
    describe_histogram!(
        "dos_trigger_script_duration_seconds",
        "Duration of trigger script runs in seconds"
    );

    tracing::info!(
        metrics_port,
        metrics_endpoint = format!("http://0.0.0.0:{}/metrics", metrics_port),
        "Prometheus metrics exporter initialized"
    );
    Ok(())
}

#[inline]
pub fn record_poll(job: &str) {
    counter!("dos_trigger_polls_total", "job" => job.to_string()).increment(1);
}

#[inline]
pub fn record_build_scheduled(job: &str) {
    counter!("dos_trigger_builds_scheduled_total", "job" => job.to_string()).increment(1);
}

#[inline]
pub fn record_poll_failure(job: &str, reason: &str) {
    counter!(
        "dos_trigger_poll_failures_total",
        "job" => job.to_string(),
        "reason" => reason.to_string()
    )
    .increment(1);
}

#[inline]
pub fn record_script_duration(job: &str, duration_seconds: f64) {
    histogram!("dos_trigger_script_duration_seconds", "job" => job.to_string())
        .record(duration_seconds);
}
