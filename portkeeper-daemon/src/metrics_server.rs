//! Prometheus metrics and liveness HTTP listener.
//!
//! Uses the built-in HTTP listener from `metrics-exporter-prometheus`.
//! The same listener answers liveness probes: any successful response
//! on `health.listen_addr:health.port` means the process is up.

use std::net::SocketAddr;

use anyhow::Result;
use metrics_exporter_prometheus::PrometheusBuilder;

use portkeeper_core::config::HealthConfig;
use portkeeper_core::metrics as m;

/// Parses the listener address from the `[health]` section.
pub fn listen_addr(config: &HealthConfig) -> Result<SocketAddr> {
    format!("{}:{}", config.listen_addr, config.port)
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid health listen address: {}", e))
}

/// Install the global metrics recorder and start the HTTP listener.
///
/// Call once per process, from inside a tokio runtime.
///
/// # Errors
///
/// - The address is invalid
/// - Socket binding fails
/// - A global recorder is already installed
pub fn install_metrics_recorder(config: &HealthConfig) -> Result<()> {
    let addr = listen_addr(config)?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .set_buckets_for_metric(
            metrics_exporter_prometheus::Matcher::Full(
                m::FIREWALL_COMMAND_DURATION_SECONDS.to_owned(),
            ),
            &m::COMMAND_DURATION_BUCKETS,
        )
        .map_err(|e| anyhow::anyhow!("invalid histogram buckets: {}", e))?
        .install()
        .map_err(|e| anyhow::anyhow!("failed to install metrics recorder: {}", e))?;

    m::describe_all();

    tracing::info!(listen_addr = %addr, "liveness and metrics endpoint active");
    Ok(())
}

/// Records static daemon gauges.
pub fn record_daemon_metrics(read_only: bool) {
    metrics::gauge!(m::DAEMON_BUILD_INFO, "version" => env!("CARGO_PKG_VERSION")).set(1.0);
    metrics::gauge!(m::DAEMON_READ_ONLY).set(if read_only { 1.0 } else { 0.0 });
}
