//! Metrics export for Switchboard.
//!
//! The hub records through the `metrics` facade; this module describes the
//! metrics and exports them in Prometheus format.

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use switchboard_core::metrics::names;
use tracing::info;

/// Describe the hub's metrics.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of clients registered since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of registered clients"
    );
    metrics::describe_counter!(names::MESSAGES_TOTAL, "Total number of messages written or read");
    metrics::describe_counter!(names::MESSAGES_BYTES, "Total bytes of messages written or read");
    metrics::describe_counter!(
        names::MESSAGES_DISCARDED,
        "Messages dropped because an outbound buffer was full"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of connection errors");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the exporter cannot be installed.
pub fn start_metrics_server(host: &str, port: u16) -> Result<()> {
    let addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .with_context(|| format!("Invalid metrics address {host}:{port}"))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("Failed to install Prometheus exporter")?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_metrics() {
        // No recorder installed; describing must still be harmless.
        init_metrics();
        switchboard_core::metrics::record_connection();
        switchboard_core::metrics::record_disconnection();
    }

    #[test]
    fn test_invalid_metrics_address() {
        assert!(start_metrics_server("not a host", 9090).is_err());
    }
}
