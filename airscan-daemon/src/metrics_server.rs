//! Prometheus metrics HTTP server.
//!
//! Uses the built-in HTTP listener from `metrics-exporter-prometheus`
//! to expose the scrape endpoint. Scanner, job and HTTP metrics are
//! recorded by `airscan-escl`; this module only installs the recorder.

use std::net::SocketAddr;

use airscan_core::config::MetricsConfig;
use airscan_core::metrics as m;
use anyhow::Result;
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};

/// Install the global metrics recorder and start the HTTP listener.
///
/// Call once per process. Metrics recorded before installation are lost.
///
/// # Errors
///
/// - Endpoint other than `/metrics`
/// - Invalid listen address or socket binding failure
/// - Global recorder already installed
pub fn install_metrics_recorder(config: &MetricsConfig) -> Result<()> {
    if config.endpoint != "/metrics" {
        return Err(anyhow::anyhow!(
            "unsupported metrics endpoint '{}': only '/metrics' is currently supported",
            config.endpoint
        ));
    }

    let addr: SocketAddr = format!("{}:{}", config.listen_addr, config.port)
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid metrics listen address: {}", e))?;

    if addr.ip().is_unspecified() {
        tracing::warn!(
            listen_addr = %addr,
            "metrics endpoint is exposed on all interfaces"
        );
    }

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .set_buckets_for_metric(
            Matcher::Full(m::PAGE_TRANSFER_DURATION_SECONDS.to_owned()),
            &m::PAGE_TRANSFER_DURATION_BUCKETS,
        )
        .map_err(|e| anyhow::anyhow!("invalid histogram buckets: {}", e))?
        .install()
        .map_err(|e| anyhow::anyhow!("failed to install metrics recorder: {}", e))?;

    m::describe_all();

    tracing::info!(listen_addr = %addr, "Prometheus metrics endpoint active");
    Ok(())
}
