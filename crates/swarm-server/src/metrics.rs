//! Prometheus metrics recorder and metric names.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the handle used to render `GET /metrics`. Call once at startup
/// before any metrics are recorded.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

// Metric name constants.

/// Connections admitted total (counter).
pub const SWARM_CONNECTIONS_TOTAL: &str = "swarm_connections_total";
/// Connections closed total (counter).
pub const SWARM_DISCONNECTIONS_TOTAL: &str = "swarm_disconnections_total";
/// Currently registered connections (gauge).
pub const SWARM_CONNECTIONS_ACTIVE: &str = "swarm_connections_active";
/// Handshakes refused by admission control (counter).
pub const SWARM_ADMISSIONS_REJECTED_TOTAL: &str = "swarm_admissions_rejected_total";
/// Connections evicted for heartbeat silence (counter).
pub const SWARM_HEARTBEAT_EVICTIONS_TOTAL: &str = "swarm_heartbeat_evictions_total";
/// Inbound frames routed (counter, labels: type).
pub const SWARM_MESSAGES_ROUTED_TOTAL: &str = "swarm_messages_routed_total";
/// Error replies sent (counter, labels: code).
pub const SWARM_ROUTING_ERRORS_TOTAL: &str = "swarm_routing_errors_total";
/// Per-recipient broadcast deliveries (counter).
pub const SWARM_BROADCAST_DELIVERIES_TOTAL: &str = "swarm_broadcast_deliveries_total";
/// Frames dropped because a connection's outbound buffer was full (counter).
pub const SWARM_OUTBOUND_DROPS_TOTAL: &str = "swarm_outbound_drops_total";
/// Connection lifetime (histogram, seconds).
pub const SWARM_CONNECTION_DURATION_SECONDS: &str = "swarm_connection_duration_seconds";
