//! Health and connection statistics.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;

/// Aggregate connection statistics, derived on demand.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStats {
    /// Registered connections.
    pub active_connections: usize,
    /// Distinct agents with at least one registered connection.
    pub connected_agents: usize,
    /// Inbound frames routed since construction.
    pub total_messages: u64,
    /// When the listening socket was bound, if running.
    pub started_at: Option<DateTime<Utc>>,
    /// Seconds since `started_at`, or `0` when stopped.
    pub uptime_secs: u64,
}

/// `GET /health` body.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthStatus {
    /// True whenever the listening socket is bound.
    pub healthy: bool,
    /// Current connection statistics.
    pub metrics: ConnectionStats,
}

/// Build stats from live counters.
pub fn connection_stats(
    active_connections: usize,
    connected_agents: usize,
    total_messages: u64,
    started: Option<(DateTime<Utc>, Instant)>,
) -> ConnectionStats {
    ConnectionStats {
        active_connections,
        connected_agents,
        total_messages,
        started_at: started.map(|(at, _)| at),
        uptime_secs: started.map_or(0, |(_, since)| since.elapsed().as_secs()),
    }
}

/// Health is a function of the socket being bound, not of load.
pub fn health_status(bound: bool, metrics: ConnectionStats) -> HealthStatus {
    HealthStatus {
        healthy: bound,
        metrics,
    }
}
