//! Coordinator (server) settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Configuration for the swarm coordinator.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CoordinatorConfig {
    /// Host to bind.
    pub host: String,
    /// Port to bind (`0` for auto-assign).
    pub port: u16,
    /// How often idle connections are pinged, in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// Silence after which a connection is evicted, in milliseconds.
    pub heartbeat_timeout_ms: u64,
    /// Admission ceiling on concurrent connections.
    pub max_connections: usize,
    /// Gzip HTTP responses (`/health`, `/metrics`).
    pub compression_enabled: bool,
    /// Send transport-level pings to idle connections every interval.
    pub ping_idle_connections: bool,
    /// Deliver a broadcast back to the connection that sent it.
    pub broadcast_includes_sender: bool,
    /// Maximum inbound frame size in bytes.
    pub max_message_size: usize,
    /// Per-connection outbound buffer, in frames.
    pub outbound_buffer: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8080,
            heartbeat_interval_ms: 30_000,
            heartbeat_timeout_ms: 90_000,
            max_connections: 100,
            compression_enabled: false,
            ping_idle_connections: true,
            broadcast_includes_sender: false,
            max_message_size: 16 * 1024 * 1024, // 16 MB
            outbound_buffer: 1024,
        }
    }
}

impl CoordinatorConfig {
    /// `host:port` bind address.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Heartbeat send interval.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Heartbeat timeout.
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        if self.heartbeat_interval_ms == 0 || self.heartbeat_timeout_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "heartbeat interval and timeout must be non-zero".into(),
            ));
        }
        if self.heartbeat_timeout_ms < self.heartbeat_interval_ms {
            return Err(SettingsError::InvalidValue(format!(
                "heartbeat timeout ({}ms) is shorter than the interval ({}ms)",
                self.heartbeat_timeout_ms, self.heartbeat_interval_ms
            )));
        }
        if self.outbound_buffer == 0 {
            return Err(SettingsError::InvalidValue(
                "outbound buffer must hold at least one frame".into(),
            ));
        }
        Ok(())
    }
}
