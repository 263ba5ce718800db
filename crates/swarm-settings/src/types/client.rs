//! Agent-side client settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use swarm_core::backoff::BackoffPolicy;

use crate::errors::{Result, SettingsError};

/// Configuration for a swarm client.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientConfig {
    /// Coordinator WebSocket URL, e.g. `ws://127.0.0.1:8080/ws`.
    pub url: String,
    /// Identity presented in the handshake.
    pub agent_id: String,
    /// Capability metadata sent with every heartbeat.
    pub capabilities: Value,
    /// Heartbeat period in milliseconds. `0` disables periodic heartbeats.
    pub heartbeat_interval_ms: u64,
    /// Reconnect automatically after an unexpected close.
    pub reconnection: bool,
    /// Outbound queue capacity while disconnected. `0` disables queueing.
    pub queue_size: usize,
    /// How long `request` waits for a correlated response, in milliseconds.
    pub request_timeout_ms: u64,
    /// Handshake timeout in milliseconds.
    pub connect_timeout_ms: u64,
    /// Reconnect attempts before giving up. `0` retries forever.
    pub max_reconnect_attempts: u32,
    /// First reconnect delay in milliseconds.
    pub reconnect_base_delay_ms: u64,
    /// Reconnect delay ceiling in milliseconds.
    pub reconnect_max_delay_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8080/ws".into(),
            agent_id: String::new(),
            capabilities: Value::Array(Vec::new()),
            heartbeat_interval_ms: 30_000,
            reconnection: true,
            queue_size: 100,
            request_timeout_ms: 30_000,
            connect_timeout_ms: 10_000,
            max_reconnect_attempts: swarm_core::backoff::DEFAULT_MAX_ATTEMPTS,
            reconnect_base_delay_ms: swarm_core::backoff::DEFAULT_BASE_DELAY_MS,
            reconnect_max_delay_ms: swarm_core::backoff::DEFAULT_MAX_DELAY_MS,
        }
    }
}

impl ClientConfig {
    /// Convenience constructor for the two required fields.
    pub fn new(url: impl Into<String>, agent_id: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            agent_id: agent_id.into(),
            ..Self::default()
        }
    }

    /// Reconnection backoff derived from this config.
    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy {
            base_delay_ms: self.reconnect_base_delay_ms,
            max_delay_ms: self.reconnect_max_delay_ms,
            max_attempts: self.max_reconnect_attempts,
        }
    }

    /// Heartbeat period, or `None` when disabled.
    pub fn heartbeat_interval(&self) -> Option<Duration> {
        (self.heartbeat_interval_ms > 0).then(|| Duration::from_millis(self.heartbeat_interval_ms))
    }

    /// Request timeout.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Handshake timeout.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        if self.reconnect_max_delay_ms < self.reconnect_base_delay_ms {
            return Err(SettingsError::InvalidValue(
                "reconnect max delay is below the base delay".into(),
            ));
        }
        if self.request_timeout_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "request timeout must be non-zero".into(),
            ));
        }
        Ok(())
    }
}
