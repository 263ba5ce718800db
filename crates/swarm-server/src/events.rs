//! Lifecycle notifications.
//!
//! The coordinator publishes [`CoordinatorEvent`]s on a broadcast channel.
//! Emission never fails: with no subscribers the event is simply dropped.

use std::net::SocketAddr;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use swarm_core::{AgentId, ConnectionId};
use tokio::sync::broadcast;
use tracing::trace;

/// Buffered events per subscriber before lagging receivers skip ahead.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// A coordinator lifecycle notification.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum CoordinatorEvent {
    /// The listening socket is bound.
    #[serde(rename = "coordinator-started")]
    Started {
        /// Bound address.
        addr: SocketAddr,
    },
    /// All connections closed and the listening socket released.
    #[serde(rename = "coordinator-stopped")]
    Stopped,
    /// A connection passed admission and was registered.
    #[serde(rename = "client-connected", rename_all = "camelCase")]
    ClientConnected {
        /// Agent identity from the handshake.
        agent_id: AgentId,
        /// Coordinator-assigned connection id.
        connection_id: ConnectionId,
        /// Wall-clock admission time.
        connected_at: DateTime<Utc>,
    },
    /// A registered connection went away.
    #[serde(rename = "client-disconnected", rename_all = "camelCase")]
    ClientDisconnected {
        /// Agent identity from the handshake.
        agent_id: AgentId,
        /// Coordinator-assigned connection id.
        connection_id: ConnectionId,
        /// Why the connection ended, e.g. `"heartbeat timeout"`.
        reason: String,
    },
    /// New topology constraints were stored.
    #[serde(rename = "topology-updated")]
    TopologyUpdated {
        /// The constraint value as supplied.
        constraints: Value,
    },
}

impl CoordinatorEvent {
    /// Notification name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Started { .. } => "coordinator-started",
            Self::Stopped => "coordinator-stopped",
            Self::ClientConnected { .. } => "client-connected",
            Self::ClientDisconnected { .. } => "client-disconnected",
            Self::TopologyUpdated { .. } => "topology-updated",
        }
    }
}

/// Fan-out point for [`CoordinatorEvent`]s.
#[derive(Clone)]
pub struct EventHub {
    tx: broadcast::Sender<CoordinatorEvent>,
}

impl EventHub {
    /// Create a hub with the default buffer.
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Subscribe to future events.
    pub fn subscribe(&self) -> broadcast::Receiver<CoordinatorEvent> {
        self.tx.subscribe()
    }

    /// Publish an event to all current subscribers.
    pub fn emit(&self, event: CoordinatorEvent) {
        let name = event.name();
        let receivers = self.tx.send(event).unwrap_or(0);
        trace!(event = name, receivers, "emitted coordinator event");
    }

    /// Current subscriber count.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}
