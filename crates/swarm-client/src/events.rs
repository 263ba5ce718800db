//! Client lifecycle and traffic notifications.

use std::time::Duration;

use swarm_core::SwarmMessage;
use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 256;

/// Something observers of a client may care about.
#[derive(Clone, Debug)]
pub enum ClientEvent {
    /// The transport opened and the queue was flushed.
    Connected,
    /// The transport closed.
    Disconnected {
        /// Why the connection ended.
        reason: String,
    },
    /// A reconnect attempt is scheduled.
    Reconnecting {
        /// One-based attempt number.
        attempt: u32,
        /// Delay before the attempt.
        delay: Duration,
    },
    /// A transport or protocol problem that did not fail a caller directly.
    Error {
        /// Description of the failure.
        message: String,
    },
    /// An inbound message not consumed by a pending request.
    Message(SwarmMessage),
}

impl ClientEvent {
    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Disconnected { .. } => "disconnected",
            Self::Reconnecting { .. } => "reconnecting",
            Self::Error { .. } => "error",
            Self::Message(_) => "message",
        }
    }
}

/// Fan-out of [`ClientEvent`]s to any number of subscribers.
#[derive(Clone)]
pub struct EventHub {
    tx: broadcast::Sender<ClientEvent>,
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

impl EventHub {
    /// Create a hub with the default backlog.
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    /// New receiver seeing events emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.tx.subscribe()
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn emit(&self, event: ClientEvent) {
        tracing::trace!(event = event.name(), "client event");
        let _ = self.tx.send(event);
    }
}
