//! # swarm-server
//!
//! The swarm coordinator: a WebSocket message bus for agent processes.
//!
//! - Connection registry keyed by agent identity (multi-valued during reconnects)
//! - Admission control against a connection ceiling, refused with close code 1013
//! - Per-connection heartbeat monitor evicting silent peers
//! - Message router for unicast, broadcast, request/response and heartbeats
//! - Lifecycle notifications via `tokio::sync::broadcast`
//! - Graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod coordinator;
pub mod errors;
pub mod events;
pub mod health;
pub mod metrics;
pub mod shutdown;
pub mod store;
pub mod websocket;

pub use coordinator::{Coordinator, CoordinatorBuilder};
pub use errors::{CoordinatorError, Result};
pub use events::{CoordinatorEvent, EventHub};
pub use health::{ConnectionStats, HealthStatus};
pub use store::{InMemoryStore, MemoryStore, StoreError};
