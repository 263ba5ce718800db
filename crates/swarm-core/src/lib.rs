//! # swarm-core
//!
//! Shared vocabulary for the swarm coordination bus.
//!
//! - **Envelope**: [`SwarmMessage`] and [`MessageType`], the unit exchanged on the wire
//! - **Branded IDs**: `AgentId`, `ConnectionId`, `MessageId` newtypes
//! - **Close codes**: distinguished WebSocket close codes for admission, eviction, shutdown
//! - **Backoff**: capped exponential delay math used by client reconnection
//! - **Logging**: `tracing` subscriber bootstrap

#![deny(unsafe_code)]

pub mod backoff;
pub mod close_code;
pub mod errors;
pub mod ids;
pub mod logging;
pub mod message;

pub use errors::{EnvelopeError, Result};
pub use ids::{AgentId, ConnectionId, MessageId};
pub use message::{ErrorCode, MessageType, SwarmMessage, COORDINATOR_ID};
