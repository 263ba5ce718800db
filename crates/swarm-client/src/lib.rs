//! # swarm-client
//!
//! Agent-side connection to the swarm coordinator.
//!
//! - **State machine**: `Disconnected → Connecting → Connected → Reconnecting`
//! - **Outbound queue**: sends made while not connected are held and replayed in order
//! - **Requests**: `request()` awaits the response correlated by `responseId`
//! - **Reconnection**: capped exponential backoff after an unexpected close
//! - **Dispatch**: handlers keyed by envelope type or `payload.type`

#![deny(unsafe_code)]

pub mod client;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod handshake;
pub mod pending;
pub mod queue;
pub mod state;

pub use client::{ClientStats, SwarmClient};
pub use errors::{ClientError, Result};
pub use events::ClientEvent;
pub use state::ClientState;
