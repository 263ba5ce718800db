//! WebSocket connection management: registry, admission, heartbeats,
//! routing and the per-connection session task.

pub mod admission;
pub mod connection;
pub mod heartbeat;
pub mod registry;
pub mod router;
pub mod session;
