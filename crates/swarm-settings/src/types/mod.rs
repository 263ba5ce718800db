//! Settings type definitions.
//!
//! All types use camelCase JSON keys and `#[serde(default)]`, so a partial
//! file only needs the keys it overrides.

mod client;
mod coordinator;
mod logging;

pub use client::*;
pub use coordinator::*;
pub use logging::*;

use serde::{Deserialize, Serialize};

use crate::errors::Result;

/// Root settings type.
///
/// ```json
/// {
///   "coordinator": { "port": 9000, "maxConnections": 16 },
///   "client": { "queueSize": 50 },
///   "logging": { "level": "debug" }
/// }
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SwarmSettings {
    /// Coordinator (server) settings.
    pub coordinator: CoordinatorConfig,
    /// Agent-side client settings.
    pub client: ClientConfig,
    /// Logging output.
    pub logging: LoggingSettings,
}

impl SwarmSettings {
    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        self.coordinator.validate()?;
        self.client.validate()
    }
}
