//! Admission control.

use std::sync::Arc;

use metrics::counter;
use tracing::warn;

use super::connection::AgentConnection;
use super::registry::ConnectionRegistry;
use crate::metrics::SWARM_ADMISSIONS_REJECTED_TOTAL;

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Registered.
    Admitted,
    /// Refused; the registry already held `limit` connections.
    Refused {
        /// Configured ceiling.
        limit: usize,
    },
}

/// Gatekeeper applying the `max_connections` ceiling.
#[derive(Debug, Clone, Copy)]
pub struct AdmissionController {
    max_connections: usize,
}

impl AdmissionController {
    /// Create a controller with the given ceiling.
    pub fn new(max_connections: usize) -> Self {
        Self { max_connections }
    }

    /// Configured ceiling.
    pub fn limit(&self) -> usize {
        self.max_connections
    }

    /// Register `connection` if the registry is below the ceiling.
    ///
    /// A refused connection is never inserted.
    pub fn admit(
        &self,
        registry: &ConnectionRegistry,
        connection: Arc<AgentConnection>,
    ) -> Admission {
        let agent_id = connection.agent_id.clone();
        if registry.try_insert_below(connection, self.max_connections) {
            Admission::Admitted
        } else {
            warn!(
                agent_id = %agent_id,
                limit = self.max_connections,
                "connection refused: at capacity"
            );
            counter!(SWARM_ADMISSIONS_REJECTED_TOTAL).increment(1);
            Admission::Refused {
                limit: self.max_connections,
            }
        }
    }
}
