//! Connection registry.
//!
//! Maps each agent identity to the set of its live connections. An agent may
//! hold more than one entry while a stale socket awaits eviction, so lookups
//! are multi-valued.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use swarm_core::{AgentId, ConnectionId};

use super::connection::AgentConnection;

type AgentSlots = HashMap<ConnectionId, Arc<AgentConnection>>;

/// Authoritative agent → connections map.
#[derive(Default)]
pub struct ConnectionRegistry {
    agents: RwLock<HashMap<AgentId, AgentSlots>>,
}

fn count(agents: &HashMap<AgentId, AgentSlots>) -> usize {
    agents.values().map(HashMap::len).sum()
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert unconditionally.
    pub fn insert(&self, connection: Arc<AgentConnection>) {
        let mut agents = self.agents.write();
        let _ = agents
            .entry(connection.agent_id.clone())
            .or_default()
            .insert(connection.id.clone(), connection);
    }

    /// Insert only if fewer than `limit` connections are registered.
    ///
    /// The size check and the insert happen under one write lock, so two
    /// racing handshakes cannot both take the last slot.
    pub fn try_insert_below(&self, connection: Arc<AgentConnection>, limit: usize) -> bool {
        let mut agents = self.agents.write();
        if count(&agents) >= limit {
            return false;
        }
        let _ = agents
            .entry(connection.agent_id.clone())
            .or_default()
            .insert(connection.id.clone(), connection);
        true
    }

    /// Remove one connection. Returns `true` if it was registered.
    pub fn remove(&self, connection: &AgentConnection) -> bool {
        let mut agents = self.agents.write();
        let Some(slots) = agents.get_mut(&connection.agent_id) else {
            return false;
        };
        let removed = slots.remove(&connection.id).is_some();
        if slots.is_empty() {
            let _ = agents.remove(&connection.agent_id);
        }
        removed
    }

    /// Every connection registered under `agent_id`.
    pub fn lookup(&self, agent_id: &AgentId) -> Vec<Arc<AgentConnection>> {
        self.agents
            .read()
            .get(agent_id)
            .map(|slots| slots.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Point-in-time copy of all handles, one per connection.
    ///
    /// Broadcast iterates this copy, so concurrent inserts and removes
    /// cannot affect a pass already in progress.
    pub fn snapshot(&self) -> Vec<Arc<AgentConnection>> {
        self.agents
            .read()
            .values()
            .flat_map(|slots| slots.values().cloned())
            .collect()
    }

    /// Agents with at least one open connection, sorted.
    pub fn agent_ids(&self) -> Vec<AgentId> {
        let agents = self.agents.read();
        let mut ids: Vec<AgentId> = agents
            .iter()
            .filter(|(_, slots)| slots.values().any(|c| c.is_open()))
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Registered connections.
    pub fn len(&self) -> usize {
        count(&self.agents.read())
    }

    /// Whether no connection is registered.
    pub fn is_empty(&self) -> bool {
        self.agents.read().is_empty()
    }

    /// Distinct agents registered.
    pub fn agent_count(&self) -> usize {
        self.agents.read().len()
    }
}
