//! Type-keyed inbound message dispatch.
//!
//! A handler registered under a key runs for every inbound message whose
//! envelope `type` or embedded `payload.type` equals that key. The key `*`
//! matches everything.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use swarm_core::SwarmMessage;

/// Key that matches every inbound message.
pub const ANY: &str = "*";

/// Callback invoked for a matching inbound message.
pub type Handler = Arc<dyn Fn(&SwarmMessage) + Send + Sync>;

/// Registered handlers by key.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, Vec<Handler>>>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under `key`. Handlers for one key run in
    /// registration order.
    pub fn register<F>(&self, key: impl Into<String>, handler: F)
    where
        F: Fn(&SwarmMessage) + Send + Sync + 'static,
    {
        self.handlers
            .write()
            .entry(key.into())
            .or_default()
            .push(Arc::new(handler));
    }

    /// Run every handler matching `message`. Returns how many ran.
    pub fn dispatch(&self, message: &SwarmMessage) -> usize {
        // Collect first so a handler may register more handlers.
        let matched: Vec<Handler> = {
            let handlers = self.handlers.read();
            let mut keys = vec![message.message_type.as_str(), ANY];
            if let Some(sub) = message.payload_type() {
                if sub != message.message_type.as_str() {
                    keys.push(sub);
                }
            }
            keys.iter()
                .filter_map(|key| handlers.get(*key))
                .flatten()
                .cloned()
                .collect()
        };
        for handler in &matched {
            handler(message);
        }
        matched.len()
    }

    /// Total registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.read().values().map(Vec::len).sum()
    }

    /// Whether no handler is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
