//! Outstanding requests awaiting a correlated response.

use std::collections::HashMap;

use parking_lot::Mutex;
use swarm_core::{MessageId, SwarmMessage};
use tokio::sync::oneshot;

use crate::errors::{ClientError, Result};

/// Completion side of one pending request.
type PendingTx = oneshot::Sender<Result<SwarmMessage>>;

/// Request id to waiter table.
#[derive(Default)]
pub struct PendingRequests {
    waiters: Mutex<HashMap<MessageId, PendingTx>>,
}

impl PendingRequests {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a waiter for `id` and return its receiver.
    pub fn register(&self, id: MessageId) -> oneshot::Receiver<Result<SwarmMessage>> {
        let (tx, rx) = oneshot::channel();
        let _ = self.waiters.lock().insert(id, tx);
        rx
    }

    /// Complete the waiter for `id`. Returns `false` when nothing was waiting.
    pub fn complete(&self, id: &MessageId, outcome: Result<SwarmMessage>) -> bool {
        let Some(tx) = self.waiters.lock().remove(id) else {
            return false;
        };
        // The requester may have timed out between lookup and send.
        let _ = tx.send(outcome);
        true
    }

    /// Forget the waiter for `id` without completing it.
    pub fn remove(&self, id: &MessageId) {
        let _ = self.waiters.lock().remove(id);
    }

    /// Fail every waiter with [`ClientError::Disconnected`]. Returns the count.
    pub fn fail_all(&self) -> usize {
        let drained: Vec<PendingTx> = self.waiters.lock().drain().map(|(_, tx)| tx).collect();
        let count = drained.len();
        for tx in drained {
            let _ = tx.send(Err(ClientError::Disconnected));
        }
        count
    }

    /// Number of outstanding requests.
    pub fn len(&self) -> usize {
        self.waiters.lock().len()
    }

    /// Whether no request is outstanding.
    pub fn is_empty(&self) -> bool {
        self.waiters.lock().is_empty()
    }
}
