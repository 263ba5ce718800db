//! Bounded FIFO of encoded frames held while the client is not connected.

use std::collections::VecDeque;

use crate::errors::{ClientError, Result};

/// Frames waiting for a transport, oldest first.
#[derive(Debug)]
pub struct OutboundQueue {
    capacity: usize,
    frames: VecDeque<String>,
}

impl OutboundQueue {
    /// Create a queue holding at most `capacity` frames. `0` disables queueing.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            frames: VecDeque::with_capacity(capacity.min(1024)),
        }
    }

    /// Append a frame.
    ///
    /// Fails with [`ClientError::NotConnected`] when queueing is disabled and
    /// [`ClientError::QueueFull`] at capacity. A rejected frame is not stored.
    pub fn push(&mut self, frame: String) -> Result<()> {
        if self.capacity == 0 {
            return Err(ClientError::NotConnected);
        }
        if self.frames.len() >= self.capacity {
            return Err(ClientError::QueueFull {
                capacity: self.capacity,
            });
        }
        self.frames.push_back(frame);
        Ok(())
    }

    /// Remove and return every frame in FIFO order.
    pub fn drain(&mut self) -> impl Iterator<Item = String> + '_ {
        self.frames.drain(..)
    }

    /// Queued frame count.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Configured capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn drains_in_fifo_order() {
        let mut queue = OutboundQueue::new(4);
        for frame in ["a", "b", "c"] {
            queue.push(frame.into()).unwrap();
        }
        let drained: Vec<String> = queue.drain().collect();
        assert_eq!(drained, ["a", "b", "c"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn rejects_past_capacity() {
        let mut queue = OutboundQueue::new(2);
        queue.push("a".into()).unwrap();
        queue.push("b".into()).unwrap();
        assert_matches!(
            queue.push("c".into()),
            Err(ClientError::QueueFull { capacity: 2 })
        );
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn zero_capacity_disables_queueing() {
        let mut queue = OutboundQueue::new(0);
        assert_matches!(queue.push("a".into()), Err(ClientError::NotConnected));
        assert!(queue.is_empty());
    }

    #[test]
    fn space_frees_after_drain() {
        let mut queue = OutboundQueue::new(1);
        queue.push("a".into()).unwrap();
        let _ = queue.drain().count();
        queue.push("b".into()).unwrap();
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.capacity(), 1);
    }
}
