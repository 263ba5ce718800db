//! Per-socket connection state.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use swarm_core::{AgentId, ConnectionId, SwarmMessage};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Frame queued for the socket writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Serialized envelope.
    Text(Arc<String>),
    /// Transport-level ping for idle connections.
    Ping,
}

/// Lifecycle of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// Upgraded but not yet admitted.
    Connecting,
    /// Registered and routable.
    Open,
    /// Close requested; no further sends.
    Closing,
    /// Socket gone.
    Closed,
}

/// Close code and reason requested for this connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseRequest {
    /// WebSocket close code.
    pub code: u16,
    /// Human-readable reason.
    pub reason: String,
}

/// Read-only copy of a connection's observable state.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfo {
    /// Connection id.
    pub connection_id: ConnectionId,
    /// Agent identity.
    pub agent_id: AgentId,
    /// Lifecycle state.
    pub state: ConnectionState,
    /// Wall-clock admission time.
    pub connected_at: DateTime<Utc>,
    /// Frames delivered to this connection.
    pub messages_sent: u64,
    /// Frames routed from this connection.
    pub messages_received: u64,
}

/// One live agent socket.
pub struct AgentConnection {
    /// Coordinator-assigned id.
    pub id: ConnectionId,
    /// Agent identity from the handshake.
    pub agent_id: AgentId,
    /// Wall-clock creation time.
    pub connected_at: DateTime<Utc>,
    tx: mpsc::Sender<Outbound>,
    opened: Instant,
    state: Mutex<ConnectionState>,
    close_request: Mutex<Option<CloseRequest>>,
    closing: CancellationToken,
    last_heartbeat: Mutex<Instant>,
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
    dropped_messages: AtomicU64,
}

impl AgentConnection {
    /// Create a connection in the `Connecting` state.
    pub fn new(agent_id: AgentId, tx: mpsc::Sender<Outbound>) -> Self {
        let now = Instant::now();
        Self {
            id: ConnectionId::new(),
            agent_id,
            connected_at: Utc::now(),
            tx,
            opened: now,
            state: Mutex::new(ConnectionState::Connecting),
            close_request: Mutex::new(None),
            closing: CancellationToken::new(),
            last_heartbeat: Mutex::new(now),
            messages_sent: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    /// Whether the connection accepts frames.
    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Move `Connecting` to `Open`. Returns `false` if a close raced ahead.
    pub fn open(&self) -> bool {
        let mut state = self.state.lock();
        if *state == ConnectionState::Connecting {
            *state = ConnectionState::Open;
            *self.last_heartbeat.lock() = Instant::now();
            true
        } else {
            false
        }
    }

    /// Request closure with `code`. Only the first request wins; later
    /// calls return `false` and keep the original reason.
    pub fn close(&self, code: u16, reason: impl Into<String>) -> bool {
        let mut state = self.state.lock();
        if matches!(*state, ConnectionState::Closing | ConnectionState::Closed) {
            return false;
        }
        *state = ConnectionState::Closing;
        *self.close_request.lock() = Some(CloseRequest {
            code,
            reason: reason.into(),
        });
        self.closing.cancel();
        true
    }

    /// Mark the socket as gone.
    pub fn mark_closed(&self) {
        *self.state.lock() = ConnectionState::Closed;
        self.closing.cancel();
    }

    /// Resolves once a close has been requested.
    pub async fn close_requested(&self) {
        self.closing.cancelled().await;
    }

    /// The close request, if any.
    pub fn close_request(&self) -> Option<CloseRequest> {
        self.close_request.lock().clone()
    }

    /// Queue a serialized frame. Returns `false` if the connection is not
    /// open or its buffer is full.
    pub fn send(&self, frame: Arc<String>) -> bool {
        if !self.is_open() {
            return false;
        }
        if self.tx.try_send(Outbound::Text(frame)).is_ok() {
            let _ = self.messages_sent.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Serialize and queue an envelope.
    pub fn send_message(&self, message: &SwarmMessage) -> bool {
        match message.encode() {
            Ok(json) => self.send(Arc::new(json)),
            Err(_) => false,
        }
    }

    /// Queue a transport ping.
    pub fn ping(&self) -> bool {
        self.is_open() && self.tx.try_send(Outbound::Ping).is_ok()
    }

    /// Record liveness (inbound ping, pong or heartbeat).
    pub fn touch(&self) {
        *self.last_heartbeat.lock() = Instant::now();
    }

    /// Instant of the last liveness signal.
    pub fn last_heartbeat(&self) -> Instant {
        *self.last_heartbeat.lock()
    }

    /// Time since the last liveness signal.
    pub fn heartbeat_elapsed(&self) -> Duration {
        self.last_heartbeat().elapsed()
    }

    /// Count one inbound routed frame.
    pub fn record_received(&self) {
        let _ = self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Frames delivered to this connection.
    pub fn messages_sent(&self) -> u64 {
        self.messages_sent.load(Ordering::Relaxed)
    }

    /// Frames routed from this connection.
    pub fn messages_received(&self) -> u64 {
        self.messages_received.load(Ordering::Relaxed)
    }

    /// Frames dropped on a full buffer.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.opened.elapsed()
    }

    /// Snapshot for stats and persistence.
    pub fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            connection_id: self.id.clone(),
            agent_id: self.agent_id.clone(),
            state: self.state(),
            connected_at: self.connected_at,
            messages_sent: self.messages_sent(),
            messages_received: self.messages_received(),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn open_connection(
        agent: &str,
        buffer: usize,
    ) -> (Arc<AgentConnection>, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(buffer);
        let conn = AgentConnection::new(AgentId::from(agent), tx);
        assert!(conn.open());
        (Arc::new(conn), rx)
    }

    #[test]
    fn new_connection_is_connecting() {
        let (tx, _rx) = mpsc::channel(4);
        let conn = AgentConnection::new(AgentId::from("a"), tx);
        assert_eq!(conn.state(), ConnectionState::Connecting);
        assert!(conn.id.starts_with("conn_"));
        assert!(!conn.send(Arc::new("x".into())));
    }

    #[tokio::test]
    async fn send_counts_and_delivers() {
        let (conn, mut rx) = open_connection("a", 4);
        assert!(conn.send(Arc::new("hello".into())));
        assert_eq!(rx.recv().await, Some(Outbound::Text(Arc::new("hello".into()))));
        assert_eq!(conn.messages_sent(), 1);
    }

    #[test]
    fn full_buffer_drops() {
        let (conn, _rx) = open_connection("a", 1);
        assert!(conn.send(Arc::new("1".into())));
        assert!(!conn.send(Arc::new("2".into())));
        assert_eq!(conn.drop_count(), 1);
        assert_eq!(conn.messages_sent(), 1);
    }

    #[test]
    fn closed_channel_refuses() {
        let (conn, rx) = open_connection("a", 4);
        drop(rx);
        assert!(!conn.send(Arc::new("x".into())));
    }

    #[tokio::test]
    async fn first_close_wins() {
        let (conn, _rx) = open_connection("a", 4);
        assert!(conn.close(4000, "heartbeat timeout"));
        assert!(!conn.close(1000, "later"));
        conn.close_requested().await;
        let request = conn.close_request().unwrap();
        assert_eq!(request.code, 4000);
        assert_eq!(request.reason, "heartbeat timeout");
        assert_eq!(conn.state(), ConnectionState::Closing);
        assert!(!conn.send(Arc::new("x".into())));
    }

    #[test]
    fn open_after_close_fails() {
        let (tx, _rx) = mpsc::channel(4);
        let conn = AgentConnection::new(AgentId::from("a"), tx);
        assert!(conn.close(1001, "shutdown"));
        assert!(!conn.open());
    }

    #[tokio::test(start_paused = true)]
    async fn touch_resets_elapsed() {
        let (conn, _rx) = open_connection("a", 4);
        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(conn.heartbeat_elapsed() >= Duration::from_secs(5));
        conn.touch();
        assert!(conn.heartbeat_elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn info_snapshot() {
        let (conn, _rx) = open_connection("agent-1", 4);
        conn.record_received();
        let info = conn.info();
        assert_eq!(info.agent_id.as_str(), "agent-1");
        assert_eq!(info.state, ConnectionState::Open);
        assert_eq!(info.messages_received, 1);
        let value = serde_json::to_value(&info).unwrap();
        assert_eq!(value["state"], "open");
        assert!(value["connectionId"].as_str().unwrap().starts_with("conn_"));
    }

    #[tokio::test]
    async fn ping_only_when_open() {
        let (conn, mut rx) = open_connection("a", 4);
        assert!(conn.ping());
        assert_eq!(rx.recv().await, Some(Outbound::Ping));
        conn.mark_closed();
        assert!(!conn.ping());
    }
}
