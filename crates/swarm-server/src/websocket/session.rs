//! Session lifecycle: one upgraded socket from admission through teardown.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge, histogram};
use serde_json::json;
use swarm_core::{AgentId, close_code};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::admission::{Admission, AdmissionController};
use super::connection::{AgentConnection, Outbound};
use super::heartbeat::{HeartbeatResult, HeartbeatSettings, run_heartbeat};
use super::registry::ConnectionRegistry;
use super::router::MessageRouter;
use crate::events::{CoordinatorEvent, EventHub};
use crate::metrics::{
    SWARM_CONNECTION_DURATION_SECONDS, SWARM_CONNECTIONS_ACTIVE, SWARM_CONNECTIONS_TOTAL,
    SWARM_DISCONNECTIONS_TOTAL, SWARM_HEARTBEAT_EVICTIONS_TOTAL,
};
use crate::store::{MemoryStore, connection_key};

/// How long teardown waits for the writer to flush its close frame.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Disconnect reason recorded when the heartbeat monitor evicts a peer.
pub const HEARTBEAT_TIMEOUT_REASON: &str = "heartbeat timeout";

/// State shared by every session of one coordinator.
pub struct SessionContext {
    /// Agent → connections map.
    pub registry: Arc<ConnectionRegistry>,
    /// Frame dispatcher.
    pub router: MessageRouter,
    /// Connection ceiling.
    pub admission: AdmissionController,
    /// Lifecycle notifications.
    pub events: EventHub,
    /// Optional persistence collaborator.
    pub store: Option<Arc<dyn MemoryStore>>,
    /// Heartbeat timers.
    pub heartbeat: HeartbeatSettings,
    /// Per-connection outbound buffer.
    pub outbound_buffer: usize,
}

impl SessionContext {
    async fn persist(&self, connection: &AgentConnection, status: &str, reason: Option<&str>) {
        let Some(store) = &self.store else { return };
        let mut value = json!(connection.info());
        value["status"] = json!(status);
        if let Some(reason) = reason {
            value["reason"] = json!(reason);
        }
        if let Err(e) = store.store(&connection_key(&connection.id), value).await {
            warn!(error = %e, "failed to persist connection summary");
        }
    }
}

/// Run one agent session.
///
/// 1. Admission: at capacity the socket is closed with 1013 before
///    registration and before any timer starts
/// 2. Register, emit `client-connected`, start the heartbeat monitor
/// 3. Route inbound frames until the peer closes, a close is requested
///    (eviction, forced disconnect) or the coordinator shuts down
/// 4. Deregister, emit `client-disconnected`
#[instrument(skip_all, fields(agent_id = %agent_id, connection_id))]
pub async fn run_session(
    mut socket: WebSocket,
    agent_id: AgentId,
    ctx: Arc<SessionContext>,
    shutdown: CancellationToken,
) {
    let (send_tx, send_rx) = mpsc::channel::<Outbound>(ctx.outbound_buffer.max(1));
    let connection = Arc::new(AgentConnection::new(agent_id, send_tx));

    if let Admission::Refused { limit } = ctx.admission.admit(&ctx.registry, connection.clone()) {
        let frame = CloseFrame {
            code: close_code::TRY_AGAIN_LATER,
            reason: format!("coordinator at capacity ({limit} connections)").into(),
        };
        let _ = socket.send(Message::Close(Some(frame))).await;
        return;
    }

    let _ = connection.open();
    let _ = tracing::Span::current().record("connection_id", tracing::field::display(&connection.id));
    info!(connection_id = %connection.id, "agent connected");
    counter!(SWARM_CONNECTIONS_TOTAL).increment(1);
    gauge!(SWARM_CONNECTIONS_ACTIVE).increment(1.0);

    ctx.events.emit(CoordinatorEvent::ClientConnected {
        agent_id: connection.agent_id.clone(),
        connection_id: connection.id.clone(),
        connected_at: connection.connected_at,
    });
    ctx.persist(&connection, "connected", None).await;

    let (ws_tx, mut ws_rx) = socket.split();
    let writer = tokio::spawn(run_writer(ws_tx, send_rx, connection.clone()));

    let heartbeat_cancel = CancellationToken::new();
    let heartbeat = {
        let connection = connection.clone();
        let cancel = heartbeat_cancel.clone();
        let settings = ctx.heartbeat;
        tokio::spawn(async move {
            if run_heartbeat(connection.clone(), settings, cancel).await == HeartbeatResult::TimedOut {
                warn!(connection_id = %connection.id, "evicting silent connection");
                counter!(SWARM_HEARTBEAT_EVICTIONS_TOTAL).increment(1);
                let _ = connection.close(close_code::STALE_CONNECTION, HEARTBEAT_TIMEOUT_REASON);
            }
        })
    };

    loop {
        let frame = tokio::select! {
            biased;
            () = connection.close_requested() => break,
            () = shutdown.cancelled() => {
                let _ = connection.close(close_code::GOING_AWAY, "coordinator shutting down");
                break;
            }
            frame = ws_rx.next() => frame,
        };

        match frame {
            Some(Ok(Message::Text(text))) => {
                let _ = ctx.router.route(&connection, text.as_str());
            }
            Some(Ok(Message::Binary(bytes))) => {
                let _ = ctx.router.route_bytes(&connection, &bytes);
            }
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => connection.touch(),
            Some(Ok(Message::Close(frame))) => {
                let code = frame.as_ref().map_or(close_code::NORMAL, |f| f.code);
                debug!(code, "agent sent close frame");
                let _ = connection.close(code, "closed by agent");
                break;
            }
            Some(Err(e)) => {
                debug!(error = %e, "socket error");
                let _ = connection.close(close_code::NORMAL, "transport error");
                break;
            }
            None => {
                let _ = connection.close(close_code::NORMAL, "connection dropped");
                break;
            }
        }
    }

    // Teardown: unroutable first, then deregister, then release the socket.
    connection.mark_closed();
    let _ = ctx.registry.remove(&connection);
    heartbeat_cancel.cancel();
    let _ = heartbeat.await;
    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, writer).await.is_err() {
        debug!("writer did not finish in time");
    }

    let reason = connection
        .close_request()
        .map_or_else(|| "connection closed".to_string(), |r| r.reason);
    info!(connection_id = %connection.id, reason, "agent disconnected");
    counter!(SWARM_DISCONNECTIONS_TOTAL).increment(1);
    gauge!(SWARM_CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(SWARM_CONNECTION_DURATION_SECONDS).record(connection.age().as_secs_f64());

    ctx.persist(&connection, "disconnected", Some(&reason)).await;
    ctx.events.emit(CoordinatorEvent::ClientDisconnected {
        agent_id: connection.agent_id.clone(),
        connection_id: connection.id.clone(),
        reason,
    });
}

/// Forward queued frames to the socket until a close is requested, then
/// send the close frame carrying the requested code.
async fn run_writer(
    mut ws_tx: futures::stream::SplitSink<WebSocket, Message>,
    mut send_rx: mpsc::Receiver<Outbound>,
    connection: Arc<AgentConnection>,
) {
    loop {
        tokio::select! {
            biased;
            () = connection.close_requested() => break,
            outbound = send_rx.recv() => {
                let message = match outbound {
                    Some(Outbound::Text(text)) => Message::Text(text.as_str().into()),
                    Some(Outbound::Ping) => Message::Ping(Vec::new().into()),
                    None => break,
                };
                if ws_tx.send(message).await.is_err() {
                    return;
                }
            }
        }
    }

    // Flush anything routed before the close was requested.
    while let Ok(outbound) = send_rx.try_recv() {
        if let Outbound::Text(text) = outbound {
            if ws_tx.send(Message::Text(text.as_str().into())).await.is_err() {
                return;
            }
        }
    }

    if let Some(request) = connection.close_request() {
        let frame = CloseFrame {
            code: request.code,
            reason: request.reason.into(),
        };
        let _ = ws_tx.send(Message::Close(Some(frame))).await;
    }
    let _ = ws_tx.close().await;
}
