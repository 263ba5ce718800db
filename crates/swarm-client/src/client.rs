//! `SwarmClient`: one agent's connection to the coordinator.
//!
//! A client owns at most one transport at a time. While it has none, sends
//! land in the [`OutboundQueue`]; attaching a transport drains that queue into
//! the writer channel under the same lock that flips the state to
//! `Connected`, so queued frames always precede direct sends.
//!
//! A transport is only attached once the coordinator has admitted it. The
//! coordinator routes nothing for a refused socket, so the client sends a
//! `ping` right after the upgrade and waits for the correlated `pong`. A close
//! frame in its place (1013 at capacity) fails the attempt with the queue
//! untouched.
//!
//! Each transport runs three tasks: a reader that decodes inbound frames, a
//! writer that owns the socket sink, and an optional heartbeat ticker. They
//! share a transport token that is a child of the session token, so an
//! explicit `disconnect()` tears everything down at once.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Value, json};
use swarm_core::backoff::BackoffPolicy;
use swarm_core::{AgentId, MessageId, MessageType, SwarmMessage, close_code};
use swarm_settings::ClientConfig;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::errors::{ClientError, Result};
use crate::events::{ClientEvent, EventHub};
use crate::handlers::HandlerRegistry;
use crate::handshake::handshake_url;
use crate::pending::PendingRequests;
use crate::queue::OutboundQueue;
use crate::state::ClientState;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Inbound = swarm_core::Result<SwarmMessage>;

/// Frames handed to the writer but not yet on the socket.
const OUTBOUND_CAPACITY: usize = 1024;
/// How long `disconnect()` waits for the writer to flush and close.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);
/// Disconnect reason reported for an explicit `disconnect()`.
pub const CLIENT_DISCONNECT_REASON: &str = "client disconnect";

/// Point-in-time counters for one client.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientStats {
    /// Current lifecycle state.
    pub state: ClientState,
    /// Frames waiting in the outbound queue.
    pub queued_messages: usize,
    /// Requests awaiting a response.
    pub pending_requests: usize,
    /// Reconnect attempts since the last successful connect.
    pub reconnect_attempts: u32,
    /// Frames handed to the transport.
    pub messages_sent: u64,
    /// Frames read from the transport, including undecodable ones.
    pub messages_received: u64,
}

/// Mutable connection bookkeeping, guarded as a unit.
struct Link {
    state: ClientState,
    queue: OutboundQueue,
    /// Writer channel of the attached transport.
    tx: Option<mpsc::Sender<String>>,
    writer: Option<JoinHandle<()>>,
    /// Cancelled by `disconnect()`; parent of every transport token.
    session: CancellationToken,
    /// Bumped on every attach so a stale reader cannot report a loss.
    generation: u64,
}

struct Inner {
    config: ClientConfig,
    agent_id: AgentId,
    backoff: BackoffPolicy,
    link: Mutex<Link>,
    pending: PendingRequests,
    handlers: HandlerRegistry,
    events: EventHub,
    reconnect_attempts: AtomicU32,
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
}

/// Agent-side handle to the swarm bus. Cheap to clone.
///
/// Background tasks keep the connection alive after every handle is
/// dropped; call [`SwarmClient::disconnect`] to end it.
#[derive(Clone)]
pub struct SwarmClient {
    inner: Arc<Inner>,
}

impl SwarmClient {
    /// Create a disconnected client.
    pub fn new(config: ClientConfig) -> Self {
        let agent_id = AgentId::from(config.agent_id.as_str());
        let backoff = config.backoff();
        let queue = OutboundQueue::new(config.queue_size);
        Self {
            inner: Arc::new(Inner {
                config,
                agent_id,
                backoff,
                link: Mutex::new(Link {
                    state: ClientState::Disconnected,
                    queue,
                    tx: None,
                    writer: None,
                    session: CancellationToken::new(),
                    generation: 0,
                }),
                pending: PendingRequests::new(),
                handlers: HandlerRegistry::new(),
                events: EventHub::new(),
                reconnect_attempts: AtomicU32::new(0),
                messages_sent: AtomicU64::new(0),
                messages_received: AtomicU64::new(0),
            }),
        }
    }

    /// Identity presented in the handshake.
    pub fn agent_id(&self) -> &AgentId {
        &self.inner.agent_id
    }

    /// Configuration this client was built with.
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ClientState {
        self.inner.link.lock().state
    }

    /// Whether a transport is attached.
    pub fn is_connected(&self) -> bool {
        self.state() == ClientState::Connected
    }

    /// Open the transport.
    ///
    /// Resolves once the coordinator has admitted the session and any queued
    /// frames have been handed to the writer. On failure an [`ClientEvent::Error`] is emitted
    /// and the error returned; when reconnection is enabled, retries continue
    /// in the background. Calling this while already connected, connecting or
    /// reconnecting is a no-op.
    #[instrument(skip(self), fields(agent_id = %self.inner.agent_id))]
    pub async fn connect(&self) -> Result<()> {
        let session = {
            let mut link = self.inner.link.lock();
            if link.state != ClientState::Disconnected {
                debug!(state = %link.state, "connect ignored");
                return Ok(());
            }
            link.state = ClientState::Connecting;
            link.session = CancellationToken::new();
            link.session.clone()
        };
        self.inner.reconnect_attempts.store(0, Ordering::Relaxed);

        let opened = match handshake_url(&self.inner.config.url, &self.inner.agent_id) {
            Ok(url) => self.inner.establish(&url).await,
            Err(err) => Err(err),
        };
        match opened {
            Ok((ws, early)) => {
                if Inner::attach(&self.inner, ws, early, &session) {
                    Ok(())
                } else {
                    Err(ClientError::Disconnected)
                }
            }
            Err(err) => {
                warn!(error = %err, "connect failed");
                self.inner.events.emit(ClientEvent::Error {
                    message: err.to_string(),
                });
                let retry = self.inner.config.reconnection
                    && !matches!(
                        err,
                        ClientError::InvalidUrl { .. } | ClientError::MissingAgentId
                    );
                let next = if retry {
                    ClientState::Reconnecting
                } else {
                    ClientState::Disconnected
                };
                if Inner::settle(&self.inner, &session, ClientState::Connecting, next) && retry {
                    drop(tokio::spawn(reconnect_loop(
                        Arc::clone(&self.inner),
                        session,
                    )));
                }
                Err(err)
            }
        }
    }

    /// Close the transport and stop reconnecting.
    ///
    /// Every pending request fails with [`ClientError::Disconnected`]. Queued
    /// frames are kept for the next `connect()`.
    #[instrument(skip(self), fields(agent_id = %self.inner.agent_id))]
    pub async fn disconnect(&self) {
        let (previous, writer) = {
            let mut link = self.inner.link.lock();
            let previous = link.state;
            link.session.cancel();
            link.state = ClientState::Disconnected;
            link.tx = None;
            (previous, link.writer.take())
        };
        self.inner.reconnect_attempts.store(0, Ordering::Relaxed);
        let failed = self.inner.pending.fail_all();

        if let Some(writer) = writer {
            if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, writer).await.is_err() {
                debug!("writer did not finish before the drain timeout");
            }
        }
        if previous != ClientState::Disconnected {
            info!(failed_requests = failed, "disconnected");
            self.inner.events.emit(ClientEvent::Disconnected {
                reason: CLIENT_DISCONNECT_REASON.into(),
            });
        }
    }

    /// Send a unicast `message` to `to`.
    pub fn send(&self, to: impl Into<AgentId>, payload: Value) -> Result<MessageId> {
        let message = SwarmMessage::new(MessageType::Message, self.inner.agent_id.clone())
            .to(to)
            .with_payload(payload);
        self.send_message(message)
    }

    /// Send `payload` to every other connected agent.
    pub fn broadcast(&self, payload: Value) -> Result<MessageId> {
        let message = SwarmMessage::new(MessageType::Broadcast, self.inner.agent_id.clone())
            .with_payload(payload);
        self.send_message(message)
    }

    /// Send a heartbeat carrying this client's capabilities.
    pub fn send_heartbeat(&self) -> Result<MessageId> {
        self.inner.heartbeat()
    }

    /// Send a prebuilt envelope. An empty `from` is filled with this agent.
    pub fn send_message(&self, mut message: SwarmMessage) -> Result<MessageId> {
        if message.from.is_empty() {
            message.from = self.inner.agent_id.clone();
        }
        self.inner.dispatch(&message)?;
        Ok(message.id)
    }

    /// Send a `request` and wait for the `response` correlated by id.
    ///
    /// An `error` reply correlated to the request resolves to
    /// [`ClientError::Remote`].
    #[instrument(skip(self, to, payload), fields(agent_id = %self.inner.agent_id))]
    pub async fn request(&self, to: impl Into<AgentId>, payload: Value) -> Result<SwarmMessage> {
        let message = SwarmMessage::new(MessageType::Request, self.inner.agent_id.clone())
            .to(to)
            .with_payload(payload);
        let id = message.id.clone();
        let rx = self.inner.pending.register(id.clone());
        if let Err(err) = self.inner.dispatch(&message) {
            self.inner.pending.remove(&id);
            return Err(err);
        }

        let timeout_ms = self.inner.config.request_timeout_ms;
        match tokio::time::timeout(self.inner.config.request_timeout(), rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(ClientError::Disconnected),
            Err(_) => {
                self.inner.pending.remove(&id);
                debug!(request_id = %id, timeout_ms, "request timed out");
                Err(ClientError::RequestTimeout { id, timeout_ms })
            }
        }
    }

    /// Answer `request` with `payload`.
    pub fn respond(&self, request: &SwarmMessage, payload: Value) -> Result<MessageId> {
        let reply = SwarmMessage::reply_to(request, MessageType::Response, self.inner.agent_id.clone())
            .with_payload(payload);
        self.send_message(reply)
    }

    /// Run `handler` for inbound messages whose envelope type or
    /// `payload.type` equals `key` (`*` matches all).
    ///
    /// Handlers run on the reader task and must not block.
    pub fn on_message<F>(&self, key: impl Into<String>, handler: F)
    where
        F: Fn(&SwarmMessage) + Send + Sync + 'static,
    {
        self.inner.handlers.register(key, handler);
    }

    /// Subscribe to lifecycle and traffic events.
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.inner.events.subscribe()
    }

    /// Snapshot of the client's counters.
    pub fn get_stats(&self) -> ClientStats {
        let (state, queued_messages) = {
            let link = self.inner.link.lock();
            (link.state, link.queue.len())
        };
        ClientStats {
            state,
            queued_messages,
            pending_requests: self.inner.pending.len(),
            reconnect_attempts: self.inner.reconnect_attempts.load(Ordering::Relaxed),
            messages_sent: self.inner.messages_sent.load(Ordering::Relaxed),
            messages_received: self.inner.messages_received.load(Ordering::Relaxed),
        }
    }
}

impl Inner {
    /// Upgrade and wait for admission. Frames that arrive ahead of the
    /// admission `pong` are returned for delivery after attach.
    async fn establish(&self, url: &str) -> Result<(WsStream, Vec<Inbound>)> {
        let mut ws = self.open(url).await?;
        match self.await_admission(&mut ws, url).await {
            Ok(early) => Ok((ws, early)),
            Err(err) => {
                let _ = ws.close(None).await;
                Err(err)
            }
        }
    }

    async fn open(&self, url: &str) -> Result<WsStream> {
        let timeout_ms = self.config.connect_timeout_ms;
        match tokio::time::timeout(self.config.connect_timeout(), connect_async(url)).await {
            Ok(Ok((ws, _response))) => Ok(ws),
            Ok(Err(source)) => Err(ClientError::Connect {
                url: url.to_owned(),
                source: Box::new(source),
            }),
            Err(_) => Err(ClientError::ConnectTimeout {
                url: url.to_owned(),
                timeout_ms,
            }),
        }
    }

    async fn await_admission(&self, ws: &mut WsStream, url: &str) -> Result<Vec<Inbound>> {
        let transport_error = |source: tokio_tungstenite::tungstenite::Error| ClientError::Connect {
            url: url.to_owned(),
            source: Box::new(source),
        };
        let ping = SwarmMessage::new(MessageType::Ping, self.agent_id.clone());
        ws.send(Message::Text(ping.encode()?.into()))
            .await
            .map_err(transport_error)?;

        let mut early = Vec::new();
        let confirmation = async {
            loop {
                let decoded = match ws.next().await {
                    Some(Ok(Message::Text(text))) => SwarmMessage::decode(text.as_str()),
                    Some(Ok(Message::Binary(bytes))) => SwarmMessage::decode_bytes(&bytes),
                    Some(Ok(Message::Close(frame))) => return Err(refusal(frame.as_ref())),
                    Some(Ok(_)) => continue,
                    Some(Err(source)) => return Err(transport_error(source)),
                    None => return Err(refusal(None)),
                };
                match decoded {
                    Ok(message)
                        if message.message_type == MessageType::Pong
                            && message.response_id.as_ref() == Some(&ping.id) =>
                    {
                        return Ok(());
                    }
                    other => early.push(other),
                }
            }
        };
        let outcome = tokio::time::timeout(self.config.connect_timeout(), confirmation).await;
        match outcome {
            Ok(Ok(())) => Ok(early),
            Ok(Err(err)) => Err(err),
            Err(_) => Err(ClientError::ConnectTimeout {
                url: url.to_owned(),
                timeout_ms: self.config.connect_timeout_ms,
            }),
        }
    }

    /// Hand an admitted `ws` to fresh reader/writer tasks and flush the queue.
    ///
    /// Returns `false` (dropping `ws`) when the session was cancelled while
    /// the handshake was in flight.
    fn attach(
        inner: &Arc<Self>,
        ws: WsStream,
        early: Vec<Inbound>,
        session: &CancellationToken,
    ) -> bool {
        let mut link = inner.link.lock();
        if session.is_cancelled()
            || !matches!(
                link.state,
                ClientState::Connecting | ClientState::Reconnecting
            )
        {
            return false;
        }

        let (sink, stream) = ws.split();
        let transport = session.child_token();
        let (tx, rx) = mpsc::channel(OUTBOUND_CAPACITY.max(link.queue.len()));
        let mut flushed = 0u64;
        for frame in link.queue.drain() {
            if tx.try_send(frame).is_ok() {
                flushed += 1;
            }
        }
        let _ = inner.messages_sent.fetch_add(flushed, Ordering::Relaxed);

        link.generation += 1;
        let generation = link.generation;
        link.writer = Some(tokio::spawn(run_writer(sink, rx, transport.clone())));
        link.tx = Some(tx);
        link.state = ClientState::Connected;
        drop(link);

        inner.reconnect_attempts.store(0, Ordering::Relaxed);
        info!(agent_id = %inner.agent_id, flushed, "connected");
        inner.events.emit(ClientEvent::Connected);

        // Handlers may send, so early frames run outside the lock and ahead
        // of the reader.
        for decoded in early {
            inner.handle_inbound(decoded);
        }
        drop(tokio::spawn(run_reader(
            Arc::clone(inner),
            stream,
            generation,
            transport.clone(),
        )));
        if let Some(period) = inner.config.heartbeat_interval() {
            drop(tokio::spawn(run_heartbeats(
                Arc::clone(inner),
                period,
                transport,
            )));
        }
        true
    }

    /// Move from `from` to `to` if the session is still live. Returns whether
    /// the transition happened.
    fn settle(
        inner: &Arc<Self>,
        session: &CancellationToken,
        from: ClientState,
        to: ClientState,
    ) -> bool {
        let mut link = inner.link.lock();
        if session.is_cancelled() || link.state != from {
            return false;
        }
        link.state = to;
        true
    }

    /// Transmit directly when connected, otherwise enqueue.
    fn dispatch(&self, message: &SwarmMessage) -> Result<()> {
        let frame = message.encode()?;
        let mut link = self.link.lock();
        let frame = match (link.state, link.tx.as_ref()) {
            (ClientState::Connected, Some(tx)) => match tx.try_send(frame) {
                Ok(()) => {
                    let _ = self.messages_sent.fetch_add(1, Ordering::Relaxed);
                    debug!(id = %message.id, kind = %message.message_type, "sent");
                    return Ok(());
                }
                Err(mpsc::error::TrySendError::Full(_)) => {
                    return Err(ClientError::QueueFull {
                        capacity: tx.max_capacity(),
                    });
                }
                // Writer is gone; the reader will report the loss shortly.
                Err(mpsc::error::TrySendError::Closed(frame)) => frame,
            },
            _ => frame,
        };
        link.queue.push(frame)?;
        debug!(id = %message.id, queued = link.queue.len(), "queued");
        Ok(())
    }

    fn heartbeat(&self) -> Result<MessageId> {
        let message = SwarmMessage::new(MessageType::Heartbeat, self.agent_id.clone())
            .with_payload(json!({ "capabilities": self.config.capabilities }));
        let id = message.id.clone();
        self.dispatch(&message)?;
        Ok(id)
    }

    fn handle_inbound(&self, decoded: swarm_core::Result<SwarmMessage>) {
        let _ = self.messages_received.fetch_add(1, Ordering::Relaxed);
        let message = match decoded {
            Ok(message) => message,
            Err(err) => {
                warn!(error = %err, "dropping undecodable frame");
                self.events.emit(ClientEvent::Error {
                    message: err.to_string(),
                });
                return;
            }
        };
        debug!(id = %message.id, kind = %message.message_type, from = %message.from, "received");

        if let Some(request_id) = message.response_id.as_ref() {
            let outcome = match message.message_type {
                MessageType::Response => Some(Ok(message.clone())),
                MessageType::Error => Some(Err(remote_error(&message.payload))),
                _ => None,
            };
            if let Some(outcome) = outcome {
                if self.pending.complete(request_id, outcome) {
                    return;
                }
            }
        }

        let _ = self.handlers.dispatch(&message);
        self.events.emit(ClientEvent::Message(message));
    }

    /// The transport of `generation` ended without an explicit disconnect.
    fn connection_lost(inner: &Arc<Self>, generation: u64, reason: String) {
        let reconnect = inner.config.reconnection;
        let session = {
            let mut link = inner.link.lock();
            if link.generation != generation || link.state != ClientState::Connected {
                return;
            }
            link.tx = None;
            link.writer = None;
            link.state = if reconnect {
                ClientState::Reconnecting
            } else {
                ClientState::Disconnected
            };
            link.session.clone()
        };
        // Pending requests are left to their own timeouts; a reconnect may
        // still deliver the response.
        warn!(agent_id = %inner.agent_id, %reason, "connection lost");
        inner.events.emit(ClientEvent::Disconnected { reason });
        if reconnect {
            drop(tokio::spawn(reconnect_loop(Arc::clone(inner), session)));
        }
    }
}

fn remote_error(payload: &Value) -> ClientError {
    ClientError::Remote {
        code: payload
            .get("code")
            .and_then(Value::as_str)
            .unwrap_or("UNKNOWN")
            .to_owned(),
        message: payload
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned(),
    }
}

/// Close received while waiting for admission.
fn refusal(frame: Option<&CloseFrame>) -> ClientError {
    match frame {
        Some(frame) => {
            let code = u16::from(frame.code);
            let reason = if frame.reason.is_empty() {
                close_code::describe(code).to_owned()
            } else {
                frame.reason.as_str().to_owned()
            };
            ClientError::Refused { code, reason }
        }
        None => ClientError::Refused {
            code: close_code::ABNORMAL_CLOSURE,
            reason: "closed before admission".into(),
        },
    }
}

fn close_reason(frame: Option<&CloseFrame>) -> String {
    match frame {
        Some(frame) => {
            let code = u16::from(frame.code);
            let reason = frame.reason.as_str();
            if reason.is_empty() {
                format!("{} ({code})", close_code::describe(code))
            } else {
                format!("{reason} ({code})")
            }
        }
        None => "closed by coordinator".into(),
    }
}

async fn run_reader(
    inner: Arc<Inner>,
    mut stream: SplitStream<WsStream>,
    generation: u64,
    transport: CancellationToken,
) {
    let reason = loop {
        tokio::select! {
            biased;
            () = transport.cancelled() => break "transport closed".to_owned(),
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => inner.handle_inbound(SwarmMessage::decode(text.as_str())),
                Some(Ok(Message::Binary(bytes))) => {
                    inner.handle_inbound(SwarmMessage::decode_bytes(&bytes));
                }
                Some(Ok(Message::Close(frame))) => break close_reason(frame.as_ref()),
                Some(Ok(_)) => {}
                Some(Err(err)) => break format!("transport error: {err}"),
                None => break "connection lost".to_owned(),
            },
        }
    };
    transport.cancel();
    Inner::connection_lost(&inner, generation, reason);
}

async fn run_writer(
    mut sink: SplitSink<WsStream, Message>,
    mut rx: mpsc::Receiver<String>,
    transport: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            frame = rx.recv() => match frame {
                Some(frame) => {
                    if let Err(err) = sink.send(Message::Text(frame.into())).await {
                        debug!(error = %err, "write failed");
                        transport.cancel();
                        return;
                    }
                }
                None => break,
            },
            () = transport.cancelled() => break,
        }
    }
    // Frames accepted before the close still go out.
    while let Ok(frame) = rx.try_recv() {
        if sink.send(Message::Text(frame.into())).await.is_err() {
            return;
        }
    }
    let close = CloseFrame {
        code: CloseCode::Normal,
        reason: CLIENT_DISCONNECT_REASON.into(),
    };
    let _ = sink.send(Message::Close(Some(close))).await;
    let _ = sink.close().await;
}

async fn run_heartbeats(inner: Arc<Inner>, period: Duration, transport: CancellationToken) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            () = transport.cancelled() => return,
            _ = ticker.tick() => {
                if let Err(err) = inner.heartbeat() {
                    debug!(error = %err, "heartbeat not sent");
                }
            }
        }
    }
}

/// Retry the handshake with capped exponential backoff until it succeeds,
/// the attempt cap is reached, or the session is cancelled.
async fn reconnect_loop(inner: Arc<Inner>, session: CancellationToken) {
    let url = match handshake_url(&inner.config.url, &inner.agent_id) {
        Ok(url) => url,
        Err(err) => {
            warn!(error = %err, "cannot reconnect");
            let _ = Inner::settle(
                &inner,
                &session,
                ClientState::Reconnecting,
                ClientState::Disconnected,
            );
            return;
        }
    };

    loop {
        let attempts = inner.reconnect_attempts.load(Ordering::Relaxed);
        if inner.backoff.exhausted(attempts) {
            if Inner::settle(
                &inner,
                &session,
                ClientState::Reconnecting,
                ClientState::Disconnected,
            ) {
                warn!(agent_id = %inner.agent_id, attempts, "reconnection abandoned");
                inner.events.emit(ClientEvent::Error {
                    message: format!("reconnection abandoned after {attempts} attempts"),
                });
            }
            return;
        }

        let delay = inner.backoff.delay_for(attempts);
        let attempt = inner.reconnect_attempts.fetch_add(1, Ordering::Relaxed) + 1;
        info!(agent_id = %inner.agent_id, attempt, delay_ms = delay.as_millis(), "reconnecting");
        inner
            .events
            .emit(ClientEvent::Reconnecting { attempt, delay });

        tokio::select! {
            () = session.cancelled() => return,
            () = tokio::time::sleep(delay) => {}
        }

        match inner.establish(&url).await {
            Ok((ws, early)) => {
                let _ = Inner::attach(&inner, ws, early, &session);
                return;
            }
            Err(err) => {
                if session.is_cancelled() {
                    return;
                }
                warn!(agent_id = %inner.agent_id, attempt, error = %err, "reconnect failed");
                inner.events.emit(ClientEvent::Error {
                    message: err.to_string(),
                });
            }
        }
    }
}
