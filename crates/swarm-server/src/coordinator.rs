//! `Coordinator`: the server façade over registry, admission, heartbeats
//! and routing, plus the HTTP surface (`/ws`, `/health`, `/metrics`).

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use chrono::{DateTime, Utc};
use metrics_exporter_prometheus::PrometheusHandle;
use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::Value;
use swarm_core::{AgentId, close_code};
use swarm_settings::CoordinatorConfig;
use tokio::net::TcpListener;
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tower_http::compression::CompressionLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::errors::{CoordinatorError, Result};
use crate::events::{CoordinatorEvent, EventHub};
use crate::health::{self, ConnectionStats, HealthStatus};
use crate::shutdown::{DEFAULT_SHUTDOWN_TIMEOUT, ShutdownCoordinator};
use crate::store::{MemoryStore, STATS_KEY};
use crate::websocket::admission::AdmissionController;
use crate::websocket::connection::ConnectionInfo;
use crate::websocket::heartbeat::HeartbeatSettings;
use crate::websocket::registry::ConnectionRegistry;
use crate::websocket::router::MessageRouter;
use crate::websocket::session::{SessionContext, run_session};

#[derive(Clone, Copy)]
struct RunInfo {
    addr: SocketAddr,
    started_at: DateTime<Utc>,
    started: Instant,
}

type SharedStatus = Arc<RwLock<Option<RunInfo>>>;

struct Running {
    shutdown: ShutdownCoordinator,
    server: JoinHandle<()>,
}

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
struct AppState {
    ctx: Arc<SessionContext>,
    status: SharedStatus,
    metrics: Option<PrometheusHandle>,
    shutdown: CancellationToken,
    sessions: TaskTracker,
    max_message_size: usize,
}

/// Builder for a [`Coordinator`] with optional collaborators.
pub struct CoordinatorBuilder {
    config: CoordinatorConfig,
    store: Option<Arc<dyn MemoryStore>>,
    metrics: Option<PrometheusHandle>,
}

impl CoordinatorBuilder {
    /// Persist connection summaries and final stats through `store`.
    #[must_use]
    pub fn store(mut self, store: Arc<dyn MemoryStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Serve `GET /metrics` from `handle`.
    #[must_use]
    pub fn metrics_handle(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Build the coordinator. Nothing is bound until [`Coordinator::start`].
    pub fn build(self) -> Coordinator {
        let config = self.config;
        let registry = Arc::new(ConnectionRegistry::new());
        let ctx = SessionContext {
            router: MessageRouter::new(registry.clone(), config.broadcast_includes_sender),
            registry,
            admission: AdmissionController::new(config.max_connections),
            events: EventHub::new(),
            store: self.store,
            heartbeat: HeartbeatSettings {
                interval: config.heartbeat_interval(),
                timeout: config.heartbeat_timeout(),
                ping_idle: config.ping_idle_connections,
            },
            outbound_buffer: config.outbound_buffer,
        };
        Coordinator {
            config,
            ctx: Arc::new(ctx),
            topology: RwLock::new(Value::Null),
            status: Arc::new(RwLock::new(None)),
            running: Mutex::new(None),
            metrics: self.metrics,
        }
    }
}

/// The swarm coordinator.
pub struct Coordinator {
    config: CoordinatorConfig,
    ctx: Arc<SessionContext>,
    topology: RwLock<Value>,
    status: SharedStatus,
    running: Mutex<Option<Running>>,
    metrics: Option<PrometheusHandle>,
}

impl Coordinator {
    /// Create a coordinator without collaborators.
    pub fn new(config: CoordinatorConfig) -> Self {
        Self::builder(config).build()
    }

    /// Start building a coordinator.
    pub fn builder(config: CoordinatorConfig) -> CoordinatorBuilder {
        CoordinatorBuilder {
            config,
            store: None,
            metrics: None,
        }
    }

    /// Bind the listening socket and start serving.
    ///
    /// Idempotent: while running, returns the already-bound address. A bind
    /// failure is returned to the caller.
    pub async fn start(&self) -> Result<SocketAddr> {
        let mut running = self.running.lock().await;
        if let (Some(_), Some(info)) = (running.as_ref(), *self.status.read()) {
            debug!(addr = %info.addr, "coordinator already running");
            return Ok(info.addr);
        }

        let bind_addr = self.config.bind_addr();
        let listener = TcpListener::bind(bind_addr.as_str())
            .await
            .map_err(|source| CoordinatorError::Bind {
                addr: bind_addr.clone(),
                source,
            })?;
        let addr = listener.local_addr()?;

        let shutdown = ShutdownCoordinator::new();
        let app = self.app(shutdown.token(), shutdown.sessions());
        let token = shutdown.token();
        let server = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await;
            if let Err(e) = result {
                warn!(error = %e, "coordinator server exited with error");
            }
        });

        *self.status.write() = Some(RunInfo {
            addr,
            started_at: Utc::now(),
            started: Instant::now(),
        });
        *running = Some(Running { shutdown, server });

        info!(%addr, max_connections = self.config.max_connections, "coordinator started");
        self.ctx.events.emit(CoordinatorEvent::Started { addr });
        Ok(addr)
    }

    /// Close every connection with `GOING_AWAY`, stop heartbeat monitors and
    /// release the listening socket. Idempotent.
    pub async fn stop(&self) {
        let mut running = self.running.lock().await;
        let Some(Running { shutdown, server }) = running.take() else {
            debug!("coordinator not running");
            return;
        };

        let connections = self.ctx.registry.snapshot();
        info!(connections = connections.len(), "coordinator stopping");
        for connection in &connections {
            let _ = connection.close(close_code::GOING_AWAY, "coordinator shutting down");
        }
        let drained = shutdown
            .graceful_shutdown(server, DEFAULT_SHUTDOWN_TIMEOUT)
            .await;

        // Sessions that missed the drain deadline never deregistered.
        let stragglers = self.ctx.registry.snapshot();
        if !stragglers.is_empty() {
            warn!(drained, stragglers = stragglers.len(), "removing undrained connections");
            for connection in &stragglers {
                connection.mark_closed();
                let _ = self.ctx.registry.remove(connection);
            }
        }

        let final_stats = self.get_connection_stats();
        *self.status.write() = None;

        if let Some(store) = &self.ctx.store {
            if let Err(e) = store.store(STATS_KEY, serde_json::json!(final_stats)).await {
                warn!(error = %e, "failed to persist coordinator stats");
            }
        }

        info!(total_messages = final_stats.total_messages, "coordinator stopped");
        self.ctx.events.emit(CoordinatorEvent::Stopped);
    }

    /// Whether the listening socket is bound.
    pub fn is_running(&self) -> bool {
        self.status.read().is_some()
    }

    /// Bound address while running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        (*self.status.read()).map(|info| info.addr)
    }

    /// `{healthy, metrics}`; healthy whenever the socket is bound.
    pub fn get_health_status(&self) -> HealthStatus {
        health::health_status(self.is_running(), self.get_connection_stats())
    }

    /// Aggregate stats derived from the registry and router counters.
    pub fn get_connection_stats(&self) -> ConnectionStats {
        stats(&self.ctx, &self.status)
    }

    /// Agents with at least one open connection, sorted.
    pub fn get_connected_agents(&self) -> Vec<AgentId> {
        self.ctx.registry.agent_ids()
    }

    /// Per-connection snapshots.
    pub fn get_connections(&self) -> Vec<ConnectionInfo> {
        self.ctx.registry.snapshot().iter().map(|c| c.info()).collect()
    }

    /// Close every connection registered under `agent_id` with
    /// `FORCED_DISCONNECT`. Returns how many were closed.
    pub fn disconnect_agent(&self, agent_id: &AgentId, reason: &str) -> usize {
        let mut closed = 0;
        for connection in self.ctx.registry.lookup(agent_id) {
            if connection.close(close_code::FORCED_DISCONNECT, reason) {
                let _ = self.ctx.registry.remove(&connection);
                closed += 1;
            }
        }
        info!(agent_id = %agent_id, closed, reason, "agent disconnected by coordinator");
        closed
    }

    /// Store new topology constraints and emit `topology-updated`.
    ///
    /// The constraints are not enforced here.
    pub fn update_topology_constraints(&self, constraints: Value) {
        *self.topology.write() = constraints.clone();
        info!("topology constraints updated");
        self.ctx
            .events
            .emit(CoordinatorEvent::TopologyUpdated { constraints });
    }

    /// Current topology constraints (`null` until set).
    pub fn topology_constraints(&self) -> Value {
        self.topology.read().clone()
    }

    /// Subscribe to lifecycle notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<CoordinatorEvent> {
        self.ctx.events.subscribe()
    }

    /// Configuration this coordinator was built with.
    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    fn app(&self, shutdown: CancellationToken, sessions: TaskTracker) -> Router {
        let state = AppState {
            ctx: self.ctx.clone(),
            status: self.status.clone(),
            metrics: self.metrics.clone(),
            shutdown,
            sessions,
            max_message_size: self.config.max_message_size,
        };

        let mut http = Router::new()
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler));
        if self.config.compression_enabled {
            http = http.layer(CompressionLayer::new());
        }

        Router::new()
            .route("/ws", get(ws_handler))
            .merge(http)
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }
}

fn stats(ctx: &SessionContext, status: &SharedStatus) -> ConnectionStats {
    let started = (*status.read()).map(|info| (info.started_at, info.started));
    health::connection_stats(
        ctx.registry.len(),
        ctx.registry.agent_count(),
        ctx.router.total_messages(),
        started,
    )
}

#[derive(Debug, Deserialize)]
struct WsQuery {
    #[serde(rename = "agentId")]
    agent_id: Option<String>,
}

/// GET /ws?agentId=<id>
async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Response {
    let Some(agent_id) = query.agent_id.filter(|id| !id.trim().is_empty()) else {
        warn!("handshake refused: missing agentId");
        return (StatusCode::BAD_REQUEST, "missing agentId query parameter").into_response();
    };

    let AppState {
        ctx,
        shutdown,
        sessions,
        max_message_size,
        ..
    } = state;
    ws.max_message_size(max_message_size)
        .on_upgrade(move |socket| {
            sessions.track_future(run_session(socket, AgentId::from(agent_id), ctx, shutdown))
        })
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthStatus> {
    let bound = state.status.read().is_some();
    Json(health::health_status(bound, stats(&state.ctx, &state.status)))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => crate::metrics::render(handle).into_response(),
        None => (StatusCode::NOT_FOUND, "metrics not enabled").into_response(),
    }
}
