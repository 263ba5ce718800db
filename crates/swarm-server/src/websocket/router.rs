//! Inbound frame routing: parse, classify, dispatch.
//!
//! Per-message failures are answered with an `error` envelope on the
//! originating connection and never close it.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use metrics::counter;
use serde_json::json;
use swarm_core::{COORDINATOR_ID, ErrorCode, MessageType, SwarmMessage};
use tracing::{debug, instrument, warn};

use super::connection::AgentConnection;
use super::registry::ConnectionRegistry;
use crate::metrics::{
    SWARM_BROADCAST_DELIVERIES_TOTAL, SWARM_MESSAGES_ROUTED_TOTAL, SWARM_OUTBOUND_DROPS_TOTAL,
    SWARM_ROUTING_ERRORS_TOTAL,
};

/// What the router did with one inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// `ping` answered with `pong`.
    Pong,
    /// `heartbeat` recorded and echoed.
    HeartbeatAck,
    /// Unicast delivered to `recipients` connections of the target agent.
    Delivered {
        /// Connections the frame was queued on.
        recipients: usize,
    },
    /// Broadcast fanned out to `recipients` connections.
    Broadcast {
        /// Connections the frame was queued on.
        recipients: usize,
    },
    /// An `error` envelope was sent back to the originator.
    Rejected(ErrorCode),
    /// Accepted without further action (`pong`, inbound `error`).
    Ignored,
}

/// Stateless dispatcher over the shared registry.
pub struct MessageRouter {
    registry: Arc<ConnectionRegistry>,
    broadcast_includes_sender: bool,
    total_messages: AtomicU64,
}

impl MessageRouter {
    /// Create a router.
    pub fn new(registry: Arc<ConnectionRegistry>, broadcast_includes_sender: bool) -> Self {
        Self {
            registry,
            broadcast_includes_sender,
            total_messages: AtomicU64::new(0),
        }
    }

    /// Inbound frames successfully parsed and routed.
    pub fn total_messages(&self) -> u64 {
        self.total_messages.load(Ordering::Relaxed)
    }

    /// Route a binary frame holding UTF-8 JSON.
    pub fn route_bytes(&self, from: &AgentConnection, bytes: &[u8]) -> RouteOutcome {
        match std::str::from_utf8(bytes) {
            Ok(text) => self.route(from, text),
            Err(_) => self.reject(from, ErrorCode::ParseError, "frame is not valid UTF-8", None),
        }
    }

    /// Route a text frame received on `from`.
    #[instrument(skip_all, fields(agent_id = %from.agent_id, connection_id = %from.id, message_type))]
    pub fn route(&self, from: &AgentConnection, text: &str) -> RouteOutcome {
        let mut message = match SwarmMessage::decode(text) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "unparseable frame");
                return self.reject(from, ErrorCode::ParseError, format!("invalid message: {e}"), None);
            }
        };

        let _ = tracing::Span::current().record("message_type", message.message_type.as_str());
        from.record_received();
        let _ = self.total_messages.fetch_add(1, Ordering::Relaxed);
        counter!(SWARM_MESSAGES_ROUTED_TOTAL, "type" => message.message_type.as_str()).increment(1);

        // Forward the original bytes unless the sender has to be stamped.
        let mut frame = Arc::new(text.to_owned());
        if message.from.is_empty() {
            message.from = from.agent_id.clone();
            if let Ok(encoded) = message.encode() {
                frame = Arc::new(encoded);
            }
        }

        match message.message_type {
            MessageType::Ping => {
                from.touch();
                let pong = SwarmMessage::reply_to(&message, MessageType::Pong, COORDINATOR_ID);
                let _ = from.send_message(&pong);
                RouteOutcome::Pong
            }
            MessageType::Pong => {
                from.touch();
                RouteOutcome::Ignored
            }
            MessageType::Heartbeat => {
                from.touch();
                let mut ack = SwarmMessage::reply_to(&message, MessageType::Heartbeat, COORDINATOR_ID)
                    .with_payload(json!({
                        "status": "alive",
                        "connectionId": from.id,
                    }));
                if let Some(capabilities) = message.payload.get("capabilities") {
                    ack.payload["capabilities"] = capabilities.clone();
                }
                let _ = from.send_message(&ack);
                RouteOutcome::HeartbeatAck
            }
            MessageType::Message | MessageType::Request | MessageType::Response => {
                self.unicast(from, &message, &frame)
            }
            MessageType::Broadcast => self.broadcast(from, &frame),
            MessageType::Error => {
                debug!(payload = %message.payload, "agent reported error");
                RouteOutcome::Ignored
            }
        }
    }

    fn unicast(&self, from: &AgentConnection, message: &SwarmMessage, frame: &Arc<String>) -> RouteOutcome {
        let Some(to) = message.to.as_ref() else {
            return self.reject(
                from,
                ErrorCode::MissingRecipient,
                format!("{} requires a recipient", message.message_type),
                Some(message),
            );
        };

        let targets: Vec<_> = self
            .registry
            .lookup(to)
            .into_iter()
            .filter(|c| c.is_open())
            .collect();
        if targets.is_empty() {
            return self.reject(
                from,
                ErrorCode::AgentNotConnected,
                format!("agent {to} is not connected"),
                Some(message),
            );
        }

        let recipients = targets
            .iter()
            .filter(|target| deliver(target, frame))
            .count();
        debug!(to = %to, recipients, "unicast delivered");
        RouteOutcome::Delivered { recipients }
    }

    fn broadcast(&self, from: &AgentConnection, frame: &Arc<String>) -> RouteOutcome {
        let recipients = self
            .registry
            .snapshot()
            .iter()
            .filter(|target| self.broadcast_includes_sender || target.id != from.id)
            .filter(|target| deliver(target, frame))
            .count();
        counter!(SWARM_BROADCAST_DELIVERIES_TOTAL).increment(recipients as u64);
        debug!(recipients, "broadcast delivered");
        RouteOutcome::Broadcast { recipients }
    }

    fn reject(
        &self,
        from: &AgentConnection,
        code: ErrorCode,
        reason: impl Into<String>,
        original: Option<&SwarmMessage>,
    ) -> RouteOutcome {
        counter!(SWARM_ROUTING_ERRORS_TOTAL, "code" => code.as_str()).increment(1);
        let error = SwarmMessage::error(
            Some(from.agent_id.clone()),
            code,
            reason,
            original.map(|m| m.id.clone()),
        );
        let _ = from.send_message(&error);
        RouteOutcome::Rejected(code)
    }
}

fn deliver(target: &AgentConnection, frame: &Arc<String>) -> bool {
    if target.send(frame.clone()) {
        true
    } else {
        if target.is_open() {
            warn!(connection_id = %target.id, "outbound buffer full, frame dropped");
            counter!(SWARM_OUTBOUND_DROPS_TOTAL).increment(1);
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::connection::Outbound;
    use crate::websocket::connection::tests::open_connection;
    use serde_json::Value;
    use std::collections::HashSet;
    use tokio::sync::mpsc;

    fn setup(include_sender: bool) -> (Arc<ConnectionRegistry>, MessageRouter) {
        let registry = Arc::new(ConnectionRegistry::new());
        let router = MessageRouter::new(registry.clone(), include_sender);
        (registry, router)
    }

    fn next_json(rx: &mut mpsc::Receiver<Outbound>) -> Value {
        match rx.try_recv() {
            Ok(Outbound::Text(text)) => serde_json::from_str(&text).unwrap(),
            other => panic!("expected text frame, got {other:?}"),
        }
    }

    /// Ids of every text frame waiting on `rx`.
    fn drain_ids(rx: &mut mpsc::Receiver<Outbound>) -> Vec<String> {
        let mut ids = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            if let Outbound::Text(text) = frame {
                let value: Value = serde_json::from_str(&text).unwrap();
                ids.push(value["id"].as_str().unwrap().to_owned());
            }
        }
        ids
    }

    fn assert_unique(ids: &[String]) {
        let distinct: HashSet<&String> = ids.iter().collect();
        assert_eq!(distinct.len(), ids.len(), "duplicate delivery in {ids:?}");
    }

    #[test]
    fn ping_yields_one_pong() {
        let (registry, router) = setup(false);
        let (a, mut rx) = open_connection("a", 8);
        registry.insert(a.clone());

        let outcome = router.route(&a, r#"{"id":"p1","type":"ping","from":"a"}"#);
        assert_eq!(outcome, RouteOutcome::Pong);
        let pong = next_json(&mut rx);
        assert_eq!(pong["type"], "pong");
        assert_eq!(pong["to"], "a");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn heartbeat_echoes_response_id() {
        let (registry, router) = setup(false);
        let (a, mut rx) = open_connection("a", 8);
        registry.insert(a.clone());

        let outcome = router.route(
            &a,
            r#"{"id":"hb-1","type":"heartbeat","from":"a","payload":{"capabilities":["code"]}}"#,
        );
        assert_eq!(outcome, RouteOutcome::HeartbeatAck);
        let ack = next_json(&mut rx);
        assert_eq!(ack["type"], "heartbeat");
        assert_eq!(ack["responseId"], "hb-1");
        assert_eq!(ack["from"], COORDINATOR_ID);
        assert_eq!(ack["payload"]["capabilities"][0], "code");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn unicast_reaches_only_target() {
        let (registry, router) = setup(false);
        let (a, mut rx_a) = open_connection("a", 8);
        let (b, mut rx_b) = open_connection("b", 8);
        let (c, mut rx_c) = open_connection("c", 8);
        registry.insert(a.clone());
        registry.insert(b.clone());
        registry.insert(c);

        let text = r#"{"id":"m1","type":"message","from":"a","to":"b","payload":{"n":1}}"#;
        assert_eq!(router.route(&a, text), RouteOutcome::Delivered { recipients: 1 });
        let got = next_json(&mut rx_b);
        assert_eq!(got["payload"]["n"], 1);
        assert!(rx_a.try_recv().is_err());
        assert!(rx_c.try_recv().is_err());
        assert_eq!(a.messages_received(), 1);
        assert_eq!(b.messages_sent(), 1);
    }

    #[test]
    fn unicast_is_forwarded_verbatim() {
        let (registry, router) = setup(false);
        let (a, _rx_a) = open_connection("a", 8);
        let (b, mut rx_b) = open_connection("b", 8);
        registry.insert(a.clone());
        registry.insert(b);

        let text = r#"{"id":"m1","type":"request","from":"a","to":"b","payload":{"q":"?"},"priority":3}"#;
        let _ = router.route(&a, text);
        match rx_b.try_recv() {
            Ok(Outbound::Text(frame)) => assert_eq!(frame.as_str(), text),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn empty_sender_is_stamped() {
        let (registry, router) = setup(false);
        let (a, _rx_a) = open_connection("a", 8);
        let (b, mut rx_b) = open_connection("b", 8);
        registry.insert(a.clone());
        registry.insert(b);

        let _ = router.route(&a, r#"{"id":"m1","type":"message","to":"b"}"#);
        assert_eq!(next_json(&mut rx_b)["from"], "a");
    }

    #[test]
    fn unicast_to_absent_agent_errors() {
        let (registry, router) = setup(false);
        let (a, mut rx) = open_connection("a", 8);
        registry.insert(a.clone());

        let outcome = router.route(&a, r#"{"id":"m1","type":"message","from":"a","to":"ghost"}"#);
        assert_eq!(outcome, RouteOutcome::Rejected(ErrorCode::AgentNotConnected));
        let err = next_json(&mut rx);
        assert_eq!(err["type"], "error");
        assert_eq!(err["payload"]["code"], "AGENT_NOT_CONNECTED");
        assert_eq!(err["responseId"], "m1");
    }

    #[test]
    fn missing_recipient_errors() {
        let (registry, router) = setup(false);
        let (a, mut rx) = open_connection("a", 8);
        registry.insert(a.clone());

        let outcome = router.route(&a, r#"{"id":"r1","type":"request","from":"a"}"#);
        assert_eq!(outcome, RouteOutcome::Rejected(ErrorCode::MissingRecipient));
        assert_eq!(next_json(&mut rx)["payload"]["code"], "MISSING_RECIPIENT");
    }

    #[test]
    fn malformed_frame_yields_one_error_and_connection_stays_open() {
        let (registry, router) = setup(false);
        let (a, mut rx) = open_connection("a", 8);
        registry.insert(a.clone());

        let outcome = router.route(&a, "{not json");
        assert_eq!(outcome, RouteOutcome::Rejected(ErrorCode::ParseError));
        let err = next_json(&mut rx);
        assert_eq!(err["payload"]["code"], "PARSE_ERROR");
        assert!(rx.try_recv().is_err());
        assert!(a.is_open());
        assert_eq!(router.total_messages(), 0);
    }

    #[test]
    fn invalid_utf8_binary_is_a_parse_error() {
        let (_registry, router) = setup(false);
        let (a, mut rx) = open_connection("a", 8);
        let outcome = router.route_bytes(&a, &[0xff, 0x00]);
        assert_eq!(outcome, RouteOutcome::Rejected(ErrorCode::ParseError));
        assert_eq!(next_json(&mut rx)["type"], "error");
    }

    #[test]
    fn broadcast_excludes_sender_by_default() {
        let (registry, router) = setup(false);
        let (a, mut rx_a) = open_connection("a", 8);
        let (b, mut rx_b) = open_connection("b", 8);
        let (c, mut rx_c) = open_connection("c", 8);
        registry.insert(a.clone());
        registry.insert(b);
        registry.insert(c);

        let outcome = router.route(&a, r#"{"id":"b1","type":"broadcast","from":"a"}"#);
        assert_eq!(outcome, RouteOutcome::Broadcast { recipients: 2 });
        assert_eq!(next_json(&mut rx_b)["id"], "b1");
        assert_eq!(next_json(&mut rx_c)["id"], "b1");
        assert!(rx_b.try_recv().is_err());
        assert!(rx_a.try_recv().is_err());
    }

    #[test]
    fn broadcast_can_include_sender() {
        let (registry, router) = setup(true);
        let (a, mut rx_a) = open_connection("a", 8);
        let (b, _rx_b) = open_connection("b", 8);
        registry.insert(a.clone());
        registry.insert(b);

        let outcome = router.route(&a, r#"{"id":"b1","type":"broadcast","from":"a"}"#);
        assert_eq!(outcome, RouteOutcome::Broadcast { recipients: 2 });
        assert_eq!(next_json(&mut rx_a)["id"], "b1");
    }

    #[test]
    fn broadcast_skips_closing_connections() {
        let (registry, router) = setup(false);
        let (a, _rx_a) = open_connection("a", 8);
        let (b, mut rx_b) = open_connection("b", 8);
        registry.insert(a.clone());
        registry.insert(b.clone());
        assert!(b.close(1000, "bye"));

        let outcome = router.route(&a, r#"{"id":"b1","type":"broadcast","from":"a"}"#);
        assert_eq!(outcome, RouteOutcome::Broadcast { recipients: 0 });
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn unicast_reaches_every_connection_of_agent() {
        let (registry, router) = setup(false);
        let (a, _rx_a) = open_connection("a", 8);
        let (b1, mut rx_b1) = open_connection("b", 8);
        let (b2, mut rx_b2) = open_connection("b", 8);
        registry.insert(a.clone());
        registry.insert(b1);
        registry.insert(b2);

        let outcome = router.route(&a, r#"{"id":"m","type":"message","from":"a","to":"b"}"#);
        assert_eq!(outcome, RouteOutcome::Delivered { recipients: 2 });
        assert_eq!(next_json(&mut rx_b1)["id"], "m");
        assert_eq!(next_json(&mut rx_b2)["id"], "m");
    }

    #[test]
    fn inbound_pong_and_error_are_ignored() {
        let (_registry, router) = setup(false);
        let (a, mut rx) = open_connection("a", 8);
        assert_eq!(router.route(&a, r#"{"id":"x","type":"pong"}"#), RouteOutcome::Ignored);
        assert_eq!(router.route(&a, r#"{"id":"y","type":"error"}"#), RouteOutcome::Ignored);
        assert!(rx.try_recv().is_err());
        assert_eq!(router.total_messages(), 2);
    }

    #[test]
    fn concurrent_broadcasts_survive_registry_churn_without_duplicates() {
        const SENDERS: usize = 4;
        const PER_SENDER: usize = 50;
        const CHURN: usize = 200;
        const BUFFER: usize = SENDERS * PER_SENDER + 8;

        let (registry, router) = setup(false);
        let (sink, mut sink_rx) = open_connection("sink", BUFFER);
        registry.insert(sink.clone());
        let mut senders: Vec<_> = (0..SENDERS)
            .map(|n| {
                let (conn, rx) = open_connection(&format!("sender-{n}"), BUFFER);
                registry.insert(conn.clone());
                (conn, rx)
            })
            .collect();

        let churned = std::thread::scope(|scope| {
            let registry = &registry;
            let router = &router;
            let churn = scope.spawn(move || {
                let mut held: Vec<(Arc<AgentConnection>, mpsc::Receiver<Outbound>)> = Vec::new();
                for n in 0..CHURN {
                    let (conn, rx) = open_connection(&format!("churn-{}", n % 3), BUFFER);
                    registry.insert(conn.clone());
                    if n >= 2 {
                        let _ = registry.remove(&held[n - 2].0);
                    }
                    held.push((conn, rx));
                }
                held
            });
            for (n, (conn, _)) in senders.iter().enumerate() {
                let _ = scope.spawn(move || {
                    for i in 0..PER_SENDER {
                        let frame = format!(
                            r#"{{"id":"b-{n}-{i}","type":"broadcast","from":"sender-{n}"}}"#
                        );
                        assert!(matches!(router.route(conn, &frame), RouteOutcome::Broadcast { .. }));
                    }
                });
            }
            churn.join().unwrap()
        });

        let sink_ids = drain_ids(&mut sink_rx);
        assert_eq!(sink_ids.len(), SENDERS * PER_SENDER);
        assert_unique(&sink_ids);
        for (n, (_, rx)) in senders.iter_mut().enumerate() {
            let ids = drain_ids(rx);
            assert_eq!(ids.len(), (SENDERS - 1) * PER_SENDER);
            assert!(ids.iter().all(|id| !id.starts_with(&format!("b-{n}-"))));
            assert_unique(&ids);
        }
        for (_, mut rx) in churned {
            assert_unique(&drain_ids(&mut rx));
        }
    }
}
