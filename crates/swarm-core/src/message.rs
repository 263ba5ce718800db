//! The wire envelope.
//!
//! Every frame on the bus is a JSON-encoded [`SwarmMessage`]. The payload is
//! opaque to the coordinator; only `type`, `to` and `id` drive routing.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{EnvelopeError, Result};
use crate::ids::{AgentId, MessageId};

/// Sender identity used for frames the coordinator originates.
pub const COORDINATOR_ID: &str = "coordinator";

/// Envelope message type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    /// Liveness probe; answered with `Pong`.
    Ping,
    /// Answer to `Ping`.
    Pong,
    /// Unicast delivery to `to`.
    Message,
    /// Fan-out to every connected agent.
    Broadcast,
    /// Unicast that expects a correlated `Response`.
    Request,
    /// Answer to a `Request`, correlated through `responseId`.
    Response,
    /// Agent heartbeat; the coordinator echoes one back.
    Heartbeat,
    /// Recoverable protocol error.
    Error,
}

impl MessageType {
    /// Wire name of this type.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ping => "ping",
            Self::Pong => "pong",
            Self::Message => "message",
            Self::Broadcast => "broadcast",
            Self::Request => "request",
            Self::Response => "response",
            Self::Heartbeat => "heartbeat",
            Self::Error => "error",
        }
    }

    /// Whether this type must carry a `to` recipient.
    pub fn requires_recipient(self) -> bool {
        matches!(self, Self::Message | Self::Request | Self::Response)
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error codes carried in the payload of `error` messages.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorCode {
    /// The inbound frame could not be decoded.
    ParseError,
    /// The unicast recipient has no live connection.
    AgentNotConnected,
    /// A unicast-style message arrived without `to`.
    MissingRecipient,
}

impl ErrorCode {
    /// Wire string for the code.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ParseError => "PARSE_ERROR",
            Self::AgentNotConnected => "AGENT_NOT_CONNECTED",
            Self::MissingRecipient => "MISSING_RECIPIENT",
        }
    }
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// The envelope exchanged between agents and the coordinator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwarmMessage {
    /// Sender-assigned identifier, unique per sender.
    pub id: MessageId,
    /// Routing class.
    #[serde(rename = "type")]
    pub message_type: MessageType,
    /// Sender agent. Stamped by the coordinator when left empty.
    #[serde(default)]
    pub from: AgentId,
    /// Recipient agent for unicast, request and response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<AgentId>,
    /// Opaque application payload.
    #[serde(default)]
    pub payload: Value,
    /// Epoch milliseconds.
    #[serde(default = "now_millis")]
    pub timestamp: i64,
    /// Advisory only; no ordering guarantee is derived from it.
    #[serde(default)]
    pub priority: i32,
    /// For responses: the `id` of the originating request or heartbeat.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_id: Option<MessageId>,
}

impl SwarmMessage {
    /// Create a message with a fresh id, empty payload and the current time.
    pub fn new(message_type: MessageType, from: impl Into<AgentId>) -> Self {
        Self {
            id: MessageId::new(),
            message_type,
            from: from.into(),
            to: None,
            payload: Value::Null,
            timestamp: now_millis(),
            priority: 0,
            response_id: None,
        }
    }

    /// Set the recipient.
    #[must_use]
    pub fn to(mut self, to: impl Into<AgentId>) -> Self {
        self.to = Some(to.into());
        self
    }

    /// Set the payload.
    #[must_use]
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    /// Set the advisory priority.
    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Override the message id.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<MessageId>) -> Self {
        self.id = id.into();
        self
    }

    /// Build a reply to `original`: addressed back to its sender and
    /// correlated through `responseId`.
    pub fn reply_to(
        original: &SwarmMessage,
        message_type: MessageType,
        from: impl Into<AgentId>,
    ) -> Self {
        let mut reply = Self::new(message_type, from);
        reply.to = Some(original.from.clone());
        reply.response_id = Some(original.id.clone());
        reply
    }

    /// Build a coordinator-originated `error` message.
    pub fn error(
        to: Option<AgentId>,
        code: ErrorCode,
        message: impl Into<String>,
        in_reply_to: Option<MessageId>,
    ) -> Self {
        let mut err = Self::new(MessageType::Error, COORDINATOR_ID).with_payload(
            serde_json::json!({
                "code": code.as_str(),
                "message": message.into(),
            }),
        );
        err.to = to;
        err.response_id = in_reply_to;
        err
    }

    /// Application-level subtype embedded as `payload.type`, if any.
    pub fn payload_type(&self) -> Option<&str> {
        self.payload.get("type").and_then(Value::as_str)
    }

    /// Decode a text frame.
    pub fn decode(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Decode a binary frame holding UTF-8 JSON.
    pub fn decode_bytes(bytes: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(bytes).map_err(|_| EnvelopeError::NotUtf8)?;
        Self::decode(text)
    }

    /// Encode to a JSON string.
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
