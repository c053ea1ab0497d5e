//! The wire envelope carried over the transport.

use crate::error::{ProtocolError, ProtocolResult};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Wire protocol version, sent as a connection query parameter.
pub const PROTOCOL_VERSION: u16 = 1;

/// Serialized payload size above which compressible messages are
/// compressed.
pub const COMPRESSION_THRESHOLD: usize = 1024;

/// Error code for an authentication failure.
pub const CODE_AUTH_FAILED: &str = "auth_failed";
/// Error code for a state-version conflict.
pub const CODE_STATE_CONFLICT: &str = "state_conflict";
/// Error code for a rate-limit rejection.
pub const CODE_RATE_LIMITED: &str = "rate_limited";

/// Kinds of wire messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Request resynchronization for a session.
    Subscribe,
    /// Stop receiving updates for a session.
    Unsubscribe,
    /// Liveness probe.
    Heartbeat,
    /// Full local document state pushed to the server.
    StateUpdate,
    /// Incremental delta between versions.
    StateDelta,
    /// Acknowledgment of a prior message.
    Ack,
    /// Server confirmed the connection.
    Connected,
    /// Authoritative full state from the server.
    StateSync,
    /// A sibling device joined the session.
    DeviceJoined,
    /// A sibling device left the session.
    DeviceLeft,
    /// Structured error.
    Error,
    /// Round-trip latency probe.
    Ping,
    /// Reply to a ping.
    Pong,
    /// Envelope wrapping several inner messages.
    Batch,
}

impl MessageKind {
    /// Returns true for control messages that bypass batching.
    pub fn is_priority(&self) -> bool {
        matches!(
            self,
            MessageKind::Subscribe | MessageKind::Unsubscribe | MessageKind::Heartbeat
        )
    }

    /// Returns true for kinds whose payloads may be compressed.
    pub fn is_compressible(&self) -> bool {
        matches!(
            self,
            MessageKind::StateUpdate | MessageKind::StateDelta | MessageKind::Batch
        )
    }
}

/// A single message on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    /// Unique message id.
    pub id: String,
    /// Message kind.
    #[serde(rename = "type")]
    pub kind: MessageKind,
    /// When the message was created.
    pub timestamp: DateTime<Utc>,
    /// Message payload; an object, or an opaque string when compressed.
    pub payload: Value,
    /// Whether the payload is compressed.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub compressed: bool,
}

impl WireMessage {
    /// Creates a message with a fresh id and the current timestamp.
    pub fn new(kind: MessageKind, payload: Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            timestamp: Utc::now(),
            payload,
            compressed: false,
        }
    }

    /// Wraps messages in a single batch envelope, preserving order.
    pub fn batch(messages: Vec<WireMessage>) -> ProtocolResult<Self> {
        let inner = serde_json::to_value(messages)?;
        Ok(Self::new(
            MessageKind::Batch,
            serde_json::json!({ "messages": inner }),
        ))
    }

    /// Unpacks a batch envelope into its inner messages.
    pub fn into_batch_messages(self) -> ProtocolResult<Vec<WireMessage>> {
        if self.kind != MessageKind::Batch {
            return Err(ProtocolError::InvalidMessage(
                "not a batch message".to_string(),
            ));
        }
        let inner = self
            .payload
            .get("messages")
            .cloned()
            .ok_or_else(|| ProtocolError::InvalidMessage("batch without messages".to_string()))?;
        Ok(serde_json::from_value(inner)?)
    }

    /// Validates required structure before dispatch.
    pub fn validate(&self) -> ProtocolResult<()> {
        if self.id.is_empty() {
            return Err(ProtocolError::InvalidMessage("empty id".to_string()));
        }
        match (&self.payload, self.compressed) {
            (Value::Object(_), false) => Ok(()),
            (Value::String(_), true) => Ok(()),
            _ => Err(ProtocolError::InvalidMessage(format!(
                "payload must be an object (kind {:?})",
                self.kind
            ))),
        }
    }

    /// Compresses the payload when the kind allows it and the encoded
    /// size exceeds the threshold. No-op otherwise.
    pub fn maybe_compress(&mut self, threshold: usize) -> ProtocolResult<()> {
        if self.compressed || !self.kind.is_compressible() {
            return Ok(());
        }
        let encoded = serde_json::to_vec(&self.payload)?;
        if encoded.len() <= threshold {
            return Ok(());
        }
        let packed = zstd::stream::encode_all(&encoded[..], 0)
            .map_err(|e| ProtocolError::Compression(e.to_string()))?;
        self.payload = Value::String(BASE64.encode(packed));
        self.compressed = true;
        Ok(())
    }

    /// Decompresses the payload if the message is marked compressed.
    pub fn decompress(&mut self) -> ProtocolResult<()> {
        if !self.compressed {
            return Ok(());
        }
        let packed = match &self.payload {
            Value::String(s) => BASE64
                .decode(s)
                .map_err(|e| ProtocolError::Compression(e.to_string()))?,
            _ => {
                return Err(ProtocolError::InvalidMessage(
                    "compressed payload must be a string".to_string(),
                ))
            }
        };
        let raw = zstd::stream::decode_all(&packed[..])
            .map_err(|e| ProtocolError::Compression(e.to_string()))?;
        self.payload = serde_json::from_slice(&raw)?;
        self.compressed = false;
        Ok(())
    }
}

/// Builds the connection URL with auth and protocol query parameters.
pub fn connection_url(base_url: &str, token: &str, device_id: &str) -> String {
    let separator = if base_url.contains('?') { '&' } else { '?' };
    format!(
        "{base_url}{separator}token={token}&deviceId={device_id}&protocolVersion={PROTOCOL_VERSION}"
    )
}

/// The structured error payload carried by `error` messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Machine-readable error code.
    pub code: String,
    /// Human-readable description.
    pub message: String,
    /// Optional structured details (e.g. expected/received versions).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    /// Whether the client may retry.
    pub recoverable: bool,
}

impl ErrorPayload {
    /// Parses an error payload from an `error` message.
    pub fn from_message(message: &WireMessage) -> ProtocolResult<Self> {
        if message.kind != MessageKind::Error {
            return Err(ProtocolError::InvalidMessage(
                "not an error message".to_string(),
            ));
        }
        Ok(serde_json::from_value(message.payload.clone())?)
    }
}
