//! Shared frame model and JSON codec for the realtime gateway socket.
//!
//! This crate owns the wire representation used by the `wirebot` client and
//! its CLI. Every gateway message is a text frame holding one JSON object
//! `{op, d, s, t}`. The payload `d` stays flexible (`serde_json::Value`);
//! only the fields needed for connection control are interpreted here.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Error returned by [`decode_frame`].
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The text could not be decoded as a gateway frame object.
    #[error("failed to decode gateway frame: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Known gateway opcodes.
///
/// Frames with any other `op` still decode; callers get `None` from
/// [`GatewayFrame::opcode`] and are expected to ignore them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Opcode {
    /// An event was dispatched (inbound).
    Dispatch,
    /// Keep-alive, sent by either side.
    Heartbeat,
    /// Session handshake (outbound).
    Identify,
    /// Presence update (outbound).
    PresenceUpdate,
    /// Voice state update (outbound).
    VoiceStateUpdate,
    /// Resume a previous session (outbound).
    Resume,
    /// Server asks the client to reconnect (inbound).
    Reconnect,
    /// Request guild members (outbound).
    RequestGuildMembers,
    /// The session has been invalidated (inbound).
    InvalidSession,
    /// First frame after connect, carries the heartbeat interval (inbound).
    Hello,
    /// Acknowledges a heartbeat (inbound).
    HeartbeatAck,
}

impl Opcode {
    /// Wire value of this opcode.
    #[must_use]
    pub fn as_u64(self) -> u64 {
        match self {
            Self::Dispatch => 0,
            Self::Heartbeat => 1,
            Self::Identify => 2,
            Self::PresenceUpdate => 3,
            Self::VoiceStateUpdate => 4,
            Self::Resume => 6,
            Self::Reconnect => 7,
            Self::RequestGuildMembers => 8,
            Self::InvalidSession => 9,
            Self::Hello => 10,
            Self::HeartbeatAck => 11,
        }
    }

    /// Map a wire value to a known opcode. Unknown values are `None`, not errors.
    #[must_use]
    pub fn from_u64(value: u64) -> Option<Self> {
        match value {
            0 => Some(Self::Dispatch),
            1 => Some(Self::Heartbeat),
            2 => Some(Self::Identify),
            3 => Some(Self::PresenceUpdate),
            4 => Some(Self::VoiceStateUpdate),
            6 => Some(Self::Resume),
            7 => Some(Self::Reconnect),
            8 => Some(Self::RequestGuildMembers),
            9 => Some(Self::InvalidSession),
            10 => Some(Self::Hello),
            11 => Some(Self::HeartbeatAck),
            _ => None,
        }
    }
}

/// A single message on the gateway socket.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GatewayFrame {
    /// Raw opcode. See [`Opcode`] for the known values.
    pub op: u64,
    /// Opaque payload; `null` when absent on the wire.
    #[serde(default)]
    pub d: Value,
    /// Sequence number, only present on dispatch frames.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s: Option<u64>,
    /// Event name, only present on dispatch frames.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,
}

impl GatewayFrame {
    /// Build a frame with the given opcode and payload.
    #[must_use]
    pub fn new(op: Opcode, d: Value) -> Self {
        Self {
            op: op.as_u64(),
            d,
            s: None,
            t: None,
        }
    }

    /// Heartbeat carrying the last seen sequence number, or `null`.
    #[must_use]
    pub fn heartbeat(last_sequence: Option<u64>) -> Self {
        Self::new(Opcode::Heartbeat, last_sequence.map_or(Value::Null, Value::from))
    }

    /// HELLO announcing a heartbeat interval in milliseconds.
    #[must_use]
    pub fn hello(heartbeat_interval_ms: u64) -> Self {
        let mut d = Map::new();
        d.insert("heartbeat_interval".to_owned(), Value::from(heartbeat_interval_ms));
        Self::new(Opcode::Hello, Value::Object(d))
    }

    #[must_use]
    pub fn heartbeat_ack() -> Self {
        Self::new(Opcode::HeartbeatAck, Value::Null)
    }

    /// Dispatch frame for event `event` at sequence `seq`.
    #[must_use]
    pub fn dispatch(event: impl Into<String>, seq: u64, data: Value) -> Self {
        Self {
            op: Opcode::Dispatch.as_u64(),
            d: data,
            s: Some(seq),
            t: Some(event.into()),
        }
    }

    #[must_use]
    pub fn identify(data: Value) -> Self {
        Self::new(Opcode::Identify, data)
    }

    /// Known opcode of this frame, if any.
    #[must_use]
    pub fn opcode(&self) -> Option<Opcode> {
        Opcode::from_u64(self.op)
    }

    /// `d.heartbeat_interval` in milliseconds, when present and a non-negative integer.
    #[must_use]
    pub fn heartbeat_interval(&self) -> Option<u64> {
        self.d.get("heartbeat_interval").and_then(Value::as_u64)
    }
}

/// Encode a frame as its JSON text.
#[must_use]
pub fn encode_frame(frame: &GatewayFrame) -> String {
    // Serializing a struct of plain JSON values cannot fail.
    serde_json::to_string(frame).unwrap_or_default()
}

/// Decode a JSON text frame.
///
/// # Errors
///
/// Returns [`CodecError::Decode`] when the text is not a JSON object with a
/// numeric `op` field.
pub fn decode_frame(text: &str) -> Result<GatewayFrame, CodecError> {
    Ok(serde_json::from_str(text)?)
}

#[cfg(test)]
#[path = "lib_test.rs"]
mod tests;
