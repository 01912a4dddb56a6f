//! Signaling wire messages.
//!
//! Every frame is a JSON object tagged by `type`.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Id of one outbound signaling message.
pub type MessageId = String;

/// Frames the client sends.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outbound {
    /// Request to a peer that expects a paired response.
    Request {
        id: MessageId,
        target: String,
        payload: Value,
    },
    /// Answer to a peer's request.
    Response {
        id: MessageId,
        request_id: MessageId,
        target: String,
        payload: Value,
    },
    /// Credential update.
    Token { id: MessageId, token: String },
    /// Heartbeat.
    Ping { id: MessageId },
}

impl Outbound {
    /// Id the server acknowledges this frame under.
    pub fn id(&self) -> &str {
        match self {
            Self::Request { id, .. }
            | Self::Response { id, .. }
            | Self::Token { id, .. }
            | Self::Ping { id } => id,
        }
    }
}

/// Frames the server sends.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Inbound {
    /// Transport-level acknowledgement of an outbound frame.
    Ack {
        id: MessageId,
        ok: bool,
        #[serde(default)]
        code: Option<RejectReason>,
        #[serde(default)]
        reason: Option<String>,
    },
    /// A peer's answer to one of our requests.
    Response {
        request_id: MessageId,
        from: String,
        #[serde(default)]
        payload: Value,
    },
    /// A request sent to us by a peer.
    Request {
        id: MessageId,
        from: String,
        #[serde(default)]
        payload: Value,
    },
}

/// Why the server rejected a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    RateLimited,
    TargetNotFound,
    PayloadTooLarge,
    InvalidPayload,
    PermissionDenied,
    InvalidParameter,
    #[serde(other)]
    Unknown,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::RateLimited => "rate limited",
            Self::TargetNotFound => "target not found",
            Self::PayloadTooLarge => "payload too large",
            Self::InvalidPayload => "invalid payload",
            Self::PermissionDenied => "permission denied",
            Self::InvalidParameter => "invalid parameter",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// A request received from a peer, answered with
/// [`SignalingClient::respond`](super::SignalingClient::respond).
#[derive(Clone, Debug, PartialEq)]
pub struct PeerRequest {
    pub id: MessageId,
    pub from: String,
    pub payload: Value,
}
