//! Core type definitions.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Unique identifier for request-response correlation.
/// Uses ULID for lexicographically sortable, unique IDs.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    /// Generate a new unique request ID using ULID.
    pub fn new() -> Self {
        Self(ulid::Ulid::new().to_string())
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for RequestId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Identifier of a server-side event stream.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamId(String);

impl StreamId {
    /// Create a new stream id.
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for StreamId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for StreamId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A versioned frame of a server-driven event stream.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventFrame {
    /// Stream the frame belongs to.
    pub stream: StreamId,
    /// Per-stream version assigned by the server.
    pub version: u64,
    /// Opaque event body.
    #[serde(default)]
    pub payload: Value,
}

impl EventFrame {
    /// Create a frame.
    pub fn new(stream: impl Into<StreamId>, version: u64, payload: Value) -> Self {
        Self {
            stream: stream.into(),
            version,
            payload,
        }
    }
}

/// Server push that is neither a response nor an event frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// Method name.
    pub method: String,
    /// Parameters.
    #[serde(default)]
    pub params: Value,
}

/// Lifecycle state of a client connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Initial handshake in progress.
    Connecting,
    /// Connected and ready for traffic.
    Open,
    /// Connection lost; reopening with backoff.
    Reconnecting,
    /// Explicitly shut down. Terminal.
    Closed,
    /// Retry budget exhausted or non-recoverable close. Terminal.
    Fatal,
}

impl ConnectionState {
    /// Check if the connection is ready for traffic.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }

    /// Check if the state is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Fatal)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Reconnecting => "reconnecting",
            Self::Closed => "closed",
            Self::Fatal => "fatal",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_id_uniqueness() {
        let id1 = RequestId::new();
        let id2 = RequestId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_request_id_from_str() {
        let id: RequestId = "test-id".into();
        assert_eq!(id.as_str(), "test-id");
        assert_eq!(format!("{}", id), "test-id");
    }

    #[test]
    fn test_stream_id_serializes_transparently() {
        let stream = StreamId::new("room.42");
        assert_eq!(serde_json::to_string(&stream).unwrap(), r#""room.42""#);
    }

    #[test]
    fn test_event_frame_payload_defaults_to_null() {
        let frame: EventFrame = serde_json::from_str(r#"{"stream":"s","version":3}"#).unwrap();
        assert_eq!(frame.version, 3);
        assert_eq!(frame.payload, Value::Null);
    }

    #[test]
    fn test_connection_state_predicates() {
        assert!(ConnectionState::Open.is_open());
        assert!(!ConnectionState::Reconnecting.is_open());
        assert!(ConnectionState::Closed.is_terminal());
        assert!(ConnectionState::Fatal.is_terminal());
        assert!(!ConnectionState::Connecting.is_terminal());
        assert_eq!(ConnectionState::Reconnecting.to_string(), "reconnecting");
    }
}
