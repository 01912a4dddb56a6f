//! Error handling for the session layer.

use std::time::Duration;

use thiserror::Error;

use crate::signaling::RejectReason;

/// The main result type used throughout the session layer.
pub type SessionResult<T> = Result<T, SessionError>;

/// Error type for all session operations.
///
/// The type is `Clone` so that one terminal error can be handed to every
/// caller that was waiting when the client went fatal.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    /// Invalid configuration.
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// The socket could not be opened or reported an error during the handshake.
    #[error("Connection error: {message}")]
    Connection { message: String },

    /// The socket handshake did not complete in time.
    #[error("Handshake timed out after {duration:?}")]
    HandshakeTimeout { duration: Duration },

    /// No matching response arrived within the per-call timeout.
    #[error("Request {request_id} timed out after {duration:?}")]
    Timeout {
        duration: Duration,
        request_id: String,
    },

    /// The socket dropped before the call resolved.
    #[error("Disconnected: {reason}")]
    Disconnected { reason: String },

    /// The server answered with an application-level failure.
    #[error("Server error {code}: {message}")]
    Server { code: i64, message: String },

    /// The channel was explicitly closed while the call was waiting.
    #[error("Channel closed while request was in flight")]
    ClosedWhileInFlight,

    /// The client was closed and is inert.
    #[error("Client closed")]
    Closed,

    /// The client reached its terminal state.
    #[error("Fatal error: {reason}")]
    Fatal { reason: String },

    /// Serialization/deserialization errors.
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// Too many outstanding requests.
    #[error("Capacity exceeded: {message}")]
    CapacityExceeded { message: String },

    /// A signaling target failed local validation.
    #[error("Invalid target: {reason}")]
    InvalidTarget { reason: String },

    /// A signaling payload failed local validation.
    #[error("Invalid payload: {reason}")]
    InvalidPayload { reason: String },

    /// An outbound message exceeds the configured size ceiling.
    #[error("Payload of {size} bytes exceeds the {limit} byte limit")]
    PayloadTooLarge { size: usize, limit: usize },

    /// No acknowledgement arrived for an outbound signaling message.
    #[error("Message {message_id} was not acknowledged within {duration:?}")]
    RequestTimeout {
        duration: Duration,
        message_id: String,
    },

    /// The peer did not answer a signaling request in time.
    #[error("No response to {message_id} within {duration:?}")]
    ResponseTimeout {
        duration: Duration,
        message_id: String,
    },

    /// The server acknowledged a signaling message negatively.
    #[error("Message {message_id} rejected: {reason}")]
    Rejected {
        message_id: String,
        reason: RejectReason,
        detail: Option<String>,
    },

    /// There is no live socket to send on.
    #[error("Socket not connected")]
    SocketNotConnected,

    /// Internal errors (should not happen in normal operation).
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl From<serde_json::Error> for SessionError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization {
            message: e.to_string(),
        }
    }
}

impl SessionError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Create a call timeout error.
    pub fn timeout(duration: Duration, request_id: impl Into<String>) -> Self {
        Self::Timeout {
            duration,
            request_id: request_id.into(),
        }
    }

    /// Create a disconnect error.
    pub fn disconnected(reason: impl Into<String>) -> Self {
        Self::Disconnected {
            reason: reason.into(),
        }
    }

    /// Create a fatal error.
    pub fn fatal(reason: impl Into<String>) -> Self {
        Self::Fatal {
            reason: reason.into(),
        }
    }

    /// Create a server error.
    pub fn server(code: i64, message: impl Into<String>) -> Self {
        Self::Server {
            code,
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Create a capacity error.
    pub fn capacity_exceeded(message: impl Into<String>) -> Self {
        Self::CapacityExceeded {
            message: message.into(),
        }
    }

    /// Terminal errors: the client will not recover from these.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal { .. } | Self::Closed)
    }

    /// Errors raised by local validation; nothing was sent.
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            Self::Config { .. }
                | Self::InvalidTarget { .. }
                | Self::InvalidPayload { .. }
                | Self::PayloadTooLarge { .. }
                | Self::CapacityExceeded { .. }
        )
    }
}
