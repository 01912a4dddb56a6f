//! Connection socket abstraction.
//!
//! A socket is a message-oriented duplex connection. Opening one yields a
//! writer and a reader stream; the reader reports inbound text messages and
//! close frames, an `Err` item is a transport error, and the end of the
//! stream means the connection is gone.

pub mod memory;
#[cfg(feature = "websocket")]
mod websocket;

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;

use crate::error::SessionResult;
#[cfg(feature = "websocket")]
pub use websocket::WebSocketConnector;

/// Inbound socket message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SocketMessage {
    /// Text message.
    Text(String),
    /// Close frame sent by the server.
    Close {
        /// Close code, if the server sent one.
        code: Option<u16>,
        /// Close reason.
        reason: String,
    },
}

/// Read half of an open socket.
pub type SocketReader = Pin<Box<dyn Stream<Item = SessionResult<SocketMessage>> + Send>>;

/// Write half of an open socket.
#[async_trait]
pub trait SocketWriter: Send {
    /// Send one text message.
    async fn send_text(&mut self, text: String) -> SessionResult<()>;

    /// Close the connection.
    async fn close(&mut self) -> SessionResult<()>;
}

/// Opens sockets to the server.
///
/// The credential is an opaque bearer string; connectors pass it through
/// without inspecting it.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open a new connection.
    async fn connect(&self, credentials: &str)
    -> SessionResult<(Box<dyn SocketWriter>, SocketReader)>;
}
