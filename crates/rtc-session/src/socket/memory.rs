//! In-process socket pair.
//!
//! [`memory_pair`] returns a [`MemoryConnector`] to hand to a client and a
//! [`MemoryServer`] that accepts every connection the client opens as a
//! [`MemoryPeer`]. Dropping a peer ends the client's reader stream, which the
//! client sees as a disconnect.

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use async_trait::async_trait;
use futures_util::stream;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;

use super::{Connector, SocketMessage, SocketReader, SocketWriter};
use crate::error::{SessionError, SessionResult};

/// How the server answers the next connection attempts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AcceptMode {
    /// Complete the handshake.
    #[default]
    Accept,
    /// Fail the handshake with a connection error.
    Refuse,
    /// Never complete the handshake.
    Stall,
}

struct Shared {
    mode: Mutex<AcceptMode>,
    attempts: AtomicUsize,
}

/// Create a connected connector/server pair.
pub fn memory_pair() -> (MemoryConnector, MemoryServer) {
    let shared = Arc::new(Shared {
        mode: Mutex::new(AcceptMode::Accept),
        attempts: AtomicUsize::new(0),
    });
    let (accept_tx, accept_rx) = mpsc::unbounded_channel();
    (
        MemoryConnector {
            shared: Arc::clone(&shared),
            accept_tx,
        },
        MemoryServer { shared, accept_rx },
    )
}

/// Client side of the in-process transport.
#[derive(Clone)]
pub struct MemoryConnector {
    shared: Arc<Shared>,
    accept_tx: mpsc::UnboundedSender<MemoryPeer>,
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(
        &self,
        credentials: &str,
    ) -> SessionResult<(Box<dyn SocketWriter>, SocketReader)> {
        self.shared.attempts.fetch_add(1, Ordering::SeqCst);

        let mode = *self.shared.mode.lock();
        match mode {
            AcceptMode::Accept => {}
            AcceptMode::Refuse => return Err(SessionError::connection("connection refused")),
            AcceptMode::Stall => std::future::pending::<()>().await,
        }

        let (client_tx, server_rx) = mpsc::unbounded_channel();
        let (server_tx, client_rx) = mpsc::unbounded_channel();

        let peer = MemoryPeer {
            credentials: credentials.to_string(),
            incoming: server_rx,
            outgoing: server_tx,
        };
        self.accept_tx
            .send(peer)
            .map_err(|_| SessionError::connection("server is gone"))?;

        let writer = MemoryWriter {
            tx: Some(client_tx),
        };
        let reader = stream::unfold(client_rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });

        Ok((Box::new(writer), Box::pin(reader)))
    }
}

struct MemoryWriter {
    tx: Option<mpsc::UnboundedSender<String>>,
}

#[async_trait]
impl SocketWriter for MemoryWriter {
    async fn send_text(&mut self, text: String) -> SessionResult<()> {
        let Some(tx) = &self.tx else {
            return Err(SessionError::disconnected("socket closed"));
        };
        tx.send(text)
            .map_err(|_| SessionError::disconnected("peer dropped the connection"))
    }

    async fn close(&mut self) -> SessionResult<()> {
        self.tx = None;
        Ok(())
    }
}

/// Server side of the in-process transport.
pub struct MemoryServer {
    shared: Arc<Shared>,
    accept_rx: mpsc::UnboundedReceiver<MemoryPeer>,
}

impl MemoryServer {
    /// Wait for the next accepted connection.
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.accept_rx.recv().await
    }

    /// Take an already accepted connection without waiting.
    pub fn try_accept(&mut self) -> Option<MemoryPeer> {
        self.accept_rx.try_recv().ok()
    }

    /// Change how future connection attempts are answered.
    pub fn set_mode(&self, mode: AcceptMode) {
        *self.shared.mode.lock() = mode;
    }

    /// Number of connection attempts seen so far, accepted or not.
    pub fn connect_attempts(&self) -> usize {
        self.shared.attempts.load(Ordering::SeqCst)
    }
}

/// One accepted connection, seen from the server.
pub struct MemoryPeer {
    credentials: String,
    incoming: mpsc::UnboundedReceiver<String>,
    outgoing: mpsc::UnboundedSender<SessionResult<SocketMessage>>,
}

impl MemoryPeer {
    /// Credential the client presented when connecting.
    pub fn credentials(&self) -> &str {
        &self.credentials
    }

    /// Next message sent by the client. `None` once the client closed.
    pub async fn recv(&mut self) -> Option<String> {
        self.incoming.recv().await
    }

    /// Next message sent by the client, parsed as JSON.
    pub async fn recv_json(&mut self) -> Option<Value> {
        let text = self.recv().await?;
        serde_json::from_str(&text).ok()
    }

    /// Send a text message to the client.
    pub fn send(&self, text: impl Into<String>) -> bool {
        self.outgoing
            .send(Ok(SocketMessage::Text(text.into())))
            .is_ok()
    }

    /// Send a JSON message to the client.
    pub fn send_json(&self, value: &Value) -> bool {
        self.send(value.to_string())
    }

    /// Report a transport error to the client.
    pub fn fail(self, message: impl Into<String>) {
        let _ = self
            .outgoing
            .send(Err(SessionError::disconnected(message.into())));
    }

    /// Send a close frame and drop the connection.
    pub fn close(self, code: u16, reason: impl Into<String>) {
        let _ = self.outgoing.send(Ok(SocketMessage::Close {
            code: Some(code),
            reason: reason.into(),
        }));
    }
}
