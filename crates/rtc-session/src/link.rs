//! One live physical connection.
//!
//! A [`Link`] owns a spawned task that drives the socket: it writes queued
//! outbound messages, hands every inbound text message to a callback and
//! publishes the connection status on a `watch` channel. Once the status
//! leaves [`LinkStatus::Open`] the link is dead; reconnecting means opening a
//! new one.

use std::{sync::Arc, time::Duration};

use futures_util::StreamExt;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{Span, debug, info, warn};

use crate::{
    config::SessionConfig,
    error::{SessionError, SessionResult},
    socket::{Connector, SocketMessage, SocketReader, SocketWriter},
};

/// Callback receiving every inbound text message.
pub(crate) type InboundHandler = Arc<dyn Fn(String) + Send + Sync>;

/// Status of a link.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum LinkStatus {
    Open,
    /// The socket dropped or errored; a reconnect may help.
    Disconnected { reason: String },
    /// The server closed with a non-recoverable code.
    Fatal { reason: String },
    /// Closed locally.
    Closed,
}

impl LinkStatus {
    pub(crate) fn is_down(&self) -> bool {
        !matches!(self, Self::Open)
    }

    /// Error handed to calls that were waiting when the link went down.
    pub(crate) fn to_error(&self) -> SessionError {
        match self {
            Self::Open => SessionError::SocketNotConnected,
            Self::Disconnected { reason } => SessionError::disconnected(reason.clone()),
            Self::Fatal { reason } => SessionError::fatal(reason.clone()),
            Self::Closed => SessionError::ClosedWhileInFlight,
        }
    }
}

enum LinkCommand {
    Send {
        text: String,
        reply: oneshot::Sender<SessionResult<()>>,
    },
    Disconnect {
        reason: String,
    },
    Close,
}

/// Handle to a running connection task.
pub(crate) struct Link {
    cmd_tx: mpsc::Sender<LinkCommand>,
    status: watch::Receiver<LinkStatus>,
}

impl Link {
    /// Open a socket and start driving it.
    ///
    /// Fails with [`SessionError::HandshakeTimeout`] when the connector does
    /// not finish within `handshake_timeout`, or with the connector's own error.
    pub(crate) async fn open(
        connector: &dyn Connector,
        credentials: &str,
        config: &SessionConfig,
        on_message: InboundHandler,
        span: Span,
    ) -> SessionResult<Self> {
        let duration = config.handshake_timeout;
        let (writer, reader) =
            match tokio::time::timeout(duration, connector.connect(credentials)).await {
                Ok(Ok(parts)) => parts,
                Ok(Err(err)) => {
                    debug!(parent: &span, error = %err, "Handshake failed");
                    return Err(err);
                }
                Err(_) => {
                    debug!(parent: &span, ?duration, "Handshake timed out");
                    return Err(SessionError::HandshakeTimeout { duration });
                }
            };

        let (cmd_tx, cmd_rx) = mpsc::channel(config.command_channel_capacity);
        let (status_tx, status) = watch::channel(LinkStatus::Open);

        let driver = LinkDriver {
            writer,
            reader,
            cmd_rx,
            status_tx,
            on_message,
            fatal_close_codes: config.fatal_close_codes.clone(),
            max_message_size: config.max_message_size,
            span,
        };
        tokio::spawn(driver.run());

        Ok(Self { cmd_tx, status })
    }

    /// Queue a text message and wait until the socket accepted it.
    pub(crate) async fn send(&self, text: String) -> SessionResult<()> {
        let (reply, rx) = oneshot::channel();
        if self
            .cmd_tx
            .send(LinkCommand::Send { text, reply })
            .await
            .is_err()
        {
            return Err(self.down_error());
        }
        rx.await.unwrap_or_else(|_| Err(self.down_error()))
    }

    /// Current status.
    pub(crate) fn status(&self) -> LinkStatus {
        self.status.borrow().clone()
    }

    /// Receiver for status changes.
    pub(crate) fn status_watch(&self) -> watch::Receiver<LinkStatus> {
        self.status.clone()
    }

    /// Drop the socket as if the peer had gone away.
    pub(crate) fn disconnect(&self, reason: impl Into<String>) {
        let _ = self.cmd_tx.try_send(LinkCommand::Disconnect {
            reason: reason.into(),
        });
    }

    /// Close the socket and wait for the task to acknowledge it.
    pub(crate) async fn close(&self) {
        if self.cmd_tx.send(LinkCommand::Close).await.is_ok() {
            let _ = wait_until_down(self.status_watch()).await;
        }
    }

    fn down_error(&self) -> SessionError {
        match self.status() {
            LinkStatus::Open => SessionError::disconnected("connection task ended"),
            status => status.to_error(),
        }
    }
}

/// Wait until the link behind `status` is down and return the final status.
pub(crate) async fn wait_until_down(mut status: watch::Receiver<LinkStatus>) -> LinkStatus {
    let result = status.wait_for(LinkStatus::is_down).await.map(|s| s.clone());
    result.unwrap_or_else(|_| LinkStatus::Disconnected {
        reason: "connection task ended".to_string(),
    })
}

struct LinkDriver {
    writer: Box<dyn SocketWriter>,
    reader: SocketReader,
    cmd_rx: mpsc::Receiver<LinkCommand>,
    status_tx: watch::Sender<LinkStatus>,
    on_message: InboundHandler,
    fatal_close_codes: Vec<u16>,
    max_message_size: usize,
    span: Span,
}

impl LinkDriver {
    async fn run(mut self) {
        let status = self.drive().await;
        match &status {
            LinkStatus::Fatal { reason } => {
                warn!(parent: &self.span, %reason, "Connection closed with a non-recoverable code");
            }
            LinkStatus::Disconnected { reason } => {
                info!(parent: &self.span, %reason, "Connection lost");
            }
            _ => debug!(parent: &self.span, "Connection closed"),
        }
        self.status_tx.send_replace(status);
    }

    async fn drive(&mut self) -> LinkStatus {
        loop {
            tokio::select! {
                biased;
                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        Some(LinkCommand::Send { text, reply }) => {
                            let result = self.writer.send_text(text).await;
                            let failure = result.as_ref().err().map(ToString::to_string);
                            let _ = reply.send(result);
                            if let Some(reason) = failure {
                                return LinkStatus::Disconnected { reason };
                            }
                        }
                        Some(LinkCommand::Disconnect { reason }) => {
                            self.close_writer().await;
                            return LinkStatus::Disconnected { reason };
                        }
                        Some(LinkCommand::Close) | None => {
                            self.close_writer().await;
                            return LinkStatus::Closed;
                        }
                    }
                }
                msg = self.reader.next() => {
                    match msg {
                        Some(Ok(SocketMessage::Text(text))) => {
                            if self.max_message_size > 0 && text.len() > self.max_message_size {
                                warn!(
                                    parent: &self.span,
                                    size = text.len(),
                                    max = self.max_message_size,
                                    "Dropping oversized message"
                                );
                                continue;
                            }
                            (self.on_message)(text);
                        }
                        Some(Ok(SocketMessage::Close { code, reason })) => {
                            return match code {
                                Some(code) if self.fatal_close_codes.contains(&code) => {
                                    LinkStatus::Fatal {
                                        reason: format!("closed by server with code {code}: {reason}"),
                                    }
                                }
                                Some(code) => LinkStatus::Disconnected {
                                    reason: format!("closed by server with code {code}: {reason}"),
                                },
                                None => LinkStatus::Disconnected {
                                    reason: "closed by server".to_string(),
                                },
                            };
                        }
                        Some(Err(err)) => {
                            return LinkStatus::Disconnected { reason: err.to_string() };
                        }
                        None => {
                            return LinkStatus::Disconnected {
                                reason: "connection closed by peer".to_string(),
                            };
                        }
                    }
                }
            }
        }
    }

    async fn close_writer(&mut self) {
        const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);
        if let Err(err) = tokio::time::timeout(CLOSE_TIMEOUT, self.writer.close()).await {
            debug!(parent: &self.span, error = %err, "Socket close timed out");
        }
    }
}
