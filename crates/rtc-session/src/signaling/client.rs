//! Peer-signaling client.
//!
//! [`SignalingClient`] sends targeted requests that the server acknowledges
//! and that the remote peer later answers. Acks and responses are correlated
//! by message id. A heartbeat ping goes out every interval; a missing or
//! negative ack forces a reconnect, which follows the same backoff budget as
//! the session client and ends in `Fatal` when exhausted.

use std::{
    sync::{Arc, OnceLock},
    time::Duration,
};

use parking_lot::Mutex;
use serde_json::Value;
use tokio::{
    sync::watch,
    time::{Instant, MissedTickBehavior},
};
use tracing::{Span, debug, debug_span, error, info, info_span, warn};
use ulid::Ulid;

use super::{
    correlator::Correlator,
    message::{Inbound, Outbound, PeerRequest},
};
use crate::{
    backoff::Backoff,
    config::SessionConfig,
    error::{SessionError, SessionResult},
    link::{InboundHandler, Link, LinkStatus, wait_until_down},
    listener::{ListenerId, Listeners},
    socket::Connector,
    types::ConnectionState,
};

const MAX_TARGET_LEN: usize = 64;

/// Peer-signaling client.
///
/// Every outbound message waits for a server acknowledgement; requests
/// additionally wait for the peer's paired response. A heartbeat pings the
/// server every `heartbeat_interval` and forces a reconnect when the ping is
/// not acknowledged in time.
#[derive(Clone)]
pub struct SignalingClient {
    inner: Arc<Inner>,
}

struct Inner {
    config: SessionConfig,
    connector: Arc<dyn Connector>,
    credentials: Mutex<String>,
    link: Mutex<Option<Arc<Link>>>,
    correlator: Arc<Correlator>,
    state_tx: watch::Sender<ConnectionState>,
    terminal: OnceLock<SessionError>,
    peer_requests: Arc<Listeners<PeerRequest>>,
    state_listeners: Listeners<ConnectionState>,
    span: Span,
}

impl SignalingClient {
    /// Open the signaling socket and start the heartbeat.
    pub async fn connect(
        config: SessionConfig,
        connector: impl Connector,
        credentials: impl Into<String>,
    ) -> SessionResult<Self> {
        config.validate().map_err(SessionError::config)?;

        let (state_tx, _) = watch::channel(ConnectionState::Connecting);
        let inner = Arc::new(Inner {
            config,
            connector: Arc::new(connector),
            credentials: Mutex::new(credentials.into()),
            link: Mutex::new(None),
            correlator: Arc::new(Correlator::new()),
            state_tx,
            terminal: OnceLock::new(),
            peer_requests: Arc::new(Listeners::new()),
            state_listeners: Listeners::new(),
            span: info_span!("signaling"),
        });

        let link = inner.open_link().await?;
        *inner.link.lock() = Some(Arc::new(link));
        inner.set_state(ConnectionState::Open);
        info!(parent: &inner.span, "Signaling connected");

        tokio::spawn(supervise(Arc::clone(&inner)));
        tokio::spawn(heartbeat(Arc::clone(&inner)));
        Ok(Self { inner })
    }

    /// Send a request to `target` and wait for its response.
    ///
    /// A negative acknowledgement fails right away with
    /// [`SessionError::Rejected`]; otherwise the response is awaited for up
    /// to `timeout`.
    pub async fn request(
        &self,
        target: &str,
        payload: Value,
        timeout: Duration,
    ) -> SessionResult<Value> {
        validate_target(target)?;
        validate_payload(&payload)?;

        let id = Ulid::new().to_string();
        let correlator = &self.inner.correlator;
        let response = correlator.expect_response(&id)?;

        let frame = Outbound::Request {
            id: id.clone(),
            target: target.to_string(),
            payload,
        };
        if let Err(err) = self.inner.send_frame(frame, self.inner.config.ack_timeout).await {
            correlator.forget(&id);
            return Err(err);
        }
        debug!(parent: &self.inner.span, %id, to = target, "Request acknowledged");

        correlator.wait_response(&id, response, timeout).await
    }

    /// Answer a request received from a peer.
    pub async fn respond(&self, request: &PeerRequest, payload: Value) -> SessionResult<()> {
        validate_target(&request.from)?;
        validate_payload(&payload)?;

        let frame = Outbound::Response {
            id: Ulid::new().to_string(),
            request_id: request.id.clone(),
            target: request.from.clone(),
            payload,
        };
        self.inner
            .send_frame(frame, self.inner.config.ack_timeout)
            .await
    }

    /// Replace the credential and hand it to the server if connected.
    pub async fn update_token(&self, token: impl Into<String>) -> SessionResult<()> {
        self.inner.ensure_usable()?;
        let token = token.into();
        *self.inner.credentials.lock() = token.clone();

        if self.inner.live_link().is_none() {
            debug!(parent: &self.inner.span, "Token stored for the next connection");
            return Ok(());
        }
        let frame = Outbound::Token {
            id: Ulid::new().to_string(),
            token,
        };
        self.inner
            .send_frame(frame, self.inner.config.ack_timeout)
            .await
    }

    /// Ping the server and wait for the acknowledgement.
    pub async fn check_connectivity(&self) -> SessionResult<()> {
        self.inner.check_connectivity().await
    }

    /// Drop the socket and reopen it through the backoff loop.
    pub fn reconnect(&self) -> SessionResult<()> {
        self.inner.ensure_usable()?;
        match self.inner.live_link() {
            Some(link) => {
                link.disconnect("reconnect requested");
                Ok(())
            }
            // Already reconnecting.
            None => Ok(()),
        }
    }

    /// Register a listener for requests sent by peers.
    pub fn on_peer_request<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&PeerRequest) + Send + Sync + 'static,
    {
        self.inner.peer_requests.add(listener)
    }

    /// Register a listener for state changes.
    pub fn on_state_change<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&ConnectionState) + Send + Sync + 'static,
    {
        self.inner.state_listeners.add(listener)
    }

    /// Remove a listener registered with any `on_*` method.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.inner.peer_requests.remove(id) || self.inner.state_listeners.remove(id)
    }

    /// Messages still waiting for an acknowledgement.
    pub fn pending_acks(&self) -> usize {
        self.inner.correlator.pending_acks()
    }

    /// Requests still waiting for a peer response.
    pub fn pending_responses(&self) -> usize {
        self.inner.correlator.pending_responses()
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    pub fn state_watch(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Shut down. Idempotent.
    pub async fn close(&self) {
        let inner = &self.inner;
        if *inner.state_tx.borrow() == ConnectionState::Closed {
            return;
        }
        let _ = inner.terminal.set(SessionError::Closed);
        inner.correlator.clear(&SessionError::ClosedWhileInFlight);
        inner.set_state(ConnectionState::Closed);

        let link = inner.link.lock().take();
        if let Some(link) = link {
            link.close().await;
        }
        inner.peer_requests.clear();
        info!(parent: &inner.span, "Signaling closed");
    }
}

impl Inner {
    async fn open_link(&self) -> SessionResult<Link> {
        let credentials = self.credentials.lock().clone();
        let span = debug_span!(parent: &self.span, "link");
        let link = Link::open(
            self.connector.as_ref(),
            &credentials,
            &self.config,
            inbound_router(
                Arc::clone(&self.correlator),
                Arc::clone(&self.peer_requests),
                span.clone(),
            ),
            span,
        )
        .await?;

        // Acknowledgements cannot arrive on a dead socket.
        let status = link.status_watch();
        let correlator = Arc::clone(&self.correlator);
        tokio::spawn(async move {
            wait_until_down(status).await;
            correlator.fail_acks(&SessionError::SocketNotConnected);
        });
        Ok(link)
    }

    fn live_link(&self) -> Option<Arc<Link>> {
        self.link
            .lock()
            .as_ref()
            .filter(|link| !link.status().is_down())
            .cloned()
    }

    fn current_link(&self) -> Option<Arc<Link>> {
        self.link.lock().clone()
    }

    fn ensure_usable(&self) -> SessionResult<()> {
        match self.terminal.get() {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn set_state(&self, next: ConnectionState) -> bool {
        let changed = self.state_tx.send_if_modified(|state| {
            let allowed = match *state {
                ConnectionState::Closed => false,
                ConnectionState::Fatal => next == ConnectionState::Closed,
                current => current != next,
            };
            if allowed {
                *state = next;
            }
            allowed
        });
        if changed {
            debug!(parent: &self.span, state = %next, "State changed");
            self.state_listeners.emit(&next);
        }
        changed
    }

    fn fail(&self, error: SessionError) {
        error!(parent: &self.span, error = %error, "Signaling failed");
        let _ = self.terminal.set(error.clone());
        self.correlator.clear(&error);
        self.link.lock().take();
        self.set_state(ConnectionState::Fatal);
    }

    /// Serialize, size-check, send and wait for the acknowledgement.
    async fn send_frame(&self, frame: Outbound, ack_timeout: Duration) -> SessionResult<()> {
        self.ensure_usable()?;
        let text = serde_json::to_string(&frame)?;
        let limit = self.config.max_payload_size;
        if text.len() > limit {
            return Err(SessionError::PayloadTooLarge {
                size: text.len(),
                limit,
            });
        }
        let link = self.live_link().ok_or(SessionError::SocketNotConnected)?;

        let id = frame.id();
        let ack = self.correlator.expect_ack(id)?;
        if let Err(err) = link.send(text).await {
            self.correlator.forget(id);
            debug!(parent: &self.span, id, error = %err, "Send failed");
            return Err(SessionError::SocketNotConnected);
        }
        self.correlator.wait_ack(id, ack, ack_timeout).await
    }

    async fn check_connectivity(&self) -> SessionResult<()> {
        let frame = Outbound::Ping {
            id: Ulid::new().to_string(),
        };
        self.send_frame(frame, self.config.heartbeat_ack_timeout)
            .await
    }

    async fn wait_terminal(state: &mut watch::Receiver<ConnectionState>) {
        let _ = state.wait_for(ConnectionState::is_terminal).await;
    }

    async fn reopen(&self, backoff: &mut Backoff, state: &mut watch::Receiver<ConnectionState>) -> bool {
        loop {
            let proceed = tokio::select! {
                proceed = backoff.wait() => proceed,
                _ = Self::wait_terminal(state) => return false,
            };
            if !proceed {
                self.fail(SessionError::fatal(format!(
                    "reconnect failed after {} attempts",
                    backoff.retry_count()
                )));
                return false;
            }

            let attempt = tokio::select! {
                result = self.open_link() => result,
                _ = Self::wait_terminal(state) => return false,
            };
            match attempt {
                Ok(link) => {
                    backoff.reset();
                    if self.terminal.get().is_some() {
                        link.close().await;
                        return false;
                    }
                    *self.link.lock() = Some(Arc::new(link));
                    info!(parent: &self.span, "Signaling reconnected");
                    self.set_state(ConnectionState::Open);
                    return true;
                }
                Err(err) => {
                    warn!(parent: &self.span, attempt = backoff.retry_count(), error = %err, "Reconnect attempt failed");
                }
            }
        }
    }
}

fn inbound_router(
    correlator: Arc<Correlator>,
    peer_requests: Arc<Listeners<PeerRequest>>,
    span: Span,
) -> InboundHandler {
    Arc::new(move |text: String| {
        let message = match serde_json::from_str::<Inbound>(&text) {
            Ok(message) => message,
            Err(err) => {
                debug!(parent: &span, error = %err, "Ignoring unrecognized frame");
                return;
            }
        };
        match message {
            Inbound::Ack {
                id,
                ok,
                code,
                reason,
            } => {
                if !correlator.settle_ack(&id, ok, code, reason) {
                    debug!(parent: &span, %id, "Dropping ack for unknown message");
                }
            }
            Inbound::Response {
                request_id,
                from,
                payload,
            } => {
                if !correlator.settle_response(&request_id, payload) {
                    debug!(parent: &span, %request_id, %from, "Dropping late response");
                }
            }
            Inbound::Request { id, from, payload } => {
                peer_requests.emit(&PeerRequest { id, from, payload });
            }
        }
    })
}

/// Reopen the socket whenever it drops.
async fn supervise(inner: Arc<Inner>) {
    let mut backoff = Backoff::new(inner.config.backoff());
    let mut state = inner.state_tx.subscribe();

    while let Some(link) = inner.current_link() {
        let status = tokio::select! {
            status = wait_until_down(link.status_watch()) => status,
            _ = Inner::wait_terminal(&mut state) => break,
        };

        match status {
            LinkStatus::Open | LinkStatus::Closed => break,
            LinkStatus::Fatal { reason } => {
                inner.fail(SessionError::fatal(reason));
                break;
            }
            LinkStatus::Disconnected { reason } => {
                if inner.terminal.get().is_some() {
                    break;
                }
                info!(parent: &inner.span, %reason, "Signaling socket lost; reconnecting");
                inner.link.lock().take();
                inner.set_state(ConnectionState::Reconnecting);
                if !inner.reopen(&mut backoff, &mut state).await {
                    break;
                }
            }
        }
    }
    debug!(parent: &inner.span, "Supervisor stopped");
}

/// Ping every `heartbeat_interval`; a missed or negative acknowledgement
/// drops the socket so the supervisor reconnects.
async fn heartbeat(inner: Arc<Inner>) {
    let mut state = inner.state_tx.subscribe();
    let period = inner.config.heartbeat_interval;
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = Inner::wait_terminal(&mut state) => break,
        }
        if !state.borrow().is_open() {
            continue;
        }

        let started = Instant::now();
        let result = tokio::select! {
            result = inner.check_connectivity() => result,
            _ = Inner::wait_terminal(&mut state) => break,
        };
        match result {
            Ok(()) => {
                debug!(parent: &inner.span, rtt = ?started.elapsed(), "Heartbeat acknowledged");
            }
            Err(err) if err.is_fatal() => break,
            Err(err) => {
                warn!(parent: &inner.span, error = %err, "Heartbeat failed; forcing reconnect");
                if let Some(link) = inner.live_link() {
                    link.disconnect(format!("heartbeat failed: {err}"));
                }
            }
        }
    }
}

fn validate_target(target: &str) -> SessionResult<()> {
    let reason = if target.is_empty() {
        "target is empty"
    } else if target.len() > MAX_TARGET_LEN {
        "target is longer than 64 bytes"
    } else if target.chars().any(|c| c.is_whitespace() || c.is_control()) {
        "target contains whitespace or control characters"
    } else {
        return Ok(());
    };
    Err(SessionError::InvalidTarget {
        reason: reason.to_string(),
    })
}

fn validate_payload(payload: &Value) -> SessionResult<()> {
    if payload.is_null() {
        return Err(SessionError::InvalidPayload {
            reason: "payload is null".to_string(),
        });
    }
    Ok(())
}
