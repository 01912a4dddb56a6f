//! Session client with transparent reconnection.
//!
//! [`SessionClient`] owns the connection lifecycle:
//!
//! ```text
//! Connecting -> Open -> Reconnecting -> Open
//!                            \-> Fatal (retry budget exhausted)
//! any state -> Closed (explicit close)
//! ```
//!
//! A call that is in flight when the connection drops, or that times out, is
//! not failed. It is parked in the replay set and resent once with the same
//! correlation id as soon as a connection is up, bounded by its timeout plus
//! the replay grace. After
//! the replay, every active subscription is reissued from the version after
//! the last one delivered, and only then is the `reconnected` signal raised.

use std::{
    sync::{
        Arc, OnceLock,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use futures_util::future::join_all;
use parking_lot::Mutex;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use tokio::{
    sync::{mpsc, oneshot, watch},
    time::Instant,
};
use tracing::{Span, debug, debug_span, error, info, info_span, warn};

use crate::{
    backoff::Backoff,
    channel::{CorrelatedChannel, Push},
    config::SessionConfig,
    error::{SessionError, SessionResult},
    link::{LinkStatus, wait_until_down},
    listener::{ListenerId, Listeners},
    ordering::{EventOrderingBuffer, ResyncCallback},
    protocol::{JsonRpcProtocol, RpcProtocol},
    socket::Connector,
    subscription::{EventSubscription, SubscriptionStore},
    types::{ConnectionState, Notification, RequestId, StreamId},
};

/// A call waiting in the replay set for a live connection.
struct ReplayEntry {
    method: String,
    params: Value,
    deadline: Instant,
    /// Error surfaced if the replay window elapses.
    expired: SessionError,
    reply_tx: oneshot::Sender<SessionResult<Value>>,
}

/// Resilient RPC client.
///
/// Cheap to clone; all clones share one connection.
#[derive(Clone)]
pub struct SessionClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    config: SessionConfig,
    connector: Arc<dyn Connector>,
    protocol: Arc<dyn RpcProtocol>,
    credentials: Mutex<String>,
    channel: Mutex<Option<Arc<CorrelatedChannel>>>,
    epoch: AtomicU64,
    state_tx: watch::Sender<ConnectionState>,
    terminal: OnceLock<SessionError>,
    replay: scc::HashMap<RequestId, ReplayEntry>,
    subscriptions: SubscriptionStore,
    state_listeners: Listeners<ConnectionState>,
    reconnected_listeners: Listeners<()>,
    notification_listeners: Listeners<Notification>,
    span: Span,
}

impl SessionClient {
    /// Connect using the JSON-RPC protocol.
    ///
    /// Fails if the configuration is invalid or the initial handshake does
    /// not succeed; nothing is left running in that case.
    pub async fn connect(
        config: SessionConfig,
        connector: impl Connector,
        credentials: impl Into<String>,
    ) -> SessionResult<Self> {
        Self::connect_with_protocol(config, connector, JsonRpcProtocol::new(), credentials).await
    }

    /// Connect using a custom wire protocol.
    pub async fn connect_with_protocol(
        config: SessionConfig,
        connector: impl Connector,
        protocol: impl RpcProtocol,
        credentials: impl Into<String>,
    ) -> SessionResult<Self> {
        config.validate().map_err(SessionError::config)?;

        let (state_tx, _) = watch::channel(ConnectionState::Connecting);
        let inner = Arc::new(ClientInner {
            config,
            connector: Arc::new(connector),
            protocol: Arc::new(protocol),
            credentials: Mutex::new(credentials.into()),
            channel: Mutex::new(None),
            epoch: AtomicU64::new(0),
            state_tx,
            terminal: OnceLock::new(),
            replay: scc::HashMap::new(),
            subscriptions: SubscriptionStore::new(),
            state_listeners: Listeners::new(),
            reconnected_listeners: Listeners::new(),
            notification_listeners: Listeners::new(),
            span: info_span!("session"),
        });

        let channel = inner.open_channel().await?;
        inner.install(Arc::new(channel));
        inner.set_state(ConnectionState::Open);
        info!(parent: &inner.span, "Session open");

        tokio::spawn(supervise(Arc::clone(&inner)));
        Ok(Self { inner })
    }

    /// Send a correlated call with the default timeout.
    pub async fn call(&self, method: &str, params: Value) -> SessionResult<Value> {
        self.call_with_timeout(method, params, self.inner.config.rpc_timeout)
            .await
    }

    /// Send a correlated call.
    ///
    /// A disconnect or timeout while the call is in flight is absorbed: the
    /// call is resent once with the same id (after reconnecting, if needed)
    /// and the original error surfaces only if no result arrives within
    /// `timeout` plus the replay grace.
    pub async fn call_with_timeout(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> SessionResult<Value> {
        self.inner.ensure_usable()?;
        let id = RequestId::new();

        let Some(channel) = self.inner.live_channel() else {
            let expired = ClientInner::replay_expired(&id);
            return self
                .inner
                .await_replay(id, method, params, timeout, expired)
                .await;
        };

        let expired = match channel
            .dispatch(id.clone(), method, params.clone(), timeout)
            .await
        {
            Ok(call) => match call.outcome().await {
                Err(err @ SessionError::Timeout { .. }) => {
                    debug!(parent: &self.inner.span, %id, "Call timed out; replaying once");
                    err
                }
                Err(SessionError::Disconnected { reason }) => {
                    debug!(parent: &self.inner.span, %id, %reason, "Call interrupted; parking for replay");
                    ClientInner::replay_expired(&id)
                }
                result => return result,
            },
            Err(SessionError::Disconnected { .. }) => ClientInner::replay_expired(&id),
            Err(err) => return Err(err),
        };

        self.inner
            .await_replay(id, method, params, timeout, expired)
            .await
    }

    /// Typed variant of [`call`](Self::call).
    pub async fn call_typed<P, R>(&self, method: &str, params: &P) -> SessionResult<R>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let params = serde_json::to_value(params)?;
        let result = self.call(method, params).await?;
        Ok(serde_json::from_value(result)?)
    }

    /// Send a message that expects no reply. Not replayed.
    pub async fn notify(&self, method: &str, params: Value) -> SessionResult<()> {
        self.inner.ensure_usable()?;
        match self.inner.live_channel() {
            Some(channel) => channel.notify(method, params).await,
            None => Err(SessionError::disconnected("no live connection")),
        }
    }

    /// Subscribe to a server event stream.
    ///
    /// `current_version` is the last version the caller already has; frames
    /// are delivered from `current_version + 1` on, in order and without gaps.
    pub async fn subscribe(
        &self,
        stream: impl Into<StreamId>,
        current_version: u64,
    ) -> SessionResult<EventSubscription> {
        self.inner.ensure_usable()?;
        let stream = stream.into();

        let (tx, rx) = mpsc::unbounded_channel();
        let buffer = EventOrderingBuffer::new(
            current_version,
            self.inner.config.gap_lifetime,
            tx,
            ClientInner::resync_callback(&self.inner, stream.clone()),
            debug_span!(parent: &self.inner.span, "stream", %stream),
        );
        // Registered before the call so frames sent right after the ack are kept.
        self.inner.subscriptions.insert(stream.clone(), buffer);

        let call = self
            .inner
            .protocol
            .subscribe_call(&stream, current_version.saturating_add(1));
        if let Err(err) = self.call(&call.method, call.params).await {
            self.inner.subscriptions.remove(&stream);
            return Err(err);
        }

        info!(parent: &self.inner.span, %stream, current_version, "Subscribed");
        Ok(EventSubscription::new(stream, rx))
    }

    /// Cancel a subscription. Its [`EventSubscription`] ends.
    pub async fn unsubscribe(&self, stream: impl Into<StreamId>) -> SessionResult<()> {
        self.inner.ensure_usable()?;
        let stream = stream.into();
        if !self.inner.subscriptions.remove(&stream) {
            return Ok(());
        }

        if self.inner.live_channel().is_some() {
            let call = self.inner.protocol.unsubscribe_call(&stream);
            self.call(&call.method, call.params).await?;
        }
        Ok(())
    }

    /// Replace the credential used for reconnects and hand it to the server.
    pub async fn update_token(&self, token: impl Into<String>) -> SessionResult<()> {
        self.inner.ensure_usable()?;
        let token = token.into();
        *self.inner.credentials.lock() = token.clone();

        if self.inner.live_channel().is_some() {
            let call = self.inner.protocol.token_update_call(&token);
            self.call(&call.method, call.params).await?;
        }
        Ok(())
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    /// Receiver that observes every state change.
    pub fn state_watch(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Register a listener for state changes.
    pub fn on_state_change<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&ConnectionState) + Send + Sync + 'static,
    {
        self.inner.state_listeners.add(listener)
    }

    /// Register a listener raised after a reconnect has replayed pending
    /// calls and restored subscriptions.
    pub fn on_reconnected<F>(&self, listener: F) -> ListenerId
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.reconnected_listeners.add(move |_: &()| listener())
    }

    /// Register a listener for server notifications.
    pub fn on_notification<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        self.inner.notification_listeners.add(listener)
    }

    /// Remove a listener registered with any `on_*` method.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.inner.state_listeners.remove(id)
            || self.inner.reconnected_listeners.remove(id)
            || self.inner.notification_listeners.remove(id)
    }

    /// Number of calls parked for replay.
    pub fn replay_len(&self) -> usize {
        self.inner.replay.len()
    }

    /// Number of active subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.inner.subscriptions.len()
    }

    /// Last delivered version of a subscribed stream.
    pub fn last_delivered(&self, stream: &StreamId) -> Option<u64> {
        self.inner.subscriptions.last_delivered(stream)
    }

    /// Error every call fails with once the client is terminal.
    pub fn terminal_error(&self) -> Option<SessionError> {
        self.inner.terminal.get().cloned()
    }

    /// Shut down. Idempotent; the client stays inert afterwards.
    ///
    /// Calls still in flight fail with [`SessionError::ClosedWhileInFlight`],
    /// later calls with [`SessionError::Closed`].
    pub async fn close(&self) {
        let inner = &self.inner;
        if *inner.state_tx.borrow() == ConnectionState::Closed {
            return;
        }
        inner.terminate(SessionError::Closed, SessionError::ClosedWhileInFlight);
        inner.set_state(ConnectionState::Closed);

        let channel = inner.channel.lock().take();
        if let Some(channel) = channel {
            channel.close().await;
        }
        inner.reconnected_listeners.clear();
        inner.notification_listeners.clear();
        info!(parent: &inner.span, "Session closed");
    }
}

impl ClientInner {
    async fn open_channel(&self) -> SessionResult<CorrelatedChannel> {
        let credentials = self.credentials.lock().clone();
        let epoch = self.epoch.load(Ordering::SeqCst) + 1;
        CorrelatedChannel::open(
            self.connector.as_ref(),
            &credentials,
            Arc::clone(&self.protocol),
            &self.config,
            debug_span!(parent: &self.span, "channel", epoch),
        )
        .await
    }

    fn install(self: &Arc<Self>, channel: Arc<CorrelatedChannel>) {
        let weak = Arc::downgrade(self);
        channel.on_push(move |push| {
            if let Some(inner) = weak.upgrade() {
                inner.handle_push(push);
            }
        });
        *self.channel.lock() = Some(channel);
        self.epoch.fetch_add(1, Ordering::SeqCst);
    }

    fn live_channel(&self) -> Option<Arc<CorrelatedChannel>> {
        self.channel
            .lock()
            .as_ref()
            .filter(|channel| channel.is_open())
            .cloned()
    }

    fn current_channel(&self) -> Option<Arc<CorrelatedChannel>> {
        self.channel.lock().clone()
    }

    fn handle_push(&self, push: &Push) {
        match push {
            Push::Event(frame) => {
                if !self.subscriptions.route(frame.clone()) {
                    debug!(parent: &self.span, stream = %frame.stream, "Dropping event for unsubscribed stream");
                }
            }
            Push::Notification(notification) => self.notification_listeners.emit(notification),
        }
    }

    fn ensure_usable(&self) -> SessionResult<()> {
        match self.terminal.get() {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    /// Apply a state transition. Closed is final; Fatal may only move to
    /// Closed.
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

    /// Enter the terminal state: later calls fail with `terminal`, parked
    /// calls with `in_flight`.
    fn terminate(&self, terminal: SessionError, in_flight: SessionError) {
        let _ = self.terminal.set(terminal);
        self.reject_parked(&in_flight);
        self.subscriptions.clear();
    }

    fn reject_parked(&self, error: &SessionError) {
        let mut ids = Vec::new();
        self.replay.retain_sync(|id, _| {
            ids.push(id.clone());
            true
        });
        for id in ids {
            if let Some((_, entry)) = self.replay.remove_sync(&id) {
                let _ = entry.reply_tx.send(Err(error.clone()));
            }
        }
    }

    fn fail(&self, error: SessionError) {
        error!(parent: &self.span, error = %error, "Session failed");
        self.terminate(error.clone(), error);
        self.channel.lock().take();
        self.set_state(ConnectionState::Fatal);
    }

    async fn await_replay(
        self: &Arc<Self>,
        id: RequestId,
        method: &str,
        params: Value,
        timeout: Duration,
        expired: SessionError,
    ) -> SessionResult<Value> {
        let deadline = Instant::now() + timeout + self.config.replay_grace;
        let (reply_tx, rx) = oneshot::channel();
        let entry = ReplayEntry {
            method: method.to_string(),
            params,
            deadline,
            expired: expired.clone(),
            reply_tx,
        };
        self.park(id.clone(), entry);

        match tokio::time::timeout_at(deadline, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(self
                .terminal
                .get()
                .cloned()
                .unwrap_or_else(|| SessionError::internal("replay entry dropped"))),
            Err(_) => {
                self.replay.remove_sync(&id);
                Err(expired)
            }
        }
    }

    fn replay_expired(id: &RequestId) -> SessionError {
        SessionError::disconnected(format!("no response to {id} within the replay window"))
    }

    /// Put a call into the replay set. If a live connection already exists
    /// the call is resent right away.
    fn park(self: &Arc<Self>, id: RequestId, entry: ReplayEntry) {
        if let Some(err) = self.terminal.get() {
            let _ = entry.reply_tx.send(Err(err.clone()));
            return;
        }
        if let Err((id, entry)) = self.replay.insert_sync(id.clone(), entry) {
            let _ = entry.reply_tx.send(Err(SessionError::internal(format!(
                "request id {id} is already parked"
            ))));
            return;
        }
        // Terminal state may have drained the set just before the insert.
        if let Some(err) = self.terminal.get() {
            self.reject_parked(err);
            return;
        }

        if let Some(channel) = self.live_channel() {
            let inner = Arc::clone(self);
            tokio::spawn(async move { inner.resend(&channel, id).await });
        }
    }

    /// Take a parked call out of the replay set and send it on `channel`.
    async fn resend(self: &Arc<Self>, channel: &Arc<CorrelatedChannel>, id: RequestId) {
        // Whoever removes the entry owns the resend.
        let Some((id, entry)) = self.replay.remove_sync(&id) else {
            return;
        };
        let remaining = entry.deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            let _ = entry.reply_tx.send(Err(entry.expired));
            return;
        }

        match channel
            .dispatch(id.clone(), &entry.method, entry.params.clone(), remaining)
            .await
        {
            Ok(call) => {
                debug!(parent: &self.span, %id, method = %entry.method, "Request replayed");
                let inner = Arc::clone(self);
                tokio::spawn(async move {
                    match call.outcome().await {
                        // Second disconnect: keep waiting for the next connection.
                        Err(SessionError::Disconnected { .. }) => inner.park(id, entry),
                        Err(SessionError::Timeout { .. }) => {
                            let _ = entry.reply_tx.send(Err(entry.expired));
                        }
                        result => {
                            let _ = entry.reply_tx.send(result);
                        }
                    }
                });
            }
            Err(SessionError::Disconnected { .. }) => self.park(id, entry),
            Err(err) => {
                let _ = entry.reply_tx.send(Err(err));
            }
        }
    }

    async fn replay_all(self: &Arc<Self>, channel: &Arc<CorrelatedChannel>) {
        let mut ids = Vec::new();
        self.replay.retain_sync(|id, _| {
            ids.push(id.clone());
            true
        });
        if ids.is_empty() {
            return;
        }
        info!(parent: &self.span, count = ids.len(), "Replaying interrupted requests");
        join_all(ids.into_iter().map(|id| self.resend(channel, id))).await;
    }

    async fn resubscribe_all(&self, channel: &CorrelatedChannel) {
        let offsets = self.subscriptions.resume_offsets();
        let calls = offsets.iter().map(|(stream, offset)| {
            let call = self.protocol.subscribe_call(stream, *offset);
            async move {
                let result = channel.call(&call.method, call.params).await;
                (stream, *offset, result)
            }
        });
        for (stream, offset, result) in join_all(calls).await {
            match result {
                Ok(_) => debug!(parent: &self.span, %stream, offset, "Resubscribed"),
                Err(err) => {
                    warn!(parent: &self.span, %stream, offset, error = %err, "Failed to resubscribe");
                }
            }
        }
    }

    fn resync_callback(this: &Arc<Self>, stream: StreamId) -> ResyncCallback {
        let weak = Arc::downgrade(this);
        Arc::new(move |expected: u64| {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let stream = stream.clone();
            tokio::spawn(async move { inner.resync(&stream, expected).await });
        })
    }

    /// Ask the server to resend a stream from `expected`.
    async fn resync(&self, stream: &StreamId, expected: u64) {
        let Some(channel) = self.live_channel() else {
            // The reconnect path resubscribes every stream anyway.
            return;
        };
        info!(parent: &self.span, %stream, expected, "Resynchronizing stream");
        let call = self.protocol.subscribe_call(stream, expected);
        if let Err(err) = channel.call(&call.method, call.params).await {
            warn!(parent: &self.span, %stream, error = %err, "Resync request failed");
        }
    }

    async fn wait_terminal(state: &mut watch::Receiver<ConnectionState>) {
        let _ = state.wait_for(ConnectionState::is_terminal).await;
    }

    /// Reopen the connection with backoff. Returns `false` once the client
    /// is terminal.
    async fn reconnect(
        self: &Arc<Self>,
        backoff: &mut Backoff,
        state: &mut watch::Receiver<ConnectionState>,
    ) -> bool {
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
                result = self.open_channel() => result,
                _ = Self::wait_terminal(state) => return false,
            };
            let channel = match attempt {
                Ok(channel) => Arc::new(channel),
                Err(err) => {
                    warn!(parent: &self.span, attempt = backoff.retry_count(), error = %err, "Reconnect attempt failed");
                    continue;
                }
            };

            backoff.reset();
            if self.terminal.get().is_some() {
                channel.close().await;
                return false;
            }
            self.install(Arc::clone(&channel));
            info!(parent: &self.span, "Connection reestablished");

            self.replay_all(&channel).await;
            self.resubscribe_all(&channel).await;

            if channel.is_open() && self.set_state(ConnectionState::Open) {
                self.reconnected_listeners.emit(&());
            }
            return true;
        }
    }
}

/// Watch the live connection and rebuild it whenever it drops.
async fn supervise(inner: Arc<ClientInner>) {
    let mut backoff = Backoff::new(inner.config.backoff());
    let mut state = inner.state_tx.subscribe();

    while let Some(channel) = inner.current_channel() {
        let status = tokio::select! {
            status = wait_until_down(channel.status_watch()) => status,
            _ = ClientInner::wait_terminal(&mut state) => break,
        };

        match status {
            LinkStatus::Closed => break,
            LinkStatus::Fatal { reason } => {
                inner.fail(SessionError::fatal(reason));
                break;
            }
            LinkStatus::Disconnected { reason } => {
                if inner.terminal.get().is_some() {
                    break;
                }
                info!(parent: &inner.span, %reason, "Connection lost; reconnecting");
                inner.channel.lock().take();
                inner.set_state(ConnectionState::Reconnecting);
                if !inner.reconnect(&mut backoff, &mut state).await {
                    break;
                }
            }
            LinkStatus::Open => {}
        }
    }
    debug!(parent: &inner.span, "Supervisor stopped");
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::socket::memory::{AcceptMode, memory_pair};

    fn fast_config() -> SessionConfig {
        SessionConfig::new()
            .backoff_base_interval(Duration::from_millis(10))
            .backoff_jitter(Duration::ZERO)
            .max_retries(3)
    }

    #[tokio::test]
    async fn test_connect_and_call() {
        let (connector, mut server) = memory_pair();
        let server_task = tokio::spawn(async move {
            let mut peer = server.accept().await.unwrap();
            let request = peer.recv_json().await.unwrap();
            peer.send_json(&json!({"jsonrpc": "2.0", "id": request["id"], "result": "pong"}));
            (server, peer)
        });

        let client = SessionClient::connect(fast_config(), connector, "token")
            .await
            .unwrap();
        assert_eq!(client.state(), ConnectionState::Open);
        assert_eq!(client.call("ping", Value::Null).await.unwrap(), json!("pong"));
        drop(server_task.await.unwrap());
    }

    #[tokio::test]
    async fn test_initial_connect_failure() {
        let (connector, server) = memory_pair();
        server.set_mode(AcceptMode::Refuse);

        let result = SessionClient::connect(fast_config(), connector, "token").await;
        assert!(matches!(result, Err(SessionError::Connection { .. })));
    }

    #[tokio::test]
    async fn test_invalid_config() {
        let (connector, _server) = memory_pair();
        let config = SessionConfig::new().rpc_timeout(Duration::ZERO);

        let result = SessionClient::connect(config, connector, "").await;
        assert!(matches!(result, Err(SessionError::Config { .. })));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (connector, mut server) = memory_pair();
        let client = SessionClient::connect(fast_config(), connector, "")
            .await
            .unwrap();
        let _peer = server.accept().await.unwrap();

        let states = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&states);
        client.on_state_change(move |state| sink.lock().push(*state));

        client.close().await;
        client.close().await;

        assert_eq!(client.state(), ConnectionState::Closed);
        assert_eq!(*states.lock(), vec![ConnectionState::Closed]);
        assert_eq!(
            client.call("m", Value::Null).await.unwrap_err(),
            SessionError::Closed
        );
    }

    #[test]
    fn test_state_machine_never_leaves_closed() {
        let (state_tx, _) = watch::channel(ConnectionState::Open);
        let inner = ClientInner {
            config: SessionConfig::new(),
            connector: Arc::new(memory_pair().0),
            protocol: Arc::new(JsonRpcProtocol::new()),
            credentials: Mutex::new(String::new()),
            channel: Mutex::new(None),
            epoch: AtomicU64::new(0),
            state_tx,
            terminal: OnceLock::new(),
            replay: scc::HashMap::new(),
            subscriptions: SubscriptionStore::new(),
            state_listeners: Listeners::new(),
            reconnected_listeners: Listeners::new(),
            notification_listeners: Listeners::new(),
            span: Span::none(),
        };

        assert!(inner.set_state(ConnectionState::Reconnecting));
        assert!(!inner.set_state(ConnectionState::Reconnecting));
        assert!(inner.set_state(ConnectionState::Fatal));
        assert!(!inner.set_state(ConnectionState::Open));
        assert!(inner.set_state(ConnectionState::Closed));
        assert!(!inner.set_state(ConnectionState::Open));
        assert!(!inner.set_state(ConnectionState::Fatal));
    }
}
