//! Correlated request/response channel over one connection.
//!
//! Every call registers a [`PendingRequest`](crate::pending::PendingRequest)
//! under a fresh correlation id and then races its response against the
//! connection going down and its own timeout. Responses are matched purely
//! by id; arrival order does not matter.

use std::{sync::Arc, time::Duration};

use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use tokio::sync::watch;
use tracing::{Span, debug};

use crate::{
    config::SessionConfig,
    error::{SessionError, SessionResult},
    link::{InboundHandler, Link, LinkStatus, wait_until_down},
    listener::{ListenerId, Listeners},
    pending::{PendingRequestStore, ResponseReceiver},
    protocol::{Inbound, RpcProtocol},
    socket::Connector,
    types::{EventFrame, Notification, RequestId},
};

/// Out-of-band message pushed by the server.
#[derive(Clone, Debug, PartialEq)]
pub enum Push {
    /// Frame of a subscribed stream.
    Event(EventFrame),
    /// Any other notification.
    Notification(Notification),
}

/// A request/response channel bound to one live connection.
pub struct CorrelatedChannel {
    link: Link,
    pending: Arc<PendingRequestStore>,
    protocol: Arc<dyn RpcProtocol>,
    push_listeners: Arc<Listeners<Push>>,
    rpc_timeout: Duration,
    span: Span,
}

impl CorrelatedChannel {
    /// Open a connection and start routing its inbound messages.
    pub async fn open(
        connector: &dyn Connector,
        credentials: &str,
        protocol: Arc<dyn RpcProtocol>,
        config: &SessionConfig,
        span: Span,
    ) -> SessionResult<Self> {
        let pending = Arc::new(PendingRequestStore::new(config.max_pending_requests));
        let push_listeners = Arc::new(Listeners::new());

        let on_message = inbound_router(
            Arc::clone(&protocol),
            Arc::clone(&pending),
            Arc::clone(&push_listeners),
            span.clone(),
        );
        let link = Link::open(connector, credentials, config, on_message, span.clone()).await?;

        // Reject whatever is still pending once the connection is gone.
        let status = link.status_watch();
        let store = Arc::clone(&pending);
        tokio::spawn(async move {
            let status = wait_until_down(status).await;
            store.clear_with_error(&status.to_error());
        });

        debug!(parent: &span, "Channel open");
        Ok(Self {
            link,
            pending,
            protocol,
            push_listeners,
            rpc_timeout: config.rpc_timeout,
            span,
        })
    }

    /// Send a correlated request and wait for its result using the default
    /// timeout.
    pub async fn call(&self, method: &str, params: Value) -> SessionResult<Value> {
        self.call_with_timeout(method, params, self.rpc_timeout)
            .await
    }

    /// Send a correlated request and wait for its result.
    pub async fn call_with_timeout(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> SessionResult<Value> {
        self.dispatch(RequestId::new(), method, params, timeout)
            .await?
            .outcome()
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

    /// Register and send a request under `id` without waiting for the reply.
    ///
    /// Resolves once the socket accepted the message; the returned handle
    /// yields the result.
    pub async fn dispatch(
        &self,
        id: RequestId,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> SessionResult<InFlightCall> {
        let status = self.link.status();
        if status.is_down() {
            return Err(status.to_error());
        }

        let text = self.protocol.encode_request(&id, method, &params)?;
        let rx = self.pending.add(id.clone(), method, params, timeout)?;

        if let Err(err) = self.link.send(text).await {
            self.pending.remove(&id);
            return Err(err);
        }
        debug!(parent: &self.span, %id, method, "Request sent");

        Ok(InFlightCall {
            id,
            rx,
            timeout,
            pending: Arc::clone(&self.pending),
            status: self.link.status_watch(),
        })
    }

    /// Send a message that expects no reply.
    pub async fn notify(&self, method: &str, params: Value) -> SessionResult<()> {
        let status = self.link.status();
        if status.is_down() {
            return Err(status.to_error());
        }
        let text = self.protocol.encode_notification(method, &params)?;
        self.link.send(text).await
    }

    /// Register a listener for server pushes.
    pub fn on_push<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&Push) + Send + Sync + 'static,
    {
        self.push_listeners.add(listener)
    }

    /// Remove a push listener.
    pub fn remove_push_listener(&self, id: ListenerId) -> bool {
        self.push_listeners.remove(id)
    }

    /// Check if the underlying connection is still up.
    pub fn is_open(&self) -> bool {
        !self.link.status().is_down()
    }

    /// Number of calls waiting for a response.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Close the connection. Calls still in flight fail with
    /// [`SessionError::ClosedWhileInFlight`].
    pub async fn close(&self) {
        self.link.close().await;
        self.push_listeners.clear();
    }

    pub(crate) fn status_watch(&self) -> watch::Receiver<LinkStatus> {
        self.link.status_watch()
    }
}

/// A request that was sent and is waiting for its outcome.
pub struct InFlightCall {
    id: RequestId,
    rx: ResponseReceiver,
    timeout: Duration,
    pending: Arc<PendingRequestStore>,
    status: watch::Receiver<LinkStatus>,
}

impl InFlightCall {
    /// Correlation id of the call.
    pub fn id(&self) -> &RequestId {
        &self.id
    }

    /// Wait for whichever settles first: the response, the connection going
    /// down, or the timeout.
    pub async fn outcome(self) -> SessionResult<Value> {
        let Self {
            id,
            mut rx,
            timeout,
            pending,
            status,
        } = self;

        tokio::select! {
            biased;
            result = &mut rx => return flatten(result),
            status = wait_until_down(status) => {
                if pending.remove(&id).is_some() {
                    return Err(status.to_error());
                }
            }
            _ = tokio::time::sleep(timeout) => {
                if pending.remove(&id).is_some() {
                    return Err(SessionError::timeout(timeout, id.to_string()));
                }
            }
        }

        // Lost the removal race: the winner has already sent the outcome.
        flatten(rx.await)
    }
}

fn flatten(
    result: Result<SessionResult<Value>, tokio::sync::oneshot::error::RecvError>,
) -> SessionResult<Value> {
    result.unwrap_or_else(|_| Err(SessionError::internal("response channel dropped")))
}

fn inbound_router(
    protocol: Arc<dyn RpcProtocol>,
    pending: Arc<PendingRequestStore>,
    push_listeners: Arc<Listeners<Push>>,
    span: Span,
) -> InboundHandler {
    Arc::new(move |text: String| match protocol.decode(&text) {
        Inbound::Response { id, result } => {
            let result = result.map_err(|e| SessionError::server(e.code, e.message));
            if !pending.resolve(&id, result) {
                debug!(parent: &span, %id, "Dropping response for unknown request");
            }
        }
        Inbound::Event(frame) => push_listeners.emit(&Push::Event(frame)),
        Inbound::Notification { method, params } => {
            push_listeners.emit(&Push::Notification(Notification { method, params }));
        }
        Inbound::Unknown => {
            debug!(parent: &span, len = text.len(), "Ignoring unrecognized message");
        }
    })
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;
    use serde_json::json;

    use super::*;
    use crate::{
        protocol::JsonRpcProtocol,
        socket::memory::{AcceptMode, MemoryPeer, memory_pair},
    };

    async fn open_channel(config: SessionConfig) -> (CorrelatedChannel, MemoryPeer) {
        let (connector, mut server) = memory_pair();
        let channel = CorrelatedChannel::open(
            &connector,
            "token",
            Arc::new(JsonRpcProtocol::new()),
            &config,
            Span::none(),
        )
        .await
        .unwrap();
        let peer = server.accept().await.unwrap();
        (channel, peer)
    }

    fn reply(peer: &MemoryPeer, request: &Value, result: Value) {
        peer.send_json(&json!({"jsonrpc": "2.0", "id": request["id"], "result": result}));
    }

    #[tokio::test]
    async fn test_call_resolves() {
        let (channel, mut peer) = open_channel(SessionConfig::new()).await;

        let server = tokio::spawn(async move {
            let request = peer.recv_json().await.unwrap();
            assert_eq!(request["method"], "join");
            reply(&peer, &request, json!({"member": 1}));
            peer
        });

        let result = channel.call("join", json!({"room": "a"})).await.unwrap();
        assert_eq!(result, json!({"member": 1}));
        assert_eq!(channel.pending_count(), 0);
        drop(server.await.unwrap());
    }

    #[tokio::test]
    async fn test_responses_match_by_id_not_order() {
        let (channel, mut peer) = open_channel(SessionConfig::new()).await;
        let channel = Arc::new(channel);

        let first = channel
            .dispatch(RequestId::from("a"), "m", json!(1), Duration::from_secs(5))
            .await
            .unwrap();
        let second = channel
            .dispatch(RequestId::from("b"), "m", json!(2), Duration::from_secs(5))
            .await
            .unwrap();

        let req_a = peer.recv_json().await.unwrap();
        let req_b = peer.recv_json().await.unwrap();
        reply(&peer, &req_b, json!("B"));
        reply(&peer, &req_a, json!("A"));

        assert_eq!(second.outcome().await.unwrap(), json!("B"));
        assert_eq!(first.outcome().await.unwrap(), json!("A"));
    }

    #[tokio::test]
    async fn test_server_error() {
        let (channel, mut peer) = open_channel(SessionConfig::new()).await;

        tokio::spawn(async move {
            let request = peer.recv_json().await.unwrap();
            peer.send_json(&json!({
                "jsonrpc": "2.0",
                "id": request["id"],
                "error": {"code": 404, "message": "no such room"}
            }));
            peer
        });

        let err = channel.call("join", Value::Null).await.unwrap_err();
        assert_eq!(err, SessionError::server(404, "no such room"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_then_late_response_dropped() {
        let (channel, mut peer) = open_channel(SessionConfig::new()).await;

        let call = channel
            .dispatch(RequestId::from("slow"), "m", Value::Null, Duration::from_secs(2))
            .await
            .unwrap();
        let err = call.outcome().await.unwrap_err();
        assert_eq!(err, SessionError::timeout(Duration::from_secs(2), "slow"));
        assert_eq!(channel.pending_count(), 0);

        let request = peer.recv_json().await.unwrap();
        reply(&peer, &request, json!("late"));
        tokio::task::yield_now().await;
        assert!(channel.is_open());
    }

    #[tokio::test]
    async fn test_disconnect_fails_in_flight_call() {
        let (channel, mut peer) = open_channel(SessionConfig::new()).await;

        tokio::spawn(async move {
            let _ = peer.recv().await;
            drop(peer);
        });

        let err = channel.call("m", Value::Null).await.unwrap_err();
        assert!(matches!(err, SessionError::Disconnected { .. }));
        assert!(!channel.is_open());

        let err = channel.call("m", Value::Null).await.unwrap_err();
        assert!(matches!(err, SessionError::Disconnected { .. }));
    }

    #[tokio::test]
    async fn test_close_while_in_flight() {
        let (channel, _peer) = open_channel(SessionConfig::new()).await;

        let call = channel
            .dispatch(RequestId::new(), "m", Value::Null, Duration::from_secs(5))
            .await
            .unwrap();
        channel.close().await;

        assert_eq!(
            call.outcome().await.unwrap_err(),
            SessionError::ClosedWhileInFlight
        );
    }

    #[tokio::test]
    async fn test_fatal_close_code() {
        let (channel, mut peer) = open_channel(SessionConfig::new()).await;

        tokio::spawn(async move {
            let _ = peer.recv().await;
            peer.close(1008, "revoked");
        });

        let err = channel.call("m", Value::Null).await.unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_notify_and_push() {
        let (channel, mut peer) = open_channel(SessionConfig::new()).await;
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        channel.on_push(move |push| sink.lock().push(push.clone()));

        channel.notify("typing", json!({"on": true})).await.unwrap();
        let sent = peer.recv_json().await.unwrap();
        assert!(sent.get("id").is_none());
        assert_eq!(sent["method"], "typing");

        peer.send_json(&json!({
            "jsonrpc": "2.0",
            "method": "event",
            "params": {"stream": "room", "version": 1, "payload": "x"}
        }));
        peer.send_json(&json!({"jsonrpc": "2.0", "method": "kicked", "params": {}}));
        drop(peer);
        wait_until_down(channel.status_watch()).await;

        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], Push::Event(EventFrame::new("room", 1, json!("x"))));
        assert!(matches!(&seen[1], Push::Notification(n) if n.method == "kicked"));
    }

    #[tokio::test]
    async fn test_open_refused() {
        let (connector, server) = memory_pair();
        server.set_mode(AcceptMode::Refuse);
        let result = CorrelatedChannel::open(
            &connector,
            "",
            Arc::new(JsonRpcProtocol::new()),
            &SessionConfig::new(),
            Span::none(),
        )
        .await;
        assert!(matches!(result, Err(SessionError::Connection { .. })));
    }

    #[tokio::test]
    async fn test_call_typed() {
        #[derive(serde::Deserialize)]
        struct Joined {
            member: u32,
        }

        let (channel, mut peer) = open_channel(SessionConfig::new()).await;
        tokio::spawn(async move {
            let request = peer.recv_json().await.unwrap();
            reply(&peer, &request, json!({"member": 9}));
            peer
        });

        let joined: Joined = channel
            .call_typed("join", &json!({"room": "a"}))
            .await
            .unwrap();
        assert_eq!(joined.member, 9);
    }
}
