//! RPC wire codec.
//!
//! The [`RpcProtocol`] trait abstracts how calls are framed and how inbound
//! text is classified, so the session layer never looks at raw JSON.
//! [`JsonRpcProtocol`] is the JSON-RPC 2.0 implementation used by default.

use serde_json::{Value, json};

use crate::{
    error::SessionResult,
    types::{EventFrame, RequestId, StreamId},
};

/// Application-level failure carried by a response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RpcError {
    /// Error code.
    pub code: i64,
    /// Human readable message.
    pub message: String,
}

/// A decoded inbound message.
#[derive(Clone, Debug, PartialEq)]
pub enum Inbound {
    /// Response to a correlated call.
    Response {
        id: RequestId,
        result: Result<Value, RpcError>,
    },
    /// Versioned frame of a subscribed stream.
    Event(EventFrame),
    /// Any other server push.
    Notification { method: String, params: Value },
    /// Unparseable or unrecognized.
    Unknown,
}

/// A call built by the protocol: method name plus parameters.
#[derive(Clone, Debug, PartialEq)]
pub struct RpcCall {
    /// Method name.
    pub method: String,
    /// Parameters.
    pub params: Value,
}

/// Wire protocol used by the correlated channel.
///
/// Implementations must be cheap to share across tasks.
pub trait RpcProtocol: Send + Sync + 'static {
    /// Encode a correlated request.
    fn encode_request(&self, id: &RequestId, method: &str, params: &Value)
    -> SessionResult<String>;

    /// Encode a request that expects no reply.
    fn encode_notification(&self, method: &str, params: &Value) -> SessionResult<String>;

    /// Classify and decode an inbound message.
    fn decode(&self, text: &str) -> Inbound;

    /// Call that (re)subscribes to `stream` starting at version `offset`.
    fn subscribe_call(&self, stream: &StreamId, offset: u64) -> RpcCall;

    /// Call that cancels a subscription.
    fn unsubscribe_call(&self, stream: &StreamId) -> RpcCall;

    /// Call that hands a refreshed credential to the server.
    fn token_update_call(&self, token: &str) -> RpcCall;
}

/// JSON-RPC 2.0 protocol.
///
/// - Requests: `{"jsonrpc": "2.0", "id": ..., "method": "...", "params": ...}`
/// - Responses: `{"jsonrpc": "2.0", "id": ..., "result": ...}` or with
///   `"error": {"code": ..., "message": "..."}`
/// - Notifications: `{"jsonrpc": "2.0", "method": "...", "params": ...}` (no id)
///
/// Notifications whose method is the event method carry an [`EventFrame`]
/// as params: `{"stream": "...", "version": 7, "payload": ...}`.
#[derive(Clone, Debug)]
pub struct JsonRpcProtocol {
    event_method: String,
    subscribe_method: String,
    unsubscribe_method: String,
    token_method: String,
}

impl JsonRpcProtocol {
    /// Create a protocol with the default method names.
    pub fn new() -> Self {
        Self {
            event_method: "event".to_string(),
            subscribe_method: "subscribe".to_string(),
            unsubscribe_method: "unsubscribe".to_string(),
            token_method: "update_token".to_string(),
        }
    }

    /// Set the method name of event notifications.
    #[must_use]
    pub fn event_method(mut self, method: impl Into<String>) -> Self {
        self.event_method = method.into();
        self
    }

    /// Set the subscription method name.
    #[must_use]
    pub fn subscribe_method(mut self, method: impl Into<String>) -> Self {
        self.subscribe_method = method.into();
        self
    }

    /// Set the unsubscription method name.
    #[must_use]
    pub fn unsubscribe_method(mut self, method: impl Into<String>) -> Self {
        self.unsubscribe_method = method.into();
        self
    }

    /// Set the credential update method name.
    #[must_use]
    pub fn token_method(mut self, method: impl Into<String>) -> Self {
        self.token_method = method.into();
        self
    }

    fn decode_id(id: &Value) -> Option<RequestId> {
        match id {
            Value::String(s) => Some(RequestId::from(s.as_str())),
            Value::Number(n) => Some(RequestId::from(n.to_string())),
            _ => None,
        }
    }

    fn decode_error(error: &Value) -> RpcError {
        RpcError {
            code: error.get("code").and_then(Value::as_i64).unwrap_or(0),
            message: error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string(),
        }
    }
}

impl Default for JsonRpcProtocol {
    fn default() -> Self {
        Self::new()
    }
}

impl RpcProtocol for JsonRpcProtocol {
    fn encode_request(
        &self,
        id: &RequestId,
        method: &str,
        params: &Value,
    ) -> SessionResult<String> {
        let msg = json!({
            "jsonrpc": "2.0",
            "id": id.as_str(),
            "method": method,
            "params": params,
        });
        Ok(serde_json::to_string(&msg)?)
    }

    fn encode_notification(&self, method: &str, params: &Value) -> SessionResult<String> {
        let msg = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
        });
        Ok(serde_json::to_string(&msg)?)
    }

    fn decode(&self, text: &str) -> Inbound {
        let Ok(json) = serde_json::from_str::<Value>(text) else {
            return Inbound::Unknown;
        };

        // Has "id" and ("result" or "error") -> Response
        if let Some(id) = json.get("id").and_then(Self::decode_id) {
            if let Some(error) = json.get("error") {
                return Inbound::Response {
                    id,
                    result: Err(Self::decode_error(error)),
                };
            }
            if let Some(result) = json.get("result") {
                return Inbound::Response {
                    id,
                    result: Ok(result.clone()),
                };
            }
        }

        let Some(method) = json.get("method").and_then(Value::as_str) else {
            return Inbound::Unknown;
        };
        let params = json.get("params").cloned().unwrap_or(Value::Null);

        if method == self.event_method {
            return match serde_json::from_value::<EventFrame>(params) {
                Ok(frame) => Inbound::Event(frame),
                Err(_) => Inbound::Unknown,
            };
        }

        Inbound::Notification {
            method: method.to_string(),
            params,
        }
    }

    fn subscribe_call(&self, stream: &StreamId, offset: u64) -> RpcCall {
        RpcCall {
            method: self.subscribe_method.clone(),
            params: json!({ "stream": stream, "offset": offset }),
        }
    }

    fn unsubscribe_call(&self, stream: &StreamId) -> RpcCall {
        RpcCall {
            method: self.unsubscribe_method.clone(),
            params: json!({ "stream": stream }),
        }
    }

    fn token_update_call(&self, token: &str) -> RpcCall {
        RpcCall {
            method: self.token_method.clone(),
            params: json!({ "token": token }),
        }
    }
}
