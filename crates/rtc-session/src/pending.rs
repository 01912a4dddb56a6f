//! Lock-free pending request management using `scc::HashMap`.
//!
//! The store tracks outgoing calls awaiting responses. Removing an entry is
//! the single point of resolution: whoever removes it owns the outcome, so a
//! late or duplicate response for an id that is already gone is dropped.

use std::time::Duration;

use serde_json::Value;
use tokio::{sync::oneshot, time::Instant};

use crate::{
    error::{SessionError, SessionResult},
    types::RequestId,
};

/// Receiver side of a pending call.
pub type ResponseReceiver = oneshot::Receiver<SessionResult<Value>>;

/// A pending request awaiting a response.
pub struct PendingRequest {
    /// Method name of the call.
    pub method: String,
    /// Parameters the call was sent with.
    pub params: Value,
    /// When this request was created.
    pub created_at: Instant,
    /// Timeout for this specific request.
    pub timeout: Duration,
    response_tx: oneshot::Sender<SessionResult<Value>>,
}

/// Lock-free store for pending requests.
pub struct PendingRequestStore {
    requests: scc::HashMap<RequestId, PendingRequest>,
    max_pending: usize,
}

impl PendingRequestStore {
    /// Create a new pending request store.
    pub fn new(max_pending: usize) -> Self {
        Self {
            requests: scc::HashMap::new(),
            max_pending,
        }
    }

    /// Register a call.
    ///
    /// Returns a receiver that will receive the response when it arrives.
    pub fn add(
        &self,
        id: RequestId,
        method: impl Into<String>,
        params: Value,
        timeout: Duration,
    ) -> SessionResult<ResponseReceiver> {
        if self.requests.len() >= self.max_pending {
            return Err(SessionError::capacity_exceeded(format!(
                "{} requests already pending",
                self.max_pending
            )));
        }

        let (tx, rx) = oneshot::channel();
        let pending = PendingRequest {
            method: method.into(),
            params,
            created_at: Instant::now(),
            timeout,
            response_tx: tx,
        };

        // Insert returns Err if key already exists
        if let Err((id, _)) = self.requests.insert_sync(id, pending) {
            return Err(SessionError::internal(format!(
                "request id {id} is already pending"
            )));
        }

        Ok(rx)
    }

    /// Resolve a pending request with a response.
    ///
    /// Returns `true` if the request was found and resolved, `false` otherwise.
    pub fn resolve(&self, id: &RequestId, response: SessionResult<Value>) -> bool {
        if let Some((_, pending)) = self.requests.remove_sync(id) {
            // Send the response; ignore error (receiver may have dropped)
            let _ = pending.response_tx.send(response);
            return true;
        }
        false
    }

    /// Remove a pending request without notifying the receiver.
    ///
    /// Returns the removed entry, or `None` if it was already resolved.
    pub fn remove(&self, id: &RequestId) -> Option<PendingRequest> {
        self.requests.remove_sync(id).map(|(_, pending)| pending)
    }

    /// Check whether a request is still pending.
    pub fn contains(&self, id: &RequestId) -> bool {
        self.requests.get_sync(id).is_some()
    }

    /// Check if there's capacity for more requests.
    pub fn has_capacity(&self) -> bool {
        self.requests.len() < self.max_pending
    }

    /// Get the current number of pending requests.
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    /// Check if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// Reject every pending request with `error`.
    pub fn clear_with_error(&self, error: &SessionError) -> usize {
        let mut ids = Vec::new();
        self.requests.retain_sync(|id, _| {
            ids.push(id.clone());
            true
        });

        let mut rejected = 0;
        for id in ids {
            if self.resolve(&id, Err(error.clone())) {
                rejected += 1;
            }
        }
        rejected
    }
}
