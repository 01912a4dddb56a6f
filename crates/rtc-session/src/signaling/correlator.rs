//! Acknowledge and response tables for signaling messages.
//!
//! Outbound messages wait on two independent records: a fast transport-level
//! acknowledgement, and for requests the peer's paired response. Both tables
//! are `scc::HashMap`s; whoever removes a record owns its resolution.

use std::time::Duration;

use serde_json::Value;
use tokio::sync::oneshot;

use super::message::RejectReason;
use crate::error::{SessionError, SessionResult};

type AckSender = oneshot::Sender<SessionResult<()>>;
type ResponseSender = oneshot::Sender<SessionResult<Value>>;

/// Pending acknowledgements and responses, keyed by outbound message id.
pub(crate) struct Correlator {
    acks: scc::HashMap<String, AckSender>,
    responses: scc::HashMap<String, ResponseSender>,
}

impl Correlator {
    pub(crate) fn new() -> Self {
        Self {
            acks: scc::HashMap::new(),
            responses: scc::HashMap::new(),
        }
    }

    pub(crate) fn expect_ack(&self, id: &str) -> SessionResult<oneshot::Receiver<SessionResult<()>>> {
        let (tx, rx) = oneshot::channel();
        self.acks
            .insert_sync(id.to_string(), tx)
            .map_err(|_| SessionError::internal(format!("duplicate message id {id}")))?;
        Ok(rx)
    }

    pub(crate) fn expect_response(
        &self,
        id: &str,
    ) -> SessionResult<oneshot::Receiver<SessionResult<Value>>> {
        let (tx, rx) = oneshot::channel();
        self.responses
            .insert_sync(id.to_string(), tx)
            .map_err(|_| SessionError::internal(format!("duplicate request id {id}")))?;
        Ok(rx)
    }

    /// Resolve an acknowledgement. Returns `false` for unknown ids.
    pub(crate) fn settle_ack(
        &self,
        id: &str,
        ok: bool,
        code: Option<RejectReason>,
        detail: Option<String>,
    ) -> bool {
        let Some((id, tx)) = self.acks.remove_sync(id) else {
            return false;
        };
        let result = if ok {
            Ok(())
        } else {
            Err(SessionError::Rejected {
                message_id: id,
                reason: code.unwrap_or(RejectReason::Unknown),
                detail,
            })
        };
        let _ = tx.send(result);
        true
    }

    /// Resolve a response. Returns `false` for unknown request ids.
    pub(crate) fn settle_response(&self, request_id: &str, payload: Value) -> bool {
        match self.responses.remove_sync(request_id) {
            Some((_, tx)) => {
                let _ = tx.send(Ok(payload));
                true
            }
            None => false,
        }
    }

    /// Drop both records of a message that was never sent.
    pub(crate) fn forget(&self, id: &str) {
        self.acks.remove_sync(id);
        self.responses.remove_sync(id);
    }

    /// Wait for the acknowledgement of `id`.
    pub(crate) async fn wait_ack(
        &self,
        id: &str,
        mut rx: oneshot::Receiver<SessionResult<()>>,
        timeout: Duration,
    ) -> SessionResult<()> {
        tokio::select! {
            biased;
            result = &mut rx => return flatten(result),
            _ = tokio::time::sleep(timeout) => {
                if self.acks.remove_sync(id).is_some() {
                    return Err(SessionError::RequestTimeout {
                        duration: timeout,
                        message_id: id.to_string(),
                    });
                }
            }
        }
        flatten(rx.await)
    }

    /// Wait for the peer's response to request `id`.
    pub(crate) async fn wait_response(
        &self,
        id: &str,
        mut rx: oneshot::Receiver<SessionResult<Value>>,
        timeout: Duration,
    ) -> SessionResult<Value> {
        tokio::select! {
            biased;
            result = &mut rx => return flatten(result),
            _ = tokio::time::sleep(timeout) => {
                if self.responses.remove_sync(id).is_some() {
                    return Err(SessionError::ResponseTimeout {
                        duration: timeout,
                        message_id: id.to_string(),
                    });
                }
            }
        }
        flatten(rx.await)
    }

    /// Fail every outstanding acknowledgement. Responses keep waiting.
    pub(crate) fn fail_acks(&self, error: &SessionError) -> usize {
        drain(&self.acks, error)
    }

    /// Fail every outstanding record.
    pub(crate) fn clear(&self, error: &SessionError) -> usize {
        drain(&self.acks, error) + drain(&self.responses, error)
    }

    pub(crate) fn pending_acks(&self) -> usize {
        self.acks.len()
    }

    pub(crate) fn pending_responses(&self) -> usize {
        self.responses.len()
    }
}

fn drain<T>(table: &scc::HashMap<String, oneshot::Sender<SessionResult<T>>>, error: &SessionError) -> usize {
    let mut ids = Vec::new();
    table.retain_sync(|id, _| {
        ids.push(id.clone());
        true
    });
    let mut count = 0;
    for id in ids {
        if let Some((_, tx)) = table.remove_sync(&id) {
            let _ = tx.send(Err(error.clone()));
            count += 1;
        }
    }
    count
}

fn flatten<T>(
    result: Result<SessionResult<T>, oneshot::error::RecvError>,
) -> SessionResult<T> {
    result.unwrap_or_else(|_| Err(SessionError::internal("acknowledgement channel dropped")))
}
