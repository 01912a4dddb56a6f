//! Subscription records using `scc::HashMap`.
//!
//! Each subscribed stream owns an [`EventOrderingBuffer`]; its cursor is the
//! last delivered version, which is what a reconnect resumes from.

use std::{
    pin::Pin,
    task::{Context, Poll},
};

use futures_util::Stream;
use tokio::sync::mpsc;

use crate::{
    ordering::EventOrderingBuffer,
    types::{EventFrame, StreamId},
};

/// Ordered event stream handed to the application by `subscribe`.
///
/// Ends when the stream is unsubscribed or the client shuts down.
pub struct EventSubscription {
    stream: StreamId,
    rx: mpsc::UnboundedReceiver<EventFrame>,
}

impl EventSubscription {
    pub(crate) fn new(stream: StreamId, rx: mpsc::UnboundedReceiver<EventFrame>) -> Self {
        Self { stream, rx }
    }

    /// Stream this subscription belongs to.
    pub fn stream(&self) -> &StreamId {
        &self.stream
    }

    /// Receive the next frame.
    pub async fn recv(&mut self) -> Option<EventFrame> {
        self.rx.recv().await
    }

    /// Try to receive a frame without waiting.
    pub fn try_recv(&mut self) -> Option<EventFrame> {
        self.rx.try_recv().ok()
    }
}

impl Stream for EventSubscription {
    type Item = EventFrame;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Lock-free store of active subscriptions.
pub(crate) struct SubscriptionStore {
    records: scc::HashMap<StreamId, EventOrderingBuffer>,
}

impl SubscriptionStore {
    pub(crate) fn new() -> Self {
        Self {
            records: scc::HashMap::new(),
        }
    }

    /// Register a stream, replacing (and shutting down) any previous record.
    pub(crate) fn insert(&self, stream: StreamId, buffer: EventOrderingBuffer) {
        if let Some((_, old)) = self.records.remove_sync(&stream) {
            old.shutdown();
        }
        if let Err((_, buffer)) = self.records.insert_sync(stream, buffer) {
            // Lost a race against a concurrent subscribe of the same stream.
            buffer.shutdown();
        }
    }

    /// Feed a frame to its stream's buffer.
    ///
    /// Returns `false` if the stream is not subscribed.
    pub(crate) fn route(&self, frame: EventFrame) -> bool {
        let stream = frame.stream.clone();
        self.records
            .update_sync(&stream, move |_, buffer| buffer.push(frame))
            .is_some()
    }

    /// Last delivered version of a stream.
    pub(crate) fn last_delivered(&self, stream: &StreamId) -> Option<u64> {
        self.records
            .update_sync(stream, |_, buffer| buffer.present_version())
    }

    /// Resume offsets (`last delivered + 1`) of every subscribed stream.
    pub(crate) fn resume_offsets(&self) -> Vec<(StreamId, u64)> {
        let mut offsets = Vec::new();
        self.records.retain_sync(|stream, buffer| {
            offsets.push((stream.clone(), buffer.present_version().saturating_add(1)));
            true
        });
        offsets
    }

    /// Drop a stream. Returns `false` if it was not subscribed.
    pub(crate) fn remove(&self, stream: &StreamId) -> bool {
        match self.records.remove_sync(stream) {
            Some((_, buffer)) => {
                buffer.shutdown();
                true
            }
            None => false,
        }
    }

    /// Drop every stream.
    pub(crate) fn clear(&self) {
        let mut streams = Vec::new();
        self.records.retain_sync(|stream, _| {
            streams.push(stream.clone());
            true
        });
        for stream in streams {
            self.remove(&stream);
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.records.len()
    }
}
