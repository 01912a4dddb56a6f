//! Version-sequenced event ordering.
//!
//! An [`EventOrderingBuffer`] turns frames that may arrive reordered or
//! duplicated into a strictly increasing, gapless delivery sequence. Frames
//! that arrive early are held back; if the missing frame does not show up
//! within the gap lifetime, the buffer flags probable loss and asks for a
//! resync from the first missing version.
//!
//! Invariant: every version `<= present_version()` has been delivered exactly
//! once, in increasing order, with no value skipped.

use std::{
    collections::BTreeMap,
    sync::{Arc, Weak},
    time::Duration,
};

use parking_lot::Mutex;
use tokio::{runtime::Handle, sync::mpsc, task::JoinHandle};
use tracing::{Span, debug, warn};

use crate::types::EventFrame;

/// Callback invoked with the expected next version when loss is suspected.
pub type ResyncCallback = Arc<dyn Fn(u64) + Send + Sync>;

/// Reorders versioned frames of one stream.
pub struct EventOrderingBuffer {
    inner: Arc<Inner>,
}

struct Inner {
    state: Mutex<State>,
    deliver: mpsc::UnboundedSender<EventFrame>,
    resync: ResyncCallback,
    gap_lifetime: Duration,
    span: Span,
}

struct State {
    present: u64,
    buffer: BTreeMap<u64, EventFrame>,
    loss_suspected: bool,
    timer: Option<GapTimer>,
    timer_generation: u64,
    shut_down: bool,
}

struct GapTimer {
    anchor: u64,
    generation: u64,
    handle: JoinHandle<()>,
}

impl EventOrderingBuffer {
    /// Create a buffer whose last delivered version is `present_version`.
    ///
    /// Frames are delivered on `deliver` in version order.
    pub fn new(
        present_version: u64,
        gap_lifetime: Duration,
        deliver: mpsc::UnboundedSender<EventFrame>,
        resync: ResyncCallback,
        span: Span,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    present: present_version,
                    buffer: BTreeMap::new(),
                    loss_suspected: false,
                    timer: None,
                    timer_generation: 0,
                    shut_down: false,
                }),
                deliver,
                resync,
                gap_lifetime,
                span,
            }),
        }
    }

    /// Feed one frame.
    pub fn push(&self, frame: EventFrame) {
        let inner = &self.inner;
        let mut state = inner.state.lock();
        if state.shut_down {
            return;
        }

        let version = frame.version;
        if version <= state.present {
            debug!(parent: &inner.span, version, present = state.present, "Dropping duplicate frame");
            return;
        }

        if version == state.present + 1 {
            inner.deliver(frame);
            state.present = version;
            loop {
                let Some(next) = state.present.checked_add(1) else {
                    break;
                };
                let Some(frame) = state.buffer.remove(&next) else {
                    break;
                };
                inner.deliver(frame);
                state.present = next;
            }
            state.loss_suspected = false;

            if state
                .timer
                .as_ref()
                .is_some_and(|timer| timer.anchor <= state.present)
            {
                cancel_timer(&mut state);
            }
            if state.timer.is_none()
                && let Some(&oldest) = state.buffer.keys().next()
            {
                Inner::arm_timer(inner, &mut state, oldest);
            }
            return;
        }

        if state.buffer.contains_key(&version) {
            debug!(parent: &inner.span, version, "Dropping duplicate buffered frame");
            return;
        }
        debug!(parent: &inner.span, version, present = state.present, "Buffering early frame");
        state.buffer.insert(version, frame);

        if state.timer.is_none()
            && let Some(&oldest) = state.buffer.keys().next()
        {
            Inner::arm_timer(inner, &mut state, oldest);
        }
    }

    /// Last delivered version.
    pub fn present_version(&self) -> u64 {
        self.inner.state.lock().present
    }

    /// Number of frames held back waiting for a gap to close.
    pub fn buffered_len(&self) -> usize {
        self.inner.state.lock().buffer.len()
    }

    /// Whether a gap outlived its lifetime since the last in-order delivery.
    pub fn is_loss_suspected(&self) -> bool {
        self.inner.state.lock().loss_suspected
    }

    /// Cancel the gap timer and drop buffered frames. Later pushes are ignored.
    pub fn shutdown(&self) {
        let mut state = self.inner.state.lock();
        state.shut_down = true;
        state.buffer.clear();
        cancel_timer(&mut state);
    }
}

impl Inner {
    fn deliver(&self, frame: EventFrame) {
        // Receiver dropped means nobody listens anymore; the cursor still moves.
        let _ = self.deliver.send(frame);
    }

    fn arm_timer(this: &Arc<Self>, state: &mut State, anchor: u64) {
        let Ok(runtime) = Handle::try_current() else {
            warn!(parent: &this.span, "No runtime available; gap timer not started");
            return;
        };

        state.timer_generation += 1;
        let generation = state.timer_generation;
        let weak: Weak<Self> = Arc::downgrade(this);
        let lifetime = this.gap_lifetime;

        let handle = runtime.spawn(async move {
            tokio::time::sleep(lifetime).await;
            if let Some(inner) = weak.upgrade() {
                Inner::on_gap_expired(&inner, generation);
            }
        });
        state.timer = Some(GapTimer {
            anchor,
            generation,
            handle,
        });
    }

    fn on_gap_expired(this: &Arc<Self>, generation: u64) {
        let expected = {
            let mut state = this.state.lock();
            let Some(timer) = state.timer.take_if(|timer| timer.generation == generation) else {
                return;
            };
            if state.shut_down {
                return;
            }

            // One resync per stall episode; the flag clears on in-order delivery.
            let expected = if state.present < timer.anchor && !state.loss_suspected {
                state.loss_suspected = true;
                Some(state.present.saturating_add(1))
            } else {
                None
            };
            if let Some(&oldest) = state.buffer.keys().next() {
                Inner::arm_timer(this, &mut state, oldest);
            }
            expected
        };

        if let Some(expected) = expected {
            warn!(parent: &this.span, expected, "Gap outlived its lifetime; requesting resync");
            (this.resync)(expected);
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        cancel_timer(self.state.get_mut());
    }
}

fn cancel_timer(state: &mut State) {
    if let Some(timer) = state.timer.take() {
        timer.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use rand::seq::SliceRandom;
    use serde_json::Value;
    use tokio::time::Instant;

    use super::*;

    struct Harness {
        buffer: EventOrderingBuffer,
        rx: mpsc::UnboundedReceiver<EventFrame>,
        resyncs: Arc<Mutex<Vec<(u64, Duration)>>>,
    }

    impl Harness {
        fn new(present: u64) -> Self {
            let (tx, rx) = mpsc::unbounded_channel();
            let resyncs = Arc::new(Mutex::new(Vec::new()));
            let sink = Arc::clone(&resyncs);
            let start = Instant::now();
            let buffer = EventOrderingBuffer::new(
                present,
                Duration::from_millis(1000),
                tx,
                Arc::new(move |expected: u64| sink.lock().push((expected, start.elapsed()))),
                Span::none(),
            );
            Self {
                buffer,
                rx,
                resyncs,
            }
        }

        fn push(&self, version: u64) {
            self.buffer
                .push(EventFrame::new("stream", version, Value::from(version)));
        }

        fn delivered(&mut self) -> Vec<u64> {
            let mut versions = Vec::new();
            while let Ok(frame) = self.rx.try_recv() {
                versions.push(frame.version);
            }
            versions
        }
    }

    #[tokio::test]
    async fn test_in_order_delivery() {
        let mut h = Harness::new(0);
        for v in 1..=3 {
            h.push(v);
        }
        assert_eq!(h.delivered(), vec![1, 2, 3]);
        assert_eq!(h.buffer.present_version(), 3);
    }

    #[tokio::test]
    async fn test_gap_then_cascade() {
        let mut h = Harness::new(5);
        h.push(7);
        h.push(8);
        assert!(h.delivered().is_empty());
        assert_eq!(h.buffer.buffered_len(), 2);

        h.push(6);
        assert_eq!(h.delivered(), vec![6, 7, 8]);
        assert_eq!(h.buffer.buffered_len(), 0);
        assert_eq!(h.buffer.present_version(), 8);
    }

    #[tokio::test]
    async fn test_duplicates_are_dropped() {
        let mut h = Harness::new(0);
        h.push(1);
        h.push(1);
        h.push(3);
        h.push(3);
        h.push(2);
        h.push(2);
        h.push(3);
        assert_eq!(h.delivered(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_shuffled_arrivals_deliver_in_order() {
        for _ in 0..20 {
            let mut h = Harness::new(10);
            let mut arrivals: Vec<u64> = (11..=60).chain(15..=25).chain(1..=10).collect();
            arrivals.shuffle(&mut rand::rng());
            for v in arrivals {
                h.push(v);
            }
            assert_eq!(h.delivered(), (11..=60).collect::<Vec<_>>());
            assert_eq!(h.buffer.buffered_len(), 0);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_gap_triggers_one_resync_per_episode() {
        let mut h = Harness::new(5);
        h.push(7);

        tokio::time::sleep(Duration::from_millis(999)).await;
        assert!(h.resyncs.lock().is_empty());
        assert!(!h.buffer.is_loss_suspected());

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(*h.resyncs.lock(), vec![(6, Duration::from_millis(1000))]);
        assert!(h.buffer.is_loss_suspected());

        // Same stall: the timer keeps running but stays quiet.
        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(h.resyncs.lock().len(), 1);
        assert!(h.buffer.is_loss_suspected());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(h.resyncs.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_episode_after_in_order_push() {
        let mut h = Harness::new(5);
        h.push(7);
        h.push(9);

        tokio::time::sleep(Duration::from_millis(1001)).await;
        assert_eq!(*h.resyncs.lock(), vec![(6, Duration::from_millis(1000))]);

        // 6 closes the first gap and clears the flag; 8 is still missing.
        tokio::time::sleep(Duration::from_millis(199)).await;
        h.push(6);
        assert_eq!(h.delivered(), vec![6, 7]);
        assert!(!h.buffer.is_loss_suspected());

        tokio::time::sleep(Duration::from_millis(1001)).await;
        assert_eq!(
            *h.resyncs.lock(),
            vec![(6, Duration::from_millis(1000)), (8, Duration::from_millis(2200))]
        );
        assert!(h.buffer.is_loss_suspected());

        h.push(8);
        assert_eq!(h.delivered(), vec![8, 9]);
        assert!(!h.buffer.is_loss_suspected());
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(h.resyncs.lock().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_rearms_for_new_gap() {
        let mut h = Harness::new(0);
        h.push(2);
        h.push(5);

        tokio::time::sleep(Duration::from_millis(600)).await;
        h.push(1);
        assert_eq!(h.delivered(), vec![1, 2]);

        // The first timer was anchored at 2 and is gone; the new one runs
        // from the moment 2 was delivered.
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(h.resyncs.lock().is_empty());

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(*h.resyncs.lock(), vec![(3, Duration::from_millis(1600))]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_timer() {
        let mut h = Harness::new(0);
        h.push(3);
        h.buffer.shutdown();
        h.push(1);

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(h.resyncs.lock().is_empty());
        assert!(h.delivered().is_empty());
        assert_eq!(h.buffer.buffered_len(), 0);
    }
}
