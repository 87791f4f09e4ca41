//! A single-producer, multi-consumer event bus with an explicit completion
//! marker, generalized from the `tokio::sync::mpsc`-based event plumbing in
//! the legacy `runtime.rs::run_streaming` (which sent `StreamEvent`s over a
//! plain mpsc channel with no way to tell "no more events are coming" apart
//! from "the sender was dropped").
//!
//! `EventStream<T, R>` keeps a bounded backlog that doubles in capacity as it
//! fills, up to `max_capacity`; past that point it drops the oldest entry and
//! counts the drop. Completion is signaled by calling [`EventStream::complete`]
//! with a reason `R` — this is a distinct, explicit event from a consumer
//! simply stopping polling (dropping an [`EventReceiver`] never affects the
//! producer or other consumers).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use tracing::warn;

struct Inner<T, R> {
    backlog: Mutex<VecDeque<T>>,
    base_seq: AtomicUsize,
    capacity: AtomicUsize,
    max_capacity: usize,
    completed: Mutex<Option<R>>,
    notify: Notify,
    dropped: AtomicU64,
}

/// The producer-side handle. Cloning it does not create a second producer in
/// the logical sense — callers should keep exactly one in the driver loop —
/// but the handle is `Clone` so it can be moved into a spawned task alongside
/// its receivers.
pub struct EventStream<T, R> {
    inner: Arc<Inner<T, R>>,
}

impl<T, R> Clone for EventStream<T, R> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<T, R: Clone> EventStream<T, R> {
    pub fn new(initial_capacity: usize, max_capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                backlog: Mutex::new(VecDeque::with_capacity(initial_capacity.max(1))),
                base_seq: AtomicUsize::new(0),
                capacity: AtomicUsize::new(initial_capacity.max(1)),
                max_capacity: max_capacity.max(initial_capacity.max(1)),
                completed: Mutex::new(None),
                notify: Notify::new(),
                dropped: AtomicU64::new(0),
            }),
        }
    }

    /// Appends an event, growing the backlog capacity (doubling) until
    /// `max_capacity` is reached, after which the oldest entry is dropped to
    /// make room and the drop is counted.
    pub fn push(&self, event: T) {
        {
            let mut backlog = self.inner.backlog.lock().unwrap();
            let cap = self.inner.capacity.load(Ordering::Relaxed);
            if backlog.len() >= cap {
                let doubled = cap.saturating_mul(2);
                if doubled <= self.inner.max_capacity {
                    self.inner.capacity.store(doubled, Ordering::Relaxed);
                } else if backlog.len() >= self.inner.max_capacity {
                    backlog.pop_front();
                    self.inner.base_seq.fetch_add(1, Ordering::Relaxed);
                    let total = self.inner.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                    warn!(total_dropped = total, "event backlog full, dropping oldest event");
                }
            }
            backlog.push_back(event);
        }
        self.inner.notify.notify_waiters();
    }

    /// Marks the stream complete. Idempotent after the first call.
    pub fn complete(&self, reason: R) {
        let mut completed = self.inner.completed.lock().unwrap();
        if completed.is_none() {
            *completed = Some(reason);
        }
        drop(completed);
        self.inner.notify.notify_waiters();
    }

    pub fn is_complete(&self) -> bool {
        self.inner.completed.lock().unwrap().is_some()
    }

    pub fn completion_reason(&self) -> Option<R> {
        self.inner.completed.lock().unwrap().clone()
    }

    pub fn dropped_count(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    /// Creates a new consumer starting from the current tail of the backlog
    /// (it will not re-read events already pushed before this call).
    pub fn subscribe(&self) -> EventReceiver<T, R> {
        let cursor = self.inner.base_seq.load(Ordering::Relaxed)
            + self.inner.backlog.lock().unwrap().len();
        EventReceiver {
            inner: self.inner.clone(),
            cursor,
        }
    }
}

impl<T: Clone, R: Clone> EventStream<T, R> {
    /// Creates a consumer that replays the full retained backlog first.
    pub fn subscribe_from_start(&self) -> EventReceiver<T, R> {
        let cursor = self.inner.base_seq.load(Ordering::Relaxed);
        EventReceiver {
            inner: self.inner.clone(),
            cursor,
        }
    }
}

pub struct EventReceiver<T, R> {
    inner: Arc<Inner<T, R>>,
    cursor: usize,
}

impl<T: Clone, R: Clone> EventReceiver<T, R> {
    /// Waits for and returns the next event, or `None` once the stream is
    /// complete and fully drained. Cancellation-safe: dropping the future
    /// returned by this call (e.g. inside `tokio::select!`) loses no events —
    /// the cursor only advances once an event is actually returned.
    pub async fn recv(&mut self) -> Option<T> {
        loop {
            let notified = self.inner.notify.notified();
            {
                let base = self.inner.base_seq.load(Ordering::Relaxed);
                let backlog = self.inner.backlog.lock().unwrap();
                if self.cursor < base {
                    self.cursor = base; // we lagged past dropped entries
                }
                let offset = self.cursor - base;
                if offset < backlog.len() {
                    let event = backlog[offset].clone();
                    self.cursor += 1;
                    return Some(event);
                }
                if self.inner.completed.lock().unwrap().is_some() {
                    return None;
                }
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn consumer_receives_events_in_order() {
        let stream: EventStream<i32, &'static str> = EventStream::new(2, 16);
        let mut rx = stream.subscribe();
        stream.push(1);
        stream.push(2);
        assert_eq!(rx.recv().await, Some(1));
        assert_eq!(rx.recv().await, Some(2));
    }

    #[tokio::test]
    async fn completion_is_a_distinct_terminal_signal() {
        let stream: EventStream<i32, &'static str> = EventStream::new(2, 16);
        let mut rx = stream.subscribe();
        stream.push(1);
        stream.complete("done");
        assert_eq!(rx.recv().await, Some(1));
        assert_eq!(rx.recv().await, None);
        assert_eq!(stream.completion_reason(), Some("done"));
    }

    #[tokio::test]
    async fn backlog_doubles_before_dropping() {
        let stream: EventStream<i32, &'static str> = EventStream::new(1, 4);
        for i in 0..4 {
            stream.push(i);
        }
        assert_eq!(stream.dropped_count(), 0);
        stream.push(4);
        assert_eq!(stream.dropped_count(), 1);
    }

    #[tokio::test]
    async fn multiple_consumers_each_see_all_events() {
        let stream: EventStream<i32, &'static str> = EventStream::new(4, 16);
        let mut a = stream.subscribe();
        let mut b = stream.subscribe();
        stream.push(10);
        stream.complete("end");
        assert_eq!(a.recv().await, Some(10));
        assert_eq!(b.recv().await, Some(10));
        assert_eq!(a.recv().await, None);
        assert_eq!(b.recv().await, None);
    }

    #[tokio::test]
    async fn dropping_a_receiver_does_not_affect_others() {
        let stream: EventStream<i32, &'static str> = EventStream::new(4, 16);
        let rx_a = stream.subscribe();
        let mut rx_b = stream.subscribe();
        drop(rx_a);
        stream.push(1);
        stream.complete("end");
        assert_eq!(rx_b.recv().await, Some(1));
    }
}
