//! Ring-buffered trace events with periodic flush to a pluggable sink.
//!
//! [`TraceBuf`] is the one intentional piece of process-wide-feeling shared
//! state in this crate: every subsystem records structured, numeric-field
//! events here instead of maintaining its own parallel counters, and
//! [`crate::metrics::Metrics`] aggregates lazily on read rather than paying
//! for bookkeeping on every hot-path call. A single atomic generation
//! counter is bumped on every [`TraceBuf::record`], which is exactly the
//! invalidation signal `Metrics` needs to know its cache is stale.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::trace;

/// Default ring capacity before the oldest retained event is dropped.
/// Four times the flush threshold gives `Metrics` a window wider than a
/// single flush interval to aggregate over.
const DEFAULT_RING_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub enum TraceEvent {
    Turn { turn: u64, duration_ms: u64 },
    LlmStream { attempt: u32, duration_ms: u64, input_tokens: u64, output_tokens: u64, is_error: bool },
    ToolExecution { tool_name: String, attempt: u32, duration_ms: u64, is_error: bool },
    Compaction { trigger: &'static str, archived_messages: usize },
    LoopGuardTriggered { tool_name: String },
    EventDropped,
}

/// External export target for flushed trace batches. Production callers
/// might wire this to a log sink or a metrics exporter; the default no-ops,
/// and tests use a `Mutex<Vec<TraceEvent>>`-backed sink to assert on what
/// was flushed.
pub trait TraceSink: Send + Sync {
    fn flush(&self, events: &[TraceEvent]);
}

pub struct NoopSink;

impl TraceSink for NoopSink {
    fn flush(&self, _events: &[TraceEvent]) {}
}

struct Ring {
    events: VecDeque<TraceEvent>,
    capacity: usize,
    dropped: u64,
}

pub struct TraceBuf {
    ring: Mutex<Ring>,
    generation: AtomicU64,
    flush_threshold: usize,
    flush_interval: Duration,
    last_flush: Mutex<Instant>,
    sink: Arc<dyn TraceSink>,
}

impl TraceBuf {
    pub fn new(sink: Arc<dyn TraceSink>) -> Self {
        Self::with_config(sink, DEFAULT_RING_CAPACITY, 256, Duration::from_secs(1))
    }

    pub fn with_config(
        sink: Arc<dyn TraceSink>,
        ring_capacity: usize,
        flush_threshold: usize,
        flush_interval: Duration,
    ) -> Self {
        Self {
            ring: Mutex::new(Ring {
                events: VecDeque::with_capacity(ring_capacity.min(4096)),
                capacity: ring_capacity.max(1),
                dropped: 0,
            }),
            generation: AtomicU64::new(0),
            flush_threshold: flush_threshold.max(1),
            flush_interval,
            last_flush: Mutex::new(Instant::now()),
            sink,
        }
    }

    /// Appends one event and bumps the invalidation generation. Flushes
    /// immediately if the ring has grown past the flush threshold; callers
    /// driving a periodic tick should also call [`TraceBuf::tick`] so a
    /// slow trickle of events still gets exported on `flush_interval`.
    pub fn record(&self, event: TraceEvent) {
        let should_flush = {
            let mut ring = self.ring.lock().unwrap();
            if ring.events.len() >= ring.capacity {
                ring.events.pop_front();
                ring.dropped += 1;
            }
            ring.events.push_back(event);
            ring.events.len() >= self.flush_threshold
        };
        self.generation.fetch_add(1, Ordering::AcqRel);
        if should_flush {
            self.flush();
        }
    }

    /// Called on a ~200ms tick by the owning session loop; flushes if
    /// `flush_interval` has elapsed since the last flush.
    pub fn tick(&self) {
        let elapsed = self.last_flush.lock().unwrap().elapsed();
        if elapsed >= self.flush_interval {
            self.flush();
        }
    }

    pub fn flush(&self) {
        let snapshot: Vec<TraceEvent> = {
            let ring = self.ring.lock().unwrap();
            ring.events.iter().cloned().collect()
        };
        if !snapshot.is_empty() {
            trace!(count = snapshot.len(), "flushing trace events");
            self.sink.flush(&snapshot);
        }
        *self.last_flush.lock().unwrap() = Instant::now();
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn dropped_count(&self) -> u64 {
        self.ring.lock().unwrap().dropped
    }

    /// Snapshot of currently retained events, oldest first. Used by
    /// [`crate::metrics::Metrics`] to recompute an aggregate on cache miss.
    pub fn snapshot(&self) -> Vec<TraceEvent> {
        self.ring.lock().unwrap().events.iter().cloned().collect()
    }
}

impl Default for TraceBuf {
    fn default() -> Self {
        Self::new(Arc::new(NoopSink))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct VecSink(Mutex<Vec<TraceEvent>>);

    impl TraceSink for VecSink {
        fn flush(&self, events: &[TraceEvent]) {
            self.0.lock().unwrap().extend_from_slice(events);
        }
    }

    #[test]
    fn record_bumps_generation() {
        let buf = TraceBuf::default();
        let g0 = buf.generation();
        buf.record(TraceEvent::EventDropped);
        assert!(buf.generation() > g0);
    }

    #[test]
    fn flushes_automatically_past_threshold() {
        let sink = Arc::new(VecSink::default());
        let buf = TraceBuf::with_config(sink.clone(), 1024, 4, Duration::from_secs(999));
        for _ in 0..4 {
            buf.record(TraceEvent::EventDropped);
        }
        assert_eq!(sink.0.lock().unwrap().len(), 4);
    }

    #[test]
    fn ring_drops_oldest_past_capacity_and_counts_it() {
        let buf = TraceBuf::with_config(Arc::new(NoopSink), 2, 1000, Duration::from_secs(999));
        buf.record(TraceEvent::Turn { turn: 1, duration_ms: 1 });
        buf.record(TraceEvent::Turn { turn: 2, duration_ms: 1 });
        buf.record(TraceEvent::Turn { turn: 3, duration_ms: 1 });
        assert_eq!(buf.dropped_count(), 1);
        assert_eq!(buf.snapshot().len(), 2);
    }

    #[test]
    fn tick_flushes_only_after_interval_elapses() {
        let sink = Arc::new(VecSink::default());
        let buf = TraceBuf::with_config(sink.clone(), 1024, 1000, Duration::from_millis(1));
        buf.record(TraceEvent::EventDropped);
        std::thread::sleep(Duration::from_millis(5));
        buf.tick();
        assert_eq!(sink.0.lock().unwrap().len(), 1);
    }
}
