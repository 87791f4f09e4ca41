//! Derived metrics aggregated lazily from [`crate::trace::TraceBuf`].
//!
//! No parallel counters are maintained on the hot path — every subsystem
//! already records a [`crate::trace::TraceEvent`]; this module only
//! aggregates on read, caching the result until `TraceBuf`'s generation
//! counter moves.

use std::sync::{Arc, Mutex};

use crate::trace::{TraceBuf, TraceEvent};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsSnapshot {
    pub turns_total: u64,
    pub turn_duration_ms_total: u64,
    pub llm_calls_total: u64,
    pub llm_retries_total: u64,
    pub llm_errors_total: u64,
    pub input_tokens_total: u64,
    pub output_tokens_total: u64,
    pub tool_executions_total: u64,
    pub tool_errors_total: u64,
    pub tool_duration_ms_total: u64,
    pub compactions_total: u64,
    pub archived_messages_total: u64,
    pub loop_guard_triggers_total: u64,
    /// Count of events the session's outbound `EventStream` dropped because
    /// a consumer fell more than `max_capacity` behind — surfaced here
    /// rather than only logged, per the session's event-channel-drop
    /// handling policy.
    pub events_dropped_total: u64,
}

impl MetricsSnapshot {
    fn fold(&mut self, event: &TraceEvent) {
        match event {
            TraceEvent::Turn { duration_ms, .. } => {
                self.turns_total += 1;
                self.turn_duration_ms_total += duration_ms;
            }
            TraceEvent::LlmStream { attempt, duration_ms, input_tokens, output_tokens, is_error } => {
                self.llm_calls_total += 1;
                if *attempt > 0 {
                    self.llm_retries_total += 1;
                }
                if *is_error {
                    self.llm_errors_total += 1;
                }
                self.input_tokens_total += input_tokens;
                self.output_tokens_total += output_tokens;
                let _ = duration_ms;
            }
            TraceEvent::ToolExecution { duration_ms, is_error, .. } => {
                self.tool_executions_total += 1;
                self.tool_duration_ms_total += duration_ms;
                if *is_error {
                    self.tool_errors_total += 1;
                }
            }
            TraceEvent::Compaction { archived_messages, .. } => {
                self.compactions_total += 1;
                self.archived_messages_total += *archived_messages as u64;
            }
            TraceEvent::LoopGuardTriggered { .. } => {
                self.loop_guard_triggers_total += 1;
            }
            TraceEvent::EventDropped => {
                self.events_dropped_total += 1;
            }
        }
    }

    pub fn avg_tool_duration_ms(&self) -> f64 {
        if self.tool_executions_total == 0 {
            0.0
        } else {
            self.tool_duration_ms_total as f64 / self.tool_executions_total as f64
        }
    }
}

struct Cache {
    generation: u64,
    snapshot: MetricsSnapshot,
}

/// Reads and aggregates [`TraceBuf`] on demand, caching the result against
/// the buffer's generation counter so repeated reads between writes are
/// free.
pub struct Metrics {
    trace: Arc<TraceBuf>,
    cache: Mutex<Option<Cache>>,
}

impl Metrics {
    pub fn new(trace: Arc<TraceBuf>) -> Self {
        Self { trace, cache: Mutex::new(None) }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let current_gen = self.trace.generation();
        let mut cache = self.cache.lock().unwrap();
        if let Some(cached) = cache.as_ref() {
            if cached.generation == current_gen {
                return cached.snapshot.clone();
            }
        }

        let mut snapshot = MetricsSnapshot::default();
        for event in self.trace.snapshot() {
            snapshot.fold(&event);
        }

        *cache = Some(Cache { generation: current_gen, snapshot: snapshot.clone() });
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::NoopSink;

    #[test]
    fn aggregates_across_event_kinds() {
        let trace = Arc::new(TraceBuf::new(Arc::new(NoopSink)));
        trace.record(TraceEvent::Turn { turn: 1, duration_ms: 10 });
        trace.record(TraceEvent::ToolExecution {
            tool_name: "bash".to_string(),
            attempt: 0,
            duration_ms: 20,
            is_error: false,
        });
        trace.record(TraceEvent::ToolExecution {
            tool_name: "bash".to_string(),
            attempt: 1,
            duration_ms: 5,
            is_error: true,
        });
        trace.record(TraceEvent::LlmStream {
            attempt: 1,
            duration_ms: 50,
            input_tokens: 100,
            output_tokens: 20,
            is_error: false,
        });

        let metrics = Metrics::new(trace);
        let snap = metrics.snapshot();
        assert_eq!(snap.turns_total, 1);
        assert_eq!(snap.tool_executions_total, 2);
        assert_eq!(snap.tool_errors_total, 1);
        assert_eq!(snap.llm_retries_total, 1);
        assert_eq!(snap.input_tokens_total, 100);
        assert_eq!(snap.avg_tool_duration_ms(), 12.5);
    }

    #[test]
    fn events_dropped_is_folded_from_recorded_drop_events() {
        let trace = Arc::new(TraceBuf::new(Arc::new(NoopSink)));
        let metrics = Metrics::new(trace.clone());
        assert_eq!(metrics.snapshot().events_dropped_total, 0);

        trace.record(TraceEvent::EventDropped);
        trace.record(TraceEvent::EventDropped);
        assert_eq!(metrics.snapshot().events_dropped_total, 2);
    }
}
