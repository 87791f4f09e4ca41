//! Detects a model stuck in a tool-call loop along two independent
//! dimensions: the same call shape repeated back-to-back, and a single tool
//! name called too many times over the life of the turn. Nothing upstream
//! does this (the legacy `AgenticLoop` only bounds total iterations, not
//! repetition of a single call shape).
//!
//! Signatures are `sha256(tool_name + canonical_json(input))`.
//! `serde_json::Value`'s default `Object` map is a `BTreeMap` (this
//! workspace does not enable serde_json's `preserve_order` feature), so
//! `to_string()` already emits object keys in a stable, sorted order —
//! no separate canonicalization pass is needed.
//!
//! Either dimension can be disabled independently by configuring a negative
//! threshold, matching [`crate::loop_config::LoopConfig`]'s
//! `max_consecutive_tool_calls`/`max_tool_calls_per_name` fields. A `0`
//! threshold means "use the stated default" rather than "trip immediately" —
//! `LoopGuard::new` normalizes `0` to [`DEFAULT_MAX_CONSECUTIVE`]/
//! [`DEFAULT_MAX_PER_NAME`] before storing it.

use std::collections::HashMap;

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Default `max_consecutive` applied when the configured value is `0`.
pub const DEFAULT_MAX_CONSECUTIVE: i64 = 6;
/// Default `max_per_name` applied when the configured value is `0`.
pub const DEFAULT_MAX_PER_NAME: i64 = 60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopGuardOutcome {
    Ok,
    Tripped { signature: String, reason: TripReason },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TripReason {
    ConsecutiveRepeat { repeat_count: u32 },
    TotalPerName { tool_name_count: u32 },
}

pub struct LoopGuard {
    max_consecutive: i64,
    max_per_name: i64,
    last_signature: Option<String>,
    consecutive_count: u32,
    per_name_totals: HashMap<String, u32>,
}

impl LoopGuard {
    /// `0` for either threshold means "use the stated default"
    /// ([`DEFAULT_MAX_CONSECUTIVE`]/[`DEFAULT_MAX_PER_NAME`]); a negative
    /// value disables that dimension; a positive value is used as-is.
    pub fn new(max_consecutive: i64, max_per_name: i64) -> Self {
        Self {
            max_consecutive: if max_consecutive == 0 { DEFAULT_MAX_CONSECUTIVE } else { max_consecutive },
            max_per_name: if max_per_name == 0 { DEFAULT_MAX_PER_NAME } else { max_per_name },
            last_signature: None,
            consecutive_count: 0,
            per_name_totals: HashMap::new(),
        }
    }

    pub fn signature(name: &str, input: &Value) -> String {
        let mut hasher = Sha256::new();
        hasher.update(name.as_bytes());
        hasher.update(b"\0");
        hasher.update(input.to_string().as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Records one tool call observation and reports whether either trip
    /// dimension has fired. The consecutive-repeat streak is always
    /// tracked (and reset on a different call shape) even when that
    /// dimension is disabled, so re-enabling it mid-session behaves
    /// predictably; the per-name total only accumulates, never resets.
    pub fn observe(&mut self, name: &str, input: &Value) -> LoopGuardOutcome {
        let sig = Self::signature(name, input);

        if self.last_signature.as_deref() == Some(sig.as_str()) {
            self.consecutive_count += 1;
        } else {
            self.last_signature = Some(sig.clone());
            self.consecutive_count = 1;
        }

        let total = self.per_name_totals.entry(name.to_string()).or_insert(0);
        *total += 1;
        let tool_name_count = *total;

        if self.max_consecutive >= 0 && self.consecutive_count as i64 > self.max_consecutive {
            return LoopGuardOutcome::Tripped {
                signature: sig,
                reason: TripReason::ConsecutiveRepeat { repeat_count: self.consecutive_count },
            };
        }

        if self.max_per_name >= 0 && tool_name_count as i64 > self.max_per_name {
            return LoopGuardOutcome::Tripped { signature: sig, reason: TripReason::TotalPerName { tool_name_count } };
        }

        LoopGuardOutcome::Ok
    }

    pub fn reset(&mut self) {
        self.last_signature = None;
        self.consecutive_count = 0;
        self.per_name_totals.clear();
    }
}

/// The message surfaced on [`crate::event::Event::LoopGuardTriggered`] when
/// this guard trips.
pub fn trip_message(tool_name: &str, reason: TripReason) -> String {
    match reason {
        TripReason::ConsecutiveRepeat { repeat_count } => format!(
            "[Loop guard] Stopped repeated tool execution: '{tool_name}' called with identical \
             arguments {repeat_count} times in a row"
        ),
        TripReason::TotalPerName { tool_name_count } => format!(
            "[Loop guard] Stopped repeated tool execution: '{tool_name}' called {tool_name_count} \
             times this turn"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_is_stable_regardless_of_value_construction_order() {
        let a = serde_json::json!({"b": 1, "a": 2});
        let b = serde_json::json!({"a": 2, "b": 1});
        assert_eq!(LoopGuard::signature("t", &a), LoopGuard::signature("t", &b));
    }

    #[test]
    fn different_tool_names_produce_different_signatures() {
        let input = serde_json::json!({"x": 1});
        assert_ne!(LoopGuard::signature("a", &input), LoopGuard::signature("b", &input));
    }

    #[test]
    fn trips_exactly_at_max_consecutive_plus_one() {
        let mut guard = LoopGuard::new(2, -1);
        let input = serde_json::json!({"command": "ls"});
        assert_eq!(guard.observe("bash_execute", &input), LoopGuardOutcome::Ok); // 1
        assert_eq!(guard.observe("bash_execute", &input), LoopGuardOutcome::Ok); // 2
        match guard.observe("bash_execute", &input) {
            LoopGuardOutcome::Tripped { reason: TripReason::ConsecutiveRepeat { repeat_count }, .. } => {
                assert_eq!(repeat_count, 3)
            }
            other => panic!("expected consecutive trip at repeat 3, got {other:?}"),
        }
    }

    #[test]
    fn different_call_resets_the_streak() {
        let mut guard = LoopGuard::new(1, -1);
        let a = serde_json::json!({"command": "ls"});
        let b = serde_json::json!({"command": "pwd"});
        assert_eq!(guard.observe("bash_execute", &a), LoopGuardOutcome::Ok);
        assert_eq!(guard.observe("bash_execute", &b), LoopGuardOutcome::Ok); // streak resets
        assert_eq!(guard.observe("bash_execute", &b), LoopGuardOutcome::Ok); // 2nd b, still within budget
        assert!(matches!(
            guard.observe("bash_execute", &b),
            LoopGuardOutcome::Tripped { reason: TripReason::ConsecutiveRepeat { .. }, .. }
        ));
    }

    #[test]
    fn total_per_name_trips_even_across_varied_arguments() {
        let mut guard = LoopGuard::new(-1, 2);
        for i in 0..2 {
            let input = serde_json::json!({"command": format!("ls {i}")});
            assert_eq!(guard.observe("bash_execute", &input), LoopGuardOutcome::Ok);
        }
        let input = serde_json::json!({"command": "ls 2"});
        match guard.observe("bash_execute", &input) {
            LoopGuardOutcome::Tripped { reason: TripReason::TotalPerName { tool_name_count }, .. } => {
                assert_eq!(tool_name_count, 3)
            }
            other => panic!("expected total-per-name trip, got {other:?}"),
        }
    }

    #[test]
    fn negative_threshold_disables_that_dimension() {
        let mut guard = LoopGuard::new(-1, -1);
        let input = serde_json::json!({"command": "ls"});
        for _ in 0..100 {
            assert_eq!(guard.observe("bash_execute", &input), LoopGuardOutcome::Ok);
        }
    }

    #[test]
    fn zero_threshold_means_use_the_stated_default_not_trip_immediately() {
        let mut guard = LoopGuard::new(0, -1);
        let input = serde_json::json!({"command": "ls"});
        // Default max_consecutive is 6: calls 1..=6 are fine, 7th trips.
        for _ in 0..DEFAULT_MAX_CONSECUTIVE {
            assert_eq!(guard.observe("bash_execute", &input), LoopGuardOutcome::Ok);
        }
        assert!(matches!(
            guard.observe("bash_execute", &input),
            LoopGuardOutcome::Tripped { reason: TripReason::ConsecutiveRepeat { .. }, .. }
        ));

        let mut guard = LoopGuard::new(-1, 0);
        for i in 0..DEFAULT_MAX_PER_NAME {
            let input = serde_json::json!({"command": format!("ls {i}")});
            assert_eq!(guard.observe("bash_execute", &input), LoopGuardOutcome::Ok);
        }
        let input = serde_json::json!({"command": "ls last"});
        assert!(matches!(
            guard.observe("bash_execute", &input),
            LoopGuardOutcome::Tripped { reason: TripReason::TotalPerName { .. }, .. }
        ));
    }

    #[test]
    fn reset_clears_both_dimensions() {
        let mut guard = LoopGuard::new(1, 1);
        let input = serde_json::json!({"command": "ls"});
        assert_eq!(guard.observe("bash_execute", &input), LoopGuardOutcome::Ok);
        guard.reset();
        assert_eq!(guard.observe("bash_execute", &input), LoopGuardOutcome::Ok);
    }
}
