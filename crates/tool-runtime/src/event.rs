//! The session-level [`Event`] union fanned out to callers via
//! `EventStream<Event, TurnOutcome>` — a superset of the wire-level
//! [`crate::stream::StreamEvent`] with the bookkeeping events a caller
//! driving a long-lived [`crate::driver::TurnDriver`] needs (turn/agent
//! boundaries, compaction, loop-guard trips, retries) that have no
//! equivalent on the LLM wire.
//!
//! Every event carries a creation timestamp. `agent_end` is always the
//! terminal event — no further events follow it on the same stream.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::message::StopReason;

fn now_nanos() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    AgentStart {
        created_at_unix_nanos: u128,
    },
    AgentEnd {
        created_at_unix_nanos: u128,
        outcome: TurnOutcome,
    },
    TurnStart {
        created_at_unix_nanos: u128,
        turn: u64,
    },
    TurnEnd {
        created_at_unix_nanos: u128,
        turn: u64,
        stop_reason: StopReason,
    },
    MessageStart {
        created_at_unix_nanos: u128,
    },
    MessageEnd {
        created_at_unix_nanos: u128,
    },
    /// A streamed delta was folded into the partial assistant message. The
    /// growing content vector is rebuilt, never mutated in place.
    MessageUpdate {
        created_at_unix_nanos: u128,
        delta: MessageDeltaKind,
    },
    ToolCallDelta {
        created_at_unix_nanos: u128,
        index: usize,
        id: Option<String>,
        name: Option<String>,
        arguments_delta: String,
    },
    ToolExecutionStart {
        created_at_unix_nanos: u128,
        tool_call_id: String,
        tool_name: String,
    },
    ToolExecutionEnd {
        created_at_unix_nanos: u128,
        tool_call_id: String,
        tool_name: String,
        is_error: bool,
    },
    CompactionStart {
        created_at_unix_nanos: u128,
        trigger: CompactionTrigger,
    },
    CompactionEnd {
        created_at_unix_nanos: u128,
        trigger: CompactionTrigger,
        archived_messages: usize,
        error: Option<String>,
    },
    LoopGuardTriggered {
        created_at_unix_nanos: u128,
        reason: String,
    },
    Error {
        created_at_unix_nanos: u128,
        message: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompactionTrigger {
    PreLlmThreshold,
    ContextLimitRecovery,
}

impl CompactionTrigger {
    pub fn as_str(self) -> &'static str {
        match self {
            CompactionTrigger::PreLlmThreshold => "pre_llm_threshold",
            CompactionTrigger::ContextLimitRecovery => "context_limit_recovery",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessageDeltaKind {
    Text { text: String },
    Thinking { text: String },
    ToolCall { index: usize, arguments_delta: String },
}

impl Event {
    pub fn agent_start() -> Self {
        Event::AgentStart { created_at_unix_nanos: now_nanos() }
    }

    pub fn agent_end(outcome: TurnOutcome) -> Self {
        Event::AgentEnd { created_at_unix_nanos: now_nanos(), outcome }
    }

    pub fn turn_start(turn: u64) -> Self {
        Event::TurnStart { created_at_unix_nanos: now_nanos(), turn }
    }

    pub fn turn_end(turn: u64, stop_reason: StopReason) -> Self {
        Event::TurnEnd { created_at_unix_nanos: now_nanos(), turn, stop_reason }
    }

    pub fn message_start() -> Self {
        Event::MessageStart { created_at_unix_nanos: now_nanos() }
    }

    pub fn message_end() -> Self {
        Event::MessageEnd { created_at_unix_nanos: now_nanos() }
    }

    pub fn text_delta(text: impl Into<String>) -> Self {
        let text = text.into();
        Event::MessageUpdate {
            created_at_unix_nanos: now_nanos(),
            delta: MessageDeltaKind::Text { text },
        }
    }

    pub fn thinking_delta(text: impl Into<String>) -> Self {
        let text = text.into();
        Event::MessageUpdate {
            created_at_unix_nanos: now_nanos(),
            delta: MessageDeltaKind::Thinking { text },
        }
    }

    pub fn tool_call_delta(index: usize, id: Option<String>, name: Option<String>, arguments_delta: impl Into<String>) -> Self {
        Event::ToolCallDelta {
            created_at_unix_nanos: now_nanos(),
            index,
            id,
            name,
            arguments_delta: arguments_delta.into(),
        }
    }

    pub fn tool_execution_start(tool_call_id: impl Into<String>, tool_name: impl Into<String>) -> Self {
        Event::ToolExecutionStart {
            created_at_unix_nanos: now_nanos(),
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
        }
    }

    pub fn tool_execution_end(tool_call_id: impl Into<String>, tool_name: impl Into<String>, is_error: bool) -> Self {
        Event::ToolExecutionEnd {
            created_at_unix_nanos: now_nanos(),
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            is_error,
        }
    }

    pub fn compaction_start(trigger: CompactionTrigger) -> Self {
        Event::CompactionStart { created_at_unix_nanos: now_nanos(), trigger }
    }

    pub fn compaction_end(trigger: CompactionTrigger, archived_messages: usize, error: Option<String>) -> Self {
        Event::CompactionEnd {
            created_at_unix_nanos: now_nanos(),
            trigger,
            archived_messages,
            error,
        }
    }

    pub fn loop_guard_triggered(reason: impl Into<String>) -> Self {
        Event::LoopGuardTriggered { created_at_unix_nanos: now_nanos(), reason: reason.into() }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Event::Error { created_at_unix_nanos: now_nanos(), message: message.into() }
    }

    pub fn created_at_unix_nanos(&self) -> u128 {
        match self {
            Event::AgentStart { created_at_unix_nanos }
            | Event::AgentEnd { created_at_unix_nanos, .. }
            | Event::TurnStart { created_at_unix_nanos, .. }
            | Event::TurnEnd { created_at_unix_nanos, .. }
            | Event::MessageStart { created_at_unix_nanos }
            | Event::MessageEnd { created_at_unix_nanos }
            | Event::MessageUpdate { created_at_unix_nanos, .. }
            | Event::ToolCallDelta { created_at_unix_nanos, .. }
            | Event::ToolExecutionStart { created_at_unix_nanos, .. }
            | Event::ToolExecutionEnd { created_at_unix_nanos, .. }
            | Event::CompactionStart { created_at_unix_nanos, .. }
            | Event::CompactionEnd { created_at_unix_nanos, .. }
            | Event::LoopGuardTriggered { created_at_unix_nanos, .. }
            | Event::Error { created_at_unix_nanos, .. } => *created_at_unix_nanos,
        }
    }

    pub fn is_agent_end(&self) -> bool {
        matches!(self, Event::AgentEnd { .. })
    }
}

/// Why an `EventStream<Event, TurnOutcome>` completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TurnOutcome {
    Completed,
    Aborted,
    Failed,
}

