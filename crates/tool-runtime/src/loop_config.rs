//! [`LoopConfig`]: the turn driver's immutable-per-session contract. Bundles
//! everything [`crate::driver::TurnDriver`] needs that isn't itself part of
//! [`crate::agent_context::AgentContext`] — the provider handle, output
//! limits, compaction/summarization policy, retry budgets and the
//! loop-guard thresholds.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::compactor::Compactor;
use crate::executor::ExecutorPool;
use crate::limiter::ToolOutputLimits;

/// How much of the model's "thinking" the caller wants surfaced as
/// [`crate::event::MessageDeltaKind::Thinking`] deltas on
/// [`crate::event::Event::MessageUpdate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThinkingLevel {
    Off,
    Minimal,
    Low,
    Medium,
    High,
    XHigh,
}

impl ThinkingLevel {
    pub fn is_off(self) -> bool {
        matches!(self, ThinkingLevel::Off)
    }

    /// The instruction appended to the system prompt when thinking is
    /// requested. `Off` appends nothing.
    pub fn system_prompt_suffix(self) -> Option<&'static str> {
        match self {
            ThinkingLevel::Off => None,
            ThinkingLevel::Minimal => Some("\n\nThink briefly before acting."),
            ThinkingLevel::Low => Some("\n\nThink through your approach before acting."),
            ThinkingLevel::Medium => {
                Some("\n\nThink carefully through your approach, weighing alternatives, before acting.")
            }
            ThinkingLevel::High => Some(
                "\n\nThink deeply and thoroughly about your approach, weighing alternatives and \
                 edge cases, before acting.",
            ),
            ThinkingLevel::XHigh => Some(
                "\n\nThink exhaustively: enumerate alternatives, weigh tradeoffs, and consider \
                 edge cases and failure modes before acting.",
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolSummaryStrategy {
    Llm,
    Heuristic,
    Off,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolSummaryAutomation {
    /// Always summarize via the configured strategy.
    Always,
    /// Try the LLM strategy; fall back to the heuristic on failure.
    Fallback,
    Off,
}

/// Retry policy for a transient operation (LLM stream open, tool execution).
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Case-insensitive substrings that mark an error as retryable.
    pub retryable_patterns: Vec<String>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(10),
            retryable_patterns: default_retryable_patterns(),
        }
    }
}

pub fn default_retryable_patterns() -> Vec<String> {
    [
        "timeout",
        "connection refused",
        "connection reset",
        "eof",
        "broken pipe",
        "temporarily unavailable",
        "rate limit",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl RetryConfig {
    /// Case-insensitive substring match against the configured patterns.
    /// Timeouts are always retryable regardless of pattern configuration.
    pub fn is_retryable(&self, message: &str) -> bool {
        let lower = message.to_lowercase();
        if lower.contains("timeout") {
            return true;
        }
        self.retryable_patterns
            .iter()
            .any(|p| lower.contains(&p.to_lowercase()))
    }
}

/// The turn driver's immutable-per-session contract.
#[derive(Clone)]
pub struct LoopConfig {
    pub model: String,
    pub api_key: String,
    pub executor: Option<Arc<ExecutorPool>>,
    pub tool_output: ToolOutputLimits,
    pub compactor: Option<Arc<dyn Compactor>>,
    pub tool_call_cutoff: usize,
    pub tool_summary_strategy: ToolSummaryStrategy,
    pub tool_summary_automation: ToolSummaryAutomation,
    pub thinking_level: ThinkingLevel,
    pub max_llm_retries: u32,
    pub retry_base_delay: Duration,
    pub max_consecutive_tool_calls: i64,
    pub max_tool_calls_per_name: i64,
    pub max_turns: u32,
    /// Defaults to 120s; configurable rather than a hardcoded literal so
    /// slower providers/models aren't starved (see DESIGN.md).
    pub llm_stream_timeout: Duration,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Token budget `TurnDriver` passes to `Compactor::should_compact` at
    /// the top of every turn.
    pub pre_compact_token_budget: usize,
    /// Working directory handed to every `ToolContext` a turn dispatches.
    pub working_directory: PathBuf,
}

impl LoopConfig {
    pub fn new(model: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            api_key: api_key.into(),
            executor: None,
            tool_output: ToolOutputLimits::default(),
            compactor: None,
            tool_call_cutoff: 40,
            tool_summary_strategy: ToolSummaryStrategy::Heuristic,
            tool_summary_automation: ToolSummaryAutomation::Fallback,
            thinking_level: ThinkingLevel::Off,
            max_llm_retries: 1,
            retry_base_delay: Duration::from_secs(1),
            max_consecutive_tool_calls: 6,
            max_tool_calls_per_name: 60,
            max_turns: 0,
            llm_stream_timeout: Duration::from_secs(120),
            temperature: 0.2,
            max_tokens: 4096,
            pre_compact_token_budget: 100_000,
            working_directory: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }
}
