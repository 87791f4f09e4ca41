//! [`TurnDriver`]: the per-turn state machine — stream a response, parse
//! tool calls, dispatch them, summarize results, repeat until the model
//! stops asking for tools or a turn/guard/error boundary ends the run.
//!
//! Grounded in the `cocode-rs` `AgentLoop`'s `driver.rs` (see
//! `other_examples/c3dd9dd4_openai-codex__cocode-rs-core-loop-src-driver.rs.rs`)
//! for the overall shape — a `CancellationToken`-carrying driver owning a
//! provider handle, a turn counter and an outbound event channel — generalized
//! here to bridge the richer [`crate::message::Message`]/[`crate::event::Event`]
//! model this workspace uses onto the wire-level
//! [`crate::conversation::ConversationMessage`]/[`crate::stream::StreamEvent`]
//! contract [`crate::provider::ToolAwareLlmProvider`] actually speaks.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::agent_context::AgentContext;
use crate::conversation::to_wire_messages;
use crate::event::{CompactionTrigger, Event, TurnOutcome};
use crate::event_stream::EventStream;
use crate::executor::jittered;
use crate::limiter::ToolOutputLimiter;
use crate::loop_config::{LoopConfig, ToolSummaryAutomation};
use crate::loop_guard::{trip_message, LoopGuard, LoopGuardOutcome};
use crate::message::{ContentBlock, Message, StopReason as MsgStopReason};
use crate::normalizer::{coerce_tool_arguments, CoerceError, ToolCallNormalizer};
use crate::provider::{LlmError, ToolAwareLlmProvider};
use crate::stream::StreamEvent;
use crate::summarizer::{maybe_summarize_tool_results, ToolSummarizer};
use crate::tag_parser::ToolTagParser;
use crate::tool::{ToolCall, ToolContext, ToolResult};
use crate::trace::{TraceBuf, TraceEvent};

/// Drives turns for a single prompt until the agent naturally ends, the
/// turn budget is exhausted, or a caller-supplied `CancellationToken` fires.
pub struct TurnDriver {
    provider: Arc<dyn ToolAwareLlmProvider>,
    config: LoopConfig,
    trace: Arc<TraceBuf>,
}

impl TurnDriver {
    pub fn new(provider: Arc<dyn ToolAwareLlmProvider>, config: LoopConfig, trace: Arc<TraceBuf>) -> Self {
        Self { provider, config, trace }
    }

    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    /// Runs `context` through the turn state machine: `PRE_COMPACT? -> STREAM
    /// -> [CONTEXT_LIMIT_RECOVERY?] -> PARSE_TOOLS -> LOOP_GUARD_CHECK ->
    /// DISPATCH_TOOLS -> APPEND_RESULTS -> SUMMARIZE_TOOLS -> TURN_END`,
    /// looping back to `PRE_COMPACT` while the assistant keeps asking for
    /// tools. Every transition is reflected onto `events`; the returned
    /// [`TurnOutcome`] also completes the stream.
    pub async fn run(
        &self,
        context: &mut AgentContext,
        events: &EventStream<Event, TurnOutcome>,
        cancel: &CancellationToken,
    ) -> TurnOutcome {
        events.push(Event::agent_start());
        let mut loop_guard = LoopGuard::new(self.config.max_consecutive_tool_calls, self.config.max_tool_calls_per_name);
        let mut turn_number: u64 = 0;

        let outcome = loop {
            turn_number += 1;
            if self.config.max_turns > 0 && turn_number > self.config.max_turns as u64 {
                break TurnOutcome::Completed;
            }
            if cancel.is_cancelled() {
                break TurnOutcome::Aborted;
            }

            events.push(Event::turn_start(turn_number));
            let turn_started = Instant::now();

            self.pre_compact(context, events).await;

            let mut recoveries = 0u32;
            let stream_result = loop {
                let attempt_result =
                    stream_assistant_response_with_retry(self.provider.as_ref(), context, &self.config, events, cancel, &self.trace)
                        .await;

                match attempt_result {
                    Err(LlmError::ContextLengthExceeded(_)) if self.config.compactor.is_some() && recoveries < 1 => {
                        recoveries += 1;
                        self.recovery_compact(context, events).await;
                        continue;
                    }
                    other => break other,
                }
            };

            let (message, stop_reason) = match stream_result {
                Ok(pair) => pair,
                Err(err) => {
                    events.push(Event::error(err.to_string()));
                    events.push(Event::turn_end(turn_number, MsgStopReason::Error));
                    break TurnOutcome::Failed;
                }
            };

            context.push(message);
            let last_index = context.messages.len() - 1;

            if matches!(stop_reason, MsgStopReason::Error | MsgStopReason::Aborted) {
                events.push(Event::turn_end(turn_number, stop_reason));
                break if stop_reason == MsgStopReason::Aborted { TurnOutcome::Aborted } else { TurnOutcome::Failed };
            }

            let mut tool_calls: Vec<ToolCall> = context.messages[last_index].tool_calls().into_iter().cloned().collect();
            let mut effective_stop_reason = stop_reason;

            if !tool_calls.is_empty() {
                let mut tripped = None;
                for call in &tool_calls {
                    if let LoopGuardOutcome::Tripped { reason, .. } = loop_guard.observe(&call.name, &call.input) {
                        tripped = Some((call.name.clone(), reason));
                        break;
                    }
                }
                if let Some((tool_name, reason)) = tripped {
                    self.trace.record(TraceEvent::LoopGuardTriggered { tool_name: tool_name.clone() });
                    let explanation = trip_message(&tool_name, reason);
                    let entry = &mut context.messages[last_index];
                    entry.content.retain(|b| !matches!(b, ContentBlock::ToolCall(_)));
                    entry.content.push(ContentBlock::Text(explanation.clone()));
                    entry.stop_reason = Some(MsgStopReason::Aborted);
                    effective_stop_reason = MsgStopReason::Aborted;
                    events.push(Event::loop_guard_triggered(explanation));
                    tool_calls.clear();
                }
            }

            if !tool_calls.is_empty() {
                let results = execute_tool_calls(context, &tool_calls, &self.config, events, &self.trace).await;
                for result in results {
                    context.push(result);
                }
                self.summarize(context).await;
            }

            events.push(Event::turn_end(turn_number, effective_stop_reason));
            self.trace.record(TraceEvent::Turn { turn: turn_number, duration_ms: turn_started.elapsed().as_millis() as u64 });

            if tool_calls.is_empty() {
                break match effective_stop_reason {
                    MsgStopReason::Aborted => TurnOutcome::Aborted,
                    _ => TurnOutcome::Completed,
                };
            }
        };

        events.push(Event::agent_end(outcome));
        events.complete(outcome);
        outcome
    }

    async fn pre_compact(&self, context: &mut AgentContext, events: &EventStream<Event, TurnOutcome>) {
        let Some(compactor) = self.config.compactor.clone() else { return };
        let approx_tokens = context.approx_tokens();
        if !compactor.should_compact(&context.messages, approx_tokens, self.config.pre_compact_token_budget) {
            return;
        }
        events.push(Event::compaction_start(CompactionTrigger::PreLlmThreshold));
        let summary = compactor.compact(&mut context.messages).await;
        context.last_compaction = Some(summary);
        self.trace.record(TraceEvent::Compaction { trigger: "pre_llm_threshold", archived_messages: summary.archived_messages });
        events.push(Event::compaction_end(CompactionTrigger::PreLlmThreshold, summary.archived_messages, None));
    }

    async fn recovery_compact(&self, context: &mut AgentContext, events: &EventStream<Event, TurnOutcome>) {
        let Some(compactor) = self.config.compactor.clone() else { return };
        events.push(Event::compaction_start(CompactionTrigger::ContextLimitRecovery));
        let summary = compactor.compact(&mut context.messages).await;
        context.last_compaction = Some(summary);
        self.trace.record(TraceEvent::Compaction { trigger: "context_limit_recovery", archived_messages: summary.archived_messages });
        events.push(Event::compaction_end(CompactionTrigger::ContextLimitRecovery, summary.archived_messages, None));
    }

    async fn summarize(&self, context: &mut AgentContext) {
        if matches!(self.config.tool_summary_automation, ToolSummaryAutomation::Off) {
            return;
        }
        let summarizer = ToolSummarizer::default();
        let archived = maybe_summarize_tool_results(&mut context.messages, self.config.tool_call_cutoff, &summarizer);
        if archived > 0 {
            self.trace.record(TraceEvent::Compaction { trigger: "tool_result_summarization", archived_messages: archived });
        }
    }
}

fn system_prompt_for(context: &AgentContext, config: &LoopConfig) -> String {
    let mut prompt = context.system_prompt.clone();
    if let Some(suffix) = config.thinking_level.system_prompt_suffix() {
        prompt.push_str(suffix);
    }
    prompt
}

fn emit_wire_event(event: &StreamEvent, events: &EventStream<Event, TurnOutcome>) {
    match event {
        StreamEvent::TextDelta { text } => events.push(Event::text_delta(text.clone())),
        StreamEvent::ToolCallStart { id, name } => {
            events.push(Event::tool_call_delta(0, Some(id.clone()), Some(name.clone()), String::new()));
        }
        StreamEvent::ToolCallDelta { id, arguments_delta } => {
            events.push(Event::tool_call_delta(0, Some(id.clone()), None, arguments_delta.clone()));
        }
        StreamEvent::ToolCallEnd { .. }
        | StreamEvent::MessageEnd { .. }
        | StreamEvent::Error { .. }
        | StreamEvent::ToolExecutionStart { .. }
        | StreamEvent::ToolExecutionResult { .. } => {}
    }
}

/// Opens one LM stream and folds it into a finalized [`Message`]. Mid-stream
/// cancellation does not surface as an `Err` — the partial message
/// accumulated so far is finalized with stop reason `Aborted`, which the
/// caller treats exactly like the model choosing to stop.
async fn stream_assistant_response(
    provider: &dyn ToolAwareLlmProvider,
    context: &AgentContext,
    config: &LoopConfig,
    events: &EventStream<Event, TurnOutcome>,
    cancel: &CancellationToken,
) -> Result<(Message, MsgStopReason), LlmError> {
    let wire_messages = to_wire_messages(&context.messages);
    let system_prompt = system_prompt_for(context, config);
    let tools = context
        .tools
        .list()
        .into_iter()
        .filter(|def| context.is_allowed(&def.name))
        .collect();

    events.push(Event::message_start());

    let mut stream = tokio::time::timeout(
        config.llm_stream_timeout,
        provider.stream_with_tools(wire_messages, Some(system_prompt), tools, config.temperature, config.max_tokens),
    )
    .await
    .map_err(|_| LlmError::StreamError("timed out opening the llm stream".to_string()))??;

    let mut assembler = crate::assembler::StreamingAssembler::new();
    let mut aborted = false;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                aborted = true;
                break;
            }
            next = stream.next() => {
                match next {
                    None => break,
                    Some(Err(err)) => return Err(err),
                    Some(Ok(event)) => {
                        emit_wire_event(&event, events);
                        if let StreamEvent::Error { message } = &event {
                            return Err(LlmError::StreamError(message.clone()));
                        }
                        assembler.ingest(&event);
                    }
                }
            }
        }
    }

    events.push(Event::message_end());
    let (mut message, mut stop_reason) = assembler.finalize();

    if aborted {
        stop_reason = MsgStopReason::Aborted;
        message.stop_reason = Some(stop_reason);
    } else if message.tool_calls().is_empty() {
        let text = message.text();
        if !text.is_empty() {
            let (recovered, remaining) = ToolTagParser::parse(&text);
            if !recovered.is_empty() {
                let mut new_content = Vec::new();
                if !remaining.trim().is_empty() {
                    new_content.push(ContentBlock::Text(remaining));
                }
                for call in recovered {
                    new_content.push(ContentBlock::ToolCall(call));
                }
                message.content = new_content;
            }
        }
    }

    Ok((message, stop_reason))
}

/// Retries [`stream_assistant_response`] per the LLM retry wrapper:
/// non-retryable errors (context-length-exceeded, 4xx API errors other than
/// rate-limit) return immediately; everything else backs off by
/// `base_delay * 2^(attempt-1)`, floored at 2s, jittered when the last error
/// was a rate limit, and floored again by any provider-reported
/// `Retry-After`.
async fn stream_assistant_response_with_retry(
    provider: &dyn ToolAwareLlmProvider,
    context: &AgentContext,
    config: &LoopConfig,
    events: &EventStream<Event, TurnOutcome>,
    cancel: &CancellationToken,
    trace: &TraceBuf,
) -> Result<(Message, MsgStopReason), LlmError> {
    for attempt in 0..=config.max_llm_retries {
        if cancel.is_cancelled() {
            return Err(LlmError::StreamError("cancelled before llm stream attempt".to_string()));
        }

        let started = Instant::now();
        let result = stream_assistant_response(provider, context, config, events, cancel).await;
        let duration_ms = started.elapsed().as_millis() as u64;
        let is_error = result.is_err();
        trace.record(TraceEvent::LlmStream { attempt, duration_ms, input_tokens: 0, output_tokens: 0, is_error });

        let err = match result {
            Ok(ok) => return Ok(ok),
            Err(e) => e,
        };

        if !err.is_retryable() || attempt == config.max_llm_retries {
            return Err(err);
        }

        let factor = 1u32 << attempt.min(20);
        let mut delay = config.retry_base_delay.saturating_mul(factor);
        let floor = Duration::from_secs(2);
        if delay < floor {
            delay = floor;
        }
        if matches!(err, LlmError::RateLimited { .. }) {
            delay = jittered(delay, 0.20);
        }
        if let Some(secs) = err.retry_after_secs() {
            delay = delay.max(Duration::from_secs(secs));
        }

        tokio::select! {
            _ = cancel.cancelled() => return Err(LlmError::StreamError("cancelled during retry backoff".to_string())),
            _ = tokio::time::sleep(delay) => {}
        }
    }

    unreachable!("loop always returns on its final iteration")
}

enum PlanOutcome {
    Runnable { index: usize, call: ToolCall },
    Failed { index: usize, tool_call_id: String, tool_name: String, message: String },
}

/// Two-phase tool dispatch: a sequential plan phase normalizes/coerces/
/// resolves each call (synthesizing an error result in place for anything
/// that fails before dispatch), then a parallel run phase executes every
/// runnable call and applies output limits to successes. Returned messages
/// are in the original call order regardless of completion order.
async fn execute_tool_calls(
    context: &AgentContext,
    calls: &[ToolCall],
    config: &LoopConfig,
    events: &EventStream<Event, TurnOutcome>,
    trace: &TraceBuf,
) -> Vec<Message> {
    let limiter = ToolOutputLimiter::new();
    let mut plan = Vec::with_capacity(calls.len());

    for (index, original) in calls.iter().enumerate() {
        let mut call = original.clone();
        ToolCallNormalizer::normalize(&mut call);
        events.push(Event::tool_execution_start(call.id.clone(), call.name.clone()));

        let coerced = match coerce_tool_arguments(&call.name, call.input.clone()) {
            Ok(args) => args,
            Err(CoerceError::MissingRequired { tool, missing }) => {
                events.push(Event::tool_execution_end(call.id.clone(), call.name.clone(), true));
                plan.push(PlanOutcome::Failed {
                    index,
                    tool_call_id: call.id.clone(),
                    tool_name: call.name.clone(),
                    message: format!("tool '{tool}' requires the '{missing}' argument; provide it and retry"),
                });
                continue;
            }
        };
        call.input = coerced;

        let known = context.tools.get(&call.name).is_some();
        let allowed = context.is_allowed(&call.name);
        if !known || !allowed {
            let message = if !known {
                format!("tool '{}' is not registered", call.name)
            } else {
                format!("tool '{}' is not permitted in this session", call.name)
            };
            events.push(Event::tool_execution_end(call.id.clone(), call.name.clone(), true));
            plan.push(PlanOutcome::Failed { index, tool_call_id: call.id.clone(), tool_name: call.name.clone(), message });
            continue;
        }

        plan.push(PlanOutcome::Runnable { index, call });
    }

    let working_directory = config.working_directory.clone();
    let run_futs = plan.iter().filter_map(|p| match p {
        PlanOutcome::Runnable { index, call } => Some((*index, call.clone())),
        PlanOutcome::Failed { .. } => None,
    }).map(|(index, call)| {
        let working_directory = working_directory.clone();
        async move {
            let tool_ctx = ToolContext { working_directory };
            let started = Instant::now();
            let outcome = match &config.executor {
                Some(pool) => pool.execute_with_retry(&call, &tool_ctx).await,
                None => match context.tools.get(&call.name) {
                    Some(tool) => tool.execute(call.input.clone(), &tool_ctx).await,
                    None => Err(crate::tool::ToolError::InvalidInput(format!("unknown tool: {}", call.name))),
                },
            };
            (index, call, outcome, started.elapsed().as_millis() as u64)
        }
    });

    let run_results = futures::future::join_all(run_futs).await;

    let mut results_by_index: HashMap<usize, Message> = HashMap::new();
    for (index, call, outcome, duration_ms) in run_results {
        let is_error = outcome.is_err();
        trace.record(TraceEvent::ToolExecution { tool_name: call.name.clone(), attempt: 0, duration_ms, is_error });
        events.push(Event::tool_execution_end(call.id.clone(), call.name.clone(), is_error));

        let message = match outcome {
            Ok(result) => {
                let limited = limiter.apply(vec![ContentBlock::Text(result.content)], &config.tool_output);
                let text = limited
                    .into_iter()
                    .filter_map(|b| match b {
                        ContentBlock::Text(t) => Some(t),
                        _ => None,
                    })
                    .collect::<Vec<_>>()
                    .join("");
                Message::tool_result(
                    &ToolResult { tool_call_id: call.id.clone(), content: text, is_error: result.is_error },
                    call.name.clone(),
                )
            }
            Err(err) => Message::tool_result(
                &ToolResult { tool_call_id: call.id.clone(), content: err.to_string(), is_error: true },
                call.name.clone(),
            ),
        };
        results_by_index.insert(index, message);
    }

    for failed in &plan {
        if let PlanOutcome::Failed { index, tool_call_id, tool_name, message } = failed {
            let result_message = Message::tool_result(
                &ToolResult { tool_call_id: tool_call_id.clone(), content: message.clone(), is_error: true },
                tool_name.clone(),
            );
            results_by_index.insert(*index, result_message);
        }
    }

    (0..calls.len()).filter_map(|i| results_by_index.remove(&i)).collect()
}
