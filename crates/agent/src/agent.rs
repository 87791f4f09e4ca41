//! [`Agent`]: the session façade around one [`TurnDriver`].
//!
//! A single-session wrapper serializing `prompt` calls behind a one-slot
//! lock, queueing follow-ups, and fanning out turn events to any number of
//! subscribers, in the same `info!`/`warn!`-with-structured-fields logging
//! style used elsewhere in this workspace, on top of `stupid_tool_runtime`'s
//! `TurnDriver` instead of a bare `LlmProvider::complete` call.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::{Mutex as AsyncMutex, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use stupid_tool_runtime::event::{Event, TurnOutcome};
use stupid_tool_runtime::event_stream::{EventReceiver, EventStream};
use stupid_tool_runtime::loop_config::LoopConfig;
use stupid_tool_runtime::message::Message;
use stupid_tool_runtime::metrics::Metrics;
use stupid_tool_runtime::provider::ToolAwareLlmProvider;
use stupid_tool_runtime::registry::ToolRegistry;
use stupid_tool_runtime::trace::{NoopSink, TraceBuf};
use stupid_tool_runtime::{AgentContext, Compactor, ExecutorPool, ToolOutputLimits, TurnDriver};

const PROMPT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(60);
const FOLLOW_UP_CAPACITY: usize = 100;
const EVENT_FANOUT_CAPACITY: usize = 100;

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("agent busy")]
    Busy,
    #[error("agent busy timeout")]
    BusyTimeout,
    #[error("follow-up queue full")]
    FollowUpQueueFull,
}

/// Mutable knobs a caller can adjust between prompts. A fresh [`TurnDriver`]
/// is built from this snapshot on every `Prompt`/`FollowUp`, so changes take
/// effect starting with the next turn — never mid-turn.
struct MutableConfig {
    loop_config: LoopConfig,
}

/// Owns the one-slot prompt lock, the follow-up queue, the persistent event
/// fan-out stream, the current cancel handle, and the session's accumulated
/// [`AgentContext`]. One `Agent` corresponds to one conversation.
pub struct Agent {
    provider: Arc<dyn ToolAwareLlmProvider>,
    config: AsyncMutex<MutableConfig>,
    context: AsyncMutex<AgentContext>,
    slot: Arc<Semaphore>,
    follow_ups: StdMutex<VecDeque<String>>,
    events: EventStream<Event, ()>,
    cancel: StdMutex<CancellationToken>,
    trace: Arc<TraceBuf>,
    metrics: Arc<Metrics>,
    trace_id: AtomicU64,
}

impl Agent {
    pub fn new(
        provider: Arc<dyn ToolAwareLlmProvider>,
        system_prompt: impl Into<String>,
        tools: Arc<ToolRegistry>,
        loop_config: LoopConfig,
    ) -> Arc<Self> {
        let trace = Arc::new(TraceBuf::new(Arc::new(NoopSink)));
        let metrics = Arc::new(Metrics::new(trace.clone()));
        Arc::new(Self {
            provider,
            config: AsyncMutex::new(MutableConfig { loop_config }),
            context: AsyncMutex::new(AgentContext::new(system_prompt, tools)),
            slot: Arc::new(Semaphore::new(1)),
            follow_ups: StdMutex::new(VecDeque::new()),
            events: EventStream::new(EVENT_FANOUT_CAPACITY, EVENT_FANOUT_CAPACITY),
            cancel: StdMutex::new(CancellationToken::new()),
            trace,
            metrics,
            trace_id: AtomicU64::new(0),
        })
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn trace(&self) -> &Arc<TraceBuf> {
        &self.trace
    }

    /// Subscribes to the agent's lifetime event stream. The channel never
    /// completes on its own — it is torn down only when the `Agent` itself is
    /// dropped (its last subscriber then sees `recv` return `None` once the
    /// underlying `Arc` releases).
    pub fn events(&self) -> EventReceiver<Event, ()> {
        self.events.subscribe()
    }

    pub fn set_compactor(&self, compactor: Option<Arc<dyn Compactor>>) {
        if let Ok(mut guard) = self.config.try_lock() {
            guard.loop_config.compactor = compactor;
        }
    }

    pub fn set_executor(&self, executor: Option<Arc<ExecutorPool>>) {
        if let Ok(mut guard) = self.config.try_lock() {
            guard.loop_config.executor = executor;
        }
    }

    pub fn set_tool_output_limits(&self, limits: ToolOutputLimits) {
        if let Ok(mut guard) = self.config.try_lock() {
            guard.loop_config.tool_output = limits;
        }
    }

    /// Acquires the one-slot lock (waiting up to 60s), runs `text` to
    /// completion, then drains any follow-ups queued while it ran. Rotates
    /// the trace id on every call, per turn.
    pub async fn prompt(self: &Arc<Self>, text: impl Into<String>) -> Result<(), AgentError> {
        let permit = match tokio::time::timeout(PROMPT_ACQUIRE_TIMEOUT, self.slot.clone().acquire_owned()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(AgentError::BusyTimeout),
            Err(_) => {
                warn!("prompt waited 60s for the session slot and gave up");
                return Err(AgentError::BusyTimeout);
            }
        };

        let text = text.into();
        let me = self.clone();
        tokio::spawn(async move {
            me.run_prompt_and_drain(text).await;
            drop(permit);
        });
        Ok(())
    }

    /// Like [`Agent::prompt`] but fails immediately (`AgentError::Busy`)
    /// instead of waiting, for callers (namely [`Agent::steer`]) that have
    /// just cancelled the in-flight turn and want to know right away whether
    /// it released the slot yet.
    async fn try_prompt(self: &Arc<Self>, text: impl Into<String>) -> Result<(), AgentError> {
        let permit = self.slot.clone().try_acquire_owned().map_err(|_| AgentError::Busy)?;
        let text = text.into();
        let me = self.clone();
        tokio::spawn(async move {
            me.run_prompt_and_drain(text).await;
            drop(permit);
        });
        Ok(())
    }

    /// Enqueues `text` for processing once the current prompt (if any)
    /// finishes its own follow-up drain.
    pub fn follow_up(&self, text: impl Into<String>) -> Result<(), AgentError> {
        let mut queue = self.follow_ups.lock().unwrap();
        if queue.len() >= FOLLOW_UP_CAPACITY {
            warn!(capacity = FOLLOW_UP_CAPACITY, "follow-up queue full, rejecting");
            return Err(AgentError::FollowUpQueueFull);
        }
        queue.push_back(text.into());
        Ok(())
    }

    /// Cancels the in-flight turn, rebinds a fresh cancel token, then tries
    /// to prompt immediately with `text`. If the slot hasn't freed up yet,
    /// falls back to enqueueing `text` as a follow-up.
    pub async fn steer(self: &Arc<Self>, text: impl Into<String>) -> Result<(), AgentError> {
        let text = text.into();
        {
            let mut cancel = self.cancel.lock().unwrap();
            cancel.cancel();
            *cancel = CancellationToken::new();
        }
        match self.try_prompt(text.clone()).await {
            Ok(()) => Ok(()),
            Err(AgentError::Busy) => self.follow_up(text),
            Err(other) => Err(other),
        }
    }

    /// Cancels the in-flight turn (if any) and clears queued follow-ups. If a
    /// turn is currently streaming, pushes a synthetic `agent_end` so
    /// downstream consumers see the run close out.
    pub fn abort(&self) {
        let was_live = self.slot.available_permits() == 0;
        {
            let mut cancel = self.cancel.lock().unwrap();
            cancel.cancel();
            *cancel = CancellationToken::new();
        }
        self.follow_ups.lock().unwrap().clear();
        if was_live {
            self.events.push(Event::agent_end(TurnOutcome::Aborted));
        }
    }

    async fn run_prompt_and_drain(self: Arc<Self>, first: String) {
        let mut next = Some(first);
        while let Some(text) = next.take() {
            self.run_one(text).await;
            next = self.follow_ups.lock().unwrap().pop_front();
        }
    }

    async fn run_one(&self, text: String) {
        let trace_id = self.trace_id.fetch_add(1, Ordering::Relaxed) + 1;
        info!(trace_id, "agent prompt starting");

        let cancel = self.cancel.lock().unwrap().clone();
        let config_snapshot = self.config.lock().await.loop_config.clone();
        let driver = TurnDriver::new(self.provider.clone(), config_snapshot, self.trace.clone());

        let mut context = self.context.lock().await;
        context.push(Message::user(text));

        let run_stream: EventStream<Event, TurnOutcome> = EventStream::new(32, 4096);
        let relay = {
            let mut rx = run_stream.subscribe();
            let fanout = self.events.clone();
            tokio::spawn(async move {
                while let Some(event) = rx.recv().await {
                    fanout.push(event);
                }
            })
        };

        let outcome = driver.run(&mut context, &run_stream, &cancel).await;
        let _ = relay.await;
        drop(context);

        info!(trace_id, outcome = ?outcome, "agent prompt finished");
    }
}
