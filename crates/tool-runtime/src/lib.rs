pub mod agent_context;
pub mod assembler;
pub mod bridge;
pub mod compactor;
pub mod conversation;
pub mod driver;
pub mod event;
pub mod event_stream;
pub mod executor;
pub mod limiter;
pub mod loop_config;
pub mod loop_guard;
pub mod message;
pub mod metrics;
pub mod normalizer;
pub mod provider;
pub mod registry;
pub mod stream;
pub mod summarizer;
pub mod tag_parser;
pub mod tool;
pub mod tools;
pub mod trace;

pub use agent_context::AgentContext;
pub use assembler::StreamingAssembler;
pub use bridge::{BridgeError, LlmProviderBridge, SimpleLlmProvider, SimpleMessage, SimpleRole};
pub use compactor::{CompactionSummary, Compactor, TailCompactor};
pub use conversation::{to_wire_messages, AssistantContent, ConversationMessage};
pub use driver::TurnDriver;
pub use event::{CompactionTrigger, Event, MessageDeltaKind, TurnOutcome};
pub use event_stream::{EventReceiver, EventStream};
pub use executor::{ExecutorConfig, ExecutorPool, ToolExecutor};
pub use limiter::{ToolOutputLimiter, ToolOutputLimits, TruncateMode};
pub use loop_config::{LoopConfig, RetryConfig, ThinkingLevel, ToolSummaryAutomation, ToolSummaryStrategy};
pub use loop_guard::{LoopGuard, LoopGuardOutcome, TripReason};
pub use message::{ContentBlock, Message, MessageKind, Role, StopReason, Usage, Visibility};
pub use metrics::{Metrics, MetricsSnapshot};
pub use normalizer::{coerce_tool_arguments, CoerceError, ToolCallNormalizer};
pub use provider::ToolAwareLlmProvider;
pub use registry::ToolRegistry;
pub use stream::StreamEvent;
pub use summarizer::{AsyncToolSummarizer, SummarizerConfig, ToolSummarizer};
pub use tag_parser::{Diagnostic, ToolTagParser};
pub use tool::{Tool, ToolCall, ToolContext, ToolDefinition, ToolError, ToolResult};
pub use trace::{TraceBuf, TraceEvent, TraceSink};
pub use tools::{BashExecuteTool, FileReadTool, FileWriteTool};
