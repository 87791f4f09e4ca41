//! Retrying, concurrency-bounded tool execution.
//!
//! Grounded in the anthropic-sdk-rust reference's `ToolExecutor` /
//! `ToolExecutionConfig` (semaphore + `buffer_unordered`, exponential backoff
//! with a cap), generalized with: jitter on the backoff delay so many
//! concurrently retrying calls don't all wake up on the same tick; a
//! queue-wait timeout distinct from the per-call timeout, so a call stuck
//! behind a full semaphore fails cleanly instead of hanging indefinitely;
//! and [`crate::loop_config::RetryConfig`]'s substring-pattern retryability
//! check (matching the error *message* against configured patterns) rather
//! than a closed set of error variants.
//!
//! [`ToolExecutor`] owns one tool's concurrency/timeout/retry policy.
//! [`ExecutorPool`] routes calls to a per-tool-name executor, falling back
//! to a default for names with no specific policy — most deployments only
//! ever need the default.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use rand::Rng;
use tokio::sync::Semaphore;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use crate::loop_config::RetryConfig;
use crate::registry::ToolRegistry;
use crate::tool::{ToolCall, ToolContext, ToolError, ToolResult};

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub retry: RetryConfig,
    pub max_concurrent_tools: usize,
    /// Wall-clock budget for a single execution attempt (not the whole
    /// retry loop).
    pub call_timeout: Duration,
    /// How long a call may wait for a concurrency slot before giving up.
    pub queue_timeout: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            max_concurrent_tools: 4,
            call_timeout: Duration::from_secs(120),
            queue_timeout: Duration::from_secs(60),
        }
    }
}

/// Coordinates one tool's execution with retry and bounded concurrency.
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    config: ExecutorConfig,
    semaphore: Semaphore,
}

impl ToolExecutor {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self::with_config(registry, ExecutorConfig::default())
    }

    pub fn with_config(registry: Arc<ToolRegistry>, config: ExecutorConfig) -> Self {
        let permits = config.max_concurrent_tools.max(1);
        Self { registry, config, semaphore: Semaphore::new(permits) }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Run one tool call, retrying on retryable errors with jittered
    /// exponential backoff. Waits for a concurrency slot first (bounded by
    /// `queue_timeout`), then bounds the attempt itself by `call_timeout`.
    pub async fn execute_with_retry(&self, call: &ToolCall, context: &ToolContext) -> Result<ToolResult, ToolError> {
        let retry = &self.config.retry;
        let mut delay = retry.initial_delay;
        let mut last_err: Option<ToolError> = None;

        for attempt in 0..=retry.max_retries {
            let outcome = self.execute_once(call, context).await;
            match outcome {
                Ok(result) => return Ok(result),
                Err(err) => {
                    let retryable = retry.is_retryable(&err.to_string());
                    if attempt < retry.max_retries && retryable {
                        warn!(tool = %call.name, attempt, error = %err, "tool call failed, retrying");
                        sleep(jittered(delay, 0.25)).await;
                        delay = std::cmp::min(delay * 2, retry.max_delay);
                        last_err = Some(err);
                    } else {
                        last_err = Some(err);
                        break;
                    }
                }
            }
        }

        let attempts = retry.max_retries + 1;
        let err = last_err.unwrap_or(ToolError::ExecutionFailed("max retries exceeded".to_string()));
        Err(ToolError::ExecutionFailed(format!("tool '{}' failed after {attempts} attempts: {err}", call.name)))
    }

    async fn execute_once(&self, call: &ToolCall, context: &ToolContext) -> Result<ToolResult, ToolError> {
        let _permit = timeout(self.config.queue_timeout, self.semaphore.acquire())
            .await
            .map_err(|_| ToolError::Timeout(format!("tool '{}' timed out waiting for a concurrency slot", call.name)))?
            .expect("semaphore not closed");

        let tool = self
            .registry
            .get(&call.name)
            .ok_or_else(|| ToolError::InvalidInput(format!("unknown tool: {}", call.name)))?;

        debug!(tool = %call.name, call_id = %call.id, "executing tool");
        match timeout(self.config.call_timeout, tool.execute(call.input.clone(), context)).await {
            Ok(Ok(mut result)) => {
                result.tool_call_id = call.id.clone();
                Ok(result)
            }
            Ok(Err(err)) => Err(err),
            Err(_) => Err(ToolError::Timeout(format!(
                "tool '{}' exceeded {:?} call timeout",
                call.name, self.config.call_timeout
            ))),
        }
    }

    /// Runs many tool calls with a concurrency cap, preserving input order in
    /// the returned vector regardless of completion order.
    pub async fn execute_many(&self, calls: &[ToolCall], context: &ToolContext) -> Vec<Result<ToolResult, ToolError>> {
        let indexed = calls.iter().enumerate().map(|(index, call)| async move {
            (index, self.execute_with_retry(call, context).await)
        });

        let mut results: Vec<(usize, Result<ToolResult, ToolError>)> = stream::iter(indexed)
            .buffer_unordered(self.config.max_concurrent_tools.max(1))
            .collect()
            .await;

        results.sort_by_key(|(index, _)| *index);
        results.into_iter().map(|(_, r)| r).collect()
    }
}

/// Routes calls to a per-tool-name [`ToolExecutor`], falling back to a
/// default executor for any tool without a name-specific policy. Most
/// tools share the default; a pool entry only makes sense for a tool that
/// genuinely needs its own concurrency cap or timeout (a slow, rarely-used
/// tool that shouldn't eat the default pool's concurrency budget, say).
pub struct ExecutorPool {
    executors: HashMap<String, Arc<ToolExecutor>>,
    default: Arc<ToolExecutor>,
}

impl ExecutorPool {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self::with_default(Arc::new(ToolExecutor::new(registry)))
    }

    pub fn with_default(default: Arc<ToolExecutor>) -> Self {
        Self { executors: HashMap::new(), default }
    }

    /// Registers a tool-specific executor, overriding the default for calls
    /// to `tool_name`.
    pub fn register(&mut self, tool_name: impl Into<String>, executor: Arc<ToolExecutor>) {
        self.executors.insert(tool_name.into(), executor);
    }

    fn executor_for(&self, tool_name: &str) -> &Arc<ToolExecutor> {
        self.executors.get(tool_name).unwrap_or(&self.default)
    }

    pub async fn execute_with_retry(&self, call: &ToolCall, context: &ToolContext) -> Result<ToolResult, ToolError> {
        self.executor_for(&call.name).execute_with_retry(call, context).await
    }

    /// Runs many tool calls concurrently, each routed to its own tool's
    /// executor, preserving input order in the returned vector.
    pub async fn execute_many(&self, calls: &[ToolCall], context: &ToolContext) -> Vec<Result<ToolResult, ToolError>> {
        let futs = calls.iter().map(|call| self.execute_with_retry(call, context));
        futures::future::join_all(futs).await
    }
}

pub(crate) fn jittered(delay: Duration, fraction: f64) -> Duration {
    if fraction <= 0.0 {
        return delay;
    }
    let mut rng = rand::thread_rng();
    let factor = 1.0 + rng.gen_range(-fraction..=fraction);
    let nanos = (delay.as_nanos() as f64 * factor.max(0.0)) as u64;
    Duration::from_nanos(nanos)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::{Tool, ToolDefinition};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FlakyTool {
        fail_times: AtomicUsize,
    }

    #[async_trait]
    impl Tool for FlakyTool {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition {
                name: "flaky".to_string(),
                description: "fails a fixed number of times then succeeds".to_string(),
                input_schema: serde_json::json!({"type": "object"}),
            }
        }

        async fn execute(&self, _input: serde_json::Value, _context: &ToolContext) -> Result<ToolResult, ToolError> {
            let remaining = self
                .fail_times
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| if v > 0 { Some(v - 1) } else { Some(0) })
                .unwrap();
            if remaining > 0 {
                return Err(ToolError::ExecutionFailed("connection reset".to_string()));
            }
            Ok(ToolResult { tool_call_id: String::new(), content: "ok".to_string(), is_error: false })
        }
    }

    struct SlowTool;

    #[async_trait]
    impl Tool for SlowTool {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition {
                name: "slow".to_string(),
                description: "never returns within the test's call timeout".to_string(),
                input_schema: serde_json::json!({"type": "object"}),
            }
        }

        async fn execute(&self, _input: serde_json::Value, _context: &ToolContext) -> Result<ToolResult, ToolError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(ToolResult { tool_call_id: String::new(), content: "too late".to_string(), is_error: false })
        }
    }

    fn ctx() -> ToolContext {
        ToolContext { working_directory: std::path::PathBuf::from("/tmp") }
    }

    fn retry_config(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            retryable_patterns: crate::loop_config::default_retryable_patterns(),
        }
    }

    #[tokio::test]
    async fn retries_until_success() {
        let mut registry = ToolRegistry::new();
        registry.register(FlakyTool { fail_times: AtomicUsize::new(2) }).unwrap();
        let executor = ToolExecutor::with_config(
            Arc::new(registry),
            ExecutorConfig { retry: retry_config(3), max_concurrent_tools: 1, ..ExecutorConfig::default() },
        );

        let call = ToolCall { id: "c1".to_string(), name: "flaky".to_string(), input: serde_json::json!({}) };
        let result = executor.execute_with_retry(&call, &ctx()).await.unwrap();
        assert_eq!(result.content, "ok");
    }

    #[tokio::test]
    async fn unknown_tool_is_not_retried() {
        let registry = ToolRegistry::new();
        let executor = ToolExecutor::new(Arc::new(registry));
        let call = ToolCall { id: "c1".to_string(), name: "nonexistent".to_string(), input: serde_json::json!({}) };
        let err = executor.execute_with_retry(&call, &ctx()).await.unwrap_err();
        assert!(matches!(err, ToolError::ExecutionFailed(_)));
        assert!(err.to_string().contains("failed after 1 attempts"));
    }

    #[tokio::test]
    async fn execute_many_preserves_order() {
        let mut registry = ToolRegistry::new();
        registry.register(FlakyTool { fail_times: AtomicUsize::new(0) }).unwrap();
        let executor = ToolExecutor::new(Arc::new(registry));
        let calls: Vec<ToolCall> = (0..5)
            .map(|i| ToolCall { id: format!("c{i}"), name: "flaky".to_string(), input: serde_json::json!({}) })
            .collect();
        let results = executor.execute_many(&calls, &ctx()).await;
        assert_eq!(results.len(), 5);
        assert!(results.iter().all(|r| r.is_ok()));
    }

    #[tokio::test]
    async fn call_timeout_trips_before_tool_completes() {
        let mut registry = ToolRegistry::new();
        registry.register(SlowTool).unwrap();
        let executor = ToolExecutor::with_config(
            Arc::new(registry),
            ExecutorConfig {
                retry: retry_config(0),
                max_concurrent_tools: 1,
                call_timeout: Duration::from_millis(20),
                queue_timeout: Duration::from_secs(5),
            },
        );
        let call = ToolCall { id: "c1".to_string(), name: "slow".to_string(), input: serde_json::json!({}) };
        let err = executor.execute_with_retry(&call, &ctx()).await.unwrap_err();
        assert!(err.to_string().contains("failed after 1 attempts"));
    }

    #[tokio::test]
    async fn pool_routes_by_tool_name_to_a_dedicated_executor() {
        let mut slow_registry = ToolRegistry::new();
        slow_registry.register(SlowTool).unwrap();
        let slow_executor = Arc::new(ToolExecutor::with_config(
            Arc::new(slow_registry),
            ExecutorConfig {
                retry: retry_config(0),
                max_concurrent_tools: 1,
                call_timeout: Duration::from_millis(20),
                queue_timeout: Duration::from_secs(5),
            },
        ));

        let mut default_registry = ToolRegistry::new();
        default_registry.register(FlakyTool { fail_times: AtomicUsize::new(0) }).unwrap();
        let default_executor = Arc::new(ToolExecutor::new(Arc::new(default_registry)));

        let mut pool = ExecutorPool::with_default(default_executor);
        pool.register("slow", slow_executor);

        let fast_call = ToolCall { id: "c1".to_string(), name: "flaky".to_string(), input: serde_json::json!({}) };
        let ok = pool.execute_with_retry(&fast_call, &ctx()).await.unwrap();
        assert_eq!(ok.content, "ok");

        let slow_call = ToolCall { id: "c2".to_string(), name: "slow".to_string(), input: serde_json::json!({}) };
        let err = pool.execute_with_retry(&slow_call, &ctx()).await.unwrap_err();
        assert!(err.to_string().contains("failed after 1 attempts"));
    }

    #[tokio::test]
    async fn non_retryable_error_stops_after_first_attempt() {
        struct AlwaysInvalid;
        #[async_trait]
        impl Tool for AlwaysInvalid {
            fn definition(&self) -> ToolDefinition {
                ToolDefinition {
                    name: "bad".to_string(),
                    description: "always rejects its input".to_string(),
                    input_schema: serde_json::json!({"type": "object"}),
                }
            }
            async fn execute(&self, _input: serde_json::Value, _context: &ToolContext) -> Result<ToolResult, ToolError> {
                Err(ToolError::InvalidInput("missing field".to_string()))
            }
        }

        let mut registry = ToolRegistry::new();
        registry.register(AlwaysInvalid).unwrap();
        let executor = ToolExecutor::with_config(
            Arc::new(registry),
            ExecutorConfig { retry: retry_config(5), max_concurrent_tools: 1, ..ExecutorConfig::default() },
        );
        let call = ToolCall { id: "c1".to_string(), name: "bad".to_string(), input: serde_json::json!({}) };
        let err = executor.execute_with_retry(&call, &ctx()).await.unwrap_err();
        assert!(err.to_string().contains("failed after 1 attempts"));
    }
}
