//! Shrinks tool-result content before it re-enters the conversation.
//!
//! Two paths, same heuristic core: [`ToolSummarizer::summarize`] runs inline
//! on the hot path (no tool-result shape has a teacher counterpart that
//! truncates, so this one is new), and [`AsyncToolSummarizer`] offloads the
//! same work to a single background worker reading a bounded channel — the
//! single-worker/bounded-mpsc shape the wider teacher workspace uses for its
//! queue consumers, re-derived here rather than copied since that crate isn't
//! part of this workspace.

use std::collections::HashSet;

use tokio::sync::{mpsc, oneshot, Semaphore};

use crate::message::{ContentBlock, Message, Role, Visibility};

#[derive(Debug, Clone, Copy)]
pub struct SummarizerConfig {
    /// Content at or under this length is returned unchanged.
    pub threshold_chars: usize,
    /// How much of the head/tail to keep when summarizing.
    pub keep_chars: usize,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            threshold_chars: 4000,
            keep_chars: 800,
        }
    }
}

pub struct ToolSummarizer {
    config: SummarizerConfig,
}

impl ToolSummarizer {
    pub fn new(config: SummarizerConfig) -> Self {
        Self { config }
    }

    /// Returns `content` unchanged if short enough, otherwise a head+tail
    /// extract noting how much was elided.
    pub fn summarize(&self, content: &str) -> String {
        if content.len() <= self.config.threshold_chars {
            return content.to_string();
        }
        let keep = self.config.keep_chars.min(content.len() / 2);
        let head = safe_prefix(content, keep);
        let tail = safe_suffix(content, keep);
        let elided = content.len() - head.len() - tail.len();
        format!("{head}\n...[{elided} chars omitted]...\n{tail}")
    }
}

impl Default for ToolSummarizer {
    fn default() -> Self {
        Self::new(SummarizerConfig::default())
    }
}

fn safe_prefix(s: &str, max_bytes: usize) -> &str {
    let mut end = max_bytes.min(s.len());
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

fn safe_suffix(s: &str, max_bytes: usize) -> &str {
    let mut start = s.len().saturating_sub(max_bytes);
    while start < s.len() && !s.is_char_boundary(start) {
        start += 1;
    }
    &s[start..]
}

/// Archives the oldest agent-visible `toolResult` messages one at a time
/// until at most `cutoff` remain agent-visible, replacing each with a
/// synthetic `tool_summary` assistant message. Returns how many were archived.
pub fn maybe_summarize_tool_results(history: &mut Vec<Message>, cutoff: usize, summarizer: &ToolSummarizer) -> usize {
    let mut archived = 0;
    loop {
        let visible_count = history.iter().filter(|m| m.role == Role::ToolResult && m.is_agent_visible()).count();
        if visible_count <= cutoff {
            break;
        }
        let Some(idx) = history.iter().position(|m| m.role == Role::ToolResult && m.is_agent_visible()) else {
            break;
        };

        let original_text = history[idx].text();
        let summary_text = summarizer.summarize(&original_text);
        let tool_name = history[idx].tool_name.clone().unwrap_or_default();
        history[idx].visibility = Visibility::archived();

        let marker = Message {
            visibility: Visibility::tool_summary(),
            ..Message::assistant(vec![ContentBlock::Text(format!("[tool summary: {tool_name}] {summary_text}"))])
        };
        history.insert(idx + 1, marker);
        archived += 1;
    }
    archived
}

/// Async-worker counterpart of [`maybe_summarize_tool_results`]: batches the
/// excess toolResult messages `batch_size` at a time, running up to
/// `max_pending_batches` batches concurrently against the shared
/// [`AsyncToolSummarizer`] worker. Defensively dedups by `tool_call_id` in
/// case the same result was queued twice.
pub async fn maybe_summarize_tool_results_async(
    history: &mut Vec<Message>,
    cutoff: usize,
    summarizer: &AsyncToolSummarizer,
    batch_size: usize,
    max_pending_batches: usize,
) -> usize {
    let visible_indices: Vec<usize> = history
        .iter()
        .enumerate()
        .filter(|(_, m)| m.role == Role::ToolResult && m.is_agent_visible())
        .map(|(i, _)| i)
        .collect();

    if visible_indices.len() <= cutoff {
        return 0;
    }
    let excess = visible_indices.len() - cutoff;
    let targets = &visible_indices[..excess];

    let mut seen = HashSet::new();
    let mut unique_targets = Vec::new();
    for &idx in targets {
        let id = history[idx].tool_call_id.clone().unwrap_or_default();
        if seen.insert(id) {
            unique_targets.push(idx);
        }
    }

    let semaphore = std::sync::Arc::new(Semaphore::new(max_pending_batches.max(1)));
    let mut summaries: Vec<(usize, String)> = Vec::new();

    for chunk in unique_targets.chunks(batch_size.max(1)) {
        let _permit = semaphore.acquire().await.expect("semaphore not closed");
        let futs = chunk.iter().map(|&idx| {
            let content = history[idx].text();
            async move { (idx, summarizer.summarize(content).await) }
        });
        summaries.extend(futures::future::join_all(futs).await);
    }

    summaries.sort_by_key(|(idx, _)| *idx);
    let mut offset = 0usize;
    for (idx, summary) in summaries.iter() {
        let actual_idx = idx + offset;
        let tool_name = history[actual_idx].tool_name.clone().unwrap_or_default();
        history[actual_idx].visibility = Visibility::archived();
        let marker = Message {
            visibility: Visibility::tool_summary(),
            ..Message::assistant(vec![ContentBlock::Text(format!("[tool summary: {tool_name}] {summary}"))])
        };
        history.insert(actual_idx + 1, marker);
        offset += 1;
    }

    summaries.len()
}

struct SummarizeRequest {
    content: String,
    reply: oneshot::Sender<String>,
}

/// A handle to a background summarization worker. Cloning the handle shares
/// the same worker and channel.
#[derive(Clone)]
pub struct AsyncToolSummarizer {
    tx: mpsc::Sender<SummarizeRequest>,
}

impl AsyncToolSummarizer {
    /// Spawns the single worker task and returns a handle to it. The
    /// returned `JoinHandle` completes once every handle clone is dropped.
    pub fn spawn(config: SummarizerConfig, channel_capacity: usize) -> (Self, tokio::task::JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<SummarizeRequest>(channel_capacity.max(1));
        let summarizer = ToolSummarizer::new(config);

        let handle = tokio::spawn(async move {
            while let Some(req) = rx.recv().await {
                let summary = summarizer.summarize(&req.content);
                let _ = req.reply.send(summary);
            }
        });

        (Self { tx }, handle)
    }

    /// Queues `content` for summarization and awaits the result. Returns the
    /// content unchanged (no truncation) if the worker has shut down.
    pub async fn summarize(&self, content: String) -> String {
        let (reply_tx, reply_rx) = oneshot::channel();
        let fallback = content.clone();
        if self
            .tx
            .send(SummarizeRequest { content, reply: reply_tx })
            .await
            .is_err()
        {
            return fallback;
        }
        reply_rx.await.unwrap_or(fallback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_content_passes_through() {
        let s = ToolSummarizer::default();
        assert_eq!(s.summarize("hello"), "hello");
    }

    #[test]
    fn long_content_is_elided() {
        let s = ToolSummarizer::new(SummarizerConfig {
            threshold_chars: 10,
            keep_chars: 4,
        });
        let input = "a".repeat(100);
        let out = s.summarize(&input);
        assert!(out.contains("omitted"));
        assert!(out.len() < input.len());
    }

    #[tokio::test]
    async fn async_worker_summarizes_and_shuts_down_cleanly() {
        let (handle, join) = AsyncToolSummarizer::spawn(
            SummarizerConfig { threshold_chars: 5, keep_chars: 2 },
            8,
        );
        let out = handle.summarize("abcdefghij".to_string()).await;
        assert!(out.contains("omitted"));
        drop(handle);
        join.await.unwrap();
    }

    #[tokio::test]
    async fn multiple_requests_all_get_replies() {
        let (handle, _join) = AsyncToolSummarizer::spawn(SummarizerConfig::default(), 8);
        let a = handle.clone();
        let b = handle.clone();
        let (ra, rb) = tokio::join!(a.summarize("x".repeat(10)), b.summarize("y".repeat(10)));
        assert_eq!(ra, "x".repeat(10));
        assert_eq!(rb, "y".repeat(10));
    }

    fn tool_result_message(call_id: &str, content: &str) -> Message {
        Message::tool_result(
            &crate::tool::ToolResult { tool_call_id: call_id.to_string(), content: content.to_string(), is_error: false },
            "bash_execute",
        )
    }

    #[test]
    fn sync_archive_stops_at_cutoff() {
        let mut history = vec![
            tool_result_message("c1", "one"),
            tool_result_message("c2", "two"),
            tool_result_message("c3", "three"),
        ];
        let summarizer = ToolSummarizer::default();
        let archived = maybe_summarize_tool_results(&mut history, 1, &summarizer);
        assert_eq!(archived, 2);

        let visible = history.iter().filter(|m| m.role == Role::ToolResult && m.is_agent_visible()).count();
        assert_eq!(visible, 1);
        let summaries = history.iter().filter(|m| m.visibility.kind == crate::message::MessageKind::ToolSummary).count();
        assert_eq!(summaries, 2);
    }

    #[test]
    fn sync_archive_is_a_no_op_under_cutoff() {
        let mut history = vec![tool_result_message("c1", "one")];
        let summarizer = ToolSummarizer::default();
        let archived = maybe_summarize_tool_results(&mut history, 5, &summarizer);
        assert_eq!(archived, 0);
        assert!(history[0].is_agent_visible());
    }

    #[tokio::test]
    async fn async_batch_archives_excess_and_dedups_by_call_id() {
        let mut history = vec![
            tool_result_message("c1", "one"),
            tool_result_message("c1", "one-again"),
            tool_result_message("c2", "two"),
            tool_result_message("c3", "three"),
        ];
        let (summarizer, _join) = AsyncToolSummarizer::spawn(SummarizerConfig::default(), 8);
        let archived = maybe_summarize_tool_results_async(&mut history, 1, &summarizer, 4, 2).await;
        // 4 toolResults - 1 cutoff = 3 excess, but "c1" appears twice so dedup drops one.
        assert_eq!(archived, 2);
    }
}
