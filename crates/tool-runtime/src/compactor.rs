//! History compaction: the `Compactor` trait plus a usable `TailCompactor`
//! default. Generalizes the legacy `Conversation::maybe_truncate`
//! (`conversation.rs`), which just drops the oldest message outright, into a
//! pluggable strategy that archives the dropped prefix (keeping it for a
//! human-facing transcript) and replaces it with a synthetic summary message
//! so the model doesn't lose all context of what came before.

use async_trait::async_trait;

use crate::message::{ContentBlock, Message, MessageKind, Visibility};

#[derive(Debug, Clone, Copy, Default)]
pub struct CompactionSummary {
    pub archived_messages: usize,
    pub summary_chars: usize,
}

#[async_trait]
pub trait Compactor: Send + Sync {
    /// Whether `history` should be compacted given an approximate token budget.
    fn should_compact(&self, history: &[Message], approx_tokens: usize, budget_tokens: usize) -> bool {
        let _ = history;
        approx_tokens > budget_tokens
    }

    /// Compacts `history` in place, returning what changed. Implementations
    /// must not remove messages outright — only flip `visibility` and/or
    /// insert synthetic summary messages — so a user-facing transcript stays
    /// complete even after the agent stops seeing the archived portion.
    async fn compact(&self, history: &mut Vec<Message>) -> CompactionSummary;
}

/// Keeps the last `keep_last` agent-visible messages verbatim, archives
/// everything older, and inserts one synthetic summary message describing
/// what was dropped.
pub struct TailCompactor {
    pub keep_last: usize,
}

impl TailCompactor {
    pub fn new(keep_last: usize) -> Self {
        Self { keep_last: keep_last.max(1) }
    }

    fn summarize(dropped: &[Message]) -> String {
        if dropped.is_empty() {
            return String::new();
        }
        let mut tool_names = Vec::new();
        for m in dropped {
            for tc in m.tool_calls() {
                if !tool_names.contains(&tc.name) {
                    tool_names.push(tc.name.clone());
                }
            }
        }
        let mut summary = format!(
            "[earlier conversation summary: {} message(s) archived]",
            dropped.len()
        );
        if !tool_names.is_empty() {
            summary.push_str(&format!(" Tools used: {}.", tool_names.join(", ")));
        }
        summary
    }
}

#[async_trait]
impl Compactor for TailCompactor {
    async fn compact(&self, history: &mut Vec<Message>) -> CompactionSummary {
        let visible_indices: Vec<usize> = history
            .iter()
            .enumerate()
            .filter(|(_, m)| m.is_agent_visible())
            .map(|(i, _)| i)
            .collect();

        if visible_indices.len() <= self.keep_last {
            return CompactionSummary::default();
        }

        let cutoff = visible_indices[visible_indices.len() - self.keep_last];
        let dropped: Vec<Message> = history[..cutoff]
            .iter()
            .filter(|m| m.is_agent_visible())
            .cloned()
            .collect();

        for m in history[..cutoff].iter_mut() {
            if m.is_agent_visible() {
                m.visibility = Visibility::archived();
            }
        }

        let summary_text = Self::summarize(&dropped);
        let summary_chars = summary_text.len();
        let mut summary_msg = Message::assistant(vec![ContentBlock::Text(summary_text)]);
        summary_msg.visibility = Visibility {
            agent_visible: true,
            user_visible: false,
            kind: MessageKind::ToolSummary,
        };

        history.insert(cutoff, summary_msg);

        CompactionSummary {
            archived_messages: dropped.len(),
            summary_chars,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{ContentBlock as CB, Message as M};
    use crate::tool::ToolCall;

    #[tokio::test]
    async fn keeps_last_n_and_archives_the_rest() {
        let mut history: Vec<Message> = (0..10).map(|i| M::user(format!("msg {i}"))).collect();
        let compactor = TailCompactor::new(3);
        let summary = compactor.compact(&mut history).await;

        assert_eq!(summary.archived_messages, 7);
        let agent_visible_count = history.iter().filter(|m| m.is_agent_visible()).count();
        // 3 kept + 1 synthetic summary message
        assert_eq!(agent_visible_count, 4);
        // Full transcript still has all 10 originals + 1 summary = 11
        assert_eq!(history.len(), 11);
    }

    #[tokio::test]
    async fn no_op_when_under_keep_last() {
        let mut history: Vec<Message> = (0..2).map(|i| M::user(format!("msg {i}"))).collect();
        let compactor = TailCompactor::new(5);
        let summary = compactor.compact(&mut history).await;
        assert_eq!(summary.archived_messages, 0);
        assert_eq!(history.len(), 2);
    }

    #[tokio::test]
    async fn summary_mentions_tool_names_used_in_dropped_messages() {
        let mut history = vec![
            M::assistant(vec![CB::ToolCall(ToolCall {
                id: "c1".to_string(),
                name: "bash_execute".to_string(),
                input: serde_json::json!({"command": "ls"}),
            })]),
            M::user("a"),
            M::user("b"),
            M::user("c"),
        ];
        let compactor = TailCompactor::new(1);
        compactor.compact(&mut history).await;
        let summary_msg = history
            .iter()
            .find(|m| matches!(m.visibility.kind, MessageKind::ToolSummary))
            .unwrap();
        assert!(summary_msg.text().contains("bash_execute"));
    }

    #[test]
    fn should_compact_respects_budget() {
        let compactor = TailCompactor::new(5);
        assert!(compactor.should_compact(&[], 101, 100));
        assert!(!compactor.should_compact(&[], 99, 100));
    }
}
