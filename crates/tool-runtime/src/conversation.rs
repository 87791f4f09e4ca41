use crate::message::{Message, MessageKind, Role as MsgRole};
use crate::tool::{ToolCall, ToolResult};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;

/// A message in the wire-facing conversation a [`crate::provider::ToolAwareLlmProvider`]
/// actually speaks, as opposed to the richer [`crate::message::Message`] the
/// driver accumulates in [`crate::agent_context::AgentContext`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ConversationMessage {
    /// User's text input
    User(String),
    /// Assistant's response (may contain text and/or tool calls)
    Assistant(AssistantContent),
    /// Result of a tool execution
    ToolResult(ToolResult),
}

/// Content from the assistant that can contain mixed text and tool calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantContent {
    /// Text blocks in the response
    pub text: Option<String>,
    /// Tool calls requested by the assistant
    pub tool_calls: Vec<ToolCall>,
}

fn sha256_hex(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Converts an [`AgentContext`](crate::agent_context::AgentContext)-style
/// `Message` history down to the wire-facing [`ConversationMessage`] shape a
/// [`crate::provider::ToolAwareLlmProvider`] understands.
///
/// Only agent-visible messages are included (archived toolResult content and
/// synthetic tool-summary messages follow their own `visibility` rules).
/// Deduplicates two ways, both by scanning from the end so the latest
/// payload wins: `toolResult` messages by `tool_call_id`, and `tool_summary`
/// assistant messages by `sha256` of their text. Ordering of the kept set
/// follows original history order.
pub fn to_wire_messages(history: &[Message]) -> Vec<ConversationMessage> {
    // index -> is this the *last* toolResult message for its call id
    let mut last_index_for_id: std::collections::HashMap<&str, usize> = std::collections::HashMap::new();
    for (i, m) in history.iter().enumerate() {
        if m.role == MsgRole::ToolResult {
            if let Some(id) = &m.tool_call_id {
                last_index_for_id.insert(id.as_str(), i);
            }
        }
    }

    // index -> is this the *last* tool_summary assistant message with this text hash
    let mut last_index_for_summary_hash: std::collections::HashMap<String, usize> = std::collections::HashMap::new();
    for (i, m) in history.iter().enumerate() {
        if m.role == MsgRole::Assistant && m.visibility.kind == MessageKind::ToolSummary {
            last_index_for_summary_hash.insert(sha256_hex(&m.text()), i);
        }
    }

    let mut out = Vec::with_capacity(history.len());
    let mut already_emitted: HashSet<String> = HashSet::new();
    let mut already_emitted_summary_hashes: HashSet<String> = HashSet::new();

    for (i, m) in history.iter().enumerate() {
        if !m.is_agent_visible() {
            continue;
        }
        match m.role {
            MsgRole::User => out.push(ConversationMessage::User(m.text())),
            MsgRole::Assistant => {
                if m.visibility.kind == MessageKind::ToolSummary {
                    let hash = sha256_hex(&m.text());
                    if last_index_for_summary_hash.get(&hash) != Some(&i) {
                        continue; // superseded by a later identical summary
                    }
                    if already_emitted_summary_hashes.contains(&hash) {
                        continue;
                    }
                    already_emitted_summary_hashes.insert(hash);
                }

                let text = {
                    let t = m.text();
                    if t.is_empty() { None } else { Some(t) }
                };
                let tool_calls: Vec<ToolCall> = m
                    .tool_calls()
                    .into_iter()
                    .filter(|tc| !tc.id.is_empty())
                    .cloned()
                    .collect();
                out.push(ConversationMessage::Assistant(AssistantContent {
                    text,
                    tool_calls,
                }));
            }
            MsgRole::ToolResult => {
                let Some(id) = m.tool_call_id.clone() else { continue };
                if last_index_for_id.get(id.as_str()) != Some(&i) {
                    continue; // superseded by a later result for the same call
                }
                if already_emitted.contains(&id) {
                    continue;
                }
                already_emitted.insert(id.clone());
                out.push(ConversationMessage::ToolResult(ToolResult {
                    tool_call_id: id,
                    content: m.text(),
                    is_error: false,
                }));
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::ToolCall;

    #[test]
    fn wire_messages_round_trip_through_serde() {
        let msg = ConversationMessage::User("test".to_string());
        let json = serde_json::to_string(&msg).unwrap();
        let _roundtrip: ConversationMessage = serde_json::from_str(&json).unwrap();
    }

    #[test]
    fn to_wire_messages_keeps_latest_result_for_duplicate_call_id() {
        use crate::message::Message as M;

        let call = ToolCall {
            id: "call_1".to_string(),
            name: "bash_execute".to_string(),
            input: serde_json::json!({"command": "ls"}),
        };
        let stale = ToolResult {
            tool_call_id: "call_1".to_string(),
            content: "stale".to_string(),
            is_error: false,
        };
        let fresh = ToolResult {
            tool_call_id: "call_1".to_string(),
            content: "fresh".to_string(),
            is_error: false,
        };

        let history = vec![
            M::user("list files"),
            M::assistant(vec![crate::message::ContentBlock::ToolCall(call)]),
            M::tool_result(&stale, "bash_execute"),
            M::tool_result(&fresh, "bash_execute"),
        ];

        let wire = to_wire_messages(&history);
        let results: Vec<&ToolResult> = wire
            .iter()
            .filter_map(|m| match m {
                ConversationMessage::ToolResult(r) => Some(r),
                _ => None,
            })
            .collect();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].content, "fresh");
    }

    #[test]
    fn to_wire_messages_dedups_identical_tool_summaries_by_text_hash() {
        use crate::message::{ContentBlock, Message as M, MessageKind, Visibility};

        let summary = |text: &str| M {
            visibility: Visibility::tool_summary(),
            ..M::assistant(vec![ContentBlock::Text(text.to_string())])
        };

        let history = vec![
            M::user("run the tests"),
            summary("[tool summary: bash] ok"),
            summary("[tool summary: bash] ok"),
            summary("[tool summary: bash] different"),
        ];

        let wire = to_wire_messages(&history);
        let assistant_texts: Vec<&str> = wire
            .iter()
            .filter_map(|m| match m {
                ConversationMessage::Assistant(c) => c.text.as_deref(),
                _ => None,
            })
            .collect();

        // The duplicate "ok" summary collapses to one (the later one kept),
        // the distinct "different" summary survives independently.
        assert_eq!(assistant_texts, vec!["[tool summary: bash] ok", "[tool summary: bash] different"]);

        // Sanity: both surviving entries are indeed tool_summary-kind.
        let summary_count = history.iter().filter(|m| m.visibility.kind == MessageKind::ToolSummary).count();
        assert_eq!(summary_count, 3);
    }

    #[test]
    fn to_wire_messages_skips_non_agent_visible() {
        use crate::message::{Message as M, Visibility};

        let mut archived = M::user("old context");
        archived.visibility = Visibility::archived();
        let history = vec![archived, M::user("hello")];

        let wire = to_wire_messages(&history);
        assert_eq!(wire.len(), 1);
    }
}
