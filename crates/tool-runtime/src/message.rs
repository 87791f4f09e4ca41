//! Conversation-level data model: [`Message`], [`ContentBlock`], visibility metadata.
//!
//! This is the representation [`crate::agent_context::AgentContext`] accumulates and the
//! [`crate::driver::TurnDriver`] mutates turn by turn. It is richer than the
//! provider-facing [`crate::conversation::ConversationMessage`] — the conversion step
//! (`crate::conversation::to_wire_messages`) flattens a `Message` history down to what a
//! [`crate::provider::ToolAwareLlmProvider`] actually needs on the wire.

use crate::tool::{ToolCall, ToolResult};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Who sent a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    ToolResult,
}

/// A single piece of content within a message. An assistant message may mix
/// several of these (e.g. thinking, then text, then a tool call).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text(String),
    Image { mime: String, data: String },
    ToolCall(ToolCall),
    Thinking(String),
}

/// Token accounting reported by the provider for a single turn.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub total_tokens: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
    StopSequence,
    Error,
    Aborted,
}

/// Why a message is or isn't part of the window the model sees, and the
/// window a human-facing transcript shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    Normal,
    /// Original toolResult content that has been archived behind a summary.
    ToolResultArchived,
    /// A synthetic assistant message carrying a summary of archived tool results.
    ToolSummary,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Visibility {
    pub agent_visible: bool,
    pub user_visible: bool,
    pub kind: MessageKind,
}

impl Visibility {
    pub fn normal() -> Self {
        Self {
            agent_visible: true,
            user_visible: true,
            kind: MessageKind::Normal,
        }
    }

    pub fn archived() -> Self {
        Self {
            agent_visible: false,
            user_visible: true,
            kind: MessageKind::ToolResultArchived,
        }
    }

    pub fn tool_summary() -> Self {
        Self {
            agent_visible: true,
            user_visible: false,
            kind: MessageKind::ToolSummary,
        }
    }
}

/// A single record in conversation history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Vec<ContentBlock>,
    pub created_at_unix_nanos: u128,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub usage: Option<Usage>,
    pub stop_reason: Option<StopReason>,
    /// Required when `role == ToolResult`.
    pub tool_call_id: Option<String>,
    pub tool_name: Option<String>,
    pub visibility: Visibility,
}

impl Message {
    fn now_nanos() -> u128 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0)
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: vec![ContentBlock::Text(text.into())],
            created_at_unix_nanos: Self::now_nanos(),
            provider: None,
            model: None,
            usage: None,
            stop_reason: None,
            tool_call_id: None,
            tool_name: None,
            visibility: Visibility::normal(),
        }
    }

    pub fn assistant(content: Vec<ContentBlock>) -> Self {
        Self {
            role: Role::Assistant,
            content,
            created_at_unix_nanos: Self::now_nanos(),
            provider: None,
            model: None,
            usage: None,
            stop_reason: None,
            tool_call_id: None,
            tool_name: None,
            visibility: Visibility::normal(),
        }
    }

    /// Builds a `toolResult` message. Per the data-model invariant, every
    /// toolResult message must carry a non-empty `tool_call_id`.
    pub fn tool_result(result: &ToolResult, tool_name: impl Into<String>) -> Self {
        debug_assert!(!result.tool_call_id.is_empty(), "toolResult requires a tool_call_id");
        Self {
            role: Role::ToolResult,
            content: vec![ContentBlock::Text(result.content.clone())],
            created_at_unix_nanos: Self::now_nanos(),
            provider: None,
            model: None,
            usage: None,
            stop_reason: None,
            tool_call_id: Some(result.tool_call_id.clone()),
            tool_name: Some(tool_name.into()),
            visibility: Visibility::normal(),
        }
    }

    pub fn tool_calls(&self) -> Vec<&ToolCall> {
        self.content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::ToolCall(tc) => Some(tc),
                _ => None,
            })
            .collect()
    }

    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text(t) => Some(t.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    pub fn is_agent_visible(&self) -> bool {
        self.visibility.agent_visible
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_result_carries_id() {
        let result = ToolResult {
            tool_call_id: "call_1".to_string(),
            content: "ok".to_string(),
            is_error: false,
        };
        let msg = Message::tool_result(&result, "bash_execute");
        assert_eq!(msg.tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(msg.role, Role::ToolResult);
    }

    #[test]
    fn assistant_text_and_tool_calls_coexist() {
        let msg = Message::assistant(vec![
            ContentBlock::Text("checking".to_string()),
            ContentBlock::ToolCall(ToolCall {
                id: "call_1".to_string(),
                name: "bash_execute".to_string(),
                input: serde_json::json!({"command": "ls"}),
            }),
        ]);
        assert_eq!(msg.text(), "checking");
        assert_eq!(msg.tool_calls().len(), 1);
    }
}
