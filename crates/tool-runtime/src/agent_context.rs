//! [`AgentContext`]: the mutable state a single session accumulates —
//! system prompt, message history, the registered tool set, an optional
//! allow-list, and the last compaction summary.
//!
//! Owned by [`crate::driver::TurnDriver`]'s caller (the `Agent` façade in the
//! `stupid-agent` crate); mutated only on the turn's own task — there is no
//! internal locking here.

use std::collections::HashSet;
use std::sync::Arc;

use crate::compactor::CompactionSummary;
use crate::message::Message;
use crate::registry::ToolRegistry;

pub struct AgentContext {
    pub system_prompt: String,
    pub messages: Vec<Message>,
    pub tools: Arc<ToolRegistry>,
    /// When set, only these tool names may be dispatched.
    pub allowed_tools: Option<HashSet<String>>,
    pub last_compaction: Option<CompactionSummary>,
}

impl AgentContext {
    pub fn new(system_prompt: impl Into<String>, tools: Arc<ToolRegistry>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            messages: Vec::new(),
            tools,
            allowed_tools: None,
            last_compaction: None,
        }
    }

    pub fn with_allowed_tools(mut self, allowed: HashSet<String>) -> Self {
        self.allowed_tools = Some(allowed);
        self
    }

    pub fn is_allowed(&self, tool_name: &str) -> bool {
        match &self.allowed_tools {
            Some(set) => set.contains(tool_name),
            None => true,
        }
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Crude token-budget proxy used by [`crate::compactor::Compactor`]
    /// implementations that don't have access to the provider's own
    /// tokenizer: 4 bytes/token over agent-visible content.
    pub fn approx_tokens(&self) -> usize {
        self.messages
            .iter()
            .filter(|m| m.is_agent_visible())
            .map(|m| m.text().len() / 4)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allowed_tools_none_means_everything_is_allowed() {
        let ctx = AgentContext::new("sys", Arc::new(ToolRegistry::new()));
        assert!(ctx.is_allowed("anything"));
    }

    #[test]
    fn allowed_tools_restricts_dispatch() {
        let mut set = HashSet::new();
        set.insert("bash_execute".to_string());
        let ctx = AgentContext::new("sys", Arc::new(ToolRegistry::new())).with_allowed_tools(set);
        assert!(ctx.is_allowed("bash_execute"));
        assert!(!ctx.is_allowed("file_write"));
    }
}
