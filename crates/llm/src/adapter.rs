//! Wraps a `crates/llm` [`LlmProvider`] as a
//! `stupid_tool_runtime::bridge::SimpleLlmProvider`, so any provider that
//! only implements the older non-streaming interface can still be driven
//! through [`stupid_tool_runtime::bridge::LlmProviderBridge`] into the
//! tool-aware streaming contract.

use async_trait::async_trait;
use stupid_tool_runtime::bridge::{BridgeError, SimpleLlmProvider, SimpleMessage, SimpleRole};

use crate::provider::{LlmProvider, Message, Role};

pub struct LlmProviderAdapter {
    inner: Box<dyn LlmProvider>,
}

impl LlmProviderAdapter {
    pub fn new(inner: Box<dyn LlmProvider>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl SimpleLlmProvider for LlmProviderAdapter {
    async fn complete(
        &self,
        messages: Vec<SimpleMessage>,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String, BridgeError> {
        let converted: Vec<Message> = messages
            .into_iter()
            .map(|m| Message {
                role: match m.role {
                    SimpleRole::System => Role::System,
                    SimpleRole::User => Role::User,
                    SimpleRole::Assistant => Role::Assistant,
                },
                content: m.content,
            })
            .collect();

        self.inner
            .complete(converted, temperature, max_tokens)
            .await
            .map_err(|e| BridgeError(e.to_string()))
    }
}
