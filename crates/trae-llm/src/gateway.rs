//! The model gateway contract

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::LlmError;
use crate::message::{Message, ToolDefinition};

/// Read-only view of the settings for one model call
pub trait ModelSettings: Send + Sync {
    fn provider(&self) -> &str;
    fn model(&self) -> &str;
    fn max_tokens(&self) -> u32;
    fn temperature(&self) -> f32;
    fn top_p(&self) -> f32;
    fn top_k(&self) -> u32;
    fn parallel_tool_calls(&self) -> bool;
    fn max_retries(&self) -> u32;
    fn supports_tool_calling(&self) -> bool;
    fn api_key(&self) -> &str;
    fn base_url(&self) -> Option<&str>;
    fn api_version(&self) -> Option<&str>;

    fn stop_sequences(&self) -> &[String] {
        &[]
    }
}

/// Sends a conversation to a model and returns its next message.
///
/// Implementations never panic on backend failures; every failure is a
/// categorised [`LlmError`]. Decorators (retry, cache) implement the same
/// trait so they can be stacked freely.
#[async_trait]
pub trait ModelGateway: Send + Sync {
    /// Provider identifier, e.g. "openai"
    fn provider(&self) -> &str;

    fn supports_tool_calling(&self) -> bool {
        true
    }

    async fn chat(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
        settings: &dyn ModelSettings,
        cancel: &CancellationToken,
    ) -> Result<Message, LlmError>;
}

#[async_trait]
impl<G: ModelGateway + ?Sized> ModelGateway for Arc<G> {
    fn provider(&self) -> &str {
        (**self).provider()
    }

    fn supports_tool_calling(&self) -> bool {
        (**self).supports_tool_calling()
    }

    async fn chat(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
        settings: &dyn ModelSettings,
        cancel: &CancellationToken,
    ) -> Result<Message, LlmError> {
        (**self).chat(messages, tools, settings, cancel).await
    }
}
