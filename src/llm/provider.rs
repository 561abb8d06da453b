//! Raw LLM provider trait and chat types.

use async_trait::async_trait;

use crate::error::LlmError;

/// Role of a chat turn sent to the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatRole {
    User,
    Assistant,
}

/// One turn of conversation context.
#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// A completion request: system instructions plus the ordered history,
/// newest turn last.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system_prompt: String,
    pub messages: Vec<ChatMessage>,
}

/// A completion response.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub content: String,
}

/// The raw vendor seam: one network call per `complete`.
///
/// Implementations report failures as `LlmError`; the retry policy and
/// fallback live in `llm::responder`, not here.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Model identifier for logging (e.g. "claude-sonnet-4-20250514").
    fn model_name(&self) -> &str;

    /// Send a completion request and return the full response.
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError>;
}
