//! Bridge from rig-core completion models to our `LlmProvider` trait.

use async_trait::async_trait;

use rig::agent::AgentBuilder;
use rig::completion::{CompletionModel, Prompt};
use rig::message::{AssistantContent, Message, UserContent};
use rig::one_or_many::OneOrMany;

use super::provider::{ChatMessage, ChatRole, CompletionRequest, CompletionResponse, LlmProvider};
use crate::error::LlmError;

/// Adapts any rig `CompletionModel` (Anthropic, OpenAI) to `LlmProvider`.
pub struct RigAdapter<M: CompletionModel + Clone> {
    model: M,
    provider: &'static str,
    model_name: String,
}

impl<M: CompletionModel + Clone> RigAdapter<M> {
    pub fn new(model: M, provider: &'static str, model_name: &str) -> Self {
        Self {
            model,
            provider,
            model_name: model_name.to_string(),
        }
    }
}

#[async_trait]
impl<M: CompletionModel + Clone> LlmProvider for RigAdapter<M> {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        // rig's prompt API takes the newest turn separately from history.
        let Some((latest, prior)) = request.messages.split_last() else {
            return Err(LlmError::InvalidResponse {
                provider: self.provider.to_string(),
                reason: "no messages to send".to_string(),
            });
        };

        let mut history: Vec<Message> = prior.iter().map(to_rig_message).collect();

        let agent = AgentBuilder::new(self.model.clone())
            .preamble(&request.system_prompt)
            .build();

        let content = agent
            .prompt(latest.content.clone())
            .with_history(&mut history)
            .await
            .map_err(|e| classify_reason(self.provider, e.to_string()))?;

        Ok(CompletionResponse { content })
    }
}

fn to_rig_message(msg: &ChatMessage) -> Message {
    match msg.role {
        ChatRole::User => Message::User {
            content: OneOrMany::one(UserContent::text(msg.content.clone())),
        },
        ChatRole::Assistant => Message::Assistant {
            id: None,
            content: OneOrMany::one(AssistantContent::text(msg.content.clone())),
        },
    }
}

/// Sort a provider failure into the retry taxonomy by its description.
///
/// rig surfaces vendor errors as strings, so classification is textual:
/// rate-limit markers retry on the long schedule, auth markers abort,
/// everything else is treated as transient.
fn classify_reason(provider: &str, reason: String) -> LlmError {
    let lower = reason.to_lowercase();
    if lower.contains("429") || lower.contains("rate limit") || lower.contains("rate_limit")
        || lower.contains("overloaded")
    {
        LlmError::RateLimited {
            provider: provider.to_string(),
            retry_after: None,
        }
    } else if lower.contains("401") || lower.contains("403")
        || lower.contains("unauthorized") || lower.contains("authentication")
    {
        LlmError::AuthFailed {
            provider: provider.to_string(),
        }
    } else {
        LlmError::RequestFailed {
            provider: provider.to_string(),
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_markers_classified() {
        let err = classify_reason("anthropic", "HTTP 429 Too Many Requests".to_string());
        assert!(err.is_rate_limit());

        let err = classify_reason("anthropic", "model overloaded, try later".to_string());
        assert!(err.is_rate_limit());
    }

    #[test]
    fn auth_markers_abort_retries() {
        let err = classify_reason("openai", "401 Unauthorized".to_string());
        assert!(matches!(err, LlmError::AuthFailed { .. }));
        assert!(!err.is_transient());
        assert!(!err.is_rate_limit());
    }

    #[test]
    fn everything_else_is_transient() {
        let err = classify_reason("anthropic", "connection reset by peer".to_string());
        assert!(err.is_transient());
    }
}
