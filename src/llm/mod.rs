//! LLM integration.
//!
//! Supports:
//! - **Anthropic**: Direct API access via rig-core
//! - **OpenAI**: Direct API access via rig-core
//!
//! rig-core handles HTTP transport; `RigAdapter` bridges rig's
//! `CompletionModel` to our `LlmProvider` trait, and `RetryingResponder`
//! adds the retry/fallback policy the processor relies on.

pub mod provider;
pub mod responder;
mod rig_adapter;

pub use provider::{ChatMessage, ChatRole, CompletionRequest, CompletionResponse, LlmProvider};
pub use responder::{AiResponder, FALLBACK_MESSAGE, RetryingResponder};
pub use rig_adapter::RigAdapter;

use std::sync::Arc;

use rig::client::CompletionClient;
use secrecy::ExposeSecret;

use crate::error::LlmError;

/// Default attempt budget for one generation.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Supported LLM backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmBackend {
    Anthropic,
    OpenAi,
}

impl LlmBackend {
    /// Parse a provider identifier from configuration.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "anthropic" => Some(Self::Anthropic),
            "openai" => Some(Self::OpenAi),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            LlmBackend::Anthropic => "anthropic",
            LlmBackend::OpenAi => "openai",
        }
    }
}

/// Configuration for creating an LLM provider.
#[derive(Clone)]
pub struct LlmConfig {
    pub backend: LlmBackend,
    pub api_key: secrecy::SecretString,
    pub model: String,
    pub max_retries: u32,
}

/// Create a raw provider from configuration.
pub fn create_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    match config.backend {
        LlmBackend::Anthropic => create_anthropic_provider(config),
        LlmBackend::OpenAi => create_openai_provider(config),
    }
}

/// Create the retrying responder the message processor depends on.
pub fn create_responder(config: &LlmConfig) -> Result<Arc<dyn AiResponder>, LlmError> {
    let provider = create_provider(config)?;
    Ok(Arc::new(RetryingResponder::new(
        provider,
        config.backend.label(),
        config.max_retries,
    )))
}

fn create_anthropic_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    use rig::providers::anthropic;

    let client: rig::client::Client<anthropic::client::AnthropicExt> =
        anthropic::Client::new(config.api_key.expose_secret()).map_err(|e| {
            LlmError::RequestFailed {
                provider: "anthropic".to_string(),
                reason: format!("Failed to create Anthropic client: {}", e),
            }
        })?;

    let model = client.completion_model(&config.model);
    tracing::info!("Using Anthropic (model: {})", config.model);
    Ok(Arc::new(RigAdapter::new(model, "anthropic", &config.model)))
}

fn create_openai_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    use rig::providers::openai;

    let client: rig::client::Client<openai::client::OpenAIResponsesExt> =
        openai::Client::new(config.api_key.expose_secret()).map_err(|e| {
            LlmError::RequestFailed {
                provider: "openai".to_string(),
                reason: format!("Failed to create OpenAI client: {}", e),
            }
        })?;

    let model = client.completion_model(&config.model);
    tracing::info!("Using OpenAI (model: {})", config.model);
    Ok(Arc::new(RigAdapter::new(model, "openai", &config.model)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_parse_known_and_unknown() {
        assert_eq!(LlmBackend::parse("anthropic"), Some(LlmBackend::Anthropic));
        assert_eq!(LlmBackend::parse("OpenAI"), Some(LlmBackend::OpenAi));
        assert_eq!(LlmBackend::parse("bedrock"), None);
    }

    #[test]
    fn create_provider_constructs_without_network() {
        // rig clients accept any string as API key at construction time;
        // auth failures happen at request time.
        let config = LlmConfig {
            backend: LlmBackend::Anthropic,
            api_key: secrecy::SecretString::from("test-key"),
            model: "claude-sonnet-4-20250514".to_string(),
            max_retries: DEFAULT_MAX_RETRIES,
        };
        let provider = create_provider(&config);
        assert!(provider.is_ok());
        assert_eq!(provider.unwrap().model_name(), "claude-sonnet-4-20250514");
    }

    #[test]
    fn create_responder_names_backend_and_model() {
        let config = LlmConfig {
            backend: LlmBackend::OpenAi,
            api_key: secrecy::SecretString::from("sk-test"),
            model: "gpt-4o-mini".to_string(),
            max_retries: DEFAULT_MAX_RETRIES,
        };
        let responder = create_responder(&config).unwrap();
        assert_eq!(responder.name(), "openai:gpt-4o-mini");
    }
}
