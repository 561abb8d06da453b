//! Retry, backoff, and fallback around the raw provider.
//!
//! This is the failure-containment boundary for AI generation: the
//! processor always gets a usable string back, never an error.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{error, warn};

use super::provider::{ChatMessage, CompletionRequest, LlmProvider};
use crate::error::LlmError;

/// Reply used when the provider is unavailable or returns nothing.
pub const FALLBACK_MESSAGE: &str = "I'm having trouble right now. Please try again in a moment.";

/// Longest single rate-limit wait, in seconds.
const MAX_RATE_LIMIT_WAIT_SECS: u64 = 30;

/// Capability interface the message processor depends on.
///
/// `generate_response` must always return usable text; alternative
/// providers slot in behind this trait without touching the processor.
#[async_trait]
pub trait AiResponder: Send + Sync {
    async fn generate_response(&self, history: &[ChatMessage], system_prompt: &str) -> String;

    /// Provider name for logging (e.g. "anthropic:claude-sonnet-4-20250514").
    fn name(&self) -> &str;
}

/// Wraps an `LlmProvider` with bounded retries and a fixed fallback.
///
/// Backoff schedule: rate-limit errors wait `min(2^(attempt+2), 30)`s
/// and keep consuming the shared attempt budget; transient errors wait
/// `2^attempt`s while attempts remain; any other error aborts retries.
pub struct RetryingResponder {
    provider: Arc<dyn LlmProvider>,
    name: String,
    max_retries: u32,
}

impl RetryingResponder {
    pub fn new(provider: Arc<dyn LlmProvider>, backend_label: &str, max_retries: u32) -> Self {
        let name = format!("{backend_label}:{}", provider.model_name());
        Self {
            provider,
            name,
            max_retries,
        }
    }
}

#[async_trait]
impl AiResponder for RetryingResponder {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate_response(&self, history: &[ChatMessage], system_prompt: &str) -> String {
        let request = CompletionRequest {
            system_prompt: system_prompt.to_string(),
            messages: history.to_vec(),
        };

        let mut last_error: Option<LlmError> = None;

        for attempt in 0..self.max_retries {
            match self.provider.complete(request.clone()).await {
                Ok(response) => {
                    if response.content.trim().is_empty() {
                        warn!(provider = %self.name, "Empty provider response, using fallback");
                        return FALLBACK_MESSAGE.to_string();
                    }
                    return response.content;
                }
                Err(e) if e.is_rate_limit() => {
                    let wait = (1u64 << (attempt + 2)).min(MAX_RATE_LIMIT_WAIT_SECS);
                    warn!(
                        provider = %self.name,
                        attempt = attempt + 1,
                        max = self.max_retries,
                        wait_secs = wait,
                        "Rate limited, backing off"
                    );
                    tokio::time::sleep(Duration::from_secs(wait)).await;
                    last_error = Some(e);
                }
                Err(e) if e.is_transient() => {
                    if attempt + 1 < self.max_retries {
                        let wait = 1u64 << attempt;
                        warn!(
                            provider = %self.name,
                            error = %e,
                            attempt = attempt + 1,
                            max = self.max_retries,
                            wait_secs = wait,
                            "Transient provider error, retrying"
                        );
                        tokio::time::sleep(Duration::from_secs(wait)).await;
                    }
                    last_error = Some(e);
                }
                Err(e) => {
                    error!(provider = %self.name, error = %e, "Non-retryable provider error");
                    last_error = Some(e);
                    break;
                }
            }
        }

        error!(
            provider = %self.name,
            error = ?last_error,
            attempts = self.max_retries,
            "Failed to generate a reply, using fallback"
        );
        FALLBACK_MESSAGE.to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use tokio::time::Instant;

    use super::*;
    use crate::llm::provider::CompletionResponse;

    /// What the stub provider does on each call.
    enum StubBehavior {
        Transient,
        RateLimited,
        NonRetryable,
        Empty,
        /// Fail transiently for the first n calls, then succeed.
        FailThenSucceed(u32),
    }

    struct StubProvider {
        behavior: StubBehavior,
        calls: AtomicU32,
    }

    impl StubProvider {
        fn new(behavior: StubBehavior) -> Arc<Self> {
            Arc::new(Self {
                behavior,
                calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl LlmProvider for StubProvider {
        fn model_name(&self) -> &str {
            "stub-model"
        }

        async fn complete(
            &self,
            _request: CompletionRequest,
        ) -> Result<CompletionResponse, LlmError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.behavior {
                StubBehavior::Transient => Err(LlmError::RequestFailed {
                    provider: "stub".to_string(),
                    reason: "boom".to_string(),
                }),
                StubBehavior::RateLimited => Err(LlmError::RateLimited {
                    provider: "stub".to_string(),
                    retry_after: None,
                }),
                StubBehavior::NonRetryable => Err(LlmError::AuthFailed {
                    provider: "stub".to_string(),
                }),
                StubBehavior::Empty => Ok(CompletionResponse {
                    content: "  ".to_string(),
                }),
                StubBehavior::FailThenSucceed(n) => {
                    if call < *n {
                        Err(LlmError::RequestFailed {
                            provider: "stub".to_string(),
                            reason: "boom".to_string(),
                        })
                    } else {
                        Ok(CompletionResponse {
                            content: "hello".to_string(),
                        })
                    }
                }
            }
        }
    }

    fn history() -> Vec<ChatMessage> {
        vec![ChatMessage::user("hi")]
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_exhaust_into_fallback_with_backoff() {
        let stub = StubProvider::new(StubBehavior::Transient);
        let responder = RetryingResponder::new(stub.clone(), "stub", 3);

        let start = Instant::now();
        let reply = responder.generate_response(&history(), "prompt").await;

        assert_eq!(reply, FALLBACK_MESSAGE);
        assert_eq!(stub.calls.load(Ordering::SeqCst), 3);
        // Backoff of 2^0 + 2^1 seconds; no sleep after the final attempt.
        assert!(start.elapsed() >= Duration::from_secs(3));
        assert!(start.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_schedule_waits_longer() {
        let stub = StubProvider::new(StubBehavior::RateLimited);
        let responder = RetryingResponder::new(stub.clone(), "stub", 3);

        let start = Instant::now();
        let reply = responder.generate_response(&history(), "prompt").await;

        assert_eq!(reply, FALLBACK_MESSAGE);
        assert_eq!(stub.calls.load(Ordering::SeqCst), 3);
        // min(2^2,30) + min(2^3,30) + min(2^4,30) = 4 + 8 + 16 seconds.
        assert!(start.elapsed() >= Duration::from_secs(28));
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_after_transient_failure() {
        let stub = StubProvider::new(StubBehavior::FailThenSucceed(1));
        let responder = RetryingResponder::new(stub.clone(), "stub", 3);

        let start = Instant::now();
        let reply = responder.generate_response(&history(), "prompt").await;

        assert_eq!(reply, "hello");
        assert_eq!(stub.calls.load(Ordering::SeqCst), 2);
        assert!(start.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_aborts_immediately() {
        let stub = StubProvider::new(StubBehavior::NonRetryable);
        let responder = RetryingResponder::new(stub.clone(), "stub", 3);

        let start = Instant::now();
        let reply = responder.generate_response(&history(), "prompt").await;

        assert_eq!(reply, FALLBACK_MESSAGE);
        assert_eq!(stub.calls.load(Ordering::SeqCst), 1);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn empty_success_becomes_fallback() {
        let stub = StubProvider::new(StubBehavior::Empty);
        let responder = RetryingResponder::new(stub.clone(), "stub", 3);

        let reply = responder.generate_response(&history(), "prompt").await;

        assert_eq!(reply, FALLBACK_MESSAGE);
        assert_eq!(stub.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn name_combines_backend_and_model() {
        let stub = StubProvider::new(StubBehavior::Empty);
        let responder = RetryingResponder::new(stub, "stub", 3);
        assert_eq!(responder.name(), "stub:stub-model");
    }
}
