//! Inference gateway: uniform access to external answer-generation services.
//!
//! Two provider shapes exist. [`ChatProvider`] is a plain prompt → text
//! completion used for the "chatgpt" answer platform and for all reasoning
//! calls (planning, generation, critique). [`SearchProvider`] additionally
//! returns a ranked source-citation list. [`InferenceGateway`] fronts both
//! with a shared retry/backoff policy; every call carries the HTTP client's
//! timeout, so a hung provider surfaces as a failed task, never a hung run.

pub mod error;
pub mod openai;
pub mod perplexity;
pub mod types;

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;

pub use error::{ErrorContext, ProviderError};
pub use openai::OpenAiAdapter;
pub use perplexity::PerplexityAdapter;
pub use types::{ChatRequest, ChatResponse, FinishReason, Message, Role, SearchResponse};

/// Trait for chat completion providers.
#[async_trait::async_trait]
pub trait ChatProvider: Send + Sync {
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError>;
}

/// Trait for answer providers that return ranked source citations.
#[async_trait::async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, query: &str) -> Result<SearchResponse, ProviderError>;
}

/// Retry policy for the gateway.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub max_retries: u32,
    pub retry_base_delay: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            retry_base_delay: Duration::from_secs(1),
        }
    }
}

/// Front for the configured providers, adding retry with exponential backoff.
pub struct InferenceGateway {
    chat: Arc<dyn ChatProvider>,
    search: Arc<dyn SearchProvider>,
    config: GatewayConfig,
}

impl InferenceGateway {
    pub fn new(
        chat: Arc<dyn ChatProvider>,
        search: Arc<dyn SearchProvider>,
        config: GatewayConfig,
    ) -> Self {
        Self {
            chat,
            search,
            config,
        }
    }

    /// Build from environment variables with the default retry policy.
    pub fn from_env() -> Result<Self, ProviderError> {
        let chat = Arc::new(OpenAiAdapter::from_env()?);
        let search = Arc::new(PerplexityAdapter::from_env()?);
        Ok(Self::new(chat, search, GatewayConfig::default()))
    }

    pub async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, ProviderError> {
        let mut last_error: Option<ProviderError> = None;

        for attempt in 0..=self.config.max_retries {
            match self.chat.chat(&req).await {
                Ok(resp) => {
                    tracing::debug!(
                        caller = req.caller,
                        input_tokens = resp.input_tokens,
                        output_tokens = resp.output_tokens,
                        latency_ms = resp.latency.as_millis() as u64,
                        "chat call succeeded"
                    );
                    return Ok(resp);
                }
                Err(err) => {
                    tracing::warn!(
                        caller = req.caller,
                        code = err.code(),
                        attempt,
                        error = %err,
                        "chat call failed"
                    );
                    if !err.is_retryable() || attempt == self.config.max_retries {
                        return Err(err);
                    }
                    let delay = backoff_delay(self.config.retry_base_delay, attempt);
                    last_error = Some(err);
                    sleep(delay).await;
                }
            }
        }

        Err(last_error.unwrap_or_else(|| ProviderError::provider("openai", "unknown error", false)))
    }

    pub async fn search(&self, query: &str) -> Result<SearchResponse, ProviderError> {
        let mut last_error: Option<ProviderError> = None;

        for attempt in 0..=self.config.max_retries {
            match self.search.search(query).await {
                Ok(resp) => {
                    tracing::debug!(
                        query,
                        citations = resp.citations.len(),
                        simulated = resp.simulated,
                        "search call succeeded"
                    );
                    return Ok(resp);
                }
                Err(err) => {
                    tracing::warn!(query, code = err.code(), attempt, error = %err, "search call failed");
                    if !err.is_retryable() || attempt == self.config.max_retries {
                        return Err(err);
                    }
                    let delay = backoff_delay(self.config.retry_base_delay, attempt);
                    last_error = Some(err);
                    sleep(delay).await;
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| ProviderError::provider("perplexity", "unknown error", false)))
    }
}

fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let multiplier = 2u64.pow(attempt.min(5));
    base * multiplier as u32
}
