//! Perplexity adapter: answer generation with ranked source citations.
//!
//! When no API key is configured the adapter answers from a small
//! deterministic simulator instead of the network, so demo runs and offline
//! tests produce stable output.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

use super::error::{ErrorContext, ProviderError};
use super::types::SearchResponse;
use super::SearchProvider;

const DEFAULT_BASE_URL: &str = "https://api.perplexity.ai";
const DEFAULT_MODEL: &str = "sonar";
const DEFAULT_TIMEOUT_SECONDS: u64 = 30;

const SEARCH_SYSTEM_PROMPT: &str =
    "You are a helpful search assistant. Provide accurate information with sources.";

/// Perplexity API adapter.
#[derive(Debug, Clone)]
pub struct PerplexityAdapter {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl PerplexityAdapter {
    /// Create from environment variables.
    ///
    /// `PERPLEXITY_API_KEY` is optional: without it every search is served by
    /// the simulator. `PERPLEXITY_BASE_URL` and `PERPLEXITY_TIMEOUT_SECONDS`
    /// override the defaults.
    pub fn from_env() -> Result<Self, ProviderError> {
        let api_key = std::env::var("PERPLEXITY_API_KEY").ok();

        let base_url =
            std::env::var("PERPLEXITY_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.into());

        let timeout = std::env::var("PERPLEXITY_TIMEOUT_SECONDS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(DEFAULT_TIMEOUT_SECONDS));

        Self::with_config(api_key, base_url, timeout)
    }

    /// Create with custom configuration.
    pub fn with_config(
        api_key: Option<String>,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        if let Some(key) = &api_key {
            let auth_value = HeaderValue::from_str(&format!("Bearer {key}"))
                .map_err(|_| ProviderError::config("Invalid API key format"))?;
            headers.insert(AUTHORIZATION, auth_value);
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .gzip(true)
            .build()
            .map_err(|e| ProviderError::config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into(),
            api_key,
        })
    }

    /// Whether searches are served by the simulator.
    pub fn is_simulated(&self) -> bool {
        self.api_key.is_none()
    }

    fn search_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

// =============================================================================
// API TYPES
// =============================================================================

#[derive(Serialize)]
struct SearchApiRequest<'a> {
    model: &'a str,
    messages: Vec<ApiMessage<'a>>,
}

#[derive(Serialize)]
struct ApiMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct SearchApiResponse {
    choices: Option<Vec<Choice>>,
    #[serde(default)]
    citations: Vec<String>,
    error: Option<ApiError>,
}

#[derive(Deserialize)]
struct Choice {
    message: Option<ChoiceMessage>,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ApiError {
    message: Option<String>,
}

// =============================================================================
// SEARCH PROVIDER IMPL
// =============================================================================

#[async_trait]
impl SearchProvider for PerplexityAdapter {
    async fn search(&self, query: &str) -> Result<SearchResponse, ProviderError> {
        if self.api_key.is_none() {
            return Ok(simulate_response(query));
        }

        let start = Instant::now();

        let api_req = SearchApiRequest {
            model: DEFAULT_MODEL,
            messages: vec![
                ApiMessage {
                    role: "system",
                    content: SEARCH_SYSTEM_PROMPT,
                },
                ApiMessage {
                    role: "user",
                    content: query,
                },
            ],
        };

        let response = self
            .client
            .post(self.search_url())
            .json(&api_req)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            let ctx = ErrorContext::new().with_status(status.as_u16());
            return Err(match status.as_u16() {
                429 => ProviderError::rate_limited(Duration::from_secs(60), ctx),
                _ => ProviderError::provider_with_context(
                    "perplexity",
                    format!("HTTP {}", status.as_u16()),
                    status.as_u16() >= 500,
                    ctx,
                ),
            });
        }

        let parsed: SearchApiResponse = serde_json::from_str(&body).map_err(|e| {
            ProviderError::provider("perplexity", format!("Invalid JSON: {e}"), false)
        })?;

        if let Some(error) = parsed.error {
            return Err(ProviderError::provider(
                "perplexity",
                error.message.unwrap_or_default(),
                false,
            ));
        }

        let content = parsed
            .choices
            .and_then(|c| c.into_iter().next())
            .and_then(|c| c.message)
            .and_then(|m| m.content)
            .unwrap_or_default();

        Ok(SearchResponse {
            content,
            citations: parsed.citations,
            latency: start.elapsed(),
            simulated: false,
        })
    }
}

// =============================================================================
// SIMULATOR
// =============================================================================

/// Deterministic canned answers for demo queries, with a generic fallback.
fn simulate_response(query: &str) -> SearchResponse {
    let (content, citations): (String, Vec<String>) = match query.to_lowercase().as_str() {
        "best ai productivity tools" => (
            "The best AI productivity tools include Notion AI for note-taking and \
             organization, Asana for project management with AI features, and ClickUp \
             for comprehensive task management. These tools leverage artificial \
             intelligence to enhance workflow automation, smart scheduling, and \
             intelligent task prioritization."
                .to_string(),
            vec![
                "https://notion.so/product/ai".to_string(),
                "https://asana.com/ai".to_string(),
                "https://clickup.com/features/ai".to_string(),
            ],
        ),
        "best crm software" => (
            "Leading CRM software solutions include HubSpot CRM for its comprehensive \
             free tier, Salesforce for enterprise-scale operations, and Pipedrive for \
             sales-focused teams. These platforms offer contact management, pipeline \
             tracking, and automation features."
                .to_string(),
            vec![
                "https://hubspot.com/products/crm".to_string(),
                "https://salesforce.com".to_string(),
                "https://pipedrive.com".to_string(),
            ],
        ),
        _ => (
            format!(
                "Here are some options for '{query}': Various tools and platforms are \
                 available in this category, each with unique features and benefits."
            ),
            Vec::new(),
        ),
    };

    SearchResponse {
        content,
        citations,
        latency: Duration::from_millis(0),
        simulated: true,
    }
}
