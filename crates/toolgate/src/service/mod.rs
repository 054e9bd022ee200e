//! External services called from inside a reservation window.
//!
//! [`CompletionService`] is the seam metered tools call through. The HTTP
//! implementation talks to an OpenAI-compatible chat completions endpoint;
//! [`DisabledCompletionService`] stands in when no endpoint is configured.

pub mod retry;

pub use retry::RetryConfig;

use serde::Deserialize;
use serde_json::json;
use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

pub type ServiceFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ServiceError>> + Send + 'a>>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServiceError {
    #[error("completion service HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("request failed: {0}")]
    Network(String),
    #[error("unusable completion response: {0}")]
    InvalidResponse(String),
    #[error("completion service unavailable: {0}")]
    Disabled(String),
}

impl ServiceError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            ServiceError::Http { status, .. } => retry::is_transient_status(*status),
            ServiceError::Network(_) => true,
            ServiceError::InvalidResponse(_) | ServiceError::Disabled(_) => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub text: String,
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
}

/// Text completion backend used by metered tools.
pub trait CompletionService: Send + Sync {
    fn summarize<'a>(&'a self, text: &'a str, model: &'a str) -> ServiceFuture<'a, Completion>;
}

const SUMMARY_PROMPT: &str =
    "Summarize the user's text in a few sentences. Keep names, dates and numbers exact.";

/// OpenAI-compatible `/chat/completions` client.
#[derive(Debug, Clone)]
pub struct HttpCompletionService {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    max_tokens: u32,
}

impl HttpCompletionService {
    pub fn new(endpoint: impl Into<String>) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("toolgate/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| ServiceError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key: None,
            max_tokens: 512,
        })
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    async fn send(&self, text: &str, model: &str) -> Result<Completion, ServiceError> {
        let body = json!({
            "model": model,
            "max_tokens": self.max_tokens,
            "messages": [
                {"role": "system", "content": SUMMARY_PROMPT},
                {"role": "user", "content": text},
            ],
        });
        debug!(
            "completion request: model={model}, input={} chars",
            text.chars().count()
        );
        let start = Instant::now();

        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let resp = request
            .send()
            .await
            .map_err(|e| ServiceError::Network(e.to_string()))?;

        let status = resp.status();
        let raw = resp
            .text()
            .await
            .map_err(|e| ServiceError::Network(format!("failed to read response: {e}")))?;
        debug!(
            "completion response: HTTP {status} in {:.1}s ({} bytes)",
            start.elapsed().as_secs_f64(),
            raw.len()
        );
        trace!("completion body: {raw}");

        if !status.is_success() {
            return Err(ServiceError::Http {
                status: status.as_u16(),
                body: raw,
            });
        }
        parse_completion(&raw)
    }
}

impl CompletionService for HttpCompletionService {
    fn summarize<'a>(&'a self, text: &'a str, model: &'a str) -> ServiceFuture<'a, Completion> {
        Box::pin(self.send(text, model))
    }
}

#[derive(Deserialize)]
struct RawResponse {
    #[serde(default)]
    choices: Vec<RawChoice>,
    usage: Option<RawUsage>,
}

#[derive(Deserialize)]
struct RawChoice {
    message: RawMessage,
}

#[derive(Deserialize)]
struct RawMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct RawUsage {
    prompt_tokens: Option<u32>,
    completion_tokens: Option<u32>,
}

fn parse_completion(raw: &str) -> Result<Completion, ServiceError> {
    let parsed: RawResponse =
        serde_json::from_str(raw).map_err(|e| ServiceError::InvalidResponse(e.to_string()))?;
    let text = parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| ServiceError::InvalidResponse("no completion text".into()))?;
    Ok(Completion {
        text,
        prompt_tokens: parsed.usage.as_ref().and_then(|u| u.prompt_tokens),
        completion_tokens: parsed.usage.as_ref().and_then(|u| u.completion_tokens),
    })
}

/// A completion service that always fails with a permanent error.
#[derive(Debug, Clone)]
pub struct DisabledCompletionService {
    reason: String,
}

impl DisabledCompletionService {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl Default for DisabledCompletionService {
    fn default() -> Self {
        Self::new("no completion endpoint configured")
    }
}

impl CompletionService for DisabledCompletionService {
    fn summarize<'a>(&'a self, _text: &'a str, _model: &'a str) -> ServiceFuture<'a, Completion> {
        let err = ServiceError::Disabled(self.reason.clone());
        Box::pin(async move { Err(err) })
    }
}
