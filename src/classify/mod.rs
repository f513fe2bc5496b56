//! Classifier adapter — wraps the external text-classification service.
//!
//! The service speaks the OpenAI-compatible chat-completions protocol
//! (Groq-style free tiers in practice). The adapter owns transient-failure
//! retry with backoff; definitive verdicts (null, low confidence, missing
//! fields) are the pipeline's policy, not retried here.

pub mod parse;

pub use parse::{ParsedOutcome, parse_response, system_prompt, user_prompt};

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::ClassifyError;
use crate::pipeline::types::RawEvent;

/// Near-deterministic extraction.
const TEMPERATURE: f32 = 0.1;

/// Classification capability, one call per event.
#[async_trait]
pub trait Classifier: Send + Sync {
    /// Model identifier for logging.
    fn name(&self) -> &str;

    /// Classify one event. Transient failures are retried internally;
    /// an `Err` here means the event should be re-attempted next run.
    async fn classify(&self, event: &RawEvent) -> Result<ParsedOutcome, ClassifyError>;
}

/// Configuration for the HTTP classifier.
#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    /// OpenAI-compatible API base, e.g. `https://api.groq.com/openai/v1`.
    pub api_base: String,
    pub model: String,
    pub api_key: SecretString,
    /// Attempts per event before surfacing a transient failure.
    pub max_attempts: u32,
}

impl ClassifierConfig {
    pub fn new(api_key: SecretString) -> Self {
        Self {
            api_base: "https://api.groq.com/openai/v1".to_string(),
            model: "llama-3.3-70b-versatile".to_string(),
            api_key,
            max_attempts: 3,
        }
    }
}

// ── Wire types ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

/// HTTP-backed classifier.
pub struct HttpClassifier {
    client: reqwest::Client,
    config: ClassifierConfig,
}

impl HttpClassifier {
    pub fn new(config: ClassifierConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    async fn request_once(&self, prompt: &str) -> Result<String, ClassifyError> {
        let url = format!("{}/chat/completions", self.config.api_base.trim_end_matches('/'));
        let body = serde_json::json!({
            "model": self.config.model,
            "messages": [{"role": "user", "content": prompt}],
            "temperature": TEMPERATURE,
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(self.config.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| ClassifyError::Transient(format!("request failed: {e}")))?;

        let status = response.status();
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(ClassifyError::Auth),
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = response
                    .headers()
                    .get(reqwest::header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|s| s.parse::<u64>().ok())
                    .map(Duration::from_secs);
                Err(ClassifyError::RateLimited { retry_after })
            }
            s if s.is_server_error() => {
                Err(ClassifyError::Transient(format!("server error: {status}")))
            }
            s if !s.is_success() => {
                Err(ClassifyError::Transient(format!("unexpected status: {status}")))
            }
            _ => {
                let parsed: ChatResponse = response
                    .json()
                    .await
                    .map_err(|e| ClassifyError::Transient(format!("body read failed: {e}")))?;
                parsed
                    .choices
                    .into_iter()
                    .next()
                    .map(|c| c.message.content)
                    .ok_or_else(|| {
                        ClassifyError::InvalidResponse("completion had no choices".into())
                    })
            }
        }
    }
}

#[async_trait]
impl Classifier for HttpClassifier {
    fn name(&self) -> &str {
        &self.config.model
    }

    async fn classify(&self, event: &RawEvent) -> Result<ParsedOutcome, ClassifyError> {
        let prompt = format!("{}\n\n{}", system_prompt(), user_prompt(event));

        let mut last_err = None;
        for attempt in 0..self.config.max_attempts {
            if attempt > 0 {
                // Honor the service's Retry-After when it told us one
                let wait = match &last_err {
                    Some(ClassifyError::RateLimited { retry_after: Some(d) }) => {
                        (*d).max(backoff(attempt))
                    }
                    _ => backoff(attempt),
                };
                tokio::time::sleep(wait).await;
            }
            match self.request_once(&prompt).await {
                Ok(content) => {
                    debug!(id = %event.id, model = %self.config.model, "Classifier responded");
                    return Ok(parse_response(&content));
                }
                Err(ClassifyError::Auth) => return Err(ClassifyError::Auth),
                Err(e @ ClassifyError::RateLimited { .. }) | Err(e @ ClassifyError::Transient(_)) => {
                    warn!(
                        id = %event.id,
                        attempt = attempt + 1,
                        max = self.config.max_attempts,
                        error = %e,
                        "Classifier call failed, will retry"
                    );
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap_or_else(|| ClassifyError::Transient("retries exhausted".into())))
    }
}

/// Exponential backoff with jitter: 1s, 2s, 4s... plus up to 500ms.
fn backoff(attempt: u32) -> Duration {
    let base = Duration::from_secs(1 << attempt.min(5));
    let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..500));
    base + jitter
}
