//! Text-generation service adapter.
//!
//! The pipeline only sees `TextGenerator`; `LlmClient` talks to an
//! OpenAI-compatible chat completions endpoint and owns timeouts and
//! transient-failure retries.

use crate::error::{ForgeError, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

/// Prompt in, completion text out.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: usize,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Exponential backoff capped at `max_delay`
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        let delay_ms =
            (self.initial_delay.as_millis() as f64) * self.backoff_multiplier.powi(attempt as i32);
        let delay_ms = delay_ms.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(delay_ms as u64)
    }
}

/// Outcome of a single HTTP attempt.
enum CallFailure {
    Transient(String),
    Fatal(String),
}

pub struct LlmClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    temperature: f64,
    max_tokens: u32,
    retry: RetryPolicy,
}

impl LlmClient {
    pub fn new(api_key: String, model: String, base_url: String, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ForgeError::Llm(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            http,
            api_key,
            model,
            base_url: base_url.trim_end_matches('/').to_string(),
            temperature: 0.3,
            max_tokens: 4000,
            retry: RetryPolicy::default(),
        })
    }

    /// Build a client from `OPENAI_API_KEY`, `OPENAI_MODEL`, `OPENAI_BASE_URL`
    /// and `LLM_TIMEOUT_SECS`.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| ForgeError::Config("OPENAI_API_KEY is not set".to_string()))?;
        let model = std::env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4".to_string());
        let base_url = std::env::var("OPENAI_BASE_URL")
            .unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
        let timeout_secs = match std::env::var("LLM_TIMEOUT_SECS") {
            Ok(raw) => raw.parse::<u64>().map_err(|_| {
                ForgeError::Config(format!("LLM_TIMEOUT_SECS must be an integer, got '{}'", raw))
            })?,
            Err(_) => 120,
        };
        Self::new(api_key, model, base_url, Duration::from_secs(timeout_secs))
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn request_body(&self, prompt: &str) -> Value {
        serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "user", "content": prompt}
            ],
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
        })
    }

    async fn call_once(&self, prompt: &str) -> std::result::Result<String, CallFailure> {
        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&self.request_body(prompt))
            .send()
            .await
            .map_err(|e| CallFailure::Transient(format!("LLM API call failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            let message = format!("LLM API error ({}): {}", status, error_text);
            return if status.as_u16() == 429 || status.is_server_error() {
                Err(CallFailure::Transient(message))
            } else {
                Err(CallFailure::Fatal(message))
            };
        }

        let response_json: Value = response
            .json()
            .await
            .map_err(|e| CallFailure::Transient(format!("Failed to read LLM response: {}", e)))?;

        extract_content(&response_json).map_err(|e| CallFailure::Fatal(e.to_string()))
    }
}

#[async_trait]
impl TextGenerator for LlmClient {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let mut attempt = 0;
        loop {
            match self.call_once(prompt).await {
                Ok(content) => {
                    debug!("LLM returned {} chars", content.len());
                    return Ok(content);
                }
                Err(CallFailure::Fatal(message)) => return Err(ForgeError::Llm(message)),
                Err(CallFailure::Transient(message)) => {
                    if attempt >= self.retry.max_retries {
                        return Err(ForgeError::Llm(format!(
                            "{} (gave up after {} attempts)",
                            message,
                            attempt + 1
                        )));
                    }
                    let delay = self.retry.delay_for_attempt(attempt);
                    warn!("⚠️  {} - retrying in {:?}", message, delay);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// Pull `choices[0].message.content` out of a chat completions payload.
pub fn extract_content(response_json: &Value) -> Result<String> {
    if let Some(error) = response_json.get("error") {
        return Err(ForgeError::Llm(format!("LLM API error: {}", error)));
    }

    let choices = response_json
        .get("choices")
        .and_then(|c| c.as_array())
        .ok_or_else(|| ForgeError::Llm("No choices array in LLM response".to_string()))?;
    let first = choices
        .first()
        .ok_or_else(|| ForgeError::Llm("Empty choices array in LLM response".to_string()))?;

    match first.get("finish_reason").and_then(|r| r.as_str()) {
        Some("length") => warn!("⚠️  LLM response was truncated due to length limit"),
        Some("content_filter") => {
            return Err(ForgeError::Llm(
                "LLM response was filtered by content policy".to_string(),
            ))
        }
        _ => {}
    }

    let content = first["message"]["content"]
        .as_str()
        .ok_or_else(|| ForgeError::Llm("No content in LLM response".to_string()))?;
    if content.trim().is_empty() {
        return Err(ForgeError::Llm("Empty content in LLM response".to_string()));
    }
    Ok(content.to_string())
}
