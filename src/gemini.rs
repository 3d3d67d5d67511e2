use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::GeminiConfig;
use crate::credentials::{CredentialHandle, CredentialKey};
use crate::error::{classify, ApiFailure, ChatError};
use crate::progress::{self, Kind};

/// Upper bound on attempts per call, whatever the config says.
pub const MAX_ATTEMPTS_CAP: u32 = 10;

pub const CREATOR_RESPONSE: &str = "I was created by Omar Radwan, the Social Media Marketing and Web Developer for the NCTU Petroleum Tech team.";

/// Models offered in the picker, as (id, label).
pub const KNOWN_MODELS: [(&str, &str); 3] = [
    ("gemini-1.5-pro", "Gemini 1.5 Pro"),
    ("gemini-1.5-flash", "Gemini 1.5 Flash"),
    ("gemini-pro", "Gemini Pro"),
];

pub fn is_creator_question(input: &str) -> bool {
    let lower = input.trim().to_lowercase();
    lower.contains("who made you") || lower.contains("who created you") || lower.contains("your creator")
}

/// One raw call to a generative-language endpoint.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    async fn generate_content(&self, api_key: &str, model: &str, prompt: &str) -> Result<String, ApiFailure>;
}

#[derive(Debug, Serialize)]
struct GenerateContentRequest {
    contents: Vec<Content>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

impl GenerateContentResponse {
    fn text(self) -> Option<String> {
        let content = self.candidates.into_iter().next()?.content?;
        let text: String = content.parts.into_iter().filter_map(|p| p.text).collect();
        if text.is_empty() { None } else { Some(text) }
    }
}

/// `models/{model}:generateContent` over HTTPS.
pub struct GeminiHttp {
    base_url: String,
    client: reqwest::Client,
}

/// HTTP client with the configured request timeout, if any.
pub fn http_client(timeout: Option<Duration>) -> reqwest::Client {
    let mut builder = reqwest::Client::builder();
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }
    builder.build().unwrap_or_else(|e| {
        warn!("Falling back to default HTTP client: {}", e);
        reqwest::Client::new()
    })
}

impl GeminiHttp {
    pub fn with_config(config: &GeminiConfig) -> Self {
        GeminiHttp {
            base_url: config.api_base.trim_end_matches('/').to_string(),
            client: http_client(config.request_timeout()),
        }
    }
}

#[async_trait]
impl ModelBackend for GeminiHttp {
    async fn generate_content(&self, api_key: &str, model: &str, prompt: &str) -> Result<String, ApiFailure> {
        let request = GenerateContentRequest {
            contents: vec![Content {
                parts: vec![Part { text: Some(prompt.to_string()) }],
                role: Some("user".to_string()),
            }],
        };

        progress::log_with(Kind::Http, format!("POST {}:generateContent", model));
        let response = self.client
            .post(format!("{}/models/{}:generateContent", self.base_url, model))
            .header("x-goog-api-key", api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiFailure::new(Some(status.as_u16()), body));
        }

        let parsed: GenerateContentResponse = response.json().await?;
        parsed.text().ok_or_else(|| ApiFailure::new(None, "Gemini returned no text"))
    }
}

/// Model access with credential lookup, identity short-circuit and retry.
pub struct ModelClient {
    backend: Arc<dyn ModelBackend>,
    credentials: CredentialHandle,
    model: String,
    max_attempts: u32,
    base_delay: Duration,
}

impl ModelClient {
    pub fn new(backend: Arc<dyn ModelBackend>, credentials: CredentialHandle, config: &GeminiConfig) -> Self {
        ModelClient {
            backend,
            credentials,
            model: config.model.clone(),
            max_attempts: config.max_attempts.clamp(1, MAX_ATTEMPTS_CAP),
            base_delay: config.base_delay(),
        }
    }

    pub fn get_model(&self) -> &str {
        &self.model
    }

    /// Identity short-circuit, credential check, then the call with
    /// exponential backoff on transient failures.
    pub async fn generate_with(&self, model: &str, prompt: &str) -> Result<String, ChatError> {
        if is_creator_question(prompt) {
            return Ok(CREATOR_RESPONSE.to_string());
        }
        let api_key = self.api_key()?;

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.backend.generate_content(&api_key, model, prompt).await {
                Ok(text) => {
                    debug!("Model replied with {} chars on attempt {}", text.len(), attempt);
                    return Ok(text);
                }
                Err(failure) if failure.is_transient() => {
                    if attempt >= self.max_attempts {
                        warn!("Giving up after {} attempts: {}", attempt, failure);
                        return Err(ChatError::RateLimited {
                            attempts: attempt,
                            last: failure.to_string(),
                        });
                    }
                    let factor = 2u32.checked_pow(attempt - 1).unwrap_or(u32::MAX);
                    let delay = self.base_delay.saturating_mul(factor);
                    warn!("Rate limit hit, attempt {} of {}, retrying in {:?}", attempt, self.max_attempts, delay);
                    progress::log_with(Kind::Retry, format!("Rate limited, retrying in {}s", delay.as_secs_f32()));
                    tokio::time::sleep(delay).await;
                }
                Err(failure) => return Err(classify(&failure)),
            }
        }
    }

    /// Single attempt, used where a failure is cheap to swallow.
    pub async fn generate_once(&self, prompt: &str) -> Result<String, ChatError> {
        let api_key = self.api_key()?;
        self.backend
            .generate_content(&api_key, &self.model, prompt)
            .await
            .map_err(|failure| classify(&failure))
    }

    fn api_key(&self) -> Result<String, ChatError> {
        self.credentials.get(CredentialKey::Gemini).ok_or(ChatError::CredentialMissing)
    }
}
