use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::conversation::Source;
use crate::credentials::{CredentialHandle, CredentialKey};
use crate::error::{ApiFailure, ChatError};
use crate::gemini::{http_client, ModelClient};
use crate::progress::{self, Kind};
use crate::prompt;

/// Hard cap on sources attached to one reply.
pub const MAX_SOURCES: usize = 3;

const GOOGLE_SEARCH_ENDPOINT: &str = "https://www.googleapis.com/customsearch/v1";

static JSON_ARRAY: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[[\s\S]*\]").expect("valid regex"));

#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<Source>, ChatError>;
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    description: String,
    #[serde(rename = "imageUrl", default)]
    image_url: Option<String>,
}

impl From<SearchResult> for Source {
    fn from(r: SearchResult) -> Self {
        Source {
            title: r.title,
            link: r.url,
            snippet: r.description,
            icon: r.image_url,
        }
    }
}

/// Bracketed span from the first `[` to the last `]`.
pub fn extract_json_array(text: &str) -> Option<&str> {
    JSON_ARRAY.find(text).map(|m| m.as_str())
}

/// Parses the model's search reply into at most `max` sources.
pub fn parse_search_reply(text: &str, max: usize) -> Result<Vec<Source>, ChatError> {
    let json = extract_json_array(text)
        .ok_or_else(|| ChatError::SearchParse("no JSON array in reply".to_string()))?;
    let results: Vec<SearchResult> = serde_json::from_str(json)
        .map_err(|e| ChatError::SearchParse(e.to_string()))?;
    Ok(results.into_iter().take(max).map(Source::from).collect())
}

/// Uses the language model itself as the search engine.
pub struct ModelSearch {
    client: Arc<ModelClient>,
}

impl ModelSearch {
    pub fn new(client: Arc<ModelClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SearchProvider for ModelSearch {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<Source>, ChatError> {
        let reply = self.client.generate_once(&prompt::search_request(query, max_results)).await?;
        parse_search_reply(&reply, max_results)
    }
}

#[derive(Debug, Deserialize)]
struct GoogleResponse {
    #[serde(default)]
    items: Vec<GoogleItem>,
}

#[derive(Debug, Deserialize)]
struct GoogleItem {
    #[serde(default)]
    title: String,
    #[serde(default)]
    link: String,
    #[serde(default)]
    snippet: String,
    #[serde(default)]
    pagemap: Option<PageMap>,
}

#[derive(Debug, Deserialize)]
struct PageMap {
    #[serde(default)]
    cse_image: Vec<CseImage>,
}

#[derive(Debug, Deserialize)]
struct CseImage {
    src: Option<String>,
}

impl From<GoogleItem> for Source {
    fn from(item: GoogleItem) -> Self {
        let icon = item
            .pagemap
            .and_then(|p| p.cse_image.into_iter().next())
            .and_then(|img| img.src);
        Source {
            title: item.title,
            link: item.link,
            snippet: item.snippet,
            icon,
        }
    }
}

/// Google Custom Search JSON API.
pub struct GoogleSearch {
    client: reqwest::Client,
    credentials: CredentialHandle,
    engine_id: String,
    endpoint: String,
}

impl GoogleSearch {
    pub fn new(credentials: CredentialHandle, engine_id: String, timeout: Option<Duration>) -> Self {
        Self {
            client: http_client(timeout),
            credentials,
            engine_id,
            endpoint: GOOGLE_SEARCH_ENDPOINT.to_string(),
        }
    }
}

#[async_trait]
impl SearchProvider for GoogleSearch {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<Source>, ChatError> {
        let key = self.credentials.get(CredentialKey::Search).ok_or(ChatError::CredentialMissing)?;

        let num = max_results.to_string();
        let response = self.client
            .get(&self.endpoint)
            .query(&[("key", key.as_str()), ("cx", self.engine_id.as_str()), ("q", query), ("num", num.as_str())])
            .send()
            .await
            .map_err(|e| ChatError::SearchParse(ApiFailure::from(e).to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChatError::SearchParse(ApiFailure::new(Some(status.as_u16()), body).to_string()));
        }

        let body = response.text().await.map_err(|e| ChatError::SearchParse(e.to_string()))?;
        parse_google_response(&body, max_results)
    }
}

fn parse_google_response(body: &str, max: usize) -> Result<Vec<Source>, ChatError> {
    let parsed: GoogleResponse = serde_json::from_str(body)
        .map_err(|e| ChatError::SearchParse(e.to_string()))?;
    Ok(parsed.items.into_iter().take(max).map(Source::from).collect())
}

/// Fetches sources for a prompt. Never fails: problems mean no sources.
pub struct SearchAugmenter {
    provider: Arc<dyn SearchProvider>,
    max_sources: usize,
}

impl SearchAugmenter {
    pub fn new(provider: Arc<dyn SearchProvider>, max_sources: usize) -> Self {
        Self {
            provider,
            max_sources: max_sources.clamp(1, MAX_SOURCES),
        }
    }

    pub async fn augment(&self, query: &str) -> Vec<Source> {
        progress::log_with(Kind::Search, "Searching the web...");
        match self.provider.search(query, self.max_sources).await {
            Ok(mut sources) => {
                sources.truncate(self.max_sources);
                debug!("Search returned {} sources", sources.len());
                progress::log_with(Kind::Search, format!("Found {} sources", sources.len()));
                sources
            }
            Err(e) => {
                warn!("Search failed, continuing without sources: {}", e);
                progress::log_with(Kind::Search, "No sources found");
                Vec::new()
            }
        }
    }
}
