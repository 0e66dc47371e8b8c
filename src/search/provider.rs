//! Search provider trait and the concrete provider implementations.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::tree::Source;

/// Maximum sources returned per query.
pub const MAX_RESULTS: usize = 5;

/// Which search backend to construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SearchBackend {
    Brave,
    Serper,
    Mock,
}

impl FromStr for SearchBackend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "brave" => Ok(Self::Brave),
            "serper" => Ok(Self::Serper),
            "mock" => Ok(Self::Mock),
            other => Err(Error::Config(format!(
                "unknown search provider {other:?} (expected brave, serper, or mock)"
            ))),
        }
    }
}

impl std::fmt::Display for SearchBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Brave => write!(f, "brave"),
            Self::Serper => write!(f, "serper"),
            Self::Mock => write!(f, "mock"),
        }
    }
}

/// Executes one search query against a backend.
///
/// Implementations map provider failures onto the crate error taxonomy:
/// HTTP 429 → `RateLimited`, other 4xx → `Upstream`, network errors and
/// 5xx → `Transport`. The retrying, rate-limited wrapper lives in
/// [`super::SearchClient`].
#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, query: &str) -> Result<Vec<Source>>;

    /// Stable provider name used in errors and logs.
    fn name(&self) -> &'static str;
}

fn build_http_client(timeout_secs: u64) -> Client {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .unwrap_or_default()
}

async fn read_body(name: &'static str, response: reqwest::Response) -> Result<String> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| Error::transport(name, format!("failed to read response: {e}")))?;

    if status.is_success() {
        return Ok(body);
    }
    Err(match status.as_u16() {
        429 => Error::rate_limited(name, body),
        code if (400..500).contains(&code) => Error::upstream(name, code, body),
        code => Error::transport(name, format!("status {code}: {body}")),
    })
}

/// Brave Search API provider.
pub struct BraveProvider {
    api_key: String,
    base_url: String,
    http: Client,
}

impl BraveProvider {
    const DEFAULT_BASE_URL: &'static str = "https://api.search.brave.com";

    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: Self::DEFAULT_BASE_URL.to_string(),
            http: build_http_client(30),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }
}

#[derive(Debug, Deserialize)]
struct BraveResponse {
    #[serde(default)]
    web: Option<BraveWeb>,
}

#[derive(Debug, Deserialize)]
struct BraveWeb {
    #[serde(default)]
    results: Vec<BraveResult>,
}

#[derive(Debug, Deserialize)]
struct BraveResult {
    title: String,
    url: String,
    #[serde(default)]
    description: String,
}

#[async_trait]
impl SearchProvider for BraveProvider {
    async fn search(&self, query: &str) -> Result<Vec<Source>> {
        let url = format!("{}/res/v1/web/search", self.base_url);
        let response = self
            .http
            .get(&url)
            .query(&[("q", query), ("count", &MAX_RESULTS.to_string())])
            .header("X-Subscription-Token", &self.api_key)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| Error::transport(self.name(), format!("HTTP request failed: {e}")))?;

        let body = read_body(self.name(), response).await?;
        let parsed: BraveResponse = serde_json::from_str(&body)
            .map_err(|e| Error::transport(self.name(), format!("failed to parse response: {e}")))?;

        Ok(parsed
            .web
            .map(|w| w.results)
            .unwrap_or_default()
            .into_iter()
            .take(MAX_RESULTS)
            .map(|r| Source::new(r.url, r.title, r.description))
            .collect())
    }

    fn name(&self) -> &'static str {
        "brave"
    }
}

/// Serper (Google SERP) API provider.
pub struct SerperProvider {
    api_key: String,
    base_url: String,
    http: Client,
}

impl SerperProvider {
    const DEFAULT_BASE_URL: &'static str = "https://google.serper.dev";

    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: Self::DEFAULT_BASE_URL.to_string(),
            http: build_http_client(30),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }
}

#[derive(Debug, Deserialize)]
struct SerperResponse {
    #[serde(default)]
    organic: Vec<SerperResult>,
}

#[derive(Debug, Deserialize)]
struct SerperResult {
    title: String,
    link: String,
    #[serde(default)]
    snippet: String,
}

#[async_trait]
impl SearchProvider for SerperProvider {
    async fn search(&self, query: &str) -> Result<Vec<Source>> {
        let url = format!("{}/search", self.base_url);
        let response = self
            .http
            .post(&url)
            .header("X-API-KEY", &self.api_key)
            .json(&serde_json::json!({"q": query, "num": MAX_RESULTS}))
            .send()
            .await
            .map_err(|e| Error::transport(self.name(), format!("HTTP request failed: {e}")))?;

        let body = read_body(self.name(), response).await?;
        let parsed: SerperResponse = serde_json::from_str(&body)
            .map_err(|e| Error::transport(self.name(), format!("failed to parse response: {e}")))?;

        Ok(parsed
            .organic
            .into_iter()
            .take(MAX_RESULTS)
            .map(|r| Source::new(r.link, r.title, r.snippet))
            .collect())
    }

    fn name(&self) -> &'static str {
        "serper"
    }
}

/// Offline provider returning three deterministic synthetic sources per
/// query. The only backend guaranteed to work without network access.
#[derive(Debug, Default)]
pub struct MockProvider;

impl MockProvider {
    pub fn new() -> Self {
        Self
    }

    fn slug(query: &str) -> String {
        let slug: String = query
            .to_lowercase()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
            .collect();
        slug.trim_matches('-').chars().take(48).collect()
    }
}

#[async_trait]
impl SearchProvider for MockProvider {
    async fn search(&self, query: &str) -> Result<Vec<Source>> {
        let slug = Self::slug(query);
        Ok((1..=3)
            .map(|i| {
                Source::new(
                    format!("https://source-{i}.mock.example/{slug}"),
                    format!("Mock result {i} for {query:?}"),
                    format!("Synthetic snippet {i} describing evidence relevant to {query:?}."),
                )
                .with_relevance(1.0 - 0.1 * i as f64)
            })
            .collect())
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}
