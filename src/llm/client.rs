//! LLM completion trait and the OpenRouter-backed implementation.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;

use crate::error::{Error, Result};

use super::json::extract_json;
use super::types::{AssistantMessage, ChatMessage, ToolCall, ToolChoice, ToolDefinition};

/// Completion interface consumed by the tree core.
///
/// Kept narrow so tests can swap in scripted clients: plain completion for
/// synthesis, strict-JSON completion layered on top of it, and a
/// tool-calling completion for the research loop.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Complete a prompt and return the assistant text.
    async fn complete(&self, prompt: &str) -> Result<String>;

    /// Complete a prompt and parse the strict-JSON value it contains.
    async fn complete_json(&self, prompt: &str) -> Result<Value> {
        let text = self.complete(prompt).await?;
        extract_json(&text)
    }

    /// Run one tool-enabled completion over an existing conversation.
    async fn complete_with_tools(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
        tool_choice: ToolChoice,
    ) -> Result<AssistantMessage>;
}

/// Configuration for [`OpenRouterClient`].
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// API key
    pub api_key: String,
    /// Base URL override
    pub base_url: Option<String>,
    /// Model used for tool-calling research completions
    pub research_model: String,
    /// Model used for probability synthesis completions
    pub synthesis_model: String,
    /// Site URL sent as the HTTP-Referer attribution header
    pub site_url: Option<String>,
    /// Request timeout in seconds
    pub timeout_secs: u64,
    /// Max tokens per completion
    pub max_tokens: u32,
}

impl LlmConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: None,
            research_model: "anthropic/claude-3.5-sonnet".to_string(),
            synthesis_model: "openai/gpt-4o".to_string(),
            site_url: None,
            timeout_secs: 120,
            max_tokens: 4096,
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn with_research_model(mut self, model: impl Into<String>) -> Self {
        self.research_model = model.into();
        self
    }

    pub fn with_synthesis_model(mut self, model: impl Into<String>) -> Self {
        self.synthesis_model = model.into();
        self
    }

    pub fn with_site_url(mut self, url: impl Into<String>) -> Self {
        self.site_url = Some(url.into());
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }
}

fn build_http_client(timeout_secs: u64) -> Client {
    let timeout = Duration::from_secs(timeout_secs);

    // Proxy auto-detection inside the default builder can panic under some
    // sandboxes; shield the first attempt and retry with proxies disabled.
    let attempt = catch_unwind(AssertUnwindSafe(|| {
        Client::builder().timeout(timeout).build()
    }));
    if let Ok(Ok(client)) = attempt {
        return client;
    }
    Client::builder()
        .no_proxy()
        .timeout(timeout)
        .build()
        .expect("HTTP client construction failed")
}

/// OpenRouter chat-completions client (OpenAI-compatible wire format).
pub struct OpenRouterClient {
    config: LlmConfig,
    http: Client,
}

impl OpenRouterClient {
    const DEFAULT_BASE_URL: &'static str = "https://openrouter.ai/api";
    const SERVICE: &'static str = "openrouter";

    pub fn new(config: LlmConfig) -> Self {
        let http = build_http_client(config.timeout_secs);
        Self { config, http }
    }

    fn base_url(&self) -> &str {
        self.config
            .base_url
            .as_deref()
            .unwrap_or(Self::DEFAULT_BASE_URL)
    }

    async fn chat(&self, request: &WireRequest) -> Result<WireMessage> {
        let url = format!("{}/v1/chat/completions", self.base_url());

        let mut builder = self
            .http
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("content-type", "application/json")
            .header("X-Title", "PsychoHistory");
        if let Some(site_url) = &self.config.site_url {
            builder = builder.header("HTTP-Referer", site_url.clone());
        }

        let response = builder
            .json(request)
            .send()
            .await
            .map_err(|e| Error::transport(Self::SERVICE, format!("HTTP request failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::transport(Self::SERVICE, format!("failed to read response: {e}")))?;

        if !status.is_success() {
            let message = serde_json::from_str::<WireError>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);
            return Err(match status.as_u16() {
                429 => Error::rate_limited(Self::SERVICE, message),
                code if (400..500).contains(&code) => Error::upstream(Self::SERVICE, code, message),
                code => Error::transport(Self::SERVICE, format!("status {code}: {message}")),
            });
        }

        let parsed: WireResponse = serde_json::from_str(&body)
            .map_err(|e| Error::transport(Self::SERVICE, format!("failed to parse response: {e}")))?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message)
            .ok_or_else(|| Error::transport(Self::SERVICE, "no choices in response"))
    }
}

// OpenRouter API types (OpenAI-compatible)
#[derive(Debug, Serialize)]
struct WireRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireMessage,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCall>>,
}

#[derive(Debug, Deserialize)]
struct WireError {
    error: WireErrorDetail,
}

#[derive(Debug, Deserialize)]
struct WireErrorDetail {
    message: String,
}

#[async_trait]
impl LlmClient for OpenRouterClient {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let request = WireRequest {
            model: self.config.synthesis_model.clone(),
            messages: vec![ChatMessage::user(prompt)],
            max_tokens: self.config.max_tokens,
            tools: None,
            tool_choice: None,
        };

        let message = self.chat(&request).await?;
        message
            .content
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| Error::transport(Self::SERVICE, "completion returned no content"))
    }

    async fn complete_with_tools(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
        tool_choice: ToolChoice,
    ) -> Result<AssistantMessage> {
        let request = WireRequest {
            model: self.config.research_model.clone(),
            messages: messages.to_vec(),
            max_tokens: self.config.max_tokens,
            tools: Some(tools.iter().map(ToolDefinition::to_wire).collect()),
            tool_choice: Some(tool_choice.as_wire().to_string()),
        };

        let message = self.chat(&request).await?;
        Ok(AssistantMessage {
            content: message.content,
            tool_calls: message.tool_calls.unwrap_or_default(),
        })
    }
}
