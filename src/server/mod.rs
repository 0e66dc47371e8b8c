//! HTTP surface: the streaming tree endpoint and health check.

use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::config::RuntimeConfig;
use crate::error::{Error, Result};
use crate::llm::{LlmClient, LlmConfig, OpenRouterClient};
use crate::pipeline::{NodePipeline, NodeProcessor};
use crate::search::{
    BraveProvider, MockProvider, SearchBackend, SearchClient, SearchProvider, SerperProvider,
};
use crate::tree::{TreeBuilder, TreeBuilderConfig};

mod stream;

pub use stream::EVENT_BUFFER;

/// Shared components behind the HTTP handlers.
///
/// One tree per request: each request gets a fresh [`TreeBuilder`] over the
/// shared pipeline, so the search rate limiter and HTTP clients are shared
/// process-wide while tree state is not.
#[derive(Clone)]
pub struct AppState {
    pipeline: Arc<dyn NodePipeline>,
    builder_config: TreeBuilderConfig,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("builder_config", &self.builder_config)
            .finish_non_exhaustive()
    }
}

impl AppState {
    pub fn new(pipeline: Arc<dyn NodePipeline>) -> Self {
        Self {
            pipeline,
            builder_config: TreeBuilderConfig::default(),
        }
    }

    pub fn with_builder_config(mut self, config: TreeBuilderConfig) -> Self {
        self.builder_config = config;
        self
    }

    /// Wire the production pipeline from runtime configuration.
    pub fn from_config(config: &RuntimeConfig) -> Result<Self> {
        let mut llm_config = LlmConfig::new(&config.llm_api_key);
        if let Some(site_url) = &config.site_url {
            llm_config = llm_config.with_site_url(site_url);
        }
        let llm: Arc<dyn LlmClient> = Arc::new(OpenRouterClient::new(llm_config));

        let search_key = || {
            config.search_api_key.clone().ok_or_else(|| {
                Error::Config(format!(
                    "SEARCH_API_KEY is required for the {} search provider",
                    config.search_backend
                ))
            })
        };
        let provider: Arc<dyn SearchProvider> = match config.search_backend {
            SearchBackend::Brave => Arc::new(BraveProvider::new(search_key()?)),
            SearchBackend::Serper => Arc::new(SerperProvider::new(search_key()?)),
            SearchBackend::Mock => Arc::new(MockProvider::new()),
        };
        let search = Arc::new(SearchClient::new(provider));

        Ok(Self::new(Arc::new(NodeProcessor::new(llm, search))))
    }

    fn builder(&self) -> TreeBuilder {
        TreeBuilder::new(Arc::clone(&self.pipeline)).with_config(self.builder_config.clone())
    }
}

/// Assemble the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/generate-tree/stream", post(stream::generate_tree_stream))
        .route("/health", get(health))
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

/// Bind `addr` and serve until the process is stopped.
pub async fn serve(addr: &str, state: AppState) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Config(format!("failed to bind {addr}: {e}")))?;
    tracing::info!(addr, "server listening");
    axum::serve(listener, router(state))
        .await
        .map_err(|e| Error::scheduler(format!("server error: {e}")))
}
