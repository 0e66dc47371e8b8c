//! Process configuration from environment variables.

use std::env;

use crate::error::{Error, Result};
use crate::search::SearchBackend;

/// Runtime configuration for the server binary and [`crate::server::AppState`].
///
/// Read from the environment:
/// - `LLM_API_KEY` (required)
/// - `SEARCH_PROVIDER` — `mock`, `brave`, or `serper`; defaults to `mock`,
///   the only backend guaranteed to work without network access
/// - `SEARCH_API_KEY` — required for non-mock backends
/// - `SITE_URL` — attribution header for the LLM gateway
/// - `BIND_ADDR` — defaults to `127.0.0.1:3001`
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub llm_api_key: String,
    pub search_backend: SearchBackend,
    pub search_api_key: Option<String>,
    pub site_url: Option<String>,
    pub bind_addr: String,
}

impl RuntimeConfig {
    pub const DEFAULT_BIND_ADDR: &'static str = "127.0.0.1:3001";

    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let llm_api_key = lookup("LLM_API_KEY")
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| Error::Config("LLM_API_KEY is not set".to_string()))?;

        let search_backend = match lookup("SEARCH_PROVIDER") {
            Some(raw) => raw.parse::<SearchBackend>()?,
            None => SearchBackend::Mock,
        };
        let search_api_key = lookup("SEARCH_API_KEY").filter(|v| !v.trim().is_empty());
        if search_backend != SearchBackend::Mock && search_api_key.is_none() {
            return Err(Error::Config(format!(
                "SEARCH_API_KEY is required for the {search_backend} search provider"
            )));
        }

        Ok(Self {
            llm_api_key,
            search_backend,
            search_api_key,
            site_url: lookup("SITE_URL").filter(|v| !v.trim().is_empty()),
            bind_addr: lookup("BIND_ADDR").unwrap_or_else(|| Self::DEFAULT_BIND_ADDR.to_string()),
        })
    }

    /// Construct a mock-backed config directly. Useful for tests and
    /// offline runs.
    pub fn mock(llm_api_key: impl Into<String>) -> Self {
        Self {
            llm_api_key: llm_api_key.into(),
            search_backend: SearchBackend::Mock,
            search_api_key: None,
            site_url: None,
            bind_addr: Self::DEFAULT_BIND_ADDR.to_string(),
        }
    }

    pub fn with_search_backend(
        mut self,
        backend: SearchBackend,
        api_key: impl Into<String>,
    ) -> Self {
        self.search_backend = backend;
        self.search_api_key = Some(api_key.into());
        self
    }

    pub fn with_site_url(mut self, site_url: impl Into<String>) -> Self {
        self.site_url = Some(site_url.into());
        self
    }

    pub fn with_bind_addr(mut self, bind_addr: impl Into<String>) -> Self {
        self.bind_addr = bind_addr.into();
        self
    }
}
