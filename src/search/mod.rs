//! Rate-limited web search.
//!
//! The research loop consumes search through [`SearchClient`], which layers
//! a process-wide sliding-window rate limiter and a transient-failure retry
//! ladder over one of the pluggable [`SearchProvider`] backends.

mod client;
mod limiter;
mod provider;

pub use client::{
    SearchClient, DEFAULT_MAX_RETRIES, DEFAULT_RATE_LIMIT, DEFAULT_RATE_WINDOW, DEFAULT_RETRY_BASE,
};
pub use limiter::SlidingWindowLimiter;
pub use provider::{
    BraveProvider, MockProvider, SearchBackend, SearchProvider, SerperProvider, MAX_RESULTS,
};
