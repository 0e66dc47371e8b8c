//! Rate-limited, retrying wrapper around a search provider.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

use crate::error::{Error, Result};
use crate::tree::Source;

use super::limiter::SlidingWindowLimiter;
use super::provider::{SearchProvider, MAX_RESULTS};

/// Default rolling budget for the primary provider: 5 requests per second.
pub const DEFAULT_RATE_LIMIT: usize = 5;
pub const DEFAULT_RATE_WINDOW: Duration = Duration::from_secs(1);

/// Maximum retries on transient failures.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// First backoff step; doubles per attempt (1s, 2s, 4s, 8s, 16s).
pub const DEFAULT_RETRY_BASE: Duration = Duration::from_secs(1);

/// Search client shared by every pipeline of a builder instance.
///
/// Each call waits for a rate-limit permit before hitting the provider.
/// HTTP 429 and network-level failures retry with exponential backoff;
/// other provider rejections surface immediately.
pub struct SearchClient {
    provider: Arc<dyn SearchProvider>,
    limiter: Arc<SlidingWindowLimiter>,
    max_retries: u32,
    retry_base: Duration,
}

impl SearchClient {
    pub fn new(provider: Arc<dyn SearchProvider>) -> Self {
        Self {
            provider,
            limiter: Arc::new(SlidingWindowLimiter::new(
                DEFAULT_RATE_LIMIT,
                DEFAULT_RATE_WINDOW,
            )),
            max_retries: DEFAULT_MAX_RETRIES,
            retry_base: DEFAULT_RETRY_BASE,
        }
    }

    /// Replace the rate limiter.
    pub fn with_limiter(mut self, limiter: SlidingWindowLimiter) -> Self {
        self.limiter = Arc::new(limiter);
        self
    }

    /// Override the retry policy. Primarily useful for tests.
    pub fn with_retry_policy(mut self, max_retries: u32, retry_base: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_base = retry_base;
        self
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    /// Execute one query, returning at most [`MAX_RESULTS`] sources.
    pub async fn search(&self, query: &str) -> Result<Vec<Source>> {
        let mut attempt: u32 = 0;
        loop {
            self.limiter.acquire().await;

            match self.provider.search(query).await {
                Ok(mut sources) => {
                    sources.truncate(MAX_RESULTS);
                    return Ok(sources);
                }
                Err(err) if err.is_retryable() && attempt < self.max_retries => {
                    let delay = self.retry_base * 2u32.pow(attempt);
                    tracing::warn!(
                        provider = self.provider.name(),
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "search failed transiently, backing off: {err}"
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(err) if err.is_retryable() => {
                    return Err(Error::transport(
                        self.provider.name(),
                        format!("search failed after {} retries: {err}", self.max_retries),
                    ));
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::time::Instant;

    struct FlakySearchProvider {
        fail_until: usize,
        calls: AtomicUsize,
        call_times: Mutex<Vec<Instant>>,
        failure: fn() -> Error,
    }

    impl FlakySearchProvider {
        fn rate_limited(fail_until: usize) -> Self {
            Self {
                fail_until,
                calls: AtomicUsize::new(0),
                call_times: Mutex::new(Vec::new()),
                failure: || Error::rate_limited("test", "429 too many requests"),
            }
        }

        fn rejecting() -> Self {
            Self {
                fail_until: usize::MAX,
                calls: AtomicUsize::new(0),
                call_times: Mutex::new(Vec::new()),
                failure: || Error::upstream("test", 403, "forbidden"),
            }
        }
    }

    #[async_trait]
    impl SearchProvider for FlakySearchProvider {
        async fn search(&self, query: &str) -> Result<Vec<Source>> {
            self.call_times.lock().unwrap().push(Instant::now());
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.fail_until {
                return Err((self.failure)());
            }
            Ok(vec![
                Source::new(format!("https://ok.example/{query}"), "ok", "snippet"),
            ])
        }

        fn name(&self) -> &'static str {
            "test"
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_ladder_on_429_then_success() {
        let provider = Arc::new(FlakySearchProvider::rate_limited(3));
        let client = SearchClient::new(Arc::clone(&provider) as Arc<dyn SearchProvider>);

        let started = Instant::now();
        let sources = client.search("q").await.unwrap();
        let elapsed = started.elapsed();

        assert_eq!(sources.len(), 1);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 4);
        // Backoff 1s + 2s + 4s before the fourth attempt succeeds.
        assert!(elapsed >= Duration::from_secs(7));
        assert!(elapsed < Duration::from_secs(9));

        let times = provider.call_times.lock().unwrap();
        assert!(times[1].duration_since(times[0]) >= Duration::from_secs(1));
        assert!(times[2].duration_since(times[1]) >= Duration::from_secs(2));
        assert!(times[3].duration_since(times[2]) >= Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_exhaust_with_descriptive_error() {
        let provider = Arc::new(FlakySearchProvider::rate_limited(usize::MAX));
        let client = SearchClient::new(Arc::clone(&provider) as Arc<dyn SearchProvider>)
            .with_retry_policy(2, Duration::from_millis(10));

        let err = client.search("q").await.unwrap_err();
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
        assert!(err.to_string().contains("after 2 retries"));
    }

    #[tokio::test]
    async fn test_non_transient_rejection_does_not_retry() {
        let provider = Arc::new(FlakySearchProvider::rejecting());
        let client = SearchClient::new(Arc::clone(&provider) as Arc<dyn SearchProvider>);

        let err = client.search("q").await.unwrap_err();
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        assert!(matches!(err, Error::Upstream { status: 403, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_parallel_burst_respects_rate_limit() {
        struct StampingProvider {
            call_times: Mutex<Vec<Instant>>,
        }

        #[async_trait]
        impl SearchProvider for StampingProvider {
            async fn search(&self, _query: &str) -> Result<Vec<Source>> {
                self.call_times.lock().unwrap().push(Instant::now());
                Ok(vec![Source::new("https://ok.example/a", "t", "s")])
            }

            fn name(&self) -> &'static str {
                "stamping"
            }
        }

        let provider = Arc::new(StampingProvider {
            call_times: Mutex::new(Vec::new()),
        });
        let client = Arc::new(
            SearchClient::new(Arc::clone(&provider) as Arc<dyn SearchProvider>)
                .with_limiter(SlidingWindowLimiter::new(5, Duration::from_millis(1000))),
        );

        let mut handles = Vec::new();
        for i in 0..10 {
            let client = Arc::clone(&client);
            handles.push(tokio::spawn(async move {
                client.search(&format!("q{i}")).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let mut times = provider.call_times.lock().unwrap().clone();
        times.sort();
        assert_eq!(times.len(), 10);
        assert!(times[5].duration_since(times[0]) >= Duration::from_millis(1000));
    }
}
