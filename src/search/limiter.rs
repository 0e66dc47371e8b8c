//! Sliding-window rate limiter shared by all concurrent pipelines.

use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};

/// Slack added before re-checking capacity, so a waiter woken at the edge
/// of the window does not spin.
const RECHECK_SLACK: Duration = Duration::from_millis(10);

/// Sliding-window limiter: at most `limit` permits per rolling `window`.
///
/// Permit acquisition is serialized through a single mutex over the
/// timestamp window; a permit is consumed at release by appending the
/// current timestamp, after expired timestamps are discarded. Callers at
/// capacity sleep until the oldest timestamp exits the window, then
/// re-check. Retry policy does not live here; it sits one layer up in the
/// search client.
#[derive(Debug)]
pub struct SlidingWindowLimiter {
    limit: usize,
    window: Duration,
    stamps: Mutex<VecDeque<Instant>>,
}

impl SlidingWindowLimiter {
    pub fn new(limit: usize, window: Duration) -> Self {
        Self {
            limit: limit.max(1),
            window,
            stamps: Mutex::new(VecDeque::new()),
        }
    }

    /// The default search budget: 5 requests per second.
    pub fn per_second(limit: usize) -> Self {
        Self::new(limit, Duration::from_secs(1))
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Wait until a permit is available, then consume it.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut stamps = self.stamps.lock().await;
                let now = Instant::now();
                while let Some(&oldest) = stamps.front() {
                    if now.duration_since(oldest) >= self.window {
                        stamps.pop_front();
                    } else {
                        break;
                    }
                }

                if stamps.len() < self.limit {
                    stamps.push_back(now);
                    None
                } else {
                    // Oldest stamp is present here: len == limit >= 1.
                    let oldest = *stamps.front().expect("non-empty window at capacity");
                    let remaining = self.window.saturating_sub(now.duration_since(oldest));
                    Some(remaining + RECHECK_SLACK)
                }
            };

            match wait {
                None => return,
                Some(delay) => sleep(delay).await,
            }
        }
    }

    /// Permits currently consumed within the window. Test observability.
    pub async fn in_flight(&self) -> usize {
        let stamps = self.stamps.lock().await;
        let now = Instant::now();
        stamps
            .iter()
            .filter(|s| now.duration_since(**s) < self.window)
            .count()
    }
}
