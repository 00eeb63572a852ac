use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Admission limit for one endpoint: at most `max_requests` within any
/// sliding `window`.
#[derive(Debug, Clone, Copy)]
pub struct WindowLimit {
    pub max_requests: usize,
    pub window: Duration,
}

/// Per-endpoint sliding-window rate limiter.
///
/// `acquire` never fails, it only delays: callers are suspended for exactly
/// the time until the oldest in-window request expires, then re-checked.
/// Windows for unconfigured endpoints are created lazily with the default
/// limit.
pub struct RateLimiter {
    default_limit: WindowLimit,
    overrides: HashMap<String, WindowLimit>,
    windows: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            // A zero limit could never admit anything; treat it as one.
            default_limit: WindowLimit {
                max_requests: max_requests.max(1),
                window,
            },
            overrides: HashMap::new(),
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Configure a tighter (or looser) limit for a specific endpoint.
    /// A zero `max_requests` is clamped to one.
    pub fn with_endpoint_limit(
        mut self,
        endpoint: &str,
        max_requests: usize,
        window: Duration,
    ) -> Self {
        self.overrides.insert(
            endpoint.to_string(),
            WindowLimit {
                max_requests: max_requests.max(1),
                window,
            },
        );
        self
    }

    /// Block until a request to `endpoint` is safe to issue, then record it.
    pub async fn acquire(&self, endpoint: &str) {
        let limit = self.limit_for(endpoint);
        loop {
            let wait = {
                let mut windows = self.windows.lock().await;
                let timestamps = windows.entry(endpoint.to_string()).or_default();
                let now = Instant::now();

                while timestamps
                    .front()
                    .is_some_and(|oldest| *oldest + limit.window <= now)
                {
                    timestamps.pop_front();
                }

                if timestamps.len() < limit.max_requests {
                    timestamps.push_back(now);
                    return;
                }

                // Window is full: wait for the oldest entry to fall out.
                let oldest = *timestamps.front().expect("non-empty window");
                (oldest + limit.window) - now
            };

            warn!(
                endpoint,
                wait_secs = wait.as_secs_f64(),
                "Rate limit reached, waiting"
            );
            tokio::time::sleep(wait).await;
            debug!(endpoint, "Rate limit wait elapsed, re-checking");
        }
    }

    /// How many requests remain in the current window. Pure read: does not
    /// prune or record anything.
    pub async fn remaining(&self, endpoint: &str) -> usize {
        let limit = self.limit_for(endpoint);
        let windows = self.windows.lock().await;
        let now = Instant::now();
        let in_window = windows
            .get(endpoint)
            .map(|timestamps| {
                timestamps
                    .iter()
                    .filter(|t| **t + limit.window > now)
                    .count()
            })
            .unwrap_or(0);
        limit.max_requests.saturating_sub(in_window)
    }

    /// Clear recorded requests for one endpoint, or for all of them.
    pub async fn reset(&self, endpoint: Option<&str>) {
        let mut windows = self.windows.lock().await;
        match endpoint {
            Some(endpoint) => {
                windows.remove(endpoint);
            }
            None => windows.clear(),
        }
    }

    fn limit_for(&self, endpoint: &str) -> WindowLimit {
        self.overrides
            .get(endpoint)
            .copied()
            .unwrap_or(self.default_limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn under_limit_admits_immediately() {
        let limiter = RateLimiter::new(3, Duration::from_secs(60));
        let start = Instant::now();
        for _ in 0..3 {
            limiter.acquire("notifications").await;
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(limiter.remaining("notifications").await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn fourth_call_waits_for_window_remainder() {
        let limiter = RateLimiter::new(3, Duration::from_secs(60));
        for _ in 0..3 {
            limiter.acquire("notifications").await;
        }
        // 10s into the window the 4th call must wait out the remaining 50s.
        tokio::time::advance(Duration::from_secs(10)).await;
        let start = Instant::now();
        limiter.acquire("notifications").await;
        assert_eq!(start.elapsed(), Duration::from_secs(50));
    }

    #[tokio::test(start_paused = true)]
    async fn window_expiry_frees_slots() {
        let limiter = RateLimiter::new(2, Duration::from_secs(60));
        limiter.acquire("post").await;
        limiter.acquire("post").await;
        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(limiter.remaining("post").await, 2);
        let start = Instant::now();
        limiter.acquire("post").await;
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn endpoints_are_independent() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        limiter.acquire("notifications").await;
        let start = Instant::now();
        limiter.acquire("post").await;
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn endpoint_override_applies() {
        let limiter = RateLimiter::new(100, Duration::from_secs(60))
            .with_endpoint_limit("post", 1, Duration::from_secs(30));
        limiter.acquire("post").await;
        let start = Instant::now();
        limiter.acquire("post").await;
        assert_eq!(start.elapsed(), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn reset_clears_state() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        limiter.acquire("notifications").await;
        limiter.reset(Some("notifications")).await;
        let start = Instant::now();
        limiter.acquire("notifications").await;
        assert_eq!(start.elapsed(), Duration::ZERO);

        limiter.acquire("post").await;
        limiter.reset(None).await;
        assert_eq!(limiter.remaining("post").await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_limit_is_clamped_to_one() {
        // A misconfigured zero budget must degrade to the slowest usable
        // limit instead of making acquire unsatisfiable.
        let limiter = RateLimiter::new(5, Duration::from_secs(60))
            .with_endpoint_limit("post", 0, Duration::from_secs(60));
        limiter.acquire("post").await;
        let start = Instant::now();
        limiter.acquire("post").await;
        assert_eq!(start.elapsed(), Duration::from_secs(60));

        let limiter = RateLimiter::new(0, Duration::from_secs(30));
        limiter.acquire("notifications").await;
        let start = Instant::now();
        limiter.acquire("notifications").await;
        assert_eq!(start.elapsed(), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn remaining_is_a_pure_read() {
        let limiter = RateLimiter::new(2, Duration::from_secs(60));
        limiter.acquire("notifications").await;
        assert_eq!(limiter.remaining("notifications").await, 1);
        assert_eq!(limiter.remaining("notifications").await, 1);
    }
}
