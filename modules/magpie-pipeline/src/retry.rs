use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use magpie_common::{MagpieError, Result};

/// Exponential-backoff wrapper around any fallible remote call.
///
/// Non-retryable errors (per `MagpieError::is_retryable`) propagate
/// immediately. Exhausting the attempt budget surfaces
/// `MagpieError::RetriesExhausted` wrapping the last failure, so callers can
/// distinguish "gave up" from "succeeded".
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        assert!(max_attempts >= 1, "at least one attempt required");
        Self { max_attempts, base_delay }
    }

    /// Run `attempt` up to `max_attempts` times, sleeping
    /// `base_delay * 2^(attempt-1)` between failures.
    ///
    /// Rate limiting composes per attempt: the closure should acquire
    /// admission itself so every retry pays for its own slot.
    pub async fn run<T, F, Fut>(&self, op: &str, mut attempt_fn: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1u32;
        loop {
            match attempt_fn().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(op, attempt, "Succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) if !e.is_retryable() => {
                    debug!(op, attempt, error = %e, "Non-retryable failure");
                    return Err(e);
                }
                Err(e) if attempt >= self.max_attempts => {
                    warn!(op, attempts = attempt, error = %e, "Retries exhausted");
                    return Err(MagpieError::RetriesExhausted {
                        attempts: attempt,
                        source: Box::new(e),
                    });
                }
                Err(e) => {
                    let delay = self.base_delay * 2u32.pow(attempt - 1);
                    warn!(
                        op,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retrying after backoff"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use tokio::time::Instant;

    use super::*;

    #[tokio::test]
    async fn first_success_returns_immediately() {
        let policy = RetryPolicy::new(3, Duration::from_millis(1));
        let calls = AtomicU32::new(0);
        let out = policy
            .run("op", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, MagpieError>(42)
            })
            .await
            .unwrap();
        assert_eq!(out, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn transient_failures_are_retried_until_success() {
        let policy = RetryPolicy::new(3, Duration::from_millis(1));
        let calls = AtomicU32::new(0);
        let out = policy
            .run("op", || async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(MagpieError::Transient("503".into()))
                } else {
                    Ok("done")
                }
            })
            .await
            .unwrap();
        assert_eq!(out, "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_fails_fast() {
        let policy = RetryPolicy::new(3, Duration::from_millis(1));
        let calls = AtomicU32::new(0);
        let err = policy
            .run("op", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(MagpieError::Auth("bad password".into()))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, MagpieError::Auth(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhaustion_wraps_last_error() {
        let policy = RetryPolicy::new(3, Duration::from_millis(1));
        let calls = AtomicU32::new(0);
        let err = policy
            .run("op", || async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(MagpieError::Transient(format!("failure {n}")))
            })
            .await
            .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match err {
            MagpieError::RetriesExhausted { attempts, source } => {
                assert_eq!(attempts, 3);
                assert!(format!("{source}").contains("failure 2"));
            }
            other => panic!("expected RetriesExhausted, got {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_doubles_per_attempt() {
        let policy = RetryPolicy::new(3, Duration::from_secs(1));
        let start = Instant::now();
        let _ = policy
            .run("op", || async { Err::<(), _>(MagpieError::Transient("x".into())) })
            .await;
        // 1s after attempt 1, 2s after attempt 2, none after the last.
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }
}
