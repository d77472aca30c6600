//! Bounded retry for idempotent reads.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use super::GatewayError;

/// Exponential backoff with random jitter.
///
/// Attempt `n` (0-based) waits `base * 2^n` plus a uniform jitter in
/// `[0, base]` before the next try.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts after the first one.
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// A single attempt, used for non-idempotent calls.
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as u64;
        let backoff = base_ms.saturating_mul(1u64 << attempt.min(16));
        let jitter = if base_ms == 0 {
            0
        } else {
            rand::rng().random_range(0..=base_ms)
        };
        Duration::from_millis(backoff.saturating_add(jitter))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(2, Duration::from_millis(50))
    }
}

/// Runs `op` until it succeeds, fails with a non-retryable error, or the
/// policy's retries are used up.
pub async fn retry_read<T, F, Fut>(
    policy: &RetryPolicy,
    service: &'static str,
    mut op: F,
) -> Result<T, GatewayError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, GatewayError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < policy.max_retries => {
                let delay = policy.delay_for(attempt);
                tracing::warn!(
                    service,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "retrying idempotent read"
                );
                metrics::counter!("gateway_retries_total", "service" => service).increment(1);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn fast(max_retries: u32) -> RetryPolicy {
        RetryPolicy::new(max_retries, Duration::from_millis(1))
    }

    #[test]
    fn test_delay_grows_exponentially() {
        let policy = RetryPolicy::new(3, Duration::from_millis(10));
        let first = policy.delay_for(0);
        let third = policy.delay_for(2);
        assert!(first >= Duration::from_millis(10) && first <= Duration::from_millis(20));
        assert!(third >= Duration::from_millis(40) && third <= Duration::from_millis(50));
        assert_eq!(RetryPolicy::none().delay_for(3), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_retries_transient_then_succeeds() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = retry_read(&fast(2), "cart", || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(GatewayError::Timeout { service: "cart" })
                } else {
                    Ok(7)
                }
            }
        })
        .await;

        assert_eq!(result, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<(), _> = retry_read(&fast(2), "catalog", || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(GatewayError::Status {
                    service: "catalog",
                    code: 503,
                })
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_does_not_retry_client_errors() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<(), _> = retry_read(&fast(5), "catalog", || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(GatewayError::NotFound {
                    service: "catalog",
                    resource: "product P9".into(),
                })
            }
        })
        .await;

        assert!(matches!(result, Err(GatewayError::NotFound { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
