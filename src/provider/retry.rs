//! Retry with exponential backoff for transient provider errors.

use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::RetryConfig;
use crate::error::{ConvergeError, ProviderError, ReconcileError, Result};

/// Backoff schedule for provider calls.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_backoff: Duration,
    max_backoff: Duration,
    multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    /// Creates a policy.
    #[must_use]
    pub fn new(max_attempts: u32, initial_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff,
            max_backoff,
            multiplier: 2.0,
        }
    }

    /// Builds a policy from the engine configuration.
    #[must_use]
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
            multiplier: if config.multiplier < 1.0 { 1.0 } else { config.multiplier },
        }
    }

    /// A policy that never retries.
    #[must_use]
    pub fn no_retry() -> Self {
        Self::new(1, Duration::ZERO, Duration::ZERO)
    }

    /// Total attempts, including the first.
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before retry number `retry` (1-based).
    #[must_use]
    pub fn backoff(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry.saturating_sub(1)).unwrap_or(i32::MAX);
        let delay = self.initial_backoff.as_secs_f64() * self.multiplier.powi(exponent);
        Duration::from_secs_f64(delay.min(self.max_backoff.as_secs_f64()))
    }

    /// Delay before retry number `retry` after `error`.
    ///
    /// A rate limit's requested delay wins when it is longer.
    #[must_use]
    pub fn delay_after(&self, error: &ProviderError, retry: u32) -> Duration {
        let backoff = self.backoff(retry);
        match error {
            ProviderError::RateLimited { retry_after_secs } => {
                backoff.max(Duration::from_secs(*retry_after_secs))
            }
            _ => backoff,
        }
    }

    /// Runs `call` until it succeeds, fails permanently or runs out of attempts.
    ///
    /// # Errors
    ///
    /// Permanent errors are returned as [`ConvergeError::Provider`]. A
    /// transient error on the last attempt becomes
    /// [`ReconcileError::MaxRetriesExceeded`].
    pub async fn run<T, F, Fut>(&self, resource: &str, operation: &str, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, ProviderError>>,
    {
        let mut attempt = 1;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_transient() => {
                    debug!(resource, operation, error = %e, "Permanent provider error");
                    return Err(ConvergeError::Provider(e));
                }
                Err(e) if attempt >= self.max_attempts => {
                    warn!(resource, operation, attempts = attempt, error = %e, "Giving up after transient errors");
                    return Err(ConvergeError::Reconcile(ReconcileError::MaxRetriesExceeded {
                        attempts: attempt,
                        resource: resource.to_string(),
                        last_error: e.to_string(),
                    }));
                }
                Err(e) => {
                    let delay = self.delay_after(&e, attempt);
                    warn!(
                        resource,
                        operation,
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %e,
                        "Transient provider error, retrying"
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
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(attempts: u32) -> RetryPolicy {
        RetryPolicy::new(attempts, Duration::from_millis(1), Duration::from_millis(5))
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = RetryPolicy::from_config(&RetryConfig::default());
        assert_eq!(policy.backoff(1), Duration::from_millis(200));
        assert_eq!(policy.backoff(2), Duration::from_millis(400));
        assert_eq!(policy.backoff(3), Duration::from_millis(800));
        assert_eq!(policy.backoff(20), Duration::from_secs(10));
    }

    #[test]
    fn test_rate_limit_delay_wins_when_longer() {
        let policy = RetryPolicy::default();
        let err = ProviderError::RateLimited { retry_after_secs: 3 };
        assert_eq!(policy.delay_after(&err, 1), Duration::from_secs(3));
        assert_eq!(
            policy.delay_after(&ProviderError::network("reset"), 1),
            Duration::from_millis(200)
        );
    }

    #[tokio::test]
    async fn test_transient_then_success() {
        let calls = AtomicU32::new(0);
        let result = fast_policy(4)
            .run("bucket", "create", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(ProviderError::network("connection reset"))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert_eq!(result.expect("third attempt succeeds"), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = fast_policy(4)
            .run("bucket", "create", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ProviderError::validation("bucket", "bad name")) }
            })
            .await;

        assert!(matches!(
            result,
            Err(ConvergeError::Provider(ProviderError::Validation { .. }))
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhausted_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = fast_policy(3)
            .run("bucket", "update", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ProviderError::network("timeout")) }
            })
            .await;

        assert!(matches!(
            result,
            Err(ConvergeError::Reconcile(ReconcileError::MaxRetriesExceeded { attempts: 3, .. }))
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
