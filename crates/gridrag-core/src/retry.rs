//! Bounded exponential backoff for transient backend failures.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{error, warn};

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self { Self { max_attempts: 5, base_delay_ms: 1_000, max_delay_ms: 30_000, multiplier: 2.0 } }
}

impl RetryPolicy {
    /// A policy that tries exactly once.
    pub fn no_retry() -> Self { Self { max_attempts: 1, ..Self::default() } }

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::InvalidConfig("retry.max_attempts must be at least 1".into()));
        }
        if !(self.multiplier >= 1.0) {
            return Err(Error::InvalidConfig(format!("retry.multiplier must be >= 1.0, got {}", self.multiplier)));
        }
        Ok(())
    }

    /// Delay before the attempt following `attempt` (1-based), capped at `max_delay_ms`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.multiplier.powi(attempt.saturating_sub(1) as i32);
        let ms = (self.base_delay_ms as f64 * exp).min(self.max_delay_ms as f64);
        Duration::from_millis(ms as u64)
    }

    /// Run `op` until it succeeds, fails with a non-transient error, or the
    /// attempts are exhausted.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.validate()?;
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) if !e.is_transient() => return Err(e),
                Err(e) if attempt >= self.max_attempts => {
                    error!(operation, attempts = attempt, error = %e, "all attempts failed");
                    return Err(Error::RetryExhausted { operation: operation.to_string(), attempts: attempt, last: e.to_string() });
                }
                Err(e) => {
                    let delay = self.delay_for(attempt);
                    warn!(operation, attempt, max_attempts = self.max_attempts, error = %e, ?delay, "retrying");
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

    fn fast(max_attempts: u32) -> RetryPolicy {
        RetryPolicy { max_attempts, base_delay_ms: 1, max_delay_ms: 4, multiplier: 2.0 }
    }

    #[test]
    fn delays_grow_and_cap() {
        let p = RetryPolicy::default();
        assert_eq!(p.delay_for(1), Duration::from_secs(1));
        assert_eq!(p.delay_for(2), Duration::from_secs(2));
        assert_eq!(p.delay_for(3), Duration::from_secs(4));
        assert_eq!(p.delay_for(10), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn retries_transient_errors_until_success() {
        let calls = AtomicU32::new(0);
        let out = fast(5)
            .run("flaky", || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 { Err(Error::Transient("busy".into())) } else { Ok(7) }
            })
            .await
            .expect("eventually succeeds");
        assert_eq!(out, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhaustion_reports_attempts() {
        let err = fast(3)
            .run("down", || async { Err::<(), _>(Error::Transient("refused".into())) })
            .await
            .expect_err("never succeeds");
        match err {
            Error::RetryExhausted { attempts, last, .. } => {
                assert_eq!(attempts, 3);
                assert!(last.contains("refused"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn fatal_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let err = fast(5)
            .run("auth", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(Error::MissingCredentials("no key".into()))
            })
            .await
            .expect_err("fails");
        assert!(matches!(err, Error::MissingCredentials(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn backend_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let err = fast(5)
            .run("parse", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(Error::Backend("embedding response parse error".into()))
            })
            .await
            .expect_err("fails");
        assert!(matches!(err, Error::Backend(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn zero_attempts_is_a_config_error() {
        let err = fast(0).run("x", || async { Ok(()) }).await.expect_err("invalid");
        assert!(matches!(err, Error::InvalidConfig(_)));
    }
}
