//! Bounded exponential backoff for background jobs.

use std::future::Future;
use std::time::Duration;

use governance_core::config::JobRetryConfig;
use governance_core::GovernanceResult;
use tracing::warn;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt; 0 means run once.
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 30_000,
            max_backoff_ms: 600_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl From<&JobRetryConfig> for RetryPolicy {
    fn from(cfg: &JobRetryConfig) -> Self {
        Self {
            max_retries: cfg.max_retries,
            initial_backoff_ms: cfg.initial_backoff_ms,
            max_backoff_ms: cfg.max_backoff_ms,
            ..Self::default()
        }
    }
}

impl RetryPolicy {
    /// Compute the backoff duration for a given attempt (0-indexed).
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let base_ms = self.initial_backoff_ms as f64 * self.backoff_multiplier.powi(attempt as i32);
        let capped_ms = base_ms.min(self.max_backoff_ms as f64);
        Duration::from_millis(capped_ms as u64)
    }

    /// Run `op` until it succeeds, fails permanently, or retries run out.
    /// Only errors reporting `is_transient()` are retried.
    pub async fn run<T, F, Fut>(&self, job: &str, tenant_id: Uuid, mut op: F) -> GovernanceResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = GovernanceResult<T>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    let backoff = self.backoff_for_attempt(attempt);
                    warn!(
                        job,
                        tenant_id = %tenant_id,
                        attempt = attempt + 1,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Job failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use governance_core::{GovernanceError, StoreError};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            initial_backoff_ms: 1,
            max_backoff_ms: 4,
            backoff_multiplier: 2.0,
        }
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let p = RetryPolicy::from(&JobRetryConfig {
            max_retries: 3,
            initial_backoff_ms: 30_000,
            max_backoff_ms: 100_000,
        });
        assert_eq!(p.backoff_for_attempt(0), Duration::from_millis(30_000));
        assert_eq!(p.backoff_for_attempt(1), Duration::from_millis(60_000));
        assert_eq!(p.backoff_for_attempt(2), Duration::from_millis(100_000));
        assert_eq!(p.backoff_for_attempt(10), Duration::from_millis(100_000));
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result = fast(3)
            .run("provision", Uuid::new_v4(), move || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(GovernanceError::Store(StoreError::Backend("flaky".into())))
                } else {
                    Ok(42)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: GovernanceResult<()> = fast(1)
            .run("erasure", Uuid::new_v4(), move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(GovernanceError::Store(StoreError::Timeout {
                    operation: "drop_schema".into(),
                }))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_permanent_errors_fail_fast() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: GovernanceResult<()> = fast(3)
            .run("deprovision", Uuid::new_v4(), move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(GovernanceError::TenantNotFound {
                    tenant_id: Uuid::nil(),
                })
            })
            .await;
        assert!(matches!(result, Err(GovernanceError::TenantNotFound { .. })));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
