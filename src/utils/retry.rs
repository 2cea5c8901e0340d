// src/utils/retry.rs
//! Bounded retries with exponential backoff for calls to the tracking and registry
//! collaborators. Each attempt is also bounded by a per-call timeout.

use crate::error::{LifecycleError, Result};
use log::{debug, warn};
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, timeout};

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Upper bound for a single attempt.
    pub call_timeout: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            multiplier: 2.0,
            call_timeout: Duration::from_secs(5),
        }
    }
}

impl RetryConfig {
    /// Single attempt, no backoff. Used by tests and the dry-run trainer.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            multiplier: 1.0,
            call_timeout: Duration::from_secs(5),
        }
    }

    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let base = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        Duration::from_secs_f64(base.min(self.max_delay.as_secs_f64()))
    }
}

pub struct RetryExecutor {
    config: RetryConfig,
}

impl RetryExecutor {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Runs `f` until it succeeds, returns a non-retryable error, or the attempt limit
    /// is exhausted. Timeouts count as retryable failures.
    pub async fn execute<F, Fut, T>(&self, operation: &str, mut f: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            let outcome = match timeout(self.config.call_timeout, f()).await {
                Ok(result) => result,
                Err(_) => Err(LifecycleError::Timeout(format!(
                    "{} exceeded {:?}",
                    operation, self.config.call_timeout
                ))),
            };

            match outcome {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => {
                    warn!(
                        "{} failed (attempt {}/{}): {}",
                        operation, attempt, max_attempts, e
                    );
                    last_error = Some(e);
                    if attempt < max_attempts {
                        let delay = self.config.delay_for_attempt(attempt);
                        debug!("Retrying {} in {}ms", operation, delay.as_millis());
                        sleep(delay).await;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            LifecycleError::RegistryUnavailable(format!("{} exhausted its retries", operation))
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_config(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            multiplier: 2.0,
            call_timeout: Duration::from_millis(200),
        }
    }

    #[test]
    fn test_delay_grows_and_caps() {
        let config = RetryConfig {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(300),
            multiplier: 2.0,
            ..RetryConfig::default()
        };
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(config.delay_for_attempt(3), Duration::from_millis(300));
        assert_eq!(config.delay_for_attempt(8), Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_retries_transient_failures_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let executor = RetryExecutor::new(fast_config(3));

        let counter = calls.clone();
        let result = executor
            .execute("flaky", move || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(LifecycleError::RegistryUnavailable("blip".into()))
                    } else {
                        Ok(7)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_errors_are_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let executor = RetryExecutor::new(fast_config(5));

        let counter = calls.clone();
        let result: Result<()> = executor
            .execute("corrupt", move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(LifecycleError::Artifact("bad checksum".into()))
                }
            })
            .await;

        assert!(matches!(result, Err(LifecycleError::Artifact(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_slow_calls_time_out() {
        let executor = RetryExecutor::new(RetryConfig {
            call_timeout: Duration::from_millis(10),
            ..fast_config(2)
        });

        let result: Result<()> = executor
            .execute("slow", || async {
                sleep(Duration::from_millis(200)).await;
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(LifecycleError::Timeout(_))));
    }
}
