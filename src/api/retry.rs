//! Bounded exponential-backoff retry for outbound HTTP calls.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use anyhow::Result;
use backoff::future::retry_notify;
use backoff::ExponentialBackoffBuilder;
use tracing::warn;

/// Retries an async operation with exponential backoff and a hard attempt
/// ceiling. Exhaustion surfaces the last error to the caller; the trading
/// cycle treats that as a degraded-data signal, never a crash.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Run `op` until it succeeds or `max_attempts` failures accumulate.
    pub async fn run<T, F, Fut>(&self, label: &'static str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let attempts = AtomicU32::new(0);
        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(self.base_delay)
            .with_multiplier(2.0)
            .with_randomization_factor(0.1)
            .with_max_elapsed_time(None)
            .build();

        retry_notify(
            policy,
            || {
                let fut = op();
                let attempts = &attempts;
                async move {
                    match fut.await {
                        Ok(value) => Ok(value),
                        Err(err) => {
                            let made = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                            if made >= self.max_attempts {
                                Err(backoff::Error::permanent(err))
                            } else {
                                Err(backoff::Error::transient(err))
                            }
                        }
                    }
                }
            },
            |err, delay| {
                warn!(op = label, ?delay, error = %err, "retrying after failure");
            },
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use std::sync::atomic::AtomicU32;

    #[tokio::test]
    async fn succeeds_first_try_without_retrying() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(3, Duration::from_millis(1));
        let result = policy
            .run("ok", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(7u32) }
            })
            .await
            .unwrap();
        assert_eq!(result, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_then_succeeds() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(3, Duration::from_millis(1));
        let result = policy
            .run("flaky", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        bail!("transient");
                    }
                    Ok("done")
                }
            })
            .await
            .unwrap();
        assert_eq!(result, "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(3, Duration::from_millis(1));
        let result: Result<()> = policy
            .run("doomed", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { bail!("still broken") }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
