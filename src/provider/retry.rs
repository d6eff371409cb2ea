//! Exponential backoff with jitter, honoring provider `retry_after` hints.
//!
//! Ported from the original `attractor_llm.retry` module; the teacher
//! crate's own `chat_loop_with_tools` has no generic retry primitive, so
//! this is grounded directly on original_source rather than the teacher.

use super::error::ProviderError;
use rand::Rng;
use std::future::Future;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: f64,
    pub max_delay: f64,
    pub backoff_multiplier: f64,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_retries: 2,
            base_delay: 1.0,
            max_delay: 60.0,
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    pub fn with_max_retries(mut self, n: u32) -> Self {
        self.max_retries = n;
        self
    }

    pub fn with_base_delay(mut self, secs: f64) -> Self {
        self.base_delay = secs;
        self
    }

    pub fn with_max_delay(mut self, secs: f64) -> Self {
        self.max_delay = secs;
        self
    }

    /// Returns `None` when `retry_after` exceeds `max_delay` — the caller
    /// must not retry in that case.
    pub fn calculate_delay(&self, attempt: u32, retry_after: Option<f64>) -> Option<f64> {
        if let Some(ra) = retry_after {
            return if ra > self.max_delay { None } else { Some(ra) };
        }
        let mut delay = self.base_delay * self.backoff_multiplier.powi(attempt as i32);
        delay = delay.min(self.max_delay);
        if self.jitter {
            delay *= rand::thread_rng().gen_range(0.5..1.5);
        }
        Some(delay)
    }
}

/// Execute `fn_` with retry according to `policy`. `on_retry` is invoked
/// before each sleep with (error, attempt, delay).
pub async fn retry<T, F, Fut>(
    mut fn_: F,
    policy: &RetryPolicy,
    mut on_retry: impl FnMut(&ProviderError, u32, f64),
) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    for attempt in 0..=policy.max_retries {
        match fn_().await {
            Ok(v) => return Ok(v),
            Err(err) => {
                if !err.retryable() || attempt >= policy.max_retries {
                    return Err(err);
                }
                let delay = policy.calculate_delay(attempt, err.retry_after());
                let Some(delay) = delay else {
                    return Err(err);
                };
                on_retry(&err, attempt, delay);
                tokio::time::sleep(std::time::Duration::from_secs_f64(delay)).await;
            }
        }
    }
    unreachable!("loop always returns within max_retries+1 iterations")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retries_retryable_errors_until_success() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::default().with_max_retries(3).with_base_delay(0.001);
        let result = retry(
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(ProviderError::ServerError { provider: "x".into(), message: "boom".into(), retry_after: None })
                    } else {
                        Ok(42)
                    }
                }
            },
            &policy,
            |_, _, _| {},
        )
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_errors_propagate_immediately() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::default();
        let result: Result<(), _> = retry(
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ProviderError::AuthenticationFailed { provider: "x".into() }) }
            },
            &policy,
            |_, _, _| {},
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retry_after_beyond_max_delay_refuses_to_retry() {
        let policy = RetryPolicy::default().with_max_delay(5.0);
        let result: Result<(), _> = retry(
            || async {
                Err(ProviderError::RateLimitExceeded { provider: "x".into(), retry_after: Some(100.0) })
            },
            &policy,
            |_, _, _| {},
        )
        .await;
        assert!(result.is_err());
    }
}
