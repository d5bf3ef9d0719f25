//! Retry logic.
//!
//! # Responsibilities
//! - Execute an async operation with capped exponential backoff
//! - Let the caller decide which errors are retryable
//! - Report each retry to an observer hook
//!
//! # Design Decisions
//! - `on_retry` observes, it never vetoes; `should_retry` is the only gate
//! - The last error is returned unchanged once attempts run out

use std::future::Future;
use std::time::Duration;

use crate::config::RetryConfig;
use crate::resilience::backoff::calculate_backoff;
use crate::resilience::classifier;

type RetryPredicate<E> = Box<dyn Fn(&E) -> bool + Send + Sync>;
type RetryObserver<E> = Box<dyn Fn(u32, &E, Duration) + Send + Sync>;

/// How an operation is retried.
pub struct RetryPolicy<E> {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    should_retry: RetryPredicate<E>,
    on_retry: Option<RetryObserver<E>>,
}

impl<E> RetryPolicy<E> {
    /// Retry every error up to `max_attempts` total attempts.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::from_millis(1_000),
            max_delay: Duration::from_millis(10_000),
            should_retry: Box::new(|_| true),
            on_retry: None,
        }
    }

    /// Build from the `[retries]` config section.
    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(config.max_attempts)
            .base_delay(Duration::from_millis(config.base_delay_ms))
            .max_delay(Duration::from_millis(config.max_delay_ms))
    }

    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Only retry errors for which `predicate` holds.
    pub fn should_retry(mut self, predicate: impl Fn(&E) -> bool + Send + Sync + 'static) -> Self {
        self.should_retry = Box::new(predicate);
        self
    }

    /// Called with (attempt that failed, its error, delay before the next one).
    pub fn on_retry(mut self, observer: impl Fn(u32, &E, Duration) + Send + Sync + 'static) -> Self {
        self.on_retry = Some(Box::new(observer));
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

impl<E: std::error::Error + 'static> RetryPolicy<E> {
    /// Retry only failures the classifier considers transient network errors.
    pub fn transient_only(self) -> Self {
        self.should_retry(|e| classifier::is_network_error(e))
    }
}

/// Run `operation`, retrying failures according to `policy`.
pub async fn with_retry<T, E, F, Fut>(policy: &RetryPolicy<E>, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 1;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(error) => {
                if attempt >= policy.max_attempts || !(policy.should_retry)(&error) {
                    return Err(error);
                }

                let delay = calculate_backoff(attempt, policy.base_delay, policy.max_delay);
                tracing::debug!(attempt, delay = ?delay, error = %error, "Operation failed, retrying");
                if let Some(observer) = &policy.on_retry {
                    observer(attempt, &error, delay);
                }

                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
