use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::errors::ServiceError;

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,
    /// Initial delay between retries
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Factor to multiply delay by after each attempt
    pub backoff_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(25),
            max_delay: Duration::from_millis(500),
            backoff_factor: 2.0,
        }
    }
}

impl RetryConfig {
    /// Single attempt, no backoff.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }
}

/// Retry policy for determining if an error is retryable
pub trait RetryPolicy<E> {
    fn is_retryable(&self, error: &E) -> bool;
}

/// Retries transient database failures (lock contention, serialization
/// failures, pool exhaustion). Business rejections are returned immediately.
pub struct TransientDbPolicy;

impl RetryPolicy<ServiceError> for TransientDbPolicy {
    fn is_retryable(&self, error: &ServiceError) -> bool {
        error.is_retryable()
    }
}

/// Execute an async function with bounded exponential backoff
pub async fn with_retry<F, Fut, T, E>(
    config: &RetryConfig,
    policy: impl RetryPolicy<E>,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut delay = config.initial_delay;
    let mut attempts = 0;

    loop {
        attempts += 1;

        match operation().await {
            Ok(result) => {
                if attempts > 1 {
                    debug!("Operation succeeded after {} attempts", attempts);
                }
                return Ok(result);
            }
            Err(error) => {
                if attempts >= config.max_attempts || !policy.is_retryable(&error) {
                    return Err(error);
                }

                let jittered = jitter(delay);
                warn!(
                    "Attempt {} failed: {}. Retrying in {:?}...",
                    attempts, error, jittered
                );

                sleep(jittered).await;

                delay = Duration::from_secs_f64(
                    (delay.as_secs_f64() * config.backoff_factor)
                        .min(config.max_delay.as_secs_f64()),
                );
            }
        }
    }
}

/// Spreads concurrent retries over [delay/2, delay].
fn jitter(delay: Duration) -> Duration {
    let half = delay / 2;
    if half.is_zero() {
        return delay;
    }
    let extra = rand::thread_rng().gen_range(0..=half.as_micros() as u64);
    half + Duration::from_micros(extra)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::{DbErr, RuntimeErr};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> RetryConfig {
        RetryConfig {
            max_attempts: 4,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            backoff_factor: 2.0,
        }
    }

    fn locked() -> ServiceError {
        ServiceError::DatabaseError(DbErr::Exec(RuntimeErr::Internal(
            "database is locked".into(),
        )))
    }

    #[tokio::test]
    async fn retries_transient_failures_until_success() {
        let calls = AtomicU32::new(0);
        let calls = &calls;
        let result = with_retry(&fast(), TransientDbPolicy, move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(locked())
            } else {
                Ok(7)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn stops_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let calls = &calls;
        let result: Result<(), _> = with_retry(&fast(), TransientDbPolicy, move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(locked())
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn commit_failures_are_not_retried() {
        let calls = AtomicU32::new(0);
        let calls = &calls;
        let result: Result<(), _> = with_retry(&fast(), TransientDbPolicy, move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ServiceError::CommitFailed(DbErr::Conn(RuntimeErr::Internal(
                "connection closed".into(),
            ))))
        })
        .await;

        assert!(matches!(result, Err(ServiceError::CommitFailed(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn business_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let calls = &calls;
        let result: Result<(), _> = with_retry(&fast(), TransientDbPolicy, move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ServiceError::InsufficientStock {
                item_id: 5,
                requested: 2,
                available: 1,
            })
        })
        .await;

        assert!(matches!(
            result,
            Err(ServiceError::InsufficientStock { .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let delay = Duration::from_millis(100);
        for _ in 0..50 {
            let j = jitter(delay);
            assert!(j >= Duration::from_millis(50) && j <= delay);
        }
    }
}
