use std::future::Future;
use std::time::Duration;

use backoff::future::retry;
use backoff::ExponentialBackoffBuilder;

use crate::error::ClientError;

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_millis(1000);

/// Bounded exponential retry: up to `max_retries` additional attempts,
/// waiting `initial_delay`, then twice that, and so on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            initial_delay: DEFAULT_INITIAL_DELAY,
        }
    }
}

impl RetryPolicy {
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// Runs `operation` until it succeeds, fails with an error `is_retryable`
/// rejects, or the policy's attempt ceiling is reached. Every attempt gets a
/// fresh future from `operation`, so callers resend identical requests.
pub async fn retry_with_policy<T, F, Fut, P>(
    policy: &RetryPolicy,
    label: &str,
    is_retryable: P,
    mut operation: F,
) -> Result<T, ClientError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ClientError>>,
    P: Fn(&ClientError) -> bool,
{
    // No jitter and no elapsed-time cap: the attempt counter is the only bound
    let schedule = ExponentialBackoffBuilder::new()
        .with_initial_interval(policy.initial_delay)
        .with_multiplier(2.0)
        .with_randomization_factor(0.0)
        .with_max_interval(Duration::from_secs(24 * 60 * 60))
        .with_max_elapsed_time(None)
        .build();

    let max_retries = policy.max_retries;
    let is_retryable = &is_retryable;
    let mut attempts: u32 = 0;

    retry(schedule, || {
        attempts += 1;
        let attempt = attempts;
        let pending = operation();
        async move {
            log::debug!("{}: attempt {}/{}", label, attempt, max_retries.saturating_add(1));
            match pending.await {
                Ok(value) => Ok(value),
                Err(e) if is_retryable(&e) && attempt <= max_retries => {
                    log::warn!("{}: attempt {} failed with a transient error: {}", label, attempt, e);
                    Err(backoff::Error::transient(e))
                }
                Err(e) if is_retryable(&e) => {
                    log::error!("{}: giving up after {} attempts: {}", label, attempt, e);
                    Err(backoff::Error::permanent(ClientError::RetriesExhausted {
                        attempts: attempt,
                        source: Box::new(e),
                    }))
                }
                Err(e) => {
                    log::error!("{}: attempt {} failed permanently: {}", label, attempt, e);
                    Err(backoff::Error::permanent(e))
                }
            }
        }
    })
    .await
}
