//! Exponential backoff for reconnects and listener resubscription.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tracing::debug;

use chatwii_shared::constants::{RETRY_BASE_DELAY_MS, RETRY_MAX_ATTEMPTS, RETRY_MAX_DELAY_MS};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: RETRY_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(RETRY_BASE_DELAY_MS),
            max_delay: Duration::from_millis(RETRY_MAX_DELAY_MS),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (0-based), or `None` once the
    /// attempts run out. Doubles from `base_delay`, capped at `max_delay`.
    pub fn delay_for(&self, retry: u32) -> Option<Duration> {
        if retry >= self.max_attempts {
            return None;
        }
        let factor = 2u32.saturating_pow(retry);
        Some(self.base_delay.saturating_mul(factor).min(self.max_delay))
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RetryError<E> {
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: E },

    #[error("{0}")]
    Fatal(E),
}

impl<E> RetryError<E> {
    pub fn into_inner(self) -> E {
        match self {
            RetryError::Exhausted { last, .. } => last,
            RetryError::Fatal(e) => e,
        }
    }
}

/// Run `op` until it succeeds, fails with an error `retryable` rejects, or
/// the policy runs out. Sleeps with `tokio::time`, so dropping the returned
/// future cancels any pending wait.
pub async fn retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    retryable: impl Fn(&E) -> bool,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut retries = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if !retryable(&e) => return Err(RetryError::Fatal(e)),
            Err(e) => match policy.delay_for(retries) {
                Some(delay) => {
                    debug!(retry = retries + 1, delay_ms = delay.as_millis() as u64, "Retrying");
                    tokio::time::sleep(delay).await;
                    retries += 1;
                }
                None => {
                    return Err(RetryError::Exhausted {
                        attempts: retries + 1,
                        last: e,
                    })
                }
            },
        }
    }
}
