//! Bounded retry for deadlock-class failures.
//!
//! Concurrent transactions contending for the same rows can be chosen as
//! deadlock victims by the database. Retrying the whole unit of work with a
//! growing delay lets the contenders settle into one serialized order; once the
//! retry ceiling is reached the last error is returned instead of looping.

use crate::error::DbResult;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, error, warn};

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_BASE_DELAY_MS: u64 = 100;
pub const DEFAULT_MAX_JITTER_MS: u64 = 50;

/// How often and how patiently to retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay unit; retry `n` waits `base_delay * n`
    pub base_delay: Duration,
    /// Upper bound of the random delay added to every wait
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
            max_jitter: Duration::from_millis(DEFAULT_MAX_JITTER_MS),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            ..Self::default()
        }
    }

    /// Set the jitter bound.
    pub fn with_jitter(mut self, max_jitter: Duration) -> Self {
        self.max_jitter = max_jitter;
        self
    }

    /// Linear backoff for a retry number, without jitter.
    pub fn backoff(&self, retry: u32) -> Duration {
        self.base_delay.saturating_mul(retry)
    }

    fn delay_for(&self, retry: u32) -> Duration {
        let jitter_ms = self.max_jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
        };
        self.backoff(retry) + jitter
    }
}

/// Run `op` until it succeeds, fails with a non-deadlock error, or the retry
/// budget is spent.
///
/// `op` receives the 1-based attempt number.
pub async fn retry_on_deadlock<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> DbResult<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = DbResult<T>>,
{
    let mut attempt = 1u32;
    loop {
        match op(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(attempt, "Operation succeeded after deadlock retry");
                }
                return Ok(value);
            }
            Err(err) if !err.is_deadlock() => return Err(err),
            Err(err) if attempt > policy.max_retries => {
                error!(
                    attempt,
                    max_retries = policy.max_retries,
                    error = %err,
                    "Deadlock retries exhausted"
                );
                return Err(err);
            }
            Err(err) => {
                let delay = policy.delay_for(attempt);
                warn!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Deadlock detected, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
