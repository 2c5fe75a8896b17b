//! Retry with exponential backoff.
//!
//! One primitive shared by every retried network step. A policy fixes the
//! attempt budget and the base delay; the delay doubles with every attempt.
//!
//! Two placements of the wait are supported:
//!
//! - **after failure** (default): attempt 0 runs immediately, and the wait
//!   between attempt `i` and `i + 1` is `base * 2^i`.
//! - **before every attempt**: the wait before attempt `i` is `base * 2^i`,
//!   so even the first attempt is delayed. Used when the remote side needs
//!   time before the first try can succeed.

use std::fmt;
use std::future::Future;
use std::time::Duration;

/// Retry policy configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Delay unit; doubled for every attempt
    pub base_delay: Duration,
    /// Wait before every attempt instead of only after failures
    pub delay_first: bool,
}

impl RetryPolicy {
    /// Policy that waits only after failures.
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            delay_first: false,
        }
    }

    /// Switch to paying the backoff before every attempt.
    pub fn delay_before_each(mut self) -> Self {
        self.delay_first = true;
        self
    }

    /// Wait before the 0-based `attempt`, if any.
    pub fn delay_before(&self, attempt: u32) -> Option<Duration> {
        let exponent = if self.delay_first {
            attempt
        } else if attempt == 0 {
            return None;
        } else {
            attempt - 1
        };
        let factor = 1u32.checked_shl(exponent).unwrap_or(u32::MAX);
        Some(self.base_delay.saturating_mul(factor))
    }
}

/// Error returned once a retried operation gives up.
#[derive(Debug)]
pub struct RetryError<E> {
    /// Attempts actually made
    pub attempts: u32,
    /// Error from the last attempt
    pub source: E,
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gave up after {} attempt(s): {}", self.attempts, self.source)
    }
}

/// Run `op` under `policy`.
///
/// `op` receives the 0-based attempt number. Errors for which `is_retryable`
/// returns `false` end the loop immediately.
pub async fn retry<T, E, F, Fut, R>(
    policy: &RetryPolicy,
    label: &str,
    mut is_retryable: R,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    E: fmt::Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: FnMut(&E) -> bool,
{
    let mut attempt = 0;
    loop {
        if let Some(delay) = policy.delay_before(attempt) {
            log::debug!(
                "{}: waiting {:?} before attempt {}/{}",
                label,
                delay,
                attempt + 1,
                policy.max_attempts
            );
            tokio::time::sleep(delay).await;
        }

        match op(attempt).await {
            Ok(value) => {
                if attempt > 0 {
                    log::info!("{}: succeeded on attempt {}", label, attempt + 1);
                }
                return Ok(value);
            }
            Err(error) => {
                let attempts = attempt + 1;
                log::warn!(
                    "{}: attempt {}/{} failed: {}",
                    label,
                    attempts,
                    policy.max_attempts,
                    error
                );
                if attempts >= policy.max_attempts || !is_retryable(&error) {
                    return Err(RetryError {
                        attempts,
                        source: error,
                    });
                }
                attempt = attempts;
            }
        }
    }
}
