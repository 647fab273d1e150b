//! Bounded retry with backoff.
//!
//! - Attempts are capped by `max_attempts` (the first try counts)
//! - Delays come from a swappable [`Backoff`] curve and are always capped
//! - Only errors the caller classifies as transient are retried
//!
//! A node that always fails is therefore attempted exactly `max_attempts`
//! times and the caller can never hang on a single write.

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Retry limit used when none is configured.
pub const DEFAULT_RETRY_LIMIT: u32 = 5;

/// Upper bound for any single backoff delay.
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Delay curve between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Same delay after every failure.
    Fixed(Duration),

    /// `base * 2^(n-1)` after the n-th failure, capped at `max`.
    Exponential { base: Duration, max: Duration },
}

impl Backoff {
    /// Delay after `failures` failed attempts (1-based).
    pub fn delay(&self, failures: u32) -> Duration {
        let delay = match *self {
            Backoff::Fixed(delay) => delay,
            Backoff::Exponential { base, max } => {
                let factor = 2u32.saturating_pow(failures.saturating_sub(1));
                base.checked_mul(factor).unwrap_or(max).min(max)
            }
        };
        delay.min(MAX_BACKOFF)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::Exponential {
            base: Duration::from_millis(500),
            max: Duration::from_secs(8),
        }
    }
}

/// Result of a retried operation together with the attempts it took.
#[derive(Debug)]
pub struct Attempted<T, E> {
    pub result: Result<T, E>,
    pub attempts: u32,
}

/// Retry policy injected into the writer and the certifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: Backoff,
}

impl RetryPolicy {
    /// `max_attempts` is clamped to at least one attempt.
    pub fn new(max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// Policy from a configured retry limit; `None` or `0` means
    /// [`DEFAULT_RETRY_LIMIT`].
    pub fn from_limit(limit: Option<u32>, backoff: Backoff) -> Self {
        let limit = match limit {
            Some(0) | None => DEFAULT_RETRY_LIMIT,
            Some(n) => n,
        };
        Self::new(limit, backoff)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn backoff(&self) -> Backoff {
        self.backoff
    }

    /// Run `operation` until it succeeds, fails with a non-retryable error,
    /// or the attempt budget is spent. `on_failure` sees every failed
    /// attempt (1-based) before any backoff sleep.
    pub async fn run<F, Fut, T, E, R, N>(
        &self,
        mut operation: F,
        is_retryable: R,
        mut on_failure: N,
    ) -> Attempted<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        R: Fn(&E) -> bool,
        N: FnMut(u32, &E),
    {
        let mut attempt = 0;

        loop {
            attempt += 1;
            match operation().await {
                Ok(value) => {
                    return Attempted {
                        result: Ok(value),
                        attempts: attempt,
                    }
                }
                Err(err) => {
                    on_failure(attempt, &err);

                    if !is_retryable(&err) || attempt >= self.max_attempts {
                        return Attempted {
                            result: Err(err),
                            attempts: attempt,
                        };
                    }

                    sleep(self.backoff.delay(attempt)).await;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_RETRY_LIMIT, Backoff::default())
    }
}
