//! 重试执行器：基于错误分类的指数退避重试。
//!
//! Retry-with-classification around any fallible async operation.
//!
//! The executor knows nothing about vendors: callers hand it the operation, a
//! retry budget, a classifier and a cancellation token. Cancellation is
//! observed before every attempt, while an attempt is in flight (the attempt
//! future is dropped, which tears down its I/O) and during backoff sleeps.

use crate::error::ProviderFailure;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Exponential backoff with symmetric jitter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    /// Delay before the first retry; doubles per retry.
    pub base: Duration,
    /// Upper bound for any single delay, jitter included.
    pub max: Duration,
    /// Fraction of the computed delay used as the +/- jitter spread (0.0..=1.0).
    pub jitter: f64,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
            jitter: 0.2,
        }
    }

    /// No delay between attempts.
    pub fn none() -> Self {
        Self {
            base: Duration::ZERO,
            max: Duration::ZERO,
            jitter: 0.0,
        }
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = if jitter.is_finite() {
            jitter.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self
    }

    /// Delay before retry number `retry` (0-based), honoring a vendor
    /// `Retry-After` hint as a floor.
    pub fn delay_for(&self, retry: u32, hint: Option<Duration>) -> Duration {
        let cap = whole_millis(self.max);
        let base = whole_millis(self.base);
        let factor = 1u64.checked_shl(retry).unwrap_or(u64::MAX);
        let mut delay = base.saturating_mul(factor).min(cap);

        if delay > 0 && self.jitter > 0.0 {
            let spread = delay as f64 * self.jitter;
            let offset = rand::thread_rng().gen_range(-spread..=spread);
            delay = ((delay as f64 + offset).max(0.0) as u64).min(cap);
        }
        if let Some(hint) = hint {
            delay = delay.max(whole_millis(hint)).min(cap);
        }
        Duration::from_millis(delay)
    }
}

fn whole_millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(200), Duration::from_secs(10))
    }
}

/// Lets an error suggest a minimum wait before the next attempt.
pub trait RetryHint {
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

impl RetryHint for ProviderFailure {
    fn retry_after(&self) -> Option<Duration> {
        self.retry_after
    }
}

/// Successful value plus the number of attempts it took.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempted<T> {
    pub value: T,
    pub attempts: u32,
}

/// Why the executor gave up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryError<E> {
    /// The cancellation token fired; no further attempts were made.
    Cancelled { attempts: u32 },
    /// Every attempt failed with a retryable error.
    Exhausted { attempts: u32, last: E },
    /// The classifier marked the failure as not retryable.
    Rejected { attempts: u32, last: E },
}

impl<E> RetryError<E> {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Cancelled { attempts }
            | RetryError::Exhausted { attempts, .. }
            | RetryError::Rejected { attempts, .. } => *attempts,
        }
    }
}

/// Generic retry wrapper.
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    backoff: Backoff,
}

impl RetryExecutor {
    pub fn new(backoff: Backoff) -> Self {
        Self { backoff }
    }

    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    /// Run `operation` up to `max_retries + 1` times.
    ///
    /// `operation` receives the 1-based attempt number.
    pub async fn execute<T, E, F, Fut, P>(
        &self,
        mut operation: F,
        max_retries: u32,
        is_retryable: P,
        cancel: &CancellationToken,
    ) -> Result<Attempted<T>, RetryError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        E: RetryHint,
    {
        let max_attempts = max_retries.saturating_add(1);
        let mut attempt: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(RetryError::Cancelled { attempts: attempt });
            }
            attempt += 1;

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(RetryError::Cancelled { attempts: attempt });
                }
                res = operation(attempt) => res,
            };

            let err = match outcome {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(attempt, "operation succeeded after retry");
                    }
                    return Ok(Attempted {
                        value,
                        attempts: attempt,
                    });
                }
                Err(err) => err,
            };

            if !is_retryable(&err) {
                return Err(RetryError::Rejected {
                    attempts: attempt,
                    last: err,
                });
            }
            if attempt >= max_attempts {
                warn!(attempts = attempt, "retry budget exhausted");
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    last: err,
                });
            }

            let delay = self.backoff.delay_for(attempt - 1, err.retry_after());
            debug!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                "transient failure; backing off"
            );
            if !delay.is_zero() {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        return Err(RetryError::Cancelled { attempts: attempt });
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
}
