//! 超时组合：调用方取消信号与请求超时合并为单一派生信号。
//!
//! Composes a caller cancellation token with a per-request timeout.
//!
//! The derived token fires when either source fires. The cause is recorded
//! before the derived token is cancelled, so anything that observes the token
//! firing also observes a settled cause. When both sources are ready in the
//! same instant the timeout wins.

use crate::Error;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const PENDING: u8 = 0;
const TIMED_OUT: u8 = 1;
const CALLER: u8 = 2;

// stand-in deadline for timeouts too large to add to `Instant::now()`
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Builds [`DerivedSignal`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimeoutComposer;

impl TimeoutComposer {
    /// Derive a signal from `caller` that additionally fires after `timeout`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn compose(caller: &CancellationToken, timeout: Duration) -> DerivedSignal {
        let token = CancellationToken::new();
        let cause = Arc::new(AtomicU8::new(PENDING));
        let now = Instant::now();
        let deadline = now.checked_add(timeout).unwrap_or(now + FAR_FUTURE);

        // an already-cancelled caller settles the signal before it is handed out
        if caller.is_cancelled() && !timeout.is_zero() {
            cause.store(CALLER, Ordering::Release);
            token.cancel();
        }

        let timer = {
            let token = token.clone();
            let cause = cause.clone();
            let caller = caller.clone();
            tokio::spawn(async move {
                let settled = tokio::select! {
                    biased;
                    _ = tokio::time::sleep_until(deadline) => TIMED_OUT,
                    _ = caller.cancelled() => CALLER,
                };
                let _ = cause.compare_exchange(PENDING, settled, Ordering::AcqRel, Ordering::Acquire);
                token.cancel();
            })
        };

        DerivedSignal {
            inner: Arc::new(Inner {
                token,
                cause,
                deadline,
                timeout,
                timer,
            }),
        }
    }
}

struct Inner {
    token: CancellationToken,
    cause: Arc<AtomicU8>,
    deadline: Instant,
    timeout: Duration,
    timer: JoinHandle<()>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.timer.abort();
    }
}

/// Cancellation signal that fires on caller cancel or timeout.
///
/// Cheap to clone; the background timer stops when the last clone is dropped.
#[derive(Clone)]
pub struct DerivedSignal {
    inner: Arc<Inner>,
}

impl DerivedSignal {
    pub fn token(&self) -> &CancellationToken {
        &self.inner.token
    }

    pub fn is_fired(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    /// Completes when the signal fires.
    pub async fn fired(&self) {
        self.inner.token.cancelled().await
    }

    /// True only if the signal fired because the timeout elapsed.
    pub fn was_timeout(&self) -> bool {
        self.is_fired() && self.inner.cause.load(Ordering::Acquire) == TIMED_OUT
    }

    pub fn timeout(&self) -> Duration {
        self.inner.timeout
    }

    pub fn deadline(&self) -> Instant {
        self.inner.deadline
    }

    /// Error describing why the signal fired.
    pub fn interruption(&self, provider: &str) -> Error {
        if self.was_timeout() {
            Error::TimeoutExceeded {
                provider: provider.to_string(),
                timeout: self.inner.timeout,
            }
        } else {
            Error::Cancelled {
                provider: provider.to_string(),
            }
        }
    }
}

impl std::fmt::Debug for DerivedSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedSignal")
            .field("timeout", &self.inner.timeout)
            .field("fired", &self.is_fired())
            .field("was_timeout", &self.was_timeout())
            .finish()
    }
}
