//! 固定窗口限流器：非阻塞的许可获取，配置变更时重建窗口。
//!
//! Fixed-window admission control for one provider.
//!
//! `try_acquire` never waits: it either takes a permit from the current window
//! or reports rejection. Settings are passed on every call so that a changed
//! permit limit or window rebuilds the limiter in place; `None` disables it.
//! Windows roll lazily, on the first acquire after the boundary.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Permit budget per window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RateLimitSettings {
    pub permit_limit: u32,
    pub window: Duration,
}

impl RateLimitSettings {
    pub fn new(permit_limit: u32, window: Duration) -> Self {
        Self {
            permit_limit,
            window,
        }
    }
}

/// Point-in-time view of a limiter, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimiterSnapshot {
    pub permit_limit: u32,
    pub window: Duration,
    pub remaining: u32,
    pub resets_in: Duration,
}

#[derive(Debug)]
struct FixedWindow {
    settings: RateLimitSettings,
    consumed: u32,
    window_start: Instant,
}

impl FixedWindow {
    fn new(settings: RateLimitSettings, now: Instant) -> Self {
        Self {
            settings,
            consumed: 0,
            window_start: now,
        }
    }

    fn expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.window_start) >= self.settings.window
    }

    fn try_acquire(&mut self, now: Instant) -> bool {
        if self.expired(now) {
            self.window_start = now;
            self.consumed = 0;
        }
        if self.consumed < self.settings.permit_limit {
            self.consumed += 1;
            true
        } else {
            false
        }
    }

    fn snapshot(&self, now: Instant) -> RateLimiterSnapshot {
        let settings = self.settings;
        if self.expired(now) {
            return RateLimiterSnapshot {
                permit_limit: settings.permit_limit,
                window: settings.window,
                remaining: settings.permit_limit,
                resets_in: settings.window,
            };
        }
        let elapsed = now.saturating_duration_since(self.window_start);
        RateLimiterSnapshot {
            permit_limit: settings.permit_limit,
            window: settings.window,
            remaining: settings.permit_limit.saturating_sub(self.consumed),
            resets_in: settings.window.saturating_sub(elapsed),
        }
    }
}

/// Per-provider fixed-window limiter.
#[derive(Debug, Default)]
pub struct RateLimiter {
    /// Mirrors `state.is_some()`; lets the disabled path skip the lock.
    active: AtomicBool,
    state: Mutex<Option<FixedWindow>>,
    rebuilds: AtomicU64,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Option<FixedWindow>> {
        // the window holds plain counters, so a poisoned lock is still usable
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Take one permit under `settings`, or report rejection.
    pub fn try_acquire(&self, settings: Option<RateLimitSettings>) -> bool {
        let Some(settings) = settings else {
            if self.active.load(Ordering::Acquire) {
                let mut state = self.lock();
                if state.take().is_some() {
                    debug!("rate limiting disabled");
                }
                self.active.store(false, Ordering::Release);
            }
            return true;
        };

        let now = Instant::now();
        let mut state = self.lock();
        let stale = state.as_ref().map_or(true, |w| w.settings != settings);
        if stale {
            debug!(
                permit_limit = settings.permit_limit,
                window_ms = settings.window.as_millis() as u64,
                "rate limiter (re)built"
            );
            *state = Some(FixedWindow::new(settings, now));
            self.active.store(true, Ordering::Release);
            self.rebuilds.fetch_add(1, Ordering::Relaxed);
        }
        match state.as_mut() {
            Some(window) => window.try_acquire(now),
            None => true,
        }
    }

    pub fn snapshot(&self) -> Option<RateLimiterSnapshot> {
        if !self.active.load(Ordering::Acquire) {
            return None;
        }
        let now = Instant::now();
        self.lock().as_ref().map(|w| w.snapshot(now))
    }

    /// How many times the window has been (re)built from new settings.
    pub fn rebuild_count(&self) -> u64 {
        self.rebuilds.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn every_second(limit: u32) -> Option<RateLimitSettings> {
        Some(RateLimitSettings::new(limit, Duration::from_secs(1)))
    }

    #[tokio::test(start_paused = true)]
    async fn test_limit_then_reject_then_reset() {
        let limiter = RateLimiter::new();
        for _ in 0..3 {
            assert!(limiter.try_acquire(every_second(3)));
        }
        assert!(!limiter.try_acquire(every_second(3)));

        tokio::time::advance(Duration::from_millis(1_000)).await;
        assert!(limiter.try_acquire(every_second(3)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_always_admits() {
        let limiter = RateLimiter::new();
        for _ in 0..1_000 {
            assert!(limiter.try_acquire(None));
        }
        assert!(limiter.snapshot().is_none());
        assert_eq!(limiter.rebuild_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_settings_change_rebuilds() {
        let limiter = RateLimiter::new();
        assert!(limiter.try_acquire(every_second(1)));
        assert!(!limiter.try_acquire(every_second(1)));

        assert!(limiter.try_acquire(every_second(2)));
        assert!(limiter.try_acquire(every_second(2)));
        assert!(!limiter.try_acquire(every_second(2)));
        assert_eq!(limiter.rebuild_count(), 2);

        // same settings do not rebuild
        assert!(!limiter.try_acquire(every_second(2)));
        assert_eq!(limiter.rebuild_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disable_then_reenable() {
        let limiter = RateLimiter::new();
        assert!(limiter.try_acquire(every_second(1)));
        assert!(limiter.try_acquire(None));
        assert!(limiter.snapshot().is_none());
        assert!(limiter.try_acquire(every_second(1)));
        assert!(!limiter.try_acquire(every_second(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_reports_remaining() {
        let limiter = RateLimiter::new();
        limiter.try_acquire(every_second(5));
        limiter.try_acquire(every_second(5));
        tokio::time::advance(Duration::from_millis(400)).await;

        let snap = limiter.snapshot().unwrap();
        assert_eq!(snap.remaining, 3);
        assert_eq!(snap.resets_in, Duration::from_millis(600));

        tokio::time::advance(Duration::from_millis(600)).await;
        assert_eq!(limiter.snapshot().unwrap().remaining, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_acquire_never_over_admits() {
        let limiter = std::sync::Arc::new(RateLimiter::new());
        let mut handles = Vec::new();
        for _ in 0..64 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move { limiter.try_acquire(every_second(10)) }));
        }
        let mut admitted = 0;
        for h in handles {
            if h.await.unwrap() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 10);
    }
}
