//! 弹性模式模块：提供重试、超时组合与限流等可靠性保障机制。
//!
//! # Resilience Primitives
//!
//! The building blocks the request pipeline composes around every vendor call.
//! None of them know about vendors or wire formats.
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`retry`] | Classified retry with exponential backoff and cancellation |
//! | [`timeout`] | Caller cancellation merged with a per-request timeout |
//! | [`rate_limiter`] | Non-blocking fixed-window admission per provider |
//!
//! ## Rate Limiter
//!
//! ```rust
//! use llm_relay::resilience::rate_limiter::{RateLimitSettings, RateLimiter};
//! use std::time::Duration;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let limiter = RateLimiter::new();
//! let settings = Some(RateLimitSettings::new(2, Duration::from_secs(1)));
//! assert!(limiter.try_acquire(settings));
//! assert!(limiter.try_acquire(settings));
//! assert!(!limiter.try_acquire(settings));
//! # }
//! ```

pub mod rate_limiter;
pub mod retry;
pub mod timeout;

pub use rate_limiter::{RateLimitSettings, RateLimiter, RateLimiterSnapshot};
pub use retry::{Attempted, Backoff, RetryError, RetryExecutor, RetryHint};
pub use timeout::{DerivedSignal, TimeoutComposer};
