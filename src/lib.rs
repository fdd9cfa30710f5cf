//! # llm-relay
//!
//! 多厂商聊天补全 API 前置的弹性请求执行层：统一请求/响应契约、重试、限流与热加载配置。
//!
//! Resilient request-execution layer in front of several vendor chat-completion
//! APIs. Callers get one contract ("send these messages, get a reply or a
//! stream of text") regardless of which vendor backs it.
//!
//! ## Overview
//!
//! Every call runs the same pipeline:
//!
//! 1. **Validate** the message list (non-empty, under the size ceiling).
//! 2. **Admit** through the provider's fixed-window rate limiter (never waits).
//! 3. **Resolve** the cached vendor client, rebuilt only when its settings change.
//! 4. **Send** through the provider's adapter, retried with exponential backoff
//!    for buffered calls, under one signal merging caller cancellation with the
//!    request timeout.
//! 5. **Map** the vendor response back to [`ChatResponse`].
//!
//! Configuration is pulled fresh on every call from an [`OptionsSource`], so a
//! file reload or programmatic update takes effect on the next call.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use llm_relay::{ApiStyle, Message, ProviderConfig, RelayClient, RelayConfig, RequestOptions};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> llm_relay::Result<()> {
//!     let config = RelayConfig::new().with_provider(
//!         "openai",
//!         ProviderConfig::new(ApiStyle::OpenAi, "gpt-4o-mini").with_api_key("sk-..."),
//!     );
//!     let client = RelayClient::builder().config(config)?.build()?;
//!
//!     let reply = client
//!         .chat(
//!             "openai",
//!             vec![Message::system("You are helpful"), Message::user("Hi")],
//!             &RequestOptions::new().max_tokens(64),
//!             &CancellationToken::new(),
//!         )
//!         .await?;
//!     println!("{}", reply.content);
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`client`] | [`RelayClient`], builder, request validation |
//! | [`config`] | Provider settings, hot-reloadable options sources |
//! | [`drivers`] | Vendor adapters (OpenAI, Anthropic, Gemini) and SSE decoding |
//! | [`resilience`] | Retry, timeout composition, rate limiting |
//! | [`cache`] | Fingerprinted vendor client cache |
//! | [`routing`] | Capability-based provider selection, failover validation |
//! | [`transport`] | Pooled HTTP clients and vendor client handles |
//! | [`telemetry`] | Per-phase events and logging setup |
//! | [`types`] | Messages, options, responses |

pub mod cache;
pub mod client;
pub mod config;
pub mod drivers;
pub mod error_code;
pub mod resilience;
pub mod routing;
pub mod telemetry;
pub mod transport;
pub mod types;

// Re-export main types for convenience
pub use client::{RelayClient, RelayClientBuilder, RequestValidator};
pub use config::{
    ApiKey, ApiStyle, FailoverConfig, FileOptions, OptionsSource, ProviderConfig, RelayConfig,
    SharedOptions,
};
pub use error_code::StandardErrorCode;
pub use routing::{Capability, FailoverPolicy, ProviderSelector};
pub use telemetry::{EventSink, PhaseEvent};
pub use types::{ChatResponse, Message, MessageRole, ProviderOptions, RequestOptions, Usage};

use futures::Stream;
use std::pin::Pin;

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// A unified pinned, boxed stream that emits `Result<T>`
pub type BoxStream<'a, T> = Pin<Box<dyn Stream<Item = Result<T>> + Send + 'a>>;

/// Error type for the library
pub mod error;
pub use error::{Error, ErrorContext};
