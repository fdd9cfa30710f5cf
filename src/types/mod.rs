//! 类型系统模块：定义请求/响应管线的核心数据类型。
//!
//! # Types Module
//!
//! Call-scoped request and response shapes shared by every vendor adapter.
//! Nothing here outlives a single call.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Message`] | Chat message with a closed role set and text content |
//! | [`RequestOptions`] | Common sampling knobs plus vendor-tagged extras |
//! | [`ChatResponse`] | Normalized buffered reply with token usage |
//!
//! ## Example
//!
//! ```rust
//! use llm_relay::types::{Message, RequestOptions};
//!
//! let messages = vec![
//!     Message::system("You are a helpful assistant"),
//!     Message::user("What's the weather?"),
//! ];
//! let options = RequestOptions::new().temperature(0.2).max_tokens(256);
//! assert_eq!(messages.len(), 2);
//! assert_eq!(options.max_tokens, Some(256));
//! ```

pub mod message;
pub mod options;
pub mod response;

pub use message::{Message, MessageRole};
pub use options::{ProviderOptions, RequestOptions};
pub use response::{ChatResponse, Usage};
