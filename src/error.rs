//! 错误类型：请求执行管线的统一错误分类。
//!
//! Error taxonomy for the request-execution pipeline.
//!
//! Every outcome a caller can observe maps to one variant of [`Error`]. Raw
//! per-attempt vendor failures are carried as [`ProviderFailure`] until the
//! retry layer decides whether they were transient (retry budget exhausted) or
//! fatal (rejected on first sight).

use crate::error_code::StandardErrorCode;
use std::time::Duration;
use thiserror::Error;

/// Upper bound for vendor bodies kept on a [`ProviderFailure`].
const MAX_FAILURE_MESSAGE_LEN: usize = 512;

/// Structured error context for better error handling and debugging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorContext {
    /// Field path or configuration key that caused the error (e.g., "providers.openai.window_seconds")
    pub field_path: Option<String>,
    /// Additional context about the error (e.g., expected range, actual size)
    pub details: Option<String>,
    /// Source of the error (e.g., "request_validator", "failover_policy")
    pub source: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self {
            field_path: None,
            details: None,
            source: None,
        }
    }

    pub fn with_field_path(mut self, path: impl Into<String>) -> Self {
        self.field_path = Some(path.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

impl Default for ErrorContext {
    fn default() -> Self {
        Self::new()
    }
}

/// A single failed vendor attempt, before retry classification.
#[derive(Debug, Clone, Error)]
#[error("{}", describe_failure(.status, .code, .message))]
pub struct ProviderFailure {
    /// HTTP status, absent when the request never produced a response.
    pub status: Option<u16>,
    pub code: StandardErrorCode,
    /// Vendor message or body, truncated.
    pub message: String,
    /// Parsed `Retry-After` hint, if the vendor sent one.
    pub retry_after: Option<Duration>,
    /// Connect / socket-level failure that is worth another attempt.
    pub transient_transport: bool,
}

impl ProviderFailure {
    /// Failure built from a non-success HTTP response.
    pub fn http(status: u16, body: &str) -> Self {
        Self {
            status: Some(status),
            code: StandardErrorCode::from_http_status(status),
            message: truncate_message(body),
            retry_after: None,
            transient_transport: false,
        }
    }

    /// Failure raised by the HTTP client itself. The URL is stripped so query
    /// strings never reach logs.
    pub fn transport(err: reqwest::Error) -> Self {
        let transient = err.is_timeout() || err.is_connect() || err.is_request();
        let status = err.status().map(|s| s.as_u16());
        let code = match status {
            Some(s) => StandardErrorCode::from_http_status(s),
            None if err.is_timeout() => StandardErrorCode::Timeout,
            None => StandardErrorCode::ServerError,
        };
        Self {
            status,
            code,
            message: truncate_message(&err.without_url().to_string()),
            retry_after: None,
            transient_transport: transient,
        }
    }

    /// A success status whose body could not be decoded.
    pub fn undecodable(status: u16, reason: impl std::fmt::Display) -> Self {
        Self {
            status: Some(status),
            code: StandardErrorCode::Unknown,
            message: truncate_message(&format!("undecodable response body: {}", reason)),
            retry_after: None,
            transient_transport: false,
        }
    }

    /// An error event received in the middle of a stream.
    pub fn stream_event(kind: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            status: None,
            code: StandardErrorCode::from_provider_code(kind)
                .unwrap_or(StandardErrorCode::ServerError),
            message: truncate_message(&message),
            retry_after: None,
            transient_transport: false,
        }
    }

    /// A streamed event that could not be decoded.
    pub fn malformed_event(reason: impl std::fmt::Display) -> Self {
        Self {
            status: None,
            code: StandardErrorCode::Unknown,
            message: truncate_message(&format!("undecodable stream event: {}", reason)),
            retry_after: None,
            transient_transport: false,
        }
    }

    /// The body ended before the vendor's end-of-stream event.
    pub fn truncated_stream() -> Self {
        Self {
            status: None,
            code: StandardErrorCode::ServerError,
            message: "stream ended before the end-of-stream event".to_string(),
            retry_after: None,
            transient_transport: true,
        }
    }

    pub fn with_retry_after(mut self, retry_after: Option<Duration>) -> Self {
        self.retry_after = retry_after;
        self
    }
}

fn describe_failure(status: &Option<u16>, code: &StandardErrorCode, message: &str) -> String {
    match status {
        Some(s) => format!("HTTP {} ({}): {}", s, code.name(), message),
        None => format!("{}: {}", code.name(), message),
    }
}

fn truncate_message(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.len() <= MAX_FAILURE_MESSAGE_LEN {
        return trimmed.to_string();
    }
    let mut end = MAX_FAILURE_MESSAGE_LEN;
    while !trimmed.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &trimmed[..end])
}

/// Unified error type for the relay.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Validation error: {message}{}", format_context(.context))]
    Validation {
        message: String,
        context: ErrorContext,
    },

    #[error("Configuration error: {message}{}", format_context(.context))]
    Configuration {
        message: String,
        context: ErrorContext,
    },

    #[error("Rate limit exceeded for provider '{provider}': {permit_limit} requests per {window:?}")]
    RateLimitExceeded {
        provider: String,
        permit_limit: u32,
        window: Duration,
    },

    #[error("Request to provider '{provider}' exceeded its {timeout:?} deadline")]
    TimeoutExceeded { provider: String, timeout: Duration },

    #[error("Request to provider '{provider}' was cancelled by the caller")]
    Cancelled { provider: String },

    #[error("Provider '{provider}' still failing after {attempts} attempt(s): {failure}")]
    TransientProvider {
        provider: String,
        attempts: u32,
        failure: ProviderFailure,
    },

    #[error("Provider '{provider}' failed permanently on attempt {attempts}: {failure}")]
    FatalProvider {
        provider: String,
        attempts: u32,
        failure: ProviderFailure,
    },

    #[error("Provider '{provider}' returned no choices")]
    EmptyResponse { provider: String },

    #[error("No provider supports capability '{capability}' under strategy '{strategy}'")]
    NoProviderAvailable { capability: String, strategy: String },

    #[error("Network transport error: {0}")]
    Transport(#[from] crate::transport::TransportError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

// Helper function to format error context for display
fn format_context(ctx: &ErrorContext) -> String {
    let mut parts = Vec::new();
    if let Some(ref field) = ctx.field_path {
        parts.push(format!("field: {}", field));
    }
    if let Some(ref details) = ctx.details {
        parts.push(format!("details: {}", details));
    }
    if let Some(ref source) = ctx.source {
        parts.push(format!("source: {}", source));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" ({})", parts.join(", "))
    }
}

impl Error {
    /// Create a new validation error with structured context
    pub fn validation_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Validation {
            message: msg.into(),
            context,
        }
    }

    /// Create a new configuration error with structured context
    pub fn configuration_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Configuration {
            message: msg.into(),
            context,
        }
    }

    /// Extract error context if available
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Error::Configuration { context, .. } | Error::Validation { context, .. } => {
                Some(context)
            }
            _ => None,
        }
    }

    /// The underlying vendor failure, for provider errors.
    pub fn failure(&self) -> Option<&ProviderFailure> {
        match self {
            Error::TransientProvider { failure, .. } | Error::FatalProvider { failure, .. } => {
                Some(failure)
            }
            _ => None,
        }
    }

    /// Number of vendor attempts made before this error surfaced.
    pub fn attempts(&self) -> Option<u32> {
        match self {
            Error::TransientProvider { attempts, .. } | Error::FatalProvider { attempts, .. } => {
                Some(*attempts)
            }
            _ => None,
        }
    }

    /// Canonical code for observability and failover decisions.
    pub fn standard_code(&self) -> StandardErrorCode {
        match self {
            Error::Validation { .. } => StandardErrorCode::InvalidRequest,
            Error::Configuration { .. } => StandardErrorCode::InvalidRequest,
            Error::RateLimitExceeded { .. } => StandardErrorCode::RateLimited,
            Error::TimeoutExceeded { .. } => StandardErrorCode::Timeout,
            Error::Cancelled { .. } => StandardErrorCode::Cancelled,
            Error::TransientProvider { failure, .. } | Error::FatalProvider { failure, .. } => {
                failure.code
            }
            Error::EmptyResponse { .. } => StandardErrorCode::ServerError,
            Error::NoProviderAvailable { .. } => StandardErrorCode::NotFound,
            Error::Transport(_) => StandardErrorCode::ServerError,
            Error::Io(_) | Error::Serialization(_) => StandardErrorCode::Unknown,
        }
    }

    /// Whether a fallback provider might succeed where this call failed.
    ///
    /// Caller cancellation and bad input never fail over.
    pub fn is_fallbackable(&self) -> bool {
        match self {
            Error::TransientProvider { .. }
            | Error::RateLimitExceeded { .. }
            | Error::TimeoutExceeded { .. }
            | Error::EmptyResponse { .. } => true,
            Error::FatalProvider { failure, .. } => failure.code.fallbackable(),
            _ => false,
        }
    }
}
