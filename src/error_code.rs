//! 标准错误码：为厂商失败提供统一标签，并决定是否值得切换到备用 provider。
//!
//! Vendor-neutral labels for failed calls.
//!
//! A label answers two questions the relay asks about every failure: is it
//! worth another attempt on a stream that already started
//! ([`StandardErrorCode::transient`]), and could a different provider succeed
//! ([`StandardErrorCode::fallbackable`]). Buffered retries are decided per
//! adapter by
//! [`ProviderAdapter::classify_retryable`](crate::drivers::ProviderAdapter::classify_retryable).
//!
//! Each label has a stable code (`E1xxx` request side, `E2xxx` budget, `E3xxx`
//! vendor side, `E4xxx` caller side, `E9999` unclassified) and a snake_case name
//! used in phase events.
//!
//! ```rust
//! use llm_relay::error_code::StandardErrorCode;
//!
//! let code = StandardErrorCode::from_http_status(429);
//! assert_eq!(code.code(), "E2001");
//! assert_eq!(code.name(), "rate_limited");
//! assert!(code.fallbackable());
//! ```

use std::fmt;

/// Canonical failure label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StandardErrorCode {
    /// Request the vendor refused as malformed.
    InvalidRequest,
    /// Missing or rejected API key.
    Authentication,
    PermissionDenied,
    /// Unknown model or endpoint.
    NotFound,
    /// Prompt over the vendor's context or payload limit.
    RequestTooLarge,
    RateLimited,
    /// Billing or usage quota spent.
    QuotaExhausted,
    ServerError,
    Overloaded,
    Timeout,
    /// The caller gave up.
    Cancelled,
    Unknown,
}

impl StandardErrorCode {
    /// `(code, name)` pair for this label.
    fn labels(self) -> (&'static str, &'static str) {
        match self {
            Self::InvalidRequest => ("E1001", "invalid_request"),
            Self::Authentication => ("E1002", "authentication"),
            Self::PermissionDenied => ("E1003", "permission_denied"),
            Self::NotFound => ("E1004", "not_found"),
            Self::RequestTooLarge => ("E1005", "request_too_large"),
            Self::RateLimited => ("E2001", "rate_limited"),
            Self::QuotaExhausted => ("E2002", "quota_exhausted"),
            Self::ServerError => ("E3001", "server_error"),
            Self::Overloaded => ("E3002", "overloaded"),
            Self::Timeout => ("E3003", "timeout"),
            Self::Cancelled => ("E4001", "cancelled"),
            Self::Unknown => ("E9999", "unknown"),
        }
    }

    pub fn code(&self) -> &'static str {
        self.labels().0
    }

    /// Snake_case name carried by phase events.
    pub fn name(&self) -> &'static str {
        self.labels().1
    }

    /// A different provider may succeed where this one failed.
    ///
    /// Authentication counts: the fallback holds its own credentials.
    pub fn fallbackable(&self) -> bool {
        self.transient() || matches!(self, Self::Authentication | Self::QuotaExhausted)
    }

    /// The same vendor may succeed if asked again later.
    pub fn transient(&self) -> bool {
        matches!(
            self,
            Self::RateLimited | Self::ServerError | Self::Overloaded | Self::Timeout
        )
    }

    /// Label for a vendor error `type`/`code`/`status` string (lowercased).
    ///
    /// Covers the OpenAI, Anthropic and Gemini spellings.
    pub fn from_provider_code(provider_code: &str) -> Option<Self> {
        let label = match provider_code {
            "invalid_request" | "invalid_request_error" | "invalid_argument"
            | "failed_precondition" => Self::InvalidRequest,
            "authentication" | "authentication_error" | "invalid_api_key" | "unauthenticated" => {
                Self::Authentication
            }
            "permission_denied" | "permission_error" => Self::PermissionDenied,
            "not_found" | "not_found_error" | "model_not_found" => Self::NotFound,
            "request_too_large" | "request_too_large_error" | "context_length_exceeded" => {
                Self::RequestTooLarge
            }
            "rate_limited" | "rate_limit_error" | "rate_limit_exceeded" | "resource_exhausted" => {
                Self::RateLimited
            }
            "quota_exhausted" | "insufficient_quota" => Self::QuotaExhausted,
            "server_error" | "api_error" | "internal" => Self::ServerError,
            "overloaded" | "overloaded_error" | "unavailable" => Self::Overloaded,
            "timeout" | "deadline_exceeded" => Self::Timeout,
            "cancelled" => Self::Cancelled,
            _ => return None,
        };
        Some(label)
    }

    /// Label for a non-success HTTP status.
    pub fn from_http_status(status: u16) -> Self {
        match status {
            400 | 409 | 422 => Self::InvalidRequest,
            401 => Self::Authentication,
            403 => Self::PermissionDenied,
            404 => Self::NotFound,
            408 | 504 => Self::Timeout,
            413 => Self::RequestTooLarge,
            // quota exhaustion also arrives as 429; the body's vendor code refines it
            429 => Self::RateLimited,
            500 | 502 => Self::ServerError,
            // 529 is Anthropic's overloaded status
            503 | 529 => Self::Overloaded,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for StandardErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (code, name) = self.labels();
        write!(f, "{} ({})", code, name)
    }
}
