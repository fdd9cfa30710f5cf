//! 厂商适配器抽象：统一的请求构建、发送、响应映射与流式解码接口
//!
//! Provider adapter abstraction.
//!
//! Every vendor style implements [`ProviderAdapter`]; the request pipeline only
//! ever talks to `Arc<dyn ProviderAdapter>`. Adapters are stateless: the vendor
//! client and configuration are passed in on every call, and the API key is
//! applied per request by [`ProviderAdapter::authorize`].

pub mod anthropic;
pub mod gemini;
pub mod openai;
pub mod sse;

pub use anthropic::AnthropicAdapter;
pub use gemini::GeminiAdapter;
pub use openai::OpenAiAdapter;
pub use sse::SseDecoder;

use crate::config::{ApiStyle, ProviderConfig};
use crate::error::ProviderFailure;
use crate::error_code::StandardErrorCode;
use crate::resilience::DerivedSignal;
use crate::routing::Capability;
use crate::transport::VendorClient;
use crate::types::{ChatResponse, Message, RequestOptions};
use crate::{BoxStream, Error, ErrorContext, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, ACCEPT, RETRY_AFTER};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Vendor request ready to send. Holds no secrets.
#[derive(Debug, Clone)]
pub struct VendorPayload {
    pub url: Url,
    /// Non-secret vendor headers (e.g. API version pins).
    pub headers: Vec<(&'static str, String)>,
    pub body: Value,
    pub stream: bool,
}

/// One decoded streaming event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamFrame {
    Delta(String),
    Done,
    Ignore,
}

/// Parses one SSE `data:` payload.
pub type StreamEventParser = fn(&str) -> std::result::Result<StreamFrame, ProviderFailure>;

/// Core trait for vendor-specific API adaptation.
///
/// Object-safe; one implementation per [`ApiStyle`].
#[async_trait]
pub trait ProviderAdapter: Send + Sync + std::fmt::Debug {
    /// Logical provider name this adapter instance serves.
    fn provider_id(&self) -> &str;

    fn api_style(&self) -> ApiStyle;

    fn supported_capabilities(&self) -> &'static [Capability] {
        default_capabilities(self.api_style())
    }

    fn supports(&self, capability: Capability) -> bool {
        self.supported_capabilities().contains(&capability)
    }

    /// Build the vendor payload. Provider options meant for another style are
    /// rejected.
    fn prepare_request(
        &self,
        client: &VendorClient,
        messages: &[Message],
        config: &ProviderConfig,
        options: &RequestOptions,
        stream: bool,
    ) -> Result<VendorPayload>;

    /// Attach credentials from the current configuration snapshot.
    fn authorize(
        &self,
        request: reqwest::RequestBuilder,
        config: &ProviderConfig,
    ) -> reqwest::RequestBuilder;

    /// Map a decoded success body to the generic response.
    fn process_response(&self, body: &Value) -> Result<ChatResponse>;

    fn stream_event_parser(&self) -> StreamEventParser;

    /// Whether a stream is only complete once the vendor's end-of-stream event
    /// arrives. When true, a body that ends early is reported as a failure.
    fn requires_terminal_event(&self) -> bool {
        true
    }

    fn parse_stream_event(&self, data: &str) -> std::result::Result<StreamFrame, ProviderFailure> {
        (self.stream_event_parser())(data)
    }

    /// HTTP 429/500/502/503/504 and socket-level failures are retryable.
    fn classify_retryable(&self, failure: &ProviderFailure) -> bool {
        match failure.status {
            Some(status) => matches!(status, 429 | 500 | 502 | 503 | 504),
            None => failure.transient_transport,
        }
    }

    /// Send the payload and return the response once it has a success status.
    async fn dispatch(
        &self,
        client: &VendorClient,
        config: &ProviderConfig,
        payload: &VendorPayload,
    ) -> std::result::Result<reqwest::Response, ProviderFailure> {
        let mut request = client.http().post(payload.url.clone()).json(&payload.body);
        for (name, value) in &payload.headers {
            request = request.header(*name, value);
        }
        if payload.stream {
            request = request.header(ACCEPT, "text/event-stream");
        }
        let request = self.authorize(request, config);

        let response = request.send().await.map_err(ProviderFailure::transport)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let retry_after = parse_retry_after(response.headers());
        let body = response.text().await.unwrap_or_default();
        Err(http_failure(status.as_u16(), &body).with_retry_after(retry_after))
    }

    /// One buffered attempt. Dropping the future aborts the request.
    async fn send(
        &self,
        client: &VendorClient,
        config: &ProviderConfig,
        payload: &VendorPayload,
    ) -> std::result::Result<Value, ProviderFailure> {
        let response = self.dispatch(client, config, payload).await?;
        let status = response.status().as_u16();
        let bytes = response.bytes().await.map_err(ProviderFailure::transport)?;
        serde_json::from_slice(&bytes).map_err(|e| ProviderFailure::undecodable(status, e))
    }

    /// Open a stream and return its text fragments. The handshake is a single
    /// attempt; failures are classified with [`classify_retryable`](Self::classify_retryable).
    async fn stream_chunks(
        &self,
        client: &VendorClient,
        config: &ProviderConfig,
        payload: &VendorPayload,
        signal: DerivedSignal,
    ) -> Result<BoxStream<'static, String>> {
        let provider = self.provider_id().to_string();
        let opened = tokio::select! {
            biased;
            _ = signal.fired() => None,
            res = self.dispatch(client, config, payload) => Some(res),
        };
        let response = match opened {
            None => return Err(signal.interruption(&provider)),
            Some(Ok(response)) => response,
            Some(Err(failure)) => {
                let retryable = self.classify_retryable(&failure);
                return Err(attempt_error(&provider, 1, failure, retryable));
            }
        };

        Ok(sse::text_stream(
            provider,
            response.bytes_stream(),
            self.stream_event_parser(),
            self.requires_terminal_event(),
            signal,
        ))
    }
}

/// Capabilities each API style supports unless configuration overrides them.
pub fn default_capabilities(style: ApiStyle) -> &'static [Capability] {
    match style {
        ApiStyle::OpenAi => &[
            Capability::Text,
            Capability::Streaming,
            Capability::Vision,
            Capability::Tools,
            Capability::StructuredOutput,
        ],
        ApiStyle::Anthropic => &[
            Capability::Text,
            Capability::Streaming,
            Capability::Vision,
            Capability::Tools,
            Capability::Reasoning,
        ],
        ApiStyle::Gemini => &[
            Capability::Text,
            Capability::Streaming,
            Capability::Vision,
            Capability::Tools,
            Capability::StructuredOutput,
        ],
    }
}

/// Factory function to create the adapter for an API style.
pub fn create_adapter(style: ApiStyle, provider_id: &str) -> Arc<dyn ProviderAdapter> {
    match style {
        ApiStyle::OpenAi => Arc::new(OpenAiAdapter::new(provider_id)),
        ApiStyle::Anthropic => Arc::new(AnthropicAdapter::new(provider_id)),
        ApiStyle::Gemini => Arc::new(GeminiAdapter::new(provider_id)),
    }
}

/// Wrap a vendor failure with its retry outcome.
pub(crate) fn attempt_error(
    provider: &str,
    attempts: u32,
    failure: ProviderFailure,
    transient: bool,
) -> Error {
    if transient {
        Error::TransientProvider {
            provider: provider.to_string(),
            attempts,
            failure,
        }
    } else {
        Error::FatalProvider {
            provider: provider.to_string(),
            attempts,
            failure,
        }
    }
}

/// Reject provider options tagged for a different API style.
pub(crate) fn check_options_style(style: ApiStyle, options: &RequestOptions) -> Result<()> {
    match &options.provider {
        Some(extra) if extra.api_style() != style => Err(Error::validation_with_context(
            format!(
                "provider options for '{}' cannot be sent to a '{}' provider",
                extra.api_style(),
                style
            ),
            ErrorContext::new()
                .with_field_path("options.provider.style")
                .with_source("provider_adapter"),
        )),
        _ => Ok(()),
    }
}

/// Failure for a non-success response; prefers the vendor's own error fields.
pub(crate) fn http_failure(status: u16, body: &str) -> ProviderFailure {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let error = parsed.as_ref().and_then(|v| v.get("error"));

    let message = error
        .and_then(|e| e.get("message"))
        .and_then(Value::as_str)
        .unwrap_or(body);
    let mut failure = ProviderFailure::http(status, message);

    let vendor_code = error.and_then(|e| {
        ["type", "code", "status"]
            .iter()
            .filter_map(|k| e.get(*k).and_then(Value::as_str))
            .find_map(|c| StandardErrorCode::from_provider_code(&c.to_ascii_lowercase()))
    });
    if let Some(code) = vendor_code {
        failure.code = code;
    }
    failure
}

/// Error event embedded in a streamed payload, if any.
pub(crate) fn stream_error_event(value: &Value) -> Option<ProviderFailure> {
    let error = value.get("error")?;
    let kind = error
        .get("type")
        .or_else(|| error.get("status"))
        .and_then(Value::as_str)
        .unwrap_or("server_error");
    let message = error
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("stream error");
    Some(ProviderFailure::stream_event(&kind.to_ascii_lowercase(), message))
}

/// `Retry-After` in delta-seconds. HTTP-date values are ignored.
pub(crate) fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Vendor stop reasons mapped onto `stop` / `length` / `tool_calls` / `content_filter`.
pub(crate) fn normalize_finish_reason(raw: &str) -> String {
    match raw {
        "stop" | "end_turn" | "stop_sequence" | "STOP" => "stop",
        "length" | "max_tokens" | "MAX_TOKENS" => "length",
        "tool_calls" | "tool_use" | "function_call" => "tool_calls",
        "content_filter" | "SAFETY" | "RECITATION" | "BLOCKLIST" | "PROHIBITED_CONTENT"
        | "SPII" => "content_filter",
        other => return other.to_ascii_lowercase(),
    }
    .to_string()
}

pub(crate) fn parse_failure(data: &str, e: serde_json::Error) -> ProviderFailure {
    ProviderFailure::malformed_event(format!("{}: {}", e, data))
}
