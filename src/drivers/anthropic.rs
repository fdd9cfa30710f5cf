//! Anthropic Messages API 适配器：system 消息提升、max_tokens 默认值与 529 过载重试
//!
//! Anthropic Messages API adapter. Key differences from OpenAI:
//! - System messages are a top-level `system` parameter, not part of `messages`.
//! - `max_tokens` is required, so a default is always sent.
//! - Streaming uses `content_block_delta` events with `delta.text` and ends
//!   with `message_stop`.
//! - Response text lives in `content[*].text`.
//! - HTTP 529 (overloaded) is retryable on top of the usual statuses.

use serde_json::{json, Value};

use crate::config::{ApiStyle, ProviderConfig};
use crate::error::ProviderFailure;
use crate::transport::VendorClient;
use crate::types::{ChatResponse, Message, MessageRole, ProviderOptions, RequestOptions, Usage};
use crate::{Error, Result};

use super::{
    check_options_style, normalize_finish_reason, parse_failure, stream_error_event,
    ProviderAdapter, StreamEventParser, StreamFrame, VendorPayload,
};

const DEFAULT_MAX_TOKENS: u32 = 4096;
const DEFAULT_API_VERSION: &str = "2023-06-01";

#[derive(Debug)]
pub struct AnthropicAdapter {
    provider_id: String,
}

impl AnthropicAdapter {
    pub fn new(provider_id: impl Into<String>) -> Self {
        Self {
            provider_id: provider_id.into(),
        }
    }

    /// Anthropic requires system as a top-level param, not in messages array.
    fn split_system_messages(messages: &[Message]) -> (Option<String>, Vec<Value>) {
        let mut system_parts: Vec<&str> = Vec::new();
        let mut turns: Vec<Value> = Vec::new();

        for m in messages {
            match m.role {
                MessageRole::System => system_parts.push(&m.content),
                MessageRole::User | MessageRole::Assistant => {
                    turns.push(json!({ "role": m.role.as_str(), "content": m.content }));
                }
            }
        }

        let system = if system_parts.is_empty() {
            None
        } else {
            Some(system_parts.join("\n\n"))
        };
        (system, turns)
    }

    fn parse_event(data: &str) -> std::result::Result<StreamFrame, ProviderFailure> {
        let v: Value = serde_json::from_str(data).map_err(|e| parse_failure(data, e))?;
        match v.get("type").and_then(Value::as_str).unwrap_or("") {
            "content_block_delta" => match v.pointer("/delta/text").and_then(Value::as_str) {
                Some(text) if !text.is_empty() => Ok(StreamFrame::Delta(text.to_string())),
                _ => Ok(StreamFrame::Ignore),
            },
            "message_stop" => Ok(StreamFrame::Done),
            "error" => Err(stream_error_event(&v)
                .unwrap_or_else(|| ProviderFailure::stream_event("api_error", "stream error"))),
            _ => Ok(StreamFrame::Ignore),
        }
    }
}

#[async_trait::async_trait]
impl ProviderAdapter for AnthropicAdapter {
    fn provider_id(&self) -> &str {
        &self.provider_id
    }

    fn api_style(&self) -> ApiStyle {
        ApiStyle::Anthropic
    }

    fn prepare_request(
        &self,
        client: &VendorClient,
        messages: &[Message],
        config: &ProviderConfig,
        options: &RequestOptions,
        stream: bool,
    ) -> Result<VendorPayload> {
        check_options_style(ApiStyle::Anthropic, options)?;
        let (system, turns) = Self::split_system_messages(messages);

        let mut body = json!({
            "model": options.model.as_deref().unwrap_or(&config.model),
            "messages": turns,
            "max_tokens": options.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "stream": stream,
        });
        if let Some(sys) = system {
            body["system"] = Value::String(sys);
        }
        if let Some(t) = options.temperature {
            body["temperature"] = json!(t);
        }
        if let Some(p) = options.top_p {
            body["top_p"] = json!(p);
        }
        if let Some(ProviderOptions::Anthropic {
            top_k,
            stop_sequences,
        }) = &options.provider
        {
            if let Some(k) = top_k {
                body["top_k"] = json!(k);
            }
            if !stop_sequences.is_empty() {
                body["stop_sequences"] = json!(stop_sequences);
            }
        }

        let version = config.api_version.as_deref().unwrap_or(DEFAULT_API_VERSION);
        Ok(VendorPayload {
            url: client.url("messages")?,
            headers: vec![("anthropic-version", version.to_string())],
            body,
            stream,
        })
    }

    fn authorize(
        &self,
        request: reqwest::RequestBuilder,
        config: &ProviderConfig,
    ) -> reqwest::RequestBuilder {
        request.header("x-api-key", config.api_key.expose())
    }

    fn process_response(&self, body: &Value) -> Result<ChatResponse> {
        let blocks = body
            .get("content")
            .and_then(Value::as_array)
            .filter(|blocks| !blocks.is_empty())
            .ok_or_else(|| Error::EmptyResponse {
                provider: self.provider_id.clone(),
            })?;

        let content: String = blocks
            .iter()
            .filter(|b| b.get("type").and_then(Value::as_str) == Some("text"))
            .filter_map(|b| b.get("text").and_then(Value::as_str))
            .collect();
        let finish_reason = body
            .get("stop_reason")
            .and_then(Value::as_str)
            .map(normalize_finish_reason)
            .unwrap_or_default();
        let usage = body
            .get("usage")
            .map(|u| {
                Usage::new(
                    u["input_tokens"].as_u64().unwrap_or(0),
                    u["output_tokens"].as_u64().unwrap_or(0),
                )
            })
            .unwrap_or_default();

        Ok(ChatResponse {
            content,
            model_id: body["model"].as_str().unwrap_or_default().to_string(),
            finish_reason,
            usage,
        })
    }

    fn classify_retryable(&self, failure: &ProviderFailure) -> bool {
        match failure.status {
            Some(status) => matches!(status, 429 | 500 | 502 | 503 | 504 | 529),
            None => failure.transient_transport,
        }
    }

    fn stream_event_parser(&self) -> StreamEventParser {
        Self::parse_event
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ProviderConfig {
        ProviderConfig::new(ApiStyle::Anthropic, "claude-3-5-haiku-latest").with_api_key("ak-test")
    }

    #[test]
    fn test_system_lifted_and_max_tokens_defaulted() {
        let cfg = config();
        let client = VendorClient::new("anthropic", &cfg, reqwest::Client::new()).unwrap();
        let adapter = AnthropicAdapter::new("anthropic");
        let payload = adapter
            .prepare_request(
                &client,
                &[Message::system("You are helpful"), Message::user("Hi")],
                &cfg,
                &RequestOptions::new(),
                false,
            )
            .unwrap();

        assert_eq!(payload.url.as_str(), "https://api.anthropic.com/v1/messages");
        assert_eq!(payload.body["system"], "You are helpful");
        assert_eq!(payload.body["messages"].as_array().unwrap().len(), 1);
        assert_eq!(payload.body["max_tokens"], 4096);
        assert_eq!(
            payload.headers,
            vec![("anthropic-version", "2023-06-01".to_string())]
        );
    }

    #[test]
    fn test_process_response_joins_text_blocks() {
        let adapter = AnthropicAdapter::new("anthropic");
        let body = json!({
            "model": "claude-3-5-haiku-20241022",
            "content": [
                { "type": "text", "text": "Hello" },
                { "type": "tool_use", "id": "t1", "name": "x", "input": {} },
                { "type": "text", "text": "!" }
            ],
            "stop_reason": "end_turn",
            "usage": { "input_tokens": 10, "output_tokens": 2 }
        });
        let resp = adapter.process_response(&body).unwrap();
        assert_eq!(resp.content, "Hello!");
        assert_eq!(resp.finish_reason, "stop");
        assert_eq!(resp.usage.total_tokens, 12);

        let err = adapter.process_response(&json!({ "content": [] })).unwrap_err();
        assert!(matches!(err, Error::EmptyResponse { .. }));
    }

    #[test]
    fn test_overloaded_is_retryable() {
        let adapter = AnthropicAdapter::new("anthropic");
        assert!(adapter.classify_retryable(&ProviderFailure::http(529, "overloaded")));
        assert!(!adapter.classify_retryable(&ProviderFailure::http(400, "bad")));
    }

    #[test]
    fn test_stream_events() {
        let adapter = AnthropicAdapter::new("anthropic");
        assert_eq!(
            adapter
                .parse_stream_event(
                    r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hi"}}"#
                )
                .unwrap(),
            StreamFrame::Delta("Hi".into())
        );
        assert_eq!(
            adapter.parse_stream_event(r#"{"type":"ping"}"#).unwrap(),
            StreamFrame::Ignore
        );
        assert_eq!(
            adapter.parse_stream_event(r#"{"type":"message_stop"}"#).unwrap(),
            StreamFrame::Done
        );
        let failure = adapter
            .parse_stream_event(
                r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#,
            )
            .unwrap_err();
        assert_eq!(failure.code, crate::error_code::StandardErrorCode::Overloaded);
    }
}
