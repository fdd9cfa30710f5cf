//! OpenAI Chat Completions 适配器：兼容 OpenAI 协议的厂商与托管（Azure 风格）端点
//!
//! OpenAI chat-completions adapter. Also covers OpenAI-compatible vendors via a
//! custom `endpoint`, and the managed (Azure-style) deployment layout:
//! - Public: `POST {base}/chat/completions`, `Authorization: Bearer <key>`.
//! - Managed: `POST {base}/openai/deployments/{model}/chat/completions?api-version=...`,
//!   `api-key: <key>`.

use serde_json::{json, Value};

use crate::config::{ApiStyle, ProviderConfig};
use crate::error::ProviderFailure;
use crate::transport::VendorClient;
use crate::types::{ChatResponse, Message, ProviderOptions, RequestOptions, Usage};
use crate::{Error, Result};

use super::{
    check_options_style, normalize_finish_reason, parse_failure, stream_error_event,
    ProviderAdapter, StreamEventParser, StreamFrame, VendorPayload,
};

const DEFAULT_MANAGED_API_VERSION: &str = "2024-06-01";

#[derive(Debug)]
pub struct OpenAiAdapter {
    provider_id: String,
}

impl OpenAiAdapter {
    pub fn new(provider_id: impl Into<String>) -> Self {
        Self {
            provider_id: provider_id.into(),
        }
    }

    fn to_wire(messages: &[Message]) -> Vec<Value> {
        messages
            .iter()
            .map(|m| json!({ "role": m.role.as_str(), "content": m.content }))
            .collect()
    }

    fn parse_event(data: &str) -> std::result::Result<StreamFrame, ProviderFailure> {
        let data = data.trim();
        if data == "[DONE]" {
            return Ok(StreamFrame::Done);
        }
        let v: Value = serde_json::from_str(data).map_err(|e| parse_failure(data, e))?;
        if let Some(failure) = stream_error_event(&v) {
            return Err(failure);
        }
        match v.pointer("/choices/0/delta/content").and_then(Value::as_str) {
            Some(text) if !text.is_empty() => Ok(StreamFrame::Delta(text.to_string())),
            _ => Ok(StreamFrame::Ignore),
        }
    }
}

#[async_trait::async_trait]
impl ProviderAdapter for OpenAiAdapter {
    fn provider_id(&self) -> &str {
        &self.provider_id
    }

    fn api_style(&self) -> ApiStyle {
        ApiStyle::OpenAi
    }

    fn prepare_request(
        &self,
        client: &VendorClient,
        messages: &[Message],
        config: &ProviderConfig,
        options: &RequestOptions,
        stream: bool,
    ) -> Result<VendorPayload> {
        check_options_style(ApiStyle::OpenAi, options)?;
        let model = options.model.as_deref().unwrap_or(&config.model);

        let mut body = json!({
            "model": model,
            "messages": Self::to_wire(messages),
            "stream": stream,
        });
        if let Some(t) = options.temperature {
            body["temperature"] = json!(t);
        }
        if let Some(mt) = options.max_tokens {
            body["max_tokens"] = json!(mt);
        }
        if let Some(p) = options.top_p {
            body["top_p"] = json!(p);
        }
        if stream {
            body["stream_options"] = json!({ "include_usage": true });
        }
        if let Some(ProviderOptions::OpenAi {
            frequency_penalty,
            presence_penalty,
            seed,
            user,
        }) = &options.provider
        {
            if let Some(v) = frequency_penalty {
                body["frequency_penalty"] = json!(v);
            }
            if let Some(v) = presence_penalty {
                body["presence_penalty"] = json!(v);
            }
            if let Some(v) = seed {
                body["seed"] = json!(v);
            }
            if let Some(v) = user {
                body["user"] = json!(v);
            }
        }

        let url = if client.is_managed() {
            let version = config
                .api_version
                .as_deref()
                .unwrap_or(DEFAULT_MANAGED_API_VERSION);
            client.url(&format!(
                "openai/deployments/{}/chat/completions?api-version={}",
                model, version
            ))?
        } else {
            client.url("chat/completions")?
        };

        Ok(VendorPayload {
            url,
            headers: Vec::new(),
            body,
            stream,
        })
    }

    fn authorize(
        &self,
        request: reqwest::RequestBuilder,
        config: &ProviderConfig,
    ) -> reqwest::RequestBuilder {
        if config.managed_endpoint {
            request.header("api-key", config.api_key.expose())
        } else {
            request.bearer_auth(config.api_key.expose())
        }
    }

    fn process_response(&self, body: &Value) -> Result<ChatResponse> {
        let choice = body
            .get("choices")
            .and_then(Value::as_array)
            .and_then(|choices| choices.first())
            .ok_or_else(|| Error::EmptyResponse {
                provider: self.provider_id.clone(),
            })?;

        let content = choice
            .pointer("/message/content")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let finish_reason = choice
            .get("finish_reason")
            .and_then(Value::as_str)
            .map(normalize_finish_reason)
            .unwrap_or_default();
        let usage = body
            .get("usage")
            .map(|u| {
                Usage::new(
                    u["prompt_tokens"].as_u64().unwrap_or(0),
                    u["completion_tokens"].as_u64().unwrap_or(0),
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

    fn stream_event_parser(&self) -> StreamEventParser {
        Self::parse_event
    }
}
