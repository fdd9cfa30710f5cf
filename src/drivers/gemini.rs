//! Gemini generateContent 适配器：contents/parts 映射与 alt=sse 流式输出
//!
//! Google Gemini generateContent adapter. Key differences:
//! - Uses `contents` instead of `messages`, with `parts` instead of `content`.
//! - Roles: `user` and `model` (not `assistant`). System uses `systemInstruction`.
//! - `generationConfig` wraps temperature, max tokens (`maxOutputTokens`), etc.
//! - Response: `candidates[0].content.parts[*].text`.
//! - Streaming uses `:streamGenerateContent?alt=sse`; each event is a full
//!   response fragment and the stream ends at EOF.
//! - The key travels in the `x-goog-api-key` header, never in the URL. Managed
//!   (Vertex-style) endpoints take a bearer token instead.

use serde_json::{json, Map, Value};

use crate::config::{ApiStyle, ProviderConfig};
use crate::error::ProviderFailure;
use crate::transport::VendorClient;
use crate::types::{ChatResponse, Message, MessageRole, ProviderOptions, RequestOptions, Usage};
use crate::{Error, Result};

use super::{
    check_options_style, normalize_finish_reason, parse_failure, stream_error_event,
    ProviderAdapter, StreamEventParser, StreamFrame, VendorPayload,
};

#[derive(Debug)]
pub struct GeminiAdapter {
    provider_id: String,
}

impl GeminiAdapter {
    pub fn new(provider_id: impl Into<String>) -> Self {
        Self {
            provider_id: provider_id.into(),
        }
    }

    /// Separate system instructions from conversation contents.
    fn split_messages(messages: &[Message]) -> (Option<Value>, Vec<Value>) {
        let mut system_parts: Vec<&str> = Vec::new();
        let mut contents: Vec<Value> = Vec::new();

        for m in messages {
            let role = match m.role {
                MessageRole::System => {
                    system_parts.push(&m.content);
                    continue;
                }
                MessageRole::User => "user",
                MessageRole::Assistant => "model",
            };
            contents.push(json!({ "role": role, "parts": [{ "text": m.content }] }));
        }

        let system_instruction = if system_parts.is_empty() {
            None
        } else {
            Some(json!({ "parts": [{ "text": system_parts.join("\n\n") }] }))
        };
        (system_instruction, contents)
    }

    fn generation_config(options: &RequestOptions) -> Map<String, Value> {
        let mut cfg = Map::new();
        if let Some(t) = options.temperature {
            cfg.insert("temperature".into(), json!(t));
        }
        if let Some(mt) = options.max_tokens {
            cfg.insert("maxOutputTokens".into(), json!(mt));
        }
        if let Some(p) = options.top_p {
            cfg.insert("topP".into(), json!(p));
        }
        if let Some(ProviderOptions::Gemini {
            top_k,
            candidate_count,
            stop_sequences,
        }) = &options.provider
        {
            if let Some(k) = top_k {
                cfg.insert("topK".into(), json!(k));
            }
            if let Some(n) = candidate_count {
                cfg.insert("candidateCount".into(), json!(n));
            }
            if !stop_sequences.is_empty() {
                cfg.insert("stopSequences".into(), json!(stop_sequences));
            }
        }
        cfg
    }

    fn candidate_text(candidate: &Value) -> String {
        candidate
            .pointer("/content/parts")
            .and_then(Value::as_array)
            .map(|parts| {
                parts
                    .iter()
                    .filter_map(|p| p.get("text").and_then(Value::as_str))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn parse_event(data: &str) -> std::result::Result<StreamFrame, ProviderFailure> {
        let v: Value = serde_json::from_str(data).map_err(|e| parse_failure(data, e))?;
        if let Some(failure) = stream_error_event(&v) {
            return Err(failure);
        }
        let text = v
            .pointer("/candidates/0")
            .map(Self::candidate_text)
            .unwrap_or_default();
        if text.is_empty() {
            Ok(StreamFrame::Ignore)
        } else {
            Ok(StreamFrame::Delta(text))
        }
    }
}

#[async_trait::async_trait]
impl ProviderAdapter for GeminiAdapter {
    fn provider_id(&self) -> &str {
        &self.provider_id
    }

    fn api_style(&self) -> ApiStyle {
        ApiStyle::Gemini
    }

    fn prepare_request(
        &self,
        client: &VendorClient,
        messages: &[Message],
        config: &ProviderConfig,
        options: &RequestOptions,
        stream: bool,
    ) -> Result<VendorPayload> {
        check_options_style(ApiStyle::Gemini, options)?;
        let (system_instruction, contents) = Self::split_messages(messages);

        let mut body = json!({ "contents": contents });
        if let Some(sys) = system_instruction {
            body["systemInstruction"] = sys;
        }
        let generation = Self::generation_config(options);
        if !generation.is_empty() {
            body["generationConfig"] = Value::Object(generation);
        }

        let model = options.model.as_deref().unwrap_or(&config.model);
        let path = if stream {
            format!("models/{}:streamGenerateContent?alt=sse", model)
        } else {
            format!("models/{}:generateContent", model)
        };

        Ok(VendorPayload {
            url: client.url(&path)?,
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
            request.bearer_auth(config.api_key.expose())
        } else {
            request.header("x-goog-api-key", config.api_key.expose())
        }
    }

    fn process_response(&self, body: &Value) -> Result<ChatResponse> {
        let candidate = body
            .get("candidates")
            .and_then(Value::as_array)
            .and_then(|c| c.first())
            .ok_or_else(|| Error::EmptyResponse {
                provider: self.provider_id.clone(),
            })?;

        let finish_reason = candidate
            .get("finishReason")
            .and_then(Value::as_str)
            .map(normalize_finish_reason)
            .unwrap_or_default();
        let usage = body
            .get("usageMetadata")
            .map(|u| {
                Usage::new(
                    u["promptTokenCount"].as_u64().unwrap_or(0),
                    u["candidatesTokenCount"].as_u64().unwrap_or(0),
                )
            })
            .unwrap_or_default();

        Ok(ChatResponse {
            content: Self::candidate_text(candidate),
            model_id: body["modelVersion"].as_str().unwrap_or_default().to_string(),
            finish_reason,
            usage,
        })
    }

    fn stream_event_parser(&self) -> StreamEventParser {
        Self::parse_event
    }

    /// `streamGenerateContent` has no end event; the body simply ends.
    fn requires_terminal_event(&self) -> bool {
        false
    }
}
