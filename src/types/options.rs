//! Per-call request options.
//!
//! Common sampling fields apply to every vendor. Vendor-only knobs travel in a
//! [`ProviderOptions`] variant tagged with the API style it belongs to; an
//! adapter refuses a variant meant for another style.

use crate::config::ApiStyle;
use serde::{Deserialize, Serialize};

/// Options for a single chat call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestOptions {
    /// Overrides the provider's configured model for this call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderOptions>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn temperature(mut self, temp: f64) -> Self {
        self.temperature = Some(temp);
        self
    }

    pub fn max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = Some(max);
        self
    }

    pub fn top_p(mut self, top_p: f64) -> Self {
        self.top_p = Some(top_p);
        self
    }

    pub fn provider_options(mut self, extra: ProviderOptions) -> Self {
        self.provider = Some(extra);
        self
    }

    /// Copy of these options for a call against a `style` provider it was
    /// not written for: the model override is cleared, and vendor extras
    /// tagged for another style are dropped.
    pub fn retargeted(&self, style: ApiStyle) -> Self {
        let provider = self
            .provider
            .as_ref()
            .filter(|extra| extra.api_style() == style)
            .cloned();
        Self {
            model: None,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            top_p: self.top_p,
            provider,
        }
    }
}

/// Vendor-specific extras, tagged by API style.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "style", rename_all = "snake_case")]
pub enum ProviderOptions {
    #[serde(rename = "openai")]
    OpenAi {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        frequency_penalty: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        presence_penalty: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        seed: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user: Option<String>,
    },
    Anthropic {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        top_k: Option<u32>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        stop_sequences: Vec<String>,
    },
    Gemini {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        top_k: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        candidate_count: Option<u32>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        stop_sequences: Vec<String>,
    },
}

impl ProviderOptions {
    /// The API style these options are meant for.
    pub fn api_style(&self) -> ApiStyle {
        match self {
            ProviderOptions::OpenAi { .. } => ApiStyle::OpenAi,
            ProviderOptions::Anthropic { .. } => ApiStyle::Anthropic,
            ProviderOptions::Gemini { .. } => ApiStyle::Gemini,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_options_tagged_by_style() {
        let json = r#"{"style":"anthropic","top_k":40}"#;
        let parsed: ProviderOptions = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.api_style(), ApiStyle::Anthropic);
    }

    #[test]
    fn test_retargeted_keeps_sampling_and_matching_extras() {
        let extra = ProviderOptions::OpenAi {
            frequency_penalty: None,
            presence_penalty: None,
            seed: Some(7),
            user: None,
        };
        let opts = RequestOptions::new()
            .model("gpt-4o")
            .temperature(0.3)
            .provider_options(extra.clone());

        let same = opts.retargeted(ApiStyle::OpenAi);
        assert!(same.model.is_none());
        assert_eq!(same.temperature, Some(0.3));
        assert_eq!(same.provider, Some(extra));

        let other = opts.retargeted(ApiStyle::Anthropic);
        assert!(other.provider.is_none());
        assert_eq!(other.temperature, Some(0.3));
    }
}
