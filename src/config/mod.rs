//! 配置模块：供应商配置、故障转移配置以及可热加载的配置源。
//!
//! # Configuration
//!
//! [`RelayConfig`] is the whole configuration surface: one [`ProviderConfig`]
//! per logical provider, an optional [`FailoverConfig`] pair and the routing
//! strategies. The relay never holds on to a snapshot beyond a single call;
//! every call pulls [`OptionsSource::current`] again.
//!
//! ```yaml
//! providers:
//!   openai:
//!     api_style: openai
//!     api_key: sk-...
//!     model: gpt-4o-mini
//!     request_timeout_ms: 30000
//!     max_retries: 2
//!     permit_limit: 60
//!     window_seconds: 60
//!   anthropic:
//!     api_style: anthropic
//!     model: claude-3-5-haiku-latest
//! failover:
//!   primary_provider: openai
//!   fallback_provider: anthropic
//! routing:
//!   default_strategy: quality
//!   strategies:
//!     quality: { rank_by: quality }
//! ```

pub mod source;
pub mod watch;

pub use source::{FileOptions, OptionsSource, SharedOptions};
pub use watch::ConfigWatcher;

use crate::resilience::rate_limiter::RateLimitSettings;
use crate::routing::{Capability, FailoverPolicy, ProviderProfile, StrategyConfig};
use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 60_000;
const DEFAULT_MAX_RETRIES: u32 = 2;
const DEFAULT_MAX_REQUEST_SIZE: usize = 1024 * 1024;

/// Wire format family spoken by a provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiStyle {
    /// OpenAI chat completions and compatible APIs.
    #[default]
    #[serde(rename = "openai")]
    OpenAi,
    /// Anthropic Messages API.
    Anthropic,
    /// Google Gemini generateContent API.
    Gemini,
}

impl ApiStyle {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApiStyle::OpenAi => "openai",
            ApiStyle::Anthropic => "anthropic",
            ApiStyle::Gemini => "gemini",
        }
    }
}

impl fmt::Display for ApiStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque API key. `Debug` only ever shows presence and length.
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Raw key, for building the auth header only.
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_present(&self) -> bool {
        !self.0.trim().is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_present() {
            write!(f, "ApiKey(len={})", self.0.len())
        } else {
            f.write_str("ApiKey(<absent>)")
        }
    }
}

impl From<&str> for ApiKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ApiKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

fn default_request_timeout_ms() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_MS
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_max_request_size() -> usize {
    DEFAULT_MAX_REQUEST_SIZE
}

/// Settings for one logical provider.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub api_style: ApiStyle,
    #[serde(default)]
    pub api_key: ApiKey,
    pub model: String,
    /// Base URL; each style has a public default.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Cloud-hosted variant of the vendor API (Azure OpenAI, Vertex AI).
    #[serde(default)]
    pub managed_endpoint: bool,
    /// API version query parameter for managed endpoints.
    #[serde(default)]
    pub api_version: Option<String>,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Ceiling for the summed serialized size of a request's messages, in bytes.
    #[serde(default = "default_max_request_size")]
    pub max_request_size: usize,
    #[serde(default)]
    pub permit_limit: Option<u32>,
    #[serde(default)]
    pub window_seconds: Option<u64>,
    /// Overrides the adapter's declared capabilities when non-empty.
    #[serde(default)]
    pub capabilities: Vec<Capability>,
    #[serde(default)]
    pub profile: ProviderProfile,
}

impl ProviderConfig {
    pub fn new(api_style: ApiStyle, model: impl Into<String>) -> Self {
        Self {
            api_style,
            api_key: ApiKey::default(),
            model: model.into(),
            endpoint: None,
            managed_endpoint: false,
            api_version: None,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            max_retries: DEFAULT_MAX_RETRIES,
            max_request_size: DEFAULT_MAX_REQUEST_SIZE,
            permit_limit: None,
            window_seconds: None,
            capabilities: Vec::new(),
            profile: ProviderProfile::default(),
        }
    }

    pub fn with_api_key(mut self, key: impl Into<ApiKey>) -> Self {
        self.api_key = key.into();
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn managed(mut self, api_version: Option<String>) -> Self {
        self.managed_endpoint = true;
        self.api_version = api_version;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_max_request_size(mut self, bytes: usize) -> Self {
        self.max_request_size = bytes;
        self
    }

    pub fn with_rate_limit(mut self, permit_limit: u32, window_seconds: u64) -> Self {
        self.permit_limit = Some(permit_limit);
        self.window_seconds = Some(window_seconds);
        self
    }

    pub fn with_capabilities(mut self, capabilities: Vec<Capability>) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_profile(mut self, profile: ProviderProfile) -> Self {
        self.profile = profile;
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Rate-limit settings, when both halves of the pair are configured.
    pub fn rate_limit(&self) -> Option<RateLimitSettings> {
        match (self.permit_limit, self.window_seconds) {
            (Some(permit_limit), Some(window_seconds)) => Some(RateLimitSettings::new(
                permit_limit,
                Duration::from_secs(window_seconds),
            )),
            _ => None,
        }
    }

    /// Check the invariants of a single provider entry.
    pub fn validate(&self, name: &str) -> Result<()> {
        let field = |f: &str| format!("providers.{}.{}", name, f);
        let invalid = |msg: String, f: &str| {
            Error::configuration_with_context(
                msg,
                ErrorContext::new()
                    .with_field_path(field(f))
                    .with_source("provider_config"),
            )
        };

        if self.model.trim().is_empty() {
            return Err(invalid("model must not be blank".into(), "model"));
        }
        if !self.api_key.is_present() {
            return Err(invalid(
                format!("api key is missing ({:?})", self.api_key),
                "api_key",
            ));
        }
        if self.request_timeout_ms == 0 {
            return Err(invalid(
                "request timeout must be greater than zero".into(),
                "request_timeout_ms",
            ));
        }
        if self.max_request_size == 0 {
            return Err(invalid(
                "max request size must be greater than zero".into(),
                "max_request_size",
            ));
        }
        match (self.permit_limit, self.window_seconds) {
            (Some(0), _) => {
                return Err(invalid(
                    "permit limit must be greater than zero".into(),
                    "permit_limit",
                ))
            }
            (_, Some(0)) => {
                return Err(invalid(
                    "window must be at least one second".into(),
                    "window_seconds",
                ))
            }
            (Some(_), None) | (None, Some(_)) => {
                return Err(invalid(
                    "permit_limit and window_seconds must be set together".into(),
                    "permit_limit",
                ))
            }
            _ => {}
        }
        if let Some(endpoint) = &self.endpoint {
            url::Url::parse(endpoint)
                .map_err(|e| invalid(format!("endpoint is not a valid URL: {}", e), "endpoint"))?;
        } else if self.managed_endpoint {
            return Err(invalid(
                "managed endpoints require an explicit endpoint".into(),
                "endpoint",
            ));
        }
        Ok(())
    }
}

/// Primary / fallback provider pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailoverConfig {
    pub primary_provider: String,
    pub fallback_provider: String,
}

impl FailoverConfig {
    pub fn new(primary: impl Into<String>, fallback: impl Into<String>) -> Self {
        Self {
            primary_provider: primary.into(),
            fallback_provider: fallback.into(),
        }
    }
}

/// Named provider-ordering strategies.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RoutingConfig {
    #[serde(default)]
    pub default_strategy: Option<String>,
    #[serde(default)]
    pub strategies: BTreeMap<String, StrategyConfig>,
}

/// Complete relay configuration snapshot.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RelayConfig {
    #[serde(default)]
    pub providers: BTreeMap<String, ProviderConfig>,
    #[serde(default)]
    pub failover: Option<FailoverConfig>,
    #[serde(default)]
    pub routing: RoutingConfig,
}

impl RelayConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_provider(mut self, name: impl Into<String>, config: ProviderConfig) -> Self {
        self.providers.insert(name.into(), config);
        self
    }

    pub fn with_failover(mut self, failover: FailoverConfig) -> Self {
        self.failover = Some(failover);
        self
    }

    pub fn with_strategy(mut self, name: impl Into<String>, strategy: StrategyConfig) -> Self {
        self.routing.strategies.insert(name.into(), strategy);
        self
    }

    pub fn with_default_strategy(mut self, name: impl Into<String>) -> Self {
        self.routing.default_strategy = Some(name.into());
        self
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        serde_yaml::from_str(raw).map_err(|e| {
            Error::configuration_with_context(
                format!("invalid YAML configuration: {}", e),
                ErrorContext::new().with_source("config_loader"),
            )
        })
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| {
            Error::configuration_with_context(
                format!("invalid JSON configuration: {}", e),
                ErrorContext::new().with_source("config_loader"),
            )
        })
    }

    /// Look up a provider by name; exact match first, then case-insensitive.
    pub fn provider(&self, name: &str) -> Result<&ProviderConfig> {
        self.provider_entry(name).map(|(_, cfg)| cfg)
    }

    /// Like [`provider`](Self::provider) but also returns the canonical name.
    pub fn provider_entry(&self, name: &str) -> Result<(&str, &ProviderConfig)> {
        if let Some((key, cfg)) = self.providers.get_key_value(name) {
            return Ok((key.as_str(), cfg));
        }
        let wanted = name.trim();
        self.providers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(wanted))
            .map(|(key, cfg)| (key.as_str(), cfg))
            .ok_or_else(|| {
                Error::configuration_with_context(
                    format!("provider '{}' is not configured", name),
                    ErrorContext::new()
                        .with_field_path(format!("providers.{}", name))
                        .with_source("relay_config"),
                )
            })
    }

    pub fn failover(&self) -> Result<&FailoverConfig> {
        self.failover.as_ref().ok_or_else(|| {
            Error::configuration_with_context(
                "no failover pair is configured",
                ErrorContext::new()
                    .with_field_path("failover")
                    .with_source("relay_config"),
            )
        })
    }

    /// Fill absent keys from `<PROVIDER>_API_KEY` environment variables.
    pub fn resolve_env_keys(&mut self) {
        for (name, provider) in self.providers.iter_mut() {
            if provider.api_key.is_present() {
                continue;
            }
            let var = format!("{}_API_KEY", name.to_uppercase().replace('-', "_"));
            if let Ok(key) = std::env::var(&var) {
                tracing::debug!(provider = name.as_str(), env = var.as_str(), "api key resolved from environment");
                provider.api_key = ApiKey::new(key);
            }
        }
    }

    /// Validate every provider, the failover pair and the routing table.
    pub fn validate(&self) -> Result<()> {
        for (name, provider) in &self.providers {
            provider.validate(name)?;
        }
        if let Some(failover) = &self.failover {
            FailoverPolicy::validate(failover)?;
            self.provider(&failover.primary_provider)?;
            self.provider(&failover.fallback_provider)?;
        }
        if let Some(default) = &self.routing.default_strategy {
            if !self.routing.strategies.contains_key(default) {
                return Err(Error::configuration_with_context(
                    format!("default strategy '{}' is not defined", default),
                    ErrorContext::new()
                        .with_field_path("routing.default_strategy")
                        .with_source("relay_config"),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn openai() -> ProviderConfig {
        ProviderConfig::new(ApiStyle::OpenAi, "gpt-4o-mini").with_api_key("sk-test-123")
    }

    #[test]
    fn test_api_key_debug_is_redacted() {
        let key = ApiKey::new("sk-very-secret");
        let shown = format!("{:?}", key);
        assert_eq!(shown, "ApiKey(len=14)");
        assert!(!shown.contains("secret"));
        assert_eq!(format!("{:?}", ApiKey::default()), "ApiKey(<absent>)");
    }

    #[test]
    fn test_rate_limit_pair_must_be_complete() {
        let mut cfg = openai();
        cfg.permit_limit = Some(10);
        let err = cfg.validate("openai").unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));

        let cfg = openai().with_rate_limit(10, 60);
        assert!(cfg.validate("openai").is_ok());
        assert_eq!(cfg.rate_limit().unwrap().permit_limit, 10);
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let cfg = openai().with_request_timeout(Duration::ZERO);
        assert!(cfg.validate("openai").is_err());
    }

    #[test]
    fn test_oversized_timeout_saturates() {
        let cfg = openai().with_request_timeout(Duration::MAX);
        assert_eq!(cfg.request_timeout_ms, u64::MAX);
        assert!(cfg.validate("openai").is_ok());
    }

    #[test]
    fn test_missing_key_error_does_not_leak() {
        let cfg = ProviderConfig::new(ApiStyle::OpenAi, "gpt-4o");
        let err = cfg.validate("openai").unwrap_err();
        assert!(err.to_string().contains("<absent>"));
    }

    #[test]
    fn test_managed_endpoint_requires_url() {
        let cfg = openai().managed(Some("2024-06-01".into()));
        assert!(cfg.validate("azure").is_err());
        let cfg = cfg.with_endpoint("https://example.openai.azure.com");
        assert!(cfg.validate("azure").is_ok());
    }

    #[test]
    fn test_yaml_roundtrip_with_defaults() {
        let raw = r#"
providers:
  openai:
    api_key: sk-abc
    model: gpt-4o-mini
  claude:
    api_style: anthropic
    api_key: sk-ant
    model: claude-3-5-haiku-latest
    permit_limit: 5
    window_seconds: 10
failover:
  primary_provider: openai
  fallback_provider: claude
"#;
        let cfg = RelayConfig::from_yaml_str(raw).unwrap();
        cfg.validate().unwrap();
        let openai = cfg.provider("OpenAI").unwrap();
        assert_eq!(openai.api_style, ApiStyle::OpenAi);
        assert_eq!(openai.max_retries, DEFAULT_MAX_RETRIES);
        assert_eq!(cfg.provider("claude").unwrap().rate_limit().unwrap().permit_limit, 5);
    }

    #[test]
    fn test_failover_must_reference_known_providers() {
        let cfg = RelayConfig::new()
            .with_provider("openai", openai())
            .with_failover(FailoverConfig::new("openai", "mistral"));
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_unknown_default_strategy_rejected() {
        let cfg = RelayConfig::new()
            .with_provider("openai", openai())
            .with_default_strategy("fastest");
        assert!(cfg.validate().is_err());
    }
}
