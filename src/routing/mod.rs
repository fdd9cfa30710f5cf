//! 路由模块：按能力过滤、按策略排序，选择可用的供应商。
//!
//! Provider selection helpers.
//!
//! This module is pure logic apart from the [`CapabilityProbe`] seam: given a
//! capability and a named strategy it filters the configured providers and
//! orders the survivors. The ordering itself is configuration data
//! ([`StrategyConfig`]), not code.
//!
//! ```yaml
//! routing:
//!   default_strategy: fast
//!   strategies:
//!     fast: { rank_by: speed }
//!     best: { rank_by: quality }
//!     pinned: { rank_by: explicit, order: [anthropic, openai] }
//! ```

pub mod failover;

pub use failover::FailoverPolicy;

use crate::config::{ProviderConfig, RelayConfig};
use crate::{Error, ErrorContext, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// Feature a provider may support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Text,
    Streaming,
    Vision,
    Tools,
    Embeddings,
    StructuredOutput,
    Reasoning,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Text => "text",
            Capability::Streaming => "streaming",
            Capability::Vision => "vision",
            Capability::Tools => "tools",
            Capability::Embeddings => "embeddings",
            Capability::StructuredOutput => "structured_output",
            Capability::Reasoning => "reasoning",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeedTier {
    Fast,
    Balanced,
    Slow,
}

impl SpeedTier {
    /// Lower is better.
    pub fn rank(&self) -> usize {
        match self {
            SpeedTier::Fast => 0,
            SpeedTier::Balanced => 1,
            SpeedTier::Slow => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityTier {
    Basic,
    Good,
    Excellent,
}

impl QualityTier {
    /// Lower is better.
    pub fn rank(&self) -> usize {
        match self {
            QualityTier::Excellent => 0,
            QualityTier::Good => 1,
            QualityTier::Basic => 2,
        }
    }
}

/// Routing hints attached to a provider entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderProfile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<SpeedTier>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<QualityTier>,
}

impl ProviderProfile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_speed(mut self, speed: SpeedTier) -> Self {
        self.speed = Some(speed);
        self
    }

    pub fn with_quality(mut self, quality: QualityTier) -> Self {
        self.quality = Some(quality);
        self
    }
}

/// How a named strategy orders capable providers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rank_by", rename_all = "snake_case")]
pub enum StrategyConfig {
    /// Fastest speed tier first.
    Speed,
    /// Highest quality tier first.
    Quality,
    /// Fixed provider order; unlisted providers go last.
    Explicit { order: Vec<String> },
}

impl StrategyConfig {
    /// Position of `provider` under this strategy; `None` sorts last.
    pub fn rank(&self, provider: &str, profile: &ProviderProfile) -> Option<usize> {
        match self {
            StrategyConfig::Speed => profile.speed.map(|t| t.rank()),
            StrategyConfig::Quality => profile.quality.map(|t| t.rank()),
            StrategyConfig::Explicit { order } => order
                .iter()
                .position(|name| name.trim().eq_ignore_ascii_case(provider)),
        }
    }
}

/// Answers whether a provider supports a capability.
#[async_trait]
pub trait CapabilityProbe: Send + Sync {
    async fn supports(&self, provider: &str, config: &ProviderConfig, capability: Capability)
        -> bool;
}

/// Capabilities listed in configuration, falling back to the adapter defaults
/// for the provider's API style.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConfiguredCapabilities;

#[async_trait]
impl CapabilityProbe for ConfiguredCapabilities {
    async fn supports(
        &self,
        _provider: &str,
        config: &ProviderConfig,
        capability: Capability,
    ) -> bool {
        if config.capabilities.is_empty() {
            crate::drivers::default_capabilities(config.api_style).contains(&capability)
        } else {
            config.capabilities.contains(&capability)
        }
    }
}

/// Filters and orders providers for one configuration snapshot.
pub struct ProviderSelector<'a> {
    config: &'a RelayConfig,
    probe: &'a dyn CapabilityProbe,
}

impl<'a> ProviderSelector<'a> {
    pub fn new(config: &'a RelayConfig, probe: &'a dyn CapabilityProbe) -> Self {
        Self { config, probe }
    }

    /// Best provider for `capability` under `strategy` (or the default strategy).
    pub async fn select(&self, capability: Capability, strategy: Option<&str>) -> Result<String> {
        let (strategy_name, ranked) = self.ranked(capability, strategy).await?;
        let chosen = ranked.into_iter().next().ok_or_else(|| Error::NoProviderAvailable {
            capability: capability.to_string(),
            strategy: strategy_name.clone(),
        })?;
        debug!(
            capability = %capability,
            strategy = strategy_name.as_str(),
            provider = chosen.as_str(),
            "provider selected"
        );
        Ok(chosen)
    }

    /// Every capable provider, best first.
    pub async fn candidates(
        &self,
        capability: Capability,
        strategy: Option<&str>,
    ) -> Result<Vec<String>> {
        self.ranked(capability, strategy).await.map(|(_, ranked)| ranked)
    }

    async fn ranked(
        &self,
        capability: Capability,
        strategy: Option<&str>,
    ) -> Result<(String, Vec<String>)> {
        let (name, strategy) = self.resolve_strategy(strategy)?;

        let mut capable = Vec::new();
        for (provider, cfg) in &self.config.providers {
            if self.probe.supports(provider, cfg, capability).await {
                capable.push((provider.clone(), strategy.rank(provider, &cfg.profile)));
            }
        }
        // stable: equal ranks keep provider-name order
        capable.sort_by_key(|(_, rank)| rank.unwrap_or(usize::MAX));

        Ok((name, capable.into_iter().map(|(p, _)| p).collect()))
    }

    fn resolve_strategy(&self, requested: Option<&str>) -> Result<(String, &'a StrategyConfig)> {
        let routing = &self.config.routing;
        let name = match requested.or(routing.default_strategy.as_deref()) {
            Some(name) => name,
            None => {
                return Err(Error::configuration_with_context(
                    "no strategy requested and no default strategy configured",
                    ErrorContext::new()
                        .with_field_path("routing.default_strategy")
                        .with_source("provider_selector"),
                ))
            }
        };
        let strategy = routing.strategies.get(name).ok_or_else(|| {
            Error::configuration_with_context(
                format!("unknown routing strategy '{}'", name),
                ErrorContext::new()
                    .with_field_path(format!("routing.strategies.{}", name))
                    .with_source("provider_selector"),
            )
        })?;
        Ok((name.to_string(), strategy))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ApiStyle;

    fn provider(style: ApiStyle, profile: ProviderProfile) -> ProviderConfig {
        ProviderConfig::new(style, "m")
            .with_api_key("k")
            .with_profile(profile)
    }

    fn config() -> RelayConfig {
        RelayConfig::new()
            .with_provider(
                "anthropic",
                provider(
                    ApiStyle::Anthropic,
                    ProviderProfile::new()
                        .with_speed(SpeedTier::Balanced)
                        .with_quality(QualityTier::Excellent),
                ),
            )
            .with_provider(
                "gemini",
                provider(ApiStyle::Gemini, ProviderProfile::new().with_speed(SpeedTier::Fast))
                    .with_capabilities(vec![Capability::Text]),
            )
            .with_provider(
                "openai",
                provider(
                    ApiStyle::OpenAi,
                    ProviderProfile::new()
                        .with_speed(SpeedTier::Fast)
                        .with_quality(QualityTier::Good),
                ),
            )
            .with_strategy("fast", StrategyConfig::Speed)
            .with_strategy("best", StrategyConfig::Quality)
            .with_strategy(
                "pinned",
                StrategyConfig::Explicit {
                    order: vec!["openai".into(), "anthropic".into()],
                },
            )
            .with_default_strategy("best")
    }

    #[tokio::test]
    async fn test_speed_ties_break_by_name() {
        let cfg = config();
        let selector = ProviderSelector::new(&cfg, &ConfiguredCapabilities);
        let ranked = selector.candidates(Capability::Text, Some("fast")).await.unwrap();
        assert_eq!(ranked, vec!["gemini", "openai", "anthropic"]);
    }

    #[tokio::test]
    async fn test_default_strategy_and_capability_filter() {
        let cfg = config();
        let selector = ProviderSelector::new(&cfg, &ConfiguredCapabilities);
        // gemini overrides its capabilities down to text only
        let ranked = selector.candidates(Capability::Streaming, None).await.unwrap();
        assert_eq!(ranked, vec!["anthropic", "openai"]);
        assert_eq!(
            selector.select(Capability::Streaming, None).await.unwrap(),
            "anthropic"
        );
    }

    #[tokio::test]
    async fn test_explicit_order_puts_unlisted_last() {
        let cfg = config();
        let selector = ProviderSelector::new(&cfg, &ConfiguredCapabilities);
        let ranked = selector.candidates(Capability::Text, Some("pinned")).await.unwrap();
        assert_eq!(ranked, vec!["openai", "anthropic", "gemini"]);
    }

    #[tokio::test]
    async fn test_no_capable_provider() {
        let cfg = config();
        let selector = ProviderSelector::new(&cfg, &ConfiguredCapabilities);
        let err = selector
            .select(Capability::Embeddings, Some("fast"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoProviderAvailable { .. }));
    }

    #[tokio::test]
    async fn test_unknown_or_missing_strategy() {
        let cfg = config();
        let selector = ProviderSelector::new(&cfg, &ConfiguredCapabilities);
        let err = selector.select(Capability::Text, Some("cheap")).await.unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));

        let mut no_default = config();
        no_default.routing.default_strategy = None;
        let selector = ProviderSelector::new(&no_default, &ConfiguredCapabilities);
        let err = selector.select(Capability::Text, None).await.unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
    }

    #[test]
    fn test_strategy_yaml_shape() {
        let raw = "rank_by: explicit\norder: [a, b]\n";
        let parsed: StrategyConfig = serde_yaml::from_str(raw).unwrap();
        assert_eq!(
            parsed,
            StrategyConfig::Explicit {
                order: vec!["a".into(), "b".into()]
            }
        );
    }
}
