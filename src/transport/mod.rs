//! 传输层：连接池化的 HTTP 客户端工厂与厂商客户端句柄。
//!
//! Transport plumbing.
//!
//! A [`TransportFactory`] hands out connection-pooled `reqwest::Client`s by
//! logical provider name. A [`VendorClient`] pairs one of those with the
//! resolved base URL of a provider; it carries no secrets and no per-call
//! state, so it is safe to share across concurrent calls.

pub mod http;

pub use http::{build_client, HttpSettings};

use crate::config::{ApiStyle, ProviderConfig};
use crate::{Error, ErrorContext, Result};
use std::collections::HashMap;
use std::sync::Mutex;
use url::Url;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Transport error: {0}")]
    Other(String),
}

/// Supplies pooled HTTP clients by logical provider name.
pub trait TransportFactory: Send + Sync {
    fn client(&self, provider: &str) -> Result<reqwest::Client>;
}

/// Builds one pooled client per provider on first use and reuses it.
pub struct PooledTransportFactory {
    settings: HttpSettings,
    clients: Mutex<HashMap<String, reqwest::Client>>,
}

impl PooledTransportFactory {
    pub fn new(settings: HttpSettings) -> Self {
        Self {
            settings,
            clients: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_env() -> Self {
        Self::new(HttpSettings::from_env())
    }

    pub fn settings(&self) -> &HttpSettings {
        &self.settings
    }
}

impl Default for PooledTransportFactory {
    fn default() -> Self {
        Self::from_env()
    }
}

impl TransportFactory for PooledTransportFactory {
    fn client(&self, provider: &str) -> Result<reqwest::Client> {
        let mut clients = self.clients.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(client) = clients.get(provider) {
            return Ok(client.clone());
        }
        let client = build_client(&self.settings)?;
        clients.insert(provider.to_string(), client.clone());
        Ok(client)
    }
}

/// Default public base URL for an API style.
pub fn default_base_url(style: ApiStyle) -> &'static str {
    match style {
        ApiStyle::OpenAi => "https://api.openai.com/v1",
        ApiStyle::Anthropic => "https://api.anthropic.com/v1",
        ApiStyle::Gemini => "https://generativelanguage.googleapis.com/v1beta",
    }
}

/// Shared, secret-free handle used by adapters to reach one provider.
#[derive(Debug, Clone)]
pub struct VendorClient {
    provider: String,
    http: reqwest::Client,
    base_url: Url,
    managed: bool,
}

impl VendorClient {
    pub fn new(provider: &str, config: &ProviderConfig, http: reqwest::Client) -> Result<Self> {
        let raw = config
            .endpoint
            .as_deref()
            .unwrap_or_else(|| default_base_url(config.api_style));
        let base_url = Url::parse(raw.trim().trim_end_matches('/')).map_err(|e| {
            Error::configuration_with_context(
                format!("endpoint is not a valid URL: {}", e),
                ErrorContext::new()
                    .with_field_path(format!("providers.{}.endpoint", provider))
                    .with_source("vendor_client"),
            )
        })?;
        Ok(Self {
            provider: provider.to_string(),
            http,
            base_url,
            managed: config.managed_endpoint,
        })
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn is_managed(&self) -> bool {
        self.managed
    }

    /// `path` appended to the base URL; `path` may carry a query string.
    pub fn url(&self, path: &str) -> Result<Url> {
        let joined = format!(
            "{}/{}",
            self.base_url.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        Url::parse(&joined).map_err(|e| {
            Error::configuration_with_context(
                format!("cannot build request URL: {}", e),
                ErrorContext::new().with_source("vendor_client"),
            )
        })
    }
}
