use crate::transport::TransportError;
use crate::Result;
use reqwest::Proxy;
use std::env;
use std::time::Duration;
use tracing::warn;

/// Connection-pool knobs for the shared HTTP client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpSettings {
    pub pool_max_idle_per_host: usize,
    pub pool_idle_timeout: Duration,
    pub connect_timeout: Duration,
    pub proxy_url: Option<String>,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            pool_max_idle_per_host: 32,
            pool_idle_timeout: Duration::from_secs(90),
            connect_timeout: Duration::from_secs(10),
            proxy_url: None,
        }
    }
}

impl HttpSettings {
    /// Defaults overridden by `RELAY_HTTP_*` / `RELAY_PROXY_URL`.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            pool_max_idle_per_host: env_parse("RELAY_HTTP_POOL_MAX_IDLE_PER_HOST")
                .unwrap_or(defaults.pool_max_idle_per_host),
            pool_idle_timeout: env_parse("RELAY_HTTP_POOL_IDLE_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.pool_idle_timeout),
            connect_timeout: env_parse("RELAY_HTTP_CONNECT_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.connect_timeout),
            proxy_url: env::var("RELAY_PROXY_URL").ok().filter(|s| !s.trim().is_empty()),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|s| s.trim().parse::<T>().ok())
}

/// Build a pooled client. No whole-request timeout is set; deadlines come
/// from the per-call cancellation signal.
pub fn build_client(settings: &HttpSettings) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .pool_max_idle_per_host(settings.pool_max_idle_per_host)
        .pool_idle_timeout(Some(settings.pool_idle_timeout))
        .connect_timeout(settings.connect_timeout)
        .user_agent(concat!("llm-relay/", env!("CARGO_PKG_VERSION")))
        // Conservative HTTP/2 keepalive defaults for long-lived streams.
        .http2_adaptive_window(true)
        .http2_keep_alive_interval(Some(Duration::from_secs(30)))
        .http2_keep_alive_timeout(Duration::from_secs(10));

    if let Some(proxy_url) = &settings.proxy_url {
        match Proxy::all(proxy_url) {
            Ok(proxy) => builder = builder.proxy(proxy),
            Err(e) => warn!(error = %e, "ignoring invalid RELAY_PROXY_URL"),
        }
    }

    builder
        .build()
        .map_err(|e| crate::Error::Transport(TransportError::Other(e.to_string())))
}
