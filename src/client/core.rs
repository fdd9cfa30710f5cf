//! 客户端核心：配置快照、准入控制与厂商客户端缓存的组装。
//!
//! Core client state and the per-call preamble shared by every call shape.

use crate::cache::{ClientCache, ProviderSlots};
use crate::config::{OptionsSource, ProviderConfig};
use crate::drivers::{create_adapter, ProviderAdapter};
use crate::resilience::{RateLimiter, RateLimiterSnapshot, RetryExecutor};
use crate::routing::{Capability, CapabilityProbe, ProviderSelector};
use crate::telemetry::{EventSink, PhaseEvent};
use crate::transport::{TransportFactory, VendorClient};
use crate::types::Message;
use crate::{Error, Result};
use std::sync::Arc;
use tracing::debug;

use super::validation::RequestValidator;

/// Provider-independent chat client.
///
/// Holds no configuration of its own: every call pulls a fresh snapshot from
/// the [`OptionsSource`]. The only retained state is the per-provider client
/// cache and rate limiter, each invalidated when its settings change.
pub struct RelayClient {
    pub(crate) options: Arc<dyn OptionsSource>,
    pub(crate) transport: Arc<dyn TransportFactory>,
    pub(crate) clients: ProviderSlots<ClientCache<VendorClient>>,
    pub(crate) limiters: ProviderSlots<RateLimiter>,
    pub(crate) retry: RetryExecutor,
    pub(crate) sink: Arc<dyn EventSink>,
    pub(crate) probe: Arc<dyn CapabilityProbe>,
}

/// Everything a call needs once it has been validated and admitted.
pub(crate) struct CallContext {
    pub request_id: String,
    pub provider: String,
    pub config: ProviderConfig,
    pub messages: Vec<Message>,
    pub client: Arc<VendorClient>,
    pub adapter: Arc<dyn ProviderAdapter>,
}

impl RelayClient {
    /// Client over `options` with default transport, backoff and sinks.
    pub fn new(options: Arc<dyn OptionsSource>) -> Self {
        Self::builder().assemble(options)
    }

    pub fn builder() -> super::builder::RelayClientBuilder {
        super::builder::RelayClientBuilder::new()
    }

    pub fn options(&self) -> &Arc<dyn OptionsSource> {
        &self.options
    }

    /// Best provider for `capability` under `strategy` (or the configured default).
    pub async fn select_provider(
        &self,
        capability: Capability,
        strategy: Option<&str>,
    ) -> Result<String> {
        let snapshot = self.options.current();
        ProviderSelector::new(&snapshot, self.probe.as_ref())
            .select(capability, strategy)
            .await
    }

    /// Every provider able to serve `capability`, best first.
    pub async fn candidate_providers(
        &self,
        capability: Capability,
        strategy: Option<&str>,
    ) -> Result<Vec<String>> {
        let snapshot = self.options.current();
        ProviderSelector::new(&snapshot, self.probe.as_ref())
            .candidates(capability, strategy)
            .await
    }

    /// Current rate-limit window for `provider`, without taking a permit.
    ///
    /// `None` when the provider has no limit configured or has not been
    /// called yet.
    pub fn rate_limit_snapshot(&self, provider: &str) -> Result<Option<RateLimiterSnapshot>> {
        let snapshot = self.options.current();
        let (name, config) = snapshot.provider_entry(provider)?;
        if config.rate_limit().is_none() {
            return Ok(None);
        }
        Ok(self.limiters.peek(name).and_then(|limiter| limiter.snapshot()))
    }

    /// Number of vendor clients built for `provider` so far.
    pub fn client_builds(&self, provider: &str) -> u64 {
        self.clients
            .peek(provider)
            .map(|cache| cache.build_count())
            .unwrap_or(0)
    }

    /// Config lookup, validation, admission and client resolution.
    ///
    /// Everything here is synchronous and happens before any vendor I/O.
    pub(crate) fn begin(
        &self,
        request_id: &str,
        provider: &str,
        messages: Vec<Message>,
    ) -> Result<CallContext> {
        let snapshot = self.options.current();
        let (name, config) = snapshot.provider_entry(provider)?;
        let name = name.to_string();
        let config = config.clone();
        drop(snapshot);

        let validated = match RequestValidator::validate(messages, config.max_request_size) {
            Ok(validated) => validated,
            Err(e) => {
                self.reject(request_id, &name, &e);
                return Err(e);
            }
        };
        self.sink.record(PhaseEvent::Validated {
            request_id: request_id.to_string(),
            provider: name.clone(),
            messages: validated.messages.len(),
            bytes: validated.serialized_bytes,
        });
        let messages = validated.messages;

        self.admit(request_id, &name, &config)?;

        let client = self.vendor_client(&name, &config)?;
        let adapter = create_adapter(config.api_style, &name);
        Ok(CallContext {
            request_id: request_id.to_string(),
            provider: name,
            config,
            messages,
            client,
            adapter,
        })
    }

    fn admit(&self, request_id: &str, provider: &str, config: &ProviderConfig) -> Result<()> {
        let Some(settings) = config.rate_limit() else {
            self.record_admitted(request_id, provider);
            return Ok(());
        };
        if self.limiters.get(provider).try_acquire(Some(settings)) {
            self.record_admitted(request_id, provider);
            return Ok(());
        }
        let err = Error::RateLimitExceeded {
            provider: provider.to_string(),
            permit_limit: settings.permit_limit,
            window: settings.window,
        };
        self.reject(request_id, provider, &err);
        Err(err)
    }

    fn vendor_client(&self, provider: &str, config: &ProviderConfig) -> Result<Arc<VendorClient>> {
        self.clients.get(provider).get_or_create(config, |cfg| {
            let http = self.transport.client(provider)?;
            VendorClient::new(provider, cfg, http)
        })
    }

    fn record_admitted(&self, request_id: &str, provider: &str) {
        self.sink.record(PhaseEvent::Admitted {
            request_id: request_id.to_string(),
            provider: provider.to_string(),
        });
    }

    fn reject(&self, request_id: &str, provider: &str, err: &Error) {
        debug!(provider, error = %err, "request refused before dispatch");
        self.sink.record(PhaseEvent::Rejected {
            request_id: request_id.to_string(),
            provider: provider.to_string(),
            code: err.standard_code().name(),
        });
    }
}

impl std::fmt::Debug for RelayClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayClient")
            .field("providers", &self.options.current().providers.len())
            .field("retry", &self.retry)
            .finish()
    }
}
