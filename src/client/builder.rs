use crate::cache::ProviderSlots;
use crate::config::{OptionsSource, RelayConfig, SharedOptions};
use crate::resilience::{Backoff, RetryExecutor};
use crate::routing::{CapabilityProbe, ConfiguredCapabilities};
use crate::telemetry::{EventSink, TracingSink};
use crate::transport::{PooledTransportFactory, TransportFactory};
use crate::{Error, ErrorContext, Result};
use std::sync::Arc;

use super::core::RelayClient;

/// Builder for creating clients with custom collaborators.
///
/// Keep this surface area small and predictable: only the options source is
/// required, everything else has a production default.
pub struct RelayClientBuilder {
    options: Option<Arc<dyn OptionsSource>>,
    transport: Option<Arc<dyn TransportFactory>>,
    backoff: Backoff,
    sink: Arc<dyn EventSink>,
    probe: Arc<dyn CapabilityProbe>,
}

impl RelayClientBuilder {
    pub fn new() -> Self {
        Self {
            options: None,
            transport: None,
            backoff: Backoff::default(),
            sink: Arc::new(TracingSink),
            probe: Arc::new(ConfiguredCapabilities),
        }
    }

    /// Hot-reloadable configuration source, read on every call.
    pub fn options_source(mut self, options: Arc<dyn OptionsSource>) -> Self {
        self.options = Some(options);
        self
    }

    /// Fixed configuration; validated now and wrapped in a [`SharedOptions`].
    pub fn config(self, config: RelayConfig) -> Result<Self> {
        let options = SharedOptions::new(config)?;
        Ok(self.options_source(Arc::new(options)))
    }

    /// Pooled HTTP client source. Defaults to [`PooledTransportFactory::from_env`].
    pub fn transport(mut self, transport: Arc<dyn TransportFactory>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Delay policy between retry attempts of buffered calls.
    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Inject an event sink. Default forwards to `tracing`.
    pub fn event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Capability lookup used by provider selection.
    pub fn capability_probe(mut self, probe: Arc<dyn CapabilityProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn build(self) -> Result<RelayClient> {
        let options = self.options.clone().ok_or_else(|| {
            Error::configuration_with_context(
                "an options source is required",
                ErrorContext::new()
                    .with_field_path("options")
                    .with_source("relay_client_builder"),
            )
        })?;
        Ok(self.assemble(options))
    }

    pub(crate) fn assemble(self, options: Arc<dyn OptionsSource>) -> RelayClient {
        let transport = self
            .transport
            .unwrap_or_else(|| Arc::new(PooledTransportFactory::from_env()));
        RelayClient {
            options,
            transport,
            clients: ProviderSlots::new(),
            limiters: ProviderSlots::new(),
            retry: RetryExecutor::new(self.backoff),
            sink: self.sink,
            probe: self.probe,
        }
    }
}

impl Default for RelayClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}
