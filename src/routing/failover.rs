//! Primary / fallback pair validation.

use crate::config::FailoverConfig;
use crate::{Error, ErrorContext, Result};

/// Guards against blank names and two-node failover cycles.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailoverPolicy;

impl FailoverPolicy {
    pub fn validate(config: &FailoverConfig) -> Result<()> {
        let primary = config.primary_provider.trim();
        let fallback = config.fallback_provider.trim();

        if primary.is_empty() {
            return Err(invalid("primary provider must not be blank", "failover.primary_provider"));
        }
        if fallback.is_empty() {
            return Err(invalid(
                "fallback provider must not be blank",
                "failover.fallback_provider",
            ));
        }
        if primary.eq_ignore_ascii_case(fallback) {
            return Err(Error::configuration_with_context(
                format!("primary and fallback provider are both '{}'", primary),
                ErrorContext::new()
                    .with_field_path("failover")
                    .with_details("a provider cannot fail over to itself")
                    .with_source("failover_policy"),
            ));
        }
        Ok(())
    }
}

fn invalid(message: &str, field: &str) -> Error {
    Error::configuration_with_context(
        message,
        ErrorContext::new()
            .with_field_path(field)
            .with_source("failover_policy"),
    )
}
