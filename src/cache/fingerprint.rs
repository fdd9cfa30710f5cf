//! Configuration fingerprint used to detect when a cached client is stale.

use crate::config::{ApiStyle, ProviderConfig};
use sha2::{Digest, Sha256};

/// Non-secret shape of the settings a vendor client is built from.
///
/// The API key contributes only its presence and length. Keys are applied per
/// request, so a rotated key of the same length needs no rebuild.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConfigFingerprint {
    pub secret_present: bool,
    pub secret_len: usize,
    pub endpoint: Option<String>,
    pub managed: bool,
    pub api_style: ApiStyle,
}

impl ConfigFingerprint {
    pub fn of(config: &ProviderConfig) -> Self {
        Self {
            secret_present: config.api_key.is_present(),
            secret_len: config.api_key.len(),
            endpoint: config
                .endpoint
                .as_ref()
                .map(|e| e.trim().trim_end_matches('/').to_string()),
            managed: config.managed_endpoint,
            api_style: config.api_style,
        }
    }

    /// Short hex digest for log fields.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update([self.secret_present as u8, self.managed as u8]);
        hasher.update((self.secret_len as u64).to_le_bytes());
        hasher.update(self.api_style.as_str().as_bytes());
        hasher.update([0u8]);
        if let Some(endpoint) = &self.endpoint {
            hasher.update(endpoint.as_bytes());
        }
        hasher
            .finalize()
            .iter()
            .take(6)
            .map(|b| format!("{:02x}", b))
            .collect()
    }
}
