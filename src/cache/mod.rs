//! 客户端缓存模块：按配置指纹缓存厂商客户端，配置变化时惰性重建。
//!
//! # Client Caching
//!
//! Vendor clients are expensive to build and cheap to share, so each provider
//! keeps one behind a [`ClientCache`]. The cache is keyed by a
//! [`ConfigFingerprint`]: the non-secret shape of the provider's settings.
//!
//! [`ProviderSlots`] hands out the per-provider instance (client caches,
//! rate limiters) without a global lock.

pub mod client_cache;
pub mod fingerprint;

pub use client_cache::ClientCache;
pub use fingerprint::ConfigFingerprint;

use arc_swap::ArcSwap;
use std::collections::HashMap;
use std::sync::Arc;

/// Lazily populated per-provider map. Entries are never removed.
pub struct ProviderSlots<T> {
    slots: ArcSwap<HashMap<String, Arc<T>>>,
}

impl<T> Default for ProviderSlots<T> {
    fn default() -> Self {
        Self {
            slots: ArcSwap::from_pointee(HashMap::new()),
        }
    }
}

impl<T: Default> ProviderSlots<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Slot for `provider`, created on first use.
    pub fn get(&self, provider: &str) -> Arc<T> {
        if let Some(slot) = self.slots.load().get(provider) {
            return slot.clone();
        }

        let fresh = Arc::new(T::default());
        self.slots.rcu(|current| {
            if current.contains_key(provider) {
                return Arc::clone(current);
            }
            let mut next = HashMap::clone(current);
            next.insert(provider.to_string(), fresh.clone());
            Arc::new(next)
        });
        self.slots
            .load()
            .get(provider)
            .cloned()
            .unwrap_or(fresh)
    }

    /// Existing slot only; never creates one.
    pub fn peek(&self, provider: &str) -> Option<Arc<T>> {
        self.slots.load().get(provider).cloned()
    }

    pub fn len(&self) -> usize {
        self.slots.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
