//! Lazily built vendor client, rebuilt when its fingerprint changes.

use super::fingerprint::ConfigFingerprint;
use crate::config::ProviderConfig;
use crate::Result;
use arc_swap::ArcSwapOption;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::info;

struct CacheEntry<C> {
    fingerprint: ConfigFingerprint,
    client: Arc<C>,
}

/// Holds at most one client per provider.
///
/// Hits are a lock-free load of the published entry. Misses serialize on a
/// mutex, re-check, then build and publish the client before unlocking, so
/// each fingerprint transition builds exactly once.
pub struct ClientCache<C> {
    published: ArcSwapOption<CacheEntry<C>>,
    rebuild: Mutex<()>,
    builds: AtomicU64,
}

impl<C> Default for ClientCache<C> {
    fn default() -> Self {
        Self {
            published: ArcSwapOption::empty(),
            rebuild: Mutex::new(()),
            builds: AtomicU64::new(0),
        }
    }
}

impl<C> ClientCache<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached client for `config`, building it with `build` when stale.
    pub fn get_or_create<F>(&self, config: &ProviderConfig, build: F) -> Result<Arc<C>>
    where
        F: FnOnce(&ProviderConfig) -> Result<C>,
    {
        let fingerprint = ConfigFingerprint::of(config);
        if let Some(client) = self.lookup(&fingerprint) {
            return Ok(client);
        }

        let _guard = self.rebuild.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(client) = self.lookup(&fingerprint) {
            return Ok(client);
        }

        let client = Arc::new(build(config)?);
        let generation = self.builds.fetch_add(1, Ordering::Relaxed) + 1;
        info!(
            fingerprint = %fingerprint.digest(),
            generation,
            "vendor client built"
        );
        self.published.store(Some(Arc::new(CacheEntry {
            fingerprint,
            client: client.clone(),
        })));
        Ok(client)
    }

    fn lookup(&self, fingerprint: &ConfigFingerprint) -> Option<Arc<C>> {
        let current = self.published.load();
        match &*current {
            Some(entry) if entry.fingerprint == *fingerprint => Some(entry.client.clone()),
            _ => None,
        }
    }

    /// Number of clients built so far.
    pub fn build_count(&self) -> u64 {
        self.builds.load(Ordering::Relaxed)
    }

    pub fn invalidate(&self) {
        let _guard = self.rebuild.lock().unwrap_or_else(|e| e.into_inner());
        self.published.store(None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ApiStyle;

    #[derive(Debug)]
    struct Handle(u64);

    fn config(key: &str) -> ProviderConfig {
        ProviderConfig::new(ApiStyle::Anthropic, "claude").with_api_key(key)
    }

    #[test]
    fn test_same_fingerprint_returns_same_handle() {
        let cache = ClientCache::new();
        let a = cache.get_or_create(&config("key-1"), |_| Ok(Handle(1))).unwrap();
        let b = cache.get_or_create(&config("key-2"), |_| Ok(Handle(2))).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.build_count(), 1);
    }

    #[test]
    fn test_fingerprint_change_rebuilds() {
        let cache = ClientCache::new();
        let a = cache.get_or_create(&config("key-1"), |_| Ok(Handle(1))).unwrap();
        let b = cache
            .get_or_create(&config("key-1").with_endpoint("https://eu.example.com"), |_| {
                Ok(Handle(2))
            })
            .unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(b.0, 2);
    }

    #[test]
    fn test_failed_build_publishes_nothing() {
        let cache: ClientCache<Handle> = ClientCache::new();
        let res = cache.get_or_create(&config("key-1"), |_| {
            Err(crate::Error::configuration_with_context(
                "boom",
                crate::ErrorContext::new(),
            ))
        });
        assert!(res.is_err());
        assert_eq!(cache.build_count(), 0);
        let ok = cache.get_or_create(&config("key-1"), |_| Ok(Handle(7))).unwrap();
        assert_eq!(ok.0, 7);
    }

    #[test]
    fn test_concurrent_callers_build_once() {
        let cache = Arc::new(ClientCache::new());
        let threads: Vec<_> = (0..16)
            .map(|i| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    cache
                        .get_or_create(&config("key-1"), |_| {
                            std::thread::sleep(std::time::Duration::from_millis(5));
                            Ok(Handle(i))
                        })
                        .unwrap()
                })
            })
            .collect();
        let handles: Vec<_> = threads.into_iter().map(|t| t.join().unwrap()).collect();
        assert_eq!(cache.build_count(), 1);
        assert!(handles.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }
}
