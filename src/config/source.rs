//! 配置源：每次调用时拉取最新的配置快照（支持热加载）。
//!
//! Pull-based configuration sources.
//!
//! Both sources publish whole [`RelayConfig`] snapshots through `ArcSwap`, so a
//! reader either sees the previous snapshot or the next one, never a mix.
//! Candidate snapshots are validated before they are published; a broken
//! reload leaves the last good snapshot in place.

use super::RelayConfig;
use crate::{Error, ErrorContext, Result};
use arc_swap::ArcSwap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Supplies the current configuration on demand.
pub trait OptionsSource: Send + Sync {
    /// Latest validated snapshot. Callers must not cache it across calls.
    fn current(&self) -> Arc<RelayConfig>;
}

/// Programmatic source; `update` swaps in a new validated snapshot.
pub struct SharedOptions {
    inner: ArcSwap<RelayConfig>,
}

impl SharedOptions {
    pub fn new(config: RelayConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            inner: ArcSwap::from_pointee(config),
        })
    }

    pub fn update(&self, config: RelayConfig) -> Result<()> {
        config.validate()?;
        self.inner.store(Arc::new(config));
        Ok(())
    }

    /// Apply an edit to a copy of the current snapshot and publish it.
    pub fn modify<F>(&self, edit: F) -> Result<()>
    where
        F: FnOnce(&mut RelayConfig),
    {
        let mut next = RelayConfig::clone(&self.inner.load());
        edit(&mut next);
        self.update(next)
    }
}

impl OptionsSource for SharedOptions {
    fn current(&self) -> Arc<RelayConfig> {
        self.inner.load_full()
    }
}

/// YAML or JSON file source with explicit `reload`.
pub struct FileOptions {
    path: PathBuf,
    inner: ArcSwap<RelayConfig>,
}

impl FileOptions {
    /// Load and validate the file; fails if the initial snapshot is invalid.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let config = Self::read(&path)?;
        info!(
            path = %path.display(),
            providers = config.providers.len(),
            "relay configuration loaded"
        );
        Ok(Self {
            path,
            inner: ArcSwap::from_pointee(config),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-read the file and publish it if it validates.
    pub fn reload(&self) -> Result<()> {
        match Self::read(&self.path) {
            Ok(config) => {
                info!(
                    path = %self.path.display(),
                    providers = config.providers.len(),
                    "relay configuration reloaded"
                );
                self.inner.store(Arc::new(config));
                Ok(())
            }
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "configuration reload rejected; keeping previous snapshot"
                );
                Err(e)
            }
        }
    }

    fn read(path: &Path) -> Result<RelayConfig> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::configuration_with_context(
                format!("failed to read configuration: {}", e),
                ErrorContext::new()
                    .with_details(path.display().to_string())
                    .with_source("file_options"),
            )
        })?;
        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false);
        let mut config = if is_json {
            RelayConfig::from_json_str(&raw)?
        } else {
            RelayConfig::from_yaml_str(&raw)?
        };
        config.resolve_env_keys();
        config.validate()?;
        Ok(config)
    }
}

impl OptionsSource for FileOptions {
    fn current(&self) -> Arc<RelayConfig> {
        self.inner.load_full()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ApiStyle, ProviderConfig};

    fn temp_path(ext: &str) -> PathBuf {
        std::env::temp_dir().join(format!("llm-relay-{}.{}", uuid::Uuid::new_v4(), ext))
    }

    const VALID: &str = r#"
providers:
  openai:
    api_key: sk-one
    model: gpt-4o-mini
"#;

    #[test]
    fn test_shared_options_rejects_invalid_update() {
        let cfg = RelayConfig::new().with_provider(
            "openai",
            ProviderConfig::new(ApiStyle::OpenAi, "gpt-4o").with_api_key("sk-1"),
        );
        let source = SharedOptions::new(cfg).unwrap();
        let res = source.modify(|c| {
            c.providers.get_mut("openai").unwrap().request_timeout_ms = 0;
        });
        assert!(res.is_err());
        assert_eq!(source.current().provider("openai").unwrap().request_timeout_ms, 60_000);
    }

    #[test]
    fn test_file_reload_swaps_snapshot() {
        let path = temp_path("yaml");
        std::fs::write(&path, VALID).unwrap();
        let source = FileOptions::load(&path).unwrap();
        assert_eq!(source.current().provider("openai").unwrap().model, "gpt-4o-mini");

        std::fs::write(&path, VALID.replace("gpt-4o-mini", "gpt-4o")).unwrap();
        source.reload().unwrap();
        assert_eq!(source.current().provider("openai").unwrap().model, "gpt-4o");
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_broken_reload_keeps_previous_snapshot() {
        let path = temp_path("yaml");
        std::fs::write(&path, VALID).unwrap();
        let source = FileOptions::load(&path).unwrap();

        std::fs::write(&path, "providers: [not, a, map").unwrap();
        assert!(source.reload().is_err());
        assert_eq!(source.current().provider("openai").unwrap().model, "gpt-4o-mini");
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_json_file_supported() {
        let path = temp_path("json");
        std::fs::write(
            &path,
            r#"{"providers":{"gemini":{"api_style":"gemini","api_key":"g-1","model":"gemini-1.5-flash"}}}"#,
        )
        .unwrap();
        let source = FileOptions::load(&path).unwrap();
        assert_eq!(
            source.current().provider("gemini").unwrap().api_style,
            ApiStyle::Gemini
        );
        let _ = std::fs::remove_file(&path);
    }
}
