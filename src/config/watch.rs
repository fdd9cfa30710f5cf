//! File watcher that drives [`FileOptions::reload`].

use super::FileOptions;
use crate::{Error, ErrorContext, Result};
use notify::{recommended_watcher, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::sync::Arc;
use tracing::{debug, warn};

/// Keeps a filesystem watch alive; dropping it stops reloading.
pub struct ConfigWatcher {
    _watcher: RecommendedWatcher,
}

impl ConfigWatcher {
    /// Watch the directory holding the configuration file. Editors often
    /// replace files by rename, so the parent is watched and events are
    /// filtered by file name.
    pub fn spawn(options: Arc<FileOptions>) -> Result<Self> {
        let path = options.path().to_path_buf();
        let file_name = path.file_name().map(|n| n.to_os_string());
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| std::path::PathBuf::from("."));

        let target = options.clone();
        let mut watcher = recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                if !matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                    return;
                }
                let touches_file = event
                    .paths
                    .iter()
                    .any(|p| p.file_name().map(|n| n.to_os_string()) == file_name);
                if touches_file {
                    debug!(kind = ?event.kind, "configuration file changed");
                    // reload logs its own rejection
                    let _ = target.reload();
                }
            }
            Err(e) => warn!(error = %e, "configuration watcher error"),
        })
        .map_err(watch_error)?;

        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .map_err(watch_error)?;

        Ok(Self { _watcher: watcher })
    }
}

fn watch_error(e: notify::Error) -> Error {
    Error::configuration_with_context(
        format!("failed to watch configuration file: {}", e),
        ErrorContext::new().with_source("config_watcher"),
    )
}
