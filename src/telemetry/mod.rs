//! 遥测模块：请求管线各阶段的结构化事件与日志初始化。
//!
//! Pipeline telemetry.
//!
//! Every call through [`RelayClient`](crate::client::RelayClient) reports one
//! [`PhaseEvent`] per phase to an [`EventSink`]. Sinks are synchronous and must
//! not block; the default [`TracingSink`] forwards events to `tracing`.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`PhaseEvent`] | Typed event per pipeline phase |
//! | [`EventSink`] | Trait for event destinations |
//! | [`TracingSink`] | Default sink, emits `tracing` events |
//! | [`NoopSink`] | Discards everything |
//! | [`InMemorySink`] | Collects events for tests |

use serde::Serialize;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// One observable step of a single call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum PhaseEvent {
    Validated {
        request_id: String,
        provider: String,
        messages: usize,
        bytes: usize,
    },
    Admitted {
        request_id: String,
        provider: String,
    },
    /// Refused before any vendor I/O (bad input or rate limit).
    Rejected {
        request_id: String,
        provider: String,
        code: &'static str,
    },
    Attempt {
        request_id: String,
        provider: String,
        attempt: u32,
    },
    Succeeded {
        request_id: String,
        provider: String,
        attempts: u32,
        elapsed_ms: u64,
    },
    Failed {
        request_id: String,
        provider: String,
        code: &'static str,
        attempts: Option<u32>,
    },
}

impl PhaseEvent {
    pub fn request_id(&self) -> &str {
        match self {
            PhaseEvent::Validated { request_id, .. }
            | PhaseEvent::Admitted { request_id, .. }
            | PhaseEvent::Rejected { request_id, .. }
            | PhaseEvent::Attempt { request_id, .. }
            | PhaseEvent::Succeeded { request_id, .. }
            | PhaseEvent::Failed { request_id, .. } => request_id,
        }
    }

    pub fn provider(&self) -> &str {
        match self {
            PhaseEvent::Validated { provider, .. }
            | PhaseEvent::Admitted { provider, .. }
            | PhaseEvent::Rejected { provider, .. }
            | PhaseEvent::Attempt { provider, .. }
            | PhaseEvent::Succeeded { provider, .. }
            | PhaseEvent::Failed { provider, .. } => provider,
        }
    }

    /// Short phase label, matching the serialized `phase` tag.
    pub fn phase(&self) -> &'static str {
        match self {
            PhaseEvent::Validated { .. } => "validated",
            PhaseEvent::Admitted { .. } => "admitted",
            PhaseEvent::Rejected { .. } => "rejected",
            PhaseEvent::Attempt { .. } => "attempt",
            PhaseEvent::Succeeded { .. } => "succeeded",
            PhaseEvent::Failed { .. } => "failed",
        }
    }
}

/// Destination for pipeline events.
///
/// Called inline on the request path, so implementations should hand off
/// anything slow.
pub trait EventSink: Send + Sync {
    fn record(&self, event: PhaseEvent);
}

/// Forwards events to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn record(&self, event: PhaseEvent) {
        match &event {
            PhaseEvent::Validated {
                request_id,
                provider,
                messages,
                bytes,
            } => debug!(%request_id, %provider, messages, bytes, "request validated"),
            PhaseEvent::Admitted {
                request_id,
                provider,
            } => debug!(%request_id, %provider, "request admitted"),
            PhaseEvent::Rejected {
                request_id,
                provider,
                code,
            } => warn!(%request_id, %provider, code, "request rejected"),
            PhaseEvent::Attempt {
                request_id,
                provider,
                attempt,
            } => debug!(%request_id, %provider, attempt, "vendor attempt"),
            PhaseEvent::Succeeded {
                request_id,
                provider,
                attempts,
                elapsed_ms,
            } => info!(%request_id, %provider, attempts, elapsed_ms, "request succeeded"),
            PhaseEvent::Failed {
                request_id,
                provider,
                code,
                attempts,
            } => warn!(%request_id, %provider, code, ?attempts, "request failed"),
        }
    }
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl EventSink for NoopSink {
    fn record(&self, _event: PhaseEvent) {}
}

/// In-memory sink for testing.
#[derive(Debug, Default)]
pub struct InMemorySink {
    events: Mutex<Vec<PhaseEvent>>,
}

impl InMemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn events(&self) -> Vec<PhaseEvent> {
        self.lock().clone()
    }

    /// Phase labels in arrival order.
    pub fn phases(&self) -> Vec<&'static str> {
        self.lock().iter().map(PhaseEvent::phase).collect()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<PhaseEvent>> {
        self.events.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl EventSink for InMemorySink {
    fn record(&self, event: PhaseEvent) {
        self.lock().push(event);
    }
}

/// Install a `fmt` subscriber filtered by `RUST_LOG` (default `info`).
///
/// Safe to call more than once; returns `false` when a global subscriber was
/// already set.
pub fn init_logging() -> bool {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attempt(n: u32) -> PhaseEvent {
        PhaseEvent::Attempt {
            request_id: "req-1".into(),
            provider: "openai".into(),
            attempt: n,
        }
    }

    #[test]
    fn test_in_memory_sink_keeps_order() {
        let sink = InMemorySink::new();
        sink.record(attempt(1));
        sink.record(attempt(2));
        assert_eq!(sink.phases(), vec!["attempt", "attempt"]);
        assert_eq!(sink.events()[1], attempt(2));
        sink.clear();
        assert!(sink.is_empty());
    }

    #[test]
    fn test_event_serializes_with_phase_tag() {
        let json = serde_json::to_value(attempt(3)).unwrap();
        assert_eq!(json["phase"], "attempt");
        assert_eq!(json["attempt"], 3);
        assert_eq!(attempt(3).request_id(), "req-1");
        assert_eq!(attempt(3).provider(), "openai");
    }

    #[test]
    fn test_init_logging_is_idempotent() {
        init_logging();
        assert!(!init_logging());
    }
}
