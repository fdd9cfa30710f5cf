//! 故障转移：主 provider 失败时对备用 provider 进行一次调用。
//!
//! Primary/fallback execution for buffered calls.

use crate::routing::FailoverPolicy;
use crate::types::{ChatResponse, Message, RequestOptions};
use crate::Result;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::core::RelayClient;

impl RelayClient {
    /// Buffered call against the configured primary provider, falling back
    /// once to the configured fallback provider.
    ///
    /// Only fallbackable outcomes (see [`Error::is_fallbackable`](crate::Error::is_fallbackable))
    /// reach the fallback; caller cancellation never does. The fallback call
    /// drops any `model` override so the fallback's own model applies, along
    /// with vendor extras tagged for a different API style.
    pub async fn chat_with_failover(
        &self,
        messages: Vec<Message>,
        options: &RequestOptions,
        cancel: &CancellationToken,
    ) -> Result<ChatResponse> {
        let pair = {
            let snapshot = self.options.current();
            let pair = snapshot.failover()?.clone();
            FailoverPolicy::validate(&pair)?;
            pair
        };

        let err = match self
            .chat(&pair.primary_provider, messages.clone(), options, cancel)
            .await
        {
            Ok(response) => return Ok(response),
            Err(e) => e,
        };
        if !err.is_fallbackable() || cancel.is_cancelled() {
            return Err(err);
        }

        let fallback_style = self.options.current().provider(&pair.fallback_provider)?.api_style;
        warn!(
            primary = pair.primary_provider.as_str(),
            fallback = pair.fallback_provider.as_str(),
            code = %err.standard_code(),
            error = %err,
            "primary provider failed, trying fallback"
        );
        self.chat(
            &pair.fallback_provider,
            messages,
            &options.retargeted(fallback_style),
            cancel,
        )
        .await
    }
}
