//! 请求执行逻辑：带重试的非流式请求与单次尝试的流式请求。
//!
//! Request execution: buffered calls (retried) and streaming calls (single
//! attempt). Both run under one derived cancellation signal that merges the
//! caller's token with the provider's request timeout.

use crate::drivers::attempt_error;
use crate::error_code::StandardErrorCode;
use crate::resilience::{Attempted, RetryError, TimeoutComposer};
use crate::telemetry::{EventSink, PhaseEvent};
use crate::types::{ChatResponse, Message, RequestOptions};
use crate::{BoxStream, Error, Result};
use futures::StreamExt;
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info_span, Instrument};
use uuid::Uuid;

use super::core::{CallContext, RelayClient};

impl RelayClient {
    /// Buffered chat completion against `provider`.
    ///
    /// Retryable vendor failures are retried up to the provider's
    /// `max_retries`; cancelling `cancel` or exceeding the request timeout
    /// stops the call at the next suspension point.
    pub async fn chat(
        &self,
        provider: &str,
        messages: Vec<Message>,
        options: &RequestOptions,
        cancel: &CancellationToken,
    ) -> Result<ChatResponse> {
        let request_id = Uuid::new_v4().to_string();
        let span = info_span!("relay.chat", provider, request_id = %request_id);
        async {
            let call = self.begin(&request_id, provider, messages)?;
            self.execute_buffered(call, options, cancel).await
        }
        .instrument(span)
        .await
    }

    /// Streaming chat completion against `provider`.
    ///
    /// The returned stream is lazy and single-consumer. It is not retried:
    /// a failure after the handshake ends the stream with one error item.
    /// The request timeout covers the whole stream, and dropping the stream
    /// closes the connection. The call's outcome is recorded when the stream
    /// ends; a stream dropped before its end is recorded as cancelled.
    pub async fn chat_stream(
        &self,
        provider: &str,
        messages: Vec<Message>,
        options: &RequestOptions,
        cancel: &CancellationToken,
    ) -> Result<BoxStream<'static, String>> {
        let request_id = Uuid::new_v4().to_string();
        let span = info_span!("relay.chat_stream", provider, request_id = %request_id);
        async {
            let call = self.begin(&request_id, provider, messages)?;
            self.open_stream(call, options, cancel).await
        }
        .instrument(span)
        .await
    }

    async fn execute_buffered(
        &self,
        call: CallContext,
        options: &RequestOptions,
        cancel: &CancellationToken,
    ) -> Result<ChatResponse> {
        let started = Instant::now();
        let payload =
            call.adapter
                .prepare_request(&call.client, &call.messages, &call.config, options, false)?;
        let signal = TimeoutComposer::compose(cancel, call.config.request_timeout());

        let adapter = call.adapter.as_ref();
        let client = call.client.as_ref();
        let config = &call.config;
        let payload = &payload;
        let sink = self.sink.as_ref();
        let (request_id, provider) = (call.request_id.as_str(), call.provider.as_str());

        let outcome = self
            .retry
            .execute(
                |attempt| {
                    sink.record(PhaseEvent::Attempt {
                        request_id: request_id.to_string(),
                        provider: provider.to_string(),
                        attempt,
                    });
                    adapter.send(client, config, payload)
                },
                config.max_retries,
                |failure| adapter.classify_retryable(failure),
                signal.token(),
            )
            .await;

        let result = match outcome {
            Ok(Attempted { value, attempts }) => adapter
                .process_response(&value)
                .map(|response| (response, attempts)),
            Err(RetryError::Cancelled { .. }) => Err(signal.interruption(provider)),
            Err(RetryError::Exhausted { attempts, last }) => {
                Err(attempt_error(provider, attempts, last, true))
            }
            Err(RetryError::Rejected { attempts, last }) => {
                Err(attempt_error(provider, attempts, last, false))
            }
        };

        match result {
            Ok((response, attempts)) => {
                self.sink.record(PhaseEvent::Succeeded {
                    request_id: call.request_id.clone(),
                    provider: call.provider.clone(),
                    attempts,
                    elapsed_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                });
                Ok(response)
            }
            Err(e) => {
                self.record_failure(&call, &e);
                Err(e)
            }
        }
    }

    async fn open_stream(
        &self,
        call: CallContext,
        options: &RequestOptions,
        cancel: &CancellationToken,
    ) -> Result<BoxStream<'static, String>> {
        let started = Instant::now();
        let payload =
            call.adapter
                .prepare_request(&call.client, &call.messages, &call.config, options, true)?;
        let signal = TimeoutComposer::compose(cancel, call.config.request_timeout());

        self.sink.record(PhaseEvent::Attempt {
            request_id: call.request_id.clone(),
            provider: call.provider.clone(),
            attempt: 1,
        });
        match call
            .adapter
            .stream_chunks(&call.client, &call.config, &payload, signal)
            .await
        {
            Ok(stream) => {
                let outcome = StreamOutcome {
                    sink: self.sink.clone(),
                    request_id: call.request_id.clone(),
                    provider: call.provider.clone(),
                    started,
                    settled: false,
                };
                Ok(outcome.watch(stream))
            }
            Err(e) => {
                self.record_failure(&call, &e);
                Err(e)
            }
        }
    }

    fn record_failure(&self, call: &CallContext, err: &Error) {
        self.sink.record(PhaseEvent::Failed {
            request_id: call.request_id.clone(),
            provider: call.provider.clone(),
            code: err.standard_code().name(),
            attempts: err.attempts(),
        });
    }
}

/// Records a streaming call's final phase once its stream ends.
struct StreamOutcome {
    sink: Arc<dyn EventSink>,
    request_id: String,
    provider: String,
    started: Instant,
    settled: bool,
}

impl StreamOutcome {
    fn watch(self, inner: BoxStream<'static, String>) -> BoxStream<'static, String> {
        Box::pin(async_stream::stream! {
            let mut outcome = self;
            let mut inner = inner;
            while let Some(item) = inner.next().await {
                if let Err(e) = &item {
                    outcome.failed(e.standard_code().name());
                }
                yield item;
            }
            outcome.succeeded();
        })
    }

    fn succeeded(&mut self) {
        if self.settled {
            return;
        }
        self.settled = true;
        self.sink.record(PhaseEvent::Succeeded {
            request_id: self.request_id.clone(),
            provider: self.provider.clone(),
            attempts: 1,
            elapsed_ms: u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX),
        });
    }

    fn failed(&mut self, code: &'static str) {
        if self.settled {
            return;
        }
        self.settled = true;
        self.sink.record(PhaseEvent::Failed {
            request_id: self.request_id.clone(),
            provider: self.provider.clone(),
            code,
            attempts: Some(1),
        });
    }
}

impl Drop for StreamOutcome {
    fn drop(&mut self) {
        // consumer walked away before the end
        self.failed(StandardErrorCode::Cancelled.name());
    }
}
