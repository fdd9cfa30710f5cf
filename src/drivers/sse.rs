//! Server-sent events framing and the cancellable text stream built on it.
//!
//! The decoder works on bytes so multi-byte characters split across network
//! chunks survive; frames are only decoded once complete.

use super::{StreamEventParser, StreamFrame};
use crate::error::ProviderFailure;
use crate::resilience::DerivedSignal;
use crate::{BoxStream, Error};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::collections::VecDeque;
use tracing::debug;

/// Incremental SSE frame splitter yielding joined `data:` payloads.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk; returns the payloads of every frame it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend(chunk.iter().copied().filter(|b| *b != b'\r'));

        let mut out = Vec::new();
        while let Some(idx) = find_frame_end(&self.buf) {
            let frame: Vec<u8> = self.buf.drain(..idx + 2).collect();
            if let Some(data) = frame_data(&frame[..idx]) {
                out.push(data);
            }
        }
        out
    }

    /// Flush a trailing frame that was not terminated by a blank line.
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buf);
        frame_data(&rest)
    }
}

fn find_frame_end(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\n\n")
}

fn frame_data(frame: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(frame);
    let mut data: Option<String> = None;
    for line in text.lines() {
        let Some(value) = line.strip_prefix("data:") else {
            // comments, `event:`, `id:` and `retry:` lines carry nothing we need
            continue;
        };
        let value = value.strip_prefix(' ').unwrap_or(value);
        match data.as_mut() {
            Some(existing) => {
                existing.push('\n');
                existing.push_str(value);
            }
            None => data = Some(value.to_string()),
        }
    }
    data.filter(|d| !d.trim().is_empty())
}

pub(crate) fn stream_failure(provider: &str, failure: ProviderFailure) -> Error {
    if failure.transient_transport || failure.code.transient() {
        Error::TransientProvider {
            provider: provider.to_string(),
            attempts: 1,
            failure,
        }
    } else {
        Error::FatalProvider {
            provider: provider.to_string(),
            attempts: 1,
            failure,
        }
    }
}

/// Turn a response body into a lazy, single-consumer stream of text fragments.
///
/// The body is dropped before any terminal error is yielded, and also when the
/// consumer drops the stream, which closes the underlying connection. With
/// `require_terminal`, a body that ends before the vendor's end-of-stream
/// event yields a transient error instead of completing.
pub(crate) fn text_stream<S>(
    provider: String,
    body: S,
    parse: StreamEventParser,
    require_terminal: bool,
    signal: DerivedSignal,
) -> BoxStream<'static, String>
where
    S: Stream<Item = reqwest::Result<Bytes>> + Send + 'static,
{
    Box::pin(async_stream::stream! {
        let mut body = Box::pin(body);
        let mut decoder = SseDecoder::new();
        let mut pending: VecDeque<String> = VecDeque::new();
        let mut eof = false;

        loop {
            while let Some(data) = pending.pop_front() {
                if signal.is_fired() {
                    drop(body);
                    yield Err(signal.interruption(&provider));
                    return;
                }
                match parse(&data) {
                    Ok(StreamFrame::Delta(text)) => {
                        yield Ok(text);
                    }
                    Ok(StreamFrame::Ignore) => {}
                    Ok(StreamFrame::Done) => {
                        debug!(provider = provider.as_str(), "stream completed");
                        return;
                    }
                    Err(failure) => {
                        drop(body);
                        yield Err(stream_failure(&provider, failure));
                        return;
                    }
                }
            }
            if eof {
                if require_terminal {
                    yield Err(stream_failure(&provider, ProviderFailure::truncated_stream()));
                } else {
                    debug!(provider = provider.as_str(), "stream completed at end of body");
                }
                return;
            }

            let next = tokio::select! {
                biased;
                _ = signal.fired() => None,
                chunk = body.next() => Some(chunk),
            };
            let Some(next) = next else {
                drop(body);
                yield Err(signal.interruption(&provider));
                return;
            };

            match next {
                Some(Ok(chunk)) => pending.extend(decoder.push(&chunk)),
                Some(Err(e)) => {
                    drop(body);
                    yield Err(stream_failure(&provider, ProviderFailure::transport(e)));
                    return;
                }
                None => {
                    pending.extend(decoder.finish());
                    eof = true;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::TimeoutComposer;
    use futures::stream;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn passthrough(data: &str) -> Result<StreamFrame, ProviderFailure> {
        match data {
            "[DONE]" => Ok(StreamFrame::Done),
            "boom" => Err(ProviderFailure::stream_event("overloaded_error", "busy")),
            "bad" => Err(ProviderFailure::stream_event("invalid_request_error", "nope")),
            other => Ok(StreamFrame::Delta(other.to_string())),
        }
    }

    #[test]
    fn test_frames_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data: hel").is_empty());
        assert_eq!(decoder.push(b"lo\n\ndata: world\n\n"), vec!["hello", "world"]);
    }

    #[test]
    fn test_crlf_comments_and_multiline_data() {
        let mut decoder = SseDecoder::new();
        let out = decoder.push(b": ping\r\n\r\nevent: delta\r\ndata: a\r\ndata: b\r\n\r\n");
        assert_eq!(out, vec!["a\nb"]);
    }

    #[test]
    fn test_multibyte_char_split_between_chunks() {
        let mut decoder = SseDecoder::new();
        let bytes = "data: 你好\n\n".as_bytes();
        let (head, tail) = bytes.split_at(8);
        assert!(decoder.push(head).is_empty());
        assert_eq!(decoder.push(tail), vec!["你好"]);
    }

    #[test]
    fn test_finish_flushes_unterminated_frame() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data: tail").is_empty());
        assert_eq!(decoder.finish().as_deref(), Some("tail"));
    }

    fn body_of(frames: &[&str]) -> impl Stream<Item = reqwest::Result<Bytes>> + Send + 'static {
        let chunks: Vec<reqwest::Result<Bytes>> = frames
            .iter()
            .map(|f| Ok(Bytes::from(format!("data: {}\n\n", f))))
            .collect();
        stream::iter(chunks)
    }

    #[tokio::test]
    async fn test_text_stream_stops_at_done() {
        let signal = TimeoutComposer::compose(&CancellationToken::new(), Duration::from_secs(30));
        let stream = text_stream(
            "p".into(),
            body_of(&["a", "b", "[DONE]", "never"]),
            passthrough,
            true,
            signal,
        );
        let items: Vec<_> = stream.collect().await;
        let texts: Vec<String> = items.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(texts, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_stream_error_events_are_classified() {
        let signal = TimeoutComposer::compose(&CancellationToken::new(), Duration::from_secs(30));
        let mut stream = text_stream("p".into(), body_of(&["a", "boom"]), passthrough, true, signal);
        assert_eq!(stream.next().await.unwrap().unwrap(), "a");
        let err = stream.next().await.unwrap().unwrap_err();
        assert!(matches!(err, Error::TransientProvider { attempts: 1, .. }));
        assert!(stream.next().await.is_none());

        let signal = TimeoutComposer::compose(&CancellationToken::new(), Duration::from_secs(30));
        let mut stream = text_stream("p".into(), body_of(&["bad"]), passthrough, true, signal);
        let err = stream.next().await.unwrap().unwrap_err();
        assert!(matches!(err, Error::FatalProvider { attempts: 1, .. }));
    }

    struct DropFlag(Arc<AtomicBool>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_cancel_after_three_fragments_releases_body() {
        let released = Arc::new(AtomicBool::new(false));
        let guard = DropFlag(released.clone());
        // three fragments, then a body that never yields again
        let body = body_of(&["one", "two", "three"])
            .chain(stream::pending::<reqwest::Result<Bytes>>())
            .map(move |item| {
                let _keep = &guard;
                item
            });

        let caller = CancellationToken::new();
        let signal = TimeoutComposer::compose(&caller, Duration::from_secs(30));
        let mut stream = text_stream("p".into(), body, passthrough, true, signal);

        for expected in ["one", "two", "three"] {
            assert_eq!(stream.next().await.unwrap().unwrap(), expected);
        }
        assert!(!released.load(Ordering::SeqCst));

        caller.cancel();
        let err = stream.next().await.unwrap().unwrap_err();
        assert!(matches!(err, Error::Cancelled { .. }));
        assert!(released.load(Ordering::SeqCst));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_eof_without_terminal_event() {
        let signal = TimeoutComposer::compose(&CancellationToken::new(), Duration::from_secs(30));
        let mut stream = text_stream("p".into(), body_of(&["partial"]), passthrough, true, signal);
        assert_eq!(stream.next().await.unwrap().unwrap(), "partial");
        let err = stream.next().await.unwrap().unwrap_err();
        assert!(matches!(err, Error::TransientProvider { attempts: 1, .. }));
        assert!(stream.next().await.is_none());

        // styles that end at end of body complete normally
        let signal = TimeoutComposer::compose(&CancellationToken::new(), Duration::from_secs(30));
        let stream = text_stream("p".into(), body_of(&["a", "b"]), passthrough, false, signal);
        let texts: Vec<String> = stream.map(|r| r.unwrap()).collect().await;
        assert_eq!(texts, vec!["a", "b"]);
    }
}
