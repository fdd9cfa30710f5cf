//! Shared fixtures for integration tests.

#![allow(dead_code)]

use llm_relay::config::{ApiStyle, ProviderConfig, RelayConfig, SharedOptions};
use llm_relay::resilience::Backoff;
use llm_relay::telemetry::InMemorySink;
use llm_relay::transport::TransportFactory;
use llm_relay::RelayClient;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

/// Plain HTTP clients that ignore system proxy settings, so requests to the
/// local mock servers never leave the machine.
#[derive(Default)]
pub struct DirectTransport {
    pub requested: AtomicUsize,
}

impl TransportFactory for DirectTransport {
    fn client(&self, _provider: &str) -> llm_relay::Result<reqwest::Client> {
        self.requested.fetch_add(1, Ordering::SeqCst);
        reqwest::Client::builder()
            .no_proxy()
            .build()
            .map_err(|e| llm_relay::Error::Transport(e.into()))
    }
}

pub fn openai(endpoint: &str) -> ProviderConfig {
    ProviderConfig::new(ApiStyle::OpenAi, "gpt-4o-mini")
        .with_api_key("sk-test-key")
        .with_endpoint(endpoint)
}

pub struct Harness {
    pub client: RelayClient,
    pub options: Arc<SharedOptions>,
    pub sink: Arc<InMemorySink>,
}

pub fn harness(config: RelayConfig) -> Harness {
    let options = Arc::new(SharedOptions::new(config).expect("valid config"));
    let sink = InMemorySink::shared();
    let client = RelayClient::builder()
        .options_source(options.clone())
        .transport(Arc::new(DirectTransport::default()))
        .backoff(Backoff::new(Duration::from_millis(5), Duration::from_millis(20)))
        .event_sink(sink.clone())
        .build()
        .expect("client");
    Harness {
        client,
        options,
        sink,
    }
}

pub fn openai_chunk(text: &str) -> String {
    format!(
        "data: {}\n\n",
        serde_json::json!({ "choices": [{ "index": 0, "delta": { "content": text } }] })
    )
}

/// A server that accepts connections and never answers.
pub async fn silent_server() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });
    format!("http://{}", addr)
}

/// A server that answers one request with the given SSE frames and then stalls.
/// The receiver fires once the client closes the connection.
pub async fn stalling_sse_server(frames: Vec<String>) -> (String, oneshot::Receiver<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let (closed_tx, closed_rx) = oneshot::channel();

    tokio::spawn(async move {
        let Ok((mut socket, _)) = listener.accept().await else {
            return;
        };
        let mut request = Vec::new();
        let mut buf = [0u8; 4096];
        while !request.windows(4).any(|w| w == b"\r\n\r\n") {
            match socket.read(&mut buf).await {
                Ok(0) | Err(_) => return,
                Ok(n) => request.extend_from_slice(&buf[..n]),
            }
        }

        let mut response = String::from(
            "HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\nconnection: close\r\n\r\n",
        );
        for frame in &frames {
            response.push_str(frame);
        }
        if socket.write_all(response.as_bytes()).await.is_err() {
            return;
        }
        let _ = socket.flush().await;

        // stall until the client hangs up
        loop {
            match socket.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
        }
        let _ = closed_tx.send(());
    });

    (format!("http://{}", addr), closed_rx)
}
