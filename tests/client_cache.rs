//! Vendor client caching under configuration changes.

mod common;

use common::{harness, openai};
use llm_relay::cache::ClientCache;
use llm_relay::config::RelayConfig;
use llm_relay::{Message, RequestOptions};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[test]
fn test_handle_is_reference_stable_until_fingerprint_changes() {
    let cache: ClientCache<String> = ClientCache::new();
    let config = openai("https://one.example/v1");

    let first = cache.get_or_create(&config, |c| Ok(c.model.clone())).unwrap();
    let second = cache.get_or_create(&config, |_| panic!("must not rebuild")).unwrap();
    assert!(Arc::ptr_eq(&first, &second));

    // same-length key rotation keeps the handle
    let rotated = config.clone().with_api_key("sk-test-kez");
    let third = cache.get_or_create(&rotated, |_| panic!("must not rebuild")).unwrap();
    assert!(Arc::ptr_eq(&first, &third));

    let moved = config.clone().with_endpoint("https://two.example/v1");
    let fourth = cache.get_or_create(&moved, |c| Ok(c.model.clone())).unwrap();
    assert!(!Arc::ptr_eq(&first, &fourth));
    assert_eq!(cache.build_count(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_misses_build_once() {
    let cache = Arc::new(ClientCache::<usize>::new());
    let builds = Arc::new(AtomicUsize::new(0));
    let config = openai("https://one.example/v1");

    let tasks: Vec<_> = (0..32)
        .map(|_| {
            let cache = cache.clone();
            let builds = builds.clone();
            let config = config.clone();
            tokio::spawn(async move {
                cache
                    .get_or_create(&config, |_| {
                        std::thread::sleep(std::time::Duration::from_millis(5));
                        Ok(builds.fetch_add(1, Ordering::SeqCst))
                    })
                    .unwrap()
            })
        })
        .collect();

    let mut handles = Vec::new();
    for task in tasks {
        handles.push(task.await.unwrap());
    }
    assert_eq!(builds.load(Ordering::SeqCst), 1);
    assert!(handles.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
}

#[tokio::test]
async fn test_rotated_key_is_used_without_rebuild() {
    let mut server = mockito::Server::new_async().await;
    let ok = r#"{"model":"m","choices":[{"message":{"content":"ok"},"finish_reason":"stop"}]}"#;
    let old_key = server
        .mock("POST", "/chat/completions")
        .match_header("authorization", "Bearer sk-test-key")
        .with_status(200)
        .with_body(ok)
        .expect(1)
        .create_async()
        .await;
    let new_key = server
        .mock("POST", "/chat/completions")
        .match_header("authorization", "Bearer sk-test-kez")
        .with_status(200)
        .with_body(ok)
        .expect(1)
        .create_async()
        .await;

    let h = harness(RelayConfig::new().with_provider("openai", openai(&server.url())));
    let cancel = CancellationToken::new();
    let options = RequestOptions::new();

    h.client
        .chat("openai", vec![Message::user("Hi")], &options, &cancel)
        .await
        .unwrap();
    h.options
        .modify(|c| {
            let p = c.providers.get_mut("openai").unwrap();
            p.api_key = "sk-test-kez".into();
        })
        .unwrap();
    h.client
        .chat("openai", vec![Message::user("Hi")], &options, &cancel)
        .await
        .unwrap();

    old_key.assert_async().await;
    new_key.assert_async().await;
    assert_eq!(h.client.client_builds("openai"), 1);

    h.options
        .modify(|c| {
            let p = c.providers.get_mut("openai").unwrap();
            p.endpoint = Some(format!("{}/", server.url()));
            p.api_key = "sk-much-longer-key".into();
        })
        .unwrap();
    let _ = h
        .client
        .chat("openai", vec![Message::user("Hi")], &options, &cancel)
        .await;
    assert_eq!(h.client.client_builds("openai"), 2);
}
