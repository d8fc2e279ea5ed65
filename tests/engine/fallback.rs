use std::time::Duration;

use penwright::error::RewriteError;
use penwright::llm::types::{BackendKind, RewriteRequest, Style};

use super::engine_harness::{
    Observed, RecordingObserver, ScriptedBackend, harness, harness_configured, partial,
};

fn hi_there() -> RewriteRequest {
    RewriteRequest::new("hi there", Style::Proofread)
}

#[tokio::test]
async fn success_is_cached_under_request_key_and_recorded() {
    let fx = harness(vec![ScriptedBackend::ok("Hello")]);
    let observer = RecordingObserver::new();
    fx.engine.rewrite(hi_there(), observer.clone());

    assert_eq!(observer.wait_complete().await, Ok("Hello".into()));
    let key = fx.key_for(&hi_there());
    assert_eq!(fx.cached(&key).await.as_deref(), Some("Hello"));

    tokio::time::sleep(Duration::from_millis(50)).await;
    let history = fx.history.records();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].original, "hi there");
    assert_eq!(history[0].result, "Hello");
    assert_eq!(history[0].style, Style::Proofread);
    assert_eq!(history[0].backend, BackendKind::OpenAi);
}

#[tokio::test]
async fn network_failure_is_answered_from_cache() {
    let fx = harness(vec![ScriptedBackend::failing(RewriteError::Network(
        "connection refused".into(),
    ))]);
    fx.cache
        .insert(fx.key_for(&hi_there()), "Hello from yesterday".into())
        .await;

    let observer = RecordingObserver::new();
    fx.engine.rewrite(hi_there(), observer.clone());

    assert_eq!(observer.wait_complete().await, Ok("Hello from yesterday".into()));
    assert_eq!(
        observer.events(),
        vec![
            Observed::Partial("Hello from yesterday".into()),
            Observed::Complete(Ok("Hello from yesterday".into())),
        ]
    );
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(fx.history.records().is_empty());
}

#[tokio::test]
async fn cached_answer_replaces_buffered_partial_of_failed_request() {
    let fx = harness(vec![ScriptedBackend::new(
        vec![partial("Hel")],
        Err(RewriteError::NetworkTimeout),
    )]);
    fx.cache
        .insert(fx.key_for(&hi_there()), "Hello from yesterday".into())
        .await;

    let observer = RecordingObserver::new();
    fx.engine.rewrite(hi_there(), observer.clone());

    assert_eq!(observer.wait_complete().await, Ok("Hello from yesterday".into()));
    assert_eq!(
        observer.events(),
        vec![
            Observed::Partial("Hello from yesterday".into()),
            Observed::Complete(Ok("Hello from yesterday".into())),
        ]
    );
}

#[tokio::test]
async fn buffered_partial_is_flushed_before_uncached_failure() {
    let fx = harness(vec![ScriptedBackend::new(
        vec![partial("Hel")],
        Err(RewriteError::NetworkTimeout),
    )]);
    let observer = RecordingObserver::new();
    fx.engine.rewrite(hi_there(), observer.clone());

    assert_eq!(observer.wait_complete().await, Err(RewriteError::NetworkTimeout));
    assert_eq!(
        observer.events(),
        vec![
            Observed::Partial("Hel".into()),
            Observed::Complete(Err(RewriteError::NetworkTimeout)),
        ]
    );
}

#[tokio::test]
async fn failure_without_cache_entry_propagates() {
    let fx = harness(vec![ScriptedBackend::failing(RewriteError::Server {
        status: 500,
        message: Some("boom".into()),
    })]);
    let observer = RecordingObserver::new();
    fx.engine.rewrite(hi_there(), observer.clone());

    assert_eq!(
        observer.wait_complete().await,
        Err(RewriteError::Server {
            status: 500,
            message: Some("boom".into())
        })
    );
}

#[tokio::test]
async fn different_options_do_not_hit_the_cache() {
    let fx = harness(vec![ScriptedBackend::failing(RewriteError::NetworkTimeout)]);
    fx.cache
        .insert(fx.key_for(&hi_there()), "Hello".into())
        .await;

    let observer = RecordingObserver::new();
    fx.engine.rewrite(
        RewriteRequest::new("hi there", Style::Friendly),
        observer.clone(),
    );
    assert_eq!(observer.wait_complete().await, Err(RewriteError::NetworkTimeout));
}

#[tokio::test]
async fn disabled_cache_is_neither_read_nor_written() {
    let fx = harness_configured(
        |config| config.offline_cache_enabled = false,
        vec![
            ScriptedBackend::ok("fresh"),
            ScriptedBackend::failing(RewriteError::Network("offline".into())),
        ],
    );
    let first = RecordingObserver::new();
    fx.engine.rewrite(hi_there(), first.clone());
    assert_eq!(first.wait_complete().await, Ok("fresh".into()));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(fx.cache.get(&fx.key_for(&hi_there())).await.is_none());

    fx.cache
        .insert(fx.key_for(&hi_there()), "stale".into())
        .await;
    let second = RecordingObserver::new();
    fx.engine.rewrite(hi_there(), second.clone());
    assert_eq!(
        second.wait_complete().await,
        Err(RewriteError::Network("offline".into()))
    );
}

#[tokio::test]
async fn cancelled_failure_does_not_fall_back() {
    let fx = harness(vec![ScriptedBackend::failing(RewriteError::Cancelled)]);
    fx.cache.insert(fx.key_for(&hi_there()), "Hello".into()).await;
    let observer = RecordingObserver::new();
    fx.engine.rewrite(hi_there(), observer.clone());
    assert_eq!(observer.wait_complete().await, Err(RewriteError::Cancelled));
}

#[tokio::test]
async fn unresolvable_backend_still_falls_back_to_cache() {
    // No scripted backends: resolution fails with a missing credential.
    let fx = harness(Vec::new());
    let observer = RecordingObserver::new();
    fx.engine.rewrite(hi_there(), observer.clone());
    assert_eq!(
        observer.wait_complete().await,
        Err(RewriteError::MissingCredential {
            backend: "OpenAI".into()
        })
    );

    fx.cache.insert(fx.key_for(&hi_there()), "Hello".into()).await;
    let observer = RecordingObserver::new();
    fx.engine.rewrite(hi_there(), observer.clone());
    assert_eq!(observer.wait_complete().await, Ok("Hello".into()));
}

#[tokio::test]
async fn clear_offline_cache_removes_entries() {
    let fx = harness(vec![ScriptedBackend::ok("Hello")]);
    let observer = RecordingObserver::new();
    fx.engine.rewrite(hi_there(), observer.clone());
    observer.wait_complete().await;
    let key = fx.key_for(&hi_there());
    assert!(fx.cached(&key).await.is_some());

    fx.engine.clear_offline_cache().await.unwrap();
    assert!(fx.cache.get(&key).await.is_none());
}

#[tokio::test]
async fn shutdown_flushes_cache_snapshot() {
    let fx = harness(vec![ScriptedBackend::ok("Hello")]);
    let observer = RecordingObserver::new();
    fx.engine.rewrite(hi_there(), observer.clone());
    observer.wait_complete().await;
    let key = fx.key_for(&hi_there());
    assert!(fx.cached(&key).await.is_some());

    let path = fx.cache.path().to_path_buf();
    fx.engine.shutdown().await;
    let raw = std::fs::read_to_string(path).unwrap();
    assert!(raw.contains("Hello"));
}
