use std::sync::Arc;

use tempfile::TempDir;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use penwright::config::Config;
use penwright::error::RewriteError;
use penwright::llm::factory::DefaultBackendResolver;
use penwright::llm::types::{BackendKind, RewriteRequest, Style};
use penwright::settings::{MemorySecretStore, SecretStore};
use penwright::worker::WorkerSupervisor;

use super::engine_harness::{Harness, RecordingObserver, harness_with, test_config};

fn cloud_harness(server: &MockServer, configure: impl FnOnce(&mut Config)) -> Harness {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(&dir);
    config.openai.base_url = server.uri();
    config.anthropic.base_url = server.uri();
    config.gemini.base_url = server.uri();
    configure(&mut config);

    let secrets = MemorySecretStore::new();
    for kind in [BackendKind::OpenAi, BackendKind::Anthropic, BackendKind::Gemini] {
        secrets.set(kind, "test-key".into());
    }
    let resolver = Arc::new(DefaultBackendResolver::new(
        Arc::new(config.clone()),
        Arc::new(secrets),
        Arc::new(WorkerSupervisor::new(config.supervisor_config())),
        5,
    ));
    harness_with(config, resolver, dir)
}

fn hi_there() -> RewriteRequest {
    RewriteRequest::new("hi there", Style::Proofread)
}

fn sse(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("content-type", "text/event-stream")
        .set_body_string(body.to_string())
}

#[tokio::test]
async fn openai_non_streaming_success_is_cached() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "choices": [{"message": {"content": "Hello"}, "finish_reason": "stop"}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let fx = cloud_harness(&server, |config| config.streaming = false);
    let observer = RecordingObserver::new();
    fx.engine.rewrite(hi_there(), observer.clone());

    assert_eq!(observer.wait_complete().await, Ok("Hello".into()));
    let key = fx.key_for(&hi_there());
    assert_eq!(fx.cached(&key).await.as_deref(), Some("Hello"));
}

#[tokio::test]
async fn openai_streamed_snapshots_assemble_hello() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(sse(concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"H\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"He\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hello\"}}]}\n\n",
            "data: [DONE]\n\n",
        )))
        .mount(&server)
        .await;

    let fx = cloud_harness(&server, |_| {});
    let observer = RecordingObserver::new();
    fx.engine.rewrite(hi_there(), observer.clone());

    assert_eq!(observer.wait_complete().await, Ok("Hello".into()));
    let partials = observer.partials();
    assert_eq!(partials.last().map(String::as_str), Some("Hello"));
    assert!(partials.iter().all(|p| "Hello".starts_with(p.as_str())));
}

#[tokio::test]
async fn rate_limit_carries_retry_after() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("retry-after", "7")
                .set_body_string("{\"error\":{\"message\":\"slow down\"}}"),
        )
        .mount(&server)
        .await;

    let fx = cloud_harness(&server, |_| {});
    let observer = RecordingObserver::new();
    fx.engine.rewrite(hi_there(), observer.clone());
    assert_eq!(
        observer.wait_complete().await,
        Err(RewriteError::RateLimited {
            backend: "OpenAI".into(),
            retry_after_secs: Some(7),
        })
    );
}

#[tokio::test]
async fn server_error_falls_back_to_cached_value() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(500).set_body_string("{\"message\":\"upstream exploded\"}"),
        )
        .mount(&server)
        .await;

    let fx = cloud_harness(&server, |_| {});
    let observer = RecordingObserver::new();
    fx.engine.rewrite(hi_there(), observer.clone());
    assert_eq!(
        observer.wait_complete().await,
        Err(RewriteError::Server {
            status: 500,
            message: Some("upstream exploded".into()),
        })
    );

    fx.cache
        .insert(fx.key_for(&hi_there()), "Hello (cached)".into())
        .await;
    let observer = RecordingObserver::new();
    fx.engine.rewrite(hi_there(), observer.clone());
    assert_eq!(observer.wait_complete().await, Ok("Hello (cached)".into()));
}

#[tokio::test]
async fn anthropic_deltas_are_appended() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(header("x-api-key", "test-key"))
        .respond_with(sse(concat!(
            "event: message_start\n",
            "data: {\"type\":\"message_start\",\"message\":{}}\n\n",
            "event: content_block_delta\n",
            "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"Hel\"}}\n\n",
            "event: content_block_delta\n",
            "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"lo\"}}\n\n",
            "event: message_stop\n",
            "data: {\"type\":\"message_stop\"}\n\n",
        )))
        .mount(&server)
        .await;

    let fx = cloud_harness(&server, |config| {
        config.default_backend = BackendKind::Anthropic;
    });
    let observer = RecordingObserver::new();
    fx.engine.rewrite(hi_there(), observer.clone());
    assert_eq!(observer.wait_complete().await, Ok("Hello".into()));
}

#[tokio::test]
async fn gemini_non_streaming_reads_candidate_parts() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/models/gemini-2.0-flash:generateContent"))
        .and(header("x-goog-api-key", "test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "candidates": [{
                "content": {"parts": [{"text": "Hel"}, {"text": "lo"}]},
                "finishReason": "STOP"
            }]
        })))
        .mount(&server)
        .await;

    let fx = cloud_harness(&server, |config| {
        config.default_backend = BackendKind::Gemini;
        config.streaming = false;
    });
    let observer = RecordingObserver::new();
    fx.engine.rewrite(hi_there(), observer.clone());
    assert_eq!(observer.wait_complete().await, Ok("Hello".into()));
}
