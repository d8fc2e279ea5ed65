use penwright::llm::types::{RewriteRequest, Sampling, Style};

use super::engine_harness::{
    Observed, RecordingObserver, ScriptedBackend, harness, harness_configured, partial, sleep_ms,
};

#[tokio::test]
async fn cumulative_snapshots_end_at_final_text() {
    let backend = ScriptedBackend::new(
        vec![partial("H"), partial("He"), partial("Hello")],
        Ok("Hello".into()),
    );
    let fx = harness(vec![backend]);
    let observer = RecordingObserver::new();
    fx.engine
        .rewrite(RewriteRequest::new("hi there", Style::Proofread), observer.clone());

    assert_eq!(observer.wait_complete().await, Ok("Hello".into()));
    let partials = observer.partials();
    assert_eq!(partials.last().map(String::as_str), Some("Hello"));
    assert!(partials.len() <= 3);
}

#[tokio::test]
async fn bursts_are_coalesced_without_losing_the_last_value() {
    let steps: Vec<_> = (1..=200).map(|n| partial(&"x".repeat(n))).collect();
    let backend = ScriptedBackend::new(steps, Ok("x".repeat(200)));
    let fx = harness(vec![backend]);
    let observer = RecordingObserver::new();
    fx.engine
        .rewrite(RewriteRequest::new("x", Style::Rewrite), observer.clone());

    observer.wait_complete().await;
    let partials = observer.partials();
    assert!(partials.len() < 200, "{} partials delivered", partials.len());
    assert_eq!(partials.last().map(String::len), Some(200));
}

#[tokio::test]
async fn partials_never_shrink_and_precede_completion() {
    let backend = ScriptedBackend::new(
        vec![
            partial("The"),
            sleep_ms(50),
            partial("The quick"),
            sleep_ms(50),
            partial("The quick fox"),
        ],
        Ok("The quick fox".into()),
    );
    let fx = harness(vec![backend]);
    let observer = RecordingObserver::new();
    fx.engine
        .rewrite(RewriteRequest::new("the quick fox", Style::Proofread), observer.clone());
    observer.wait_complete().await;

    let partials = observer.partials();
    assert!(partials.len() >= 2, "slow stream should flush between steps");
    assert!(partials.windows(2).all(|pair| pair[1].starts_with(&pair[0])));
    let events = observer.events();
    assert!(matches!(events.last(), Some(Observed::Complete(_))));
}

#[tokio::test]
async fn dispatch_honours_streaming_setting_and_prompt_contract() {
    let backend = ScriptedBackend::ok("ok");
    let fx = harness_configured(|config| config.streaming = false, vec![backend.clone()]);
    let observer = RecordingObserver::new();
    let request = RewriteRequest::new("fix me", Style::Concise).with_aggressiveness(1.0);
    fx.engine.rewrite(request, observer.clone());
    observer.wait_complete().await;

    let sent = backend.requests();
    assert_eq!(sent.len(), 1);
    assert!(!sent[0].stream);
    assert!(sent[0].user_text.contains("fix me"));
    assert_ne!(sent[0].user_text, "fix me");
    assert!(!sent[0].system_prompt.is_empty());
    assert!(matches!(sent[0].sampling, Sampling::Temperature(t) if (t - 1.0).abs() < 1e-9));
}

#[tokio::test]
async fn request_level_streaming_opt_out_is_respected() {
    let backend = ScriptedBackend::ok("ok");
    let fx = harness(vec![backend.clone()]);
    let observer = RecordingObserver::new();
    fx.engine.rewrite(
        RewriteRequest::new("x", Style::Proofread).with_streaming(false),
        observer.clone(),
    );
    observer.wait_complete().await;
    assert!(!backend.requests()[0].stream);
}

#[tokio::test]
async fn new_request_uses_configured_aggressiveness() {
    let backend = ScriptedBackend::ok("ok");
    let fx = harness_configured(|config| config.aggressiveness = 0.25, vec![backend.clone()]);
    let request = fx.engine.new_request("x", Style::Proofread);
    assert!((request.aggressiveness() - 0.25).abs() < f64::EPSILON);

    let observer = RecordingObserver::new();
    fx.engine.rewrite(request, observer.clone());
    observer.wait_complete().await;
    assert!(matches!(
        backend.requests()[0].sampling,
        Sampling::Temperature(t) if (t - 0.4).abs() < 1e-9
    ));
}
