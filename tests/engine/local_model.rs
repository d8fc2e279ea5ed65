use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use penwright::cache::OfflineCache;
use penwright::config::Config;
use penwright::engine::{Engine, EngineParts};
use penwright::error::RewriteError;
use penwright::history::NullHistory;
use penwright::llm::factory::DefaultBackendResolver;
use penwright::llm::types::{BackendKind, ImageAttachment, RewriteRequest, Style};
use penwright::settings::MemorySecretStore;
use penwright::worker::{WorkerPhase, WorkerSupervisor};

use super::engine_harness::{RecordingObserver, WAIT, test_config};

const HAPPY: &str = r#"while IFS= read -r line; do
  case "$line" in
    *'"ping"'*) echo '{"status":"ok"}' ;;
    *'"generate"'*) echo '{"status":"ok","output":"Hello from the local model"}' ;;
    *'"shutdown"'*) exit 0 ;;
  esac
done
"#;

const OOM: &str = r#"while IFS= read -r line; do
  case "$line" in
    *'"ping"'*) echo '{"status":"ok"}' ;;
    *'"generate"'*) echo 'OOM killed' >&2; exit 137 ;;
  esac
done
"#;

const SLOW: &str = r#"while IFS= read -r line; do
  case "$line" in
    *'"ping"'*) echo '{"status":"ok"}' ;;
    *'"generate"'*) sleep 5; echo '{"status":"ok","output":"too late"}' ;;
    *'"shutdown"'*) exit 0 ;;
  esac
done
"#;

struct LocalFixture {
    engine: Engine,
    supervisor: Arc<WorkerSupervisor>,
    model: PathBuf,
    _dir: TempDir,
}

fn local_fixture(script: &str, keep_loaded: bool) -> LocalFixture {
    let dir = TempDir::new().unwrap();
    let script_path = dir.path().join("worker.sh");
    std::fs::write(&script_path, script).unwrap();
    let model = dir.path().join("tiny.gguf");
    std::fs::write(&model, b"weights").unwrap();

    let mut config: Config = test_config(&dir);
    config.default_backend = BackendKind::Local;
    config.keep_local_model_loaded = keep_loaded;
    config.local.worker_command = "/bin/sh".into();
    config.local.worker_args = vec![script_path.display().to_string()];
    config.local.model_path = Some(model.display().to_string());
    config.local.startup_timeout_secs = 5;

    let supervisor = Arc::new(WorkerSupervisor::new(config.supervisor_config()));
    let cache = OfflineCache::new(config.cache_path());
    let settings = Arc::new(config);
    let resolver = Arc::new(DefaultBackendResolver::new(
        settings.clone(),
        Arc::new(MemorySecretStore::new()),
        Arc::clone(&supervisor),
        30,
    ));
    let engine = Engine::spawn(EngineParts {
        settings,
        resolver,
        supervisor: Arc::clone(&supervisor),
        cache,
        history: Arc::new(NullHistory),
    });
    LocalFixture {
        engine,
        supervisor,
        model,
        _dir: dir,
    }
}

async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

fn request() -> RewriteRequest {
    RewriteRequest::new("hi there", Style::Proofread)
}

#[tokio::test]
async fn local_rewrite_unloads_worker_afterwards_by_default() {
    let fx = local_fixture(HAPPY, false);
    let observer = RecordingObserver::new();
    fx.engine.rewrite(request(), observer.clone());

    assert_eq!(
        observer.wait_complete().await,
        Ok("Hello from the local model".into())
    );
    assert!(eventually(|| fx.supervisor.loaded_model().is_none()).await);
    assert_eq!(fx.supervisor.phase(), WorkerPhase::Stopped);
}

#[tokio::test]
async fn keep_loaded_leaves_worker_running() {
    let fx = local_fixture(HAPPY, true);
    let observer = RecordingObserver::new();
    fx.engine.rewrite(request(), observer.clone());
    assert!(observer.wait_complete().await.is_ok());

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(fx.supervisor.loaded_model(), Some(fx.model.clone()));
    let status = fx.engine.local_model_status().borrow().clone();
    assert!(status.loaded);
    assert_eq!(status.model, Some(fx.model.clone()));
}

#[tokio::test]
async fn worker_crash_surfaces_last_stderr_line() {
    let fx = local_fixture(OOM, true);
    let observer = RecordingObserver::new();
    fx.engine.rewrite(request(), observer.clone());

    let result = observer.wait_complete().await;
    assert!(
        matches!(&result, Err(RewriteError::LocalUnavailable(message)) if message.contains("OOM killed")),
        "{result:?}"
    );
}

#[tokio::test]
async fn images_are_rejected_for_the_local_backend() {
    let fx = local_fixture(HAPPY, true);
    let observer = RecordingObserver::new();
    fx.engine.rewrite(
        request().with_attachment(ImageAttachment::new("a.png", "image/png", vec![1, 2, 3])),
        observer.clone(),
    );
    assert_eq!(
        observer.wait_complete().await,
        Err(RewriteError::AttachmentsUnsupported {
            backend: "Local model".into()
        })
    );
}

#[tokio::test]
async fn load_and_unload_publish_status() {
    let fx = local_fixture(HAPPY, true);
    let mut status = fx.engine.local_model_status();

    fx.engine.load_local_model().await.unwrap();
    let loaded = tokio::time::timeout(WAIT, status.wait_for(|s| s.loaded && !s.busy))
        .await
        .expect("status update")
        .unwrap()
        .clone();
    assert_eq!(loaded.model, Some(fx.model.clone()));

    fx.engine.unload_local_model().await.unwrap();
    tokio::time::timeout(WAIT, status.wait_for(|s| !s.loaded && !s.busy))
        .await
        .expect("status update")
        .unwrap();
    assert!(fx.supervisor.loaded_model().is_none());
}

#[tokio::test]
async fn load_is_refused_while_a_rewrite_runs() {
    let fx = local_fixture(SLOW, true);
    let observer = RecordingObserver::new();
    fx.engine.rewrite(request(), observer.clone());
    assert!(eventually(|| fx.supervisor.phase() == WorkerPhase::Busy).await);

    assert!(matches!(
        fx.engine.load_local_model().await,
        Err(RewriteError::OperationInProgress(_))
    ));
    assert!(matches!(
        fx.engine.unload_local_model().await,
        Err(RewriteError::OperationInProgress(_))
    ));

    fx.engine.cancel().await;
    assert!(eventually(|| fx.supervisor.loaded_model().is_none()).await);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(observer.completion().is_none());
}

#[tokio::test]
async fn load_without_configured_model_fails() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let supervisor = Arc::new(WorkerSupervisor::new(config.supervisor_config()));
    let settings = Arc::new(config);
    let engine = Engine::spawn(EngineParts {
        settings: settings.clone(),
        resolver: Arc::new(DefaultBackendResolver::new(
            settings.clone(),
            Arc::new(MemorySecretStore::new()),
            Arc::clone(&supervisor),
            30,
        )),
        supervisor,
        cache: OfflineCache::new(settings.cache_path()),
        history: Arc::new(NullHistory),
    });
    assert!(matches!(
        engine.load_local_model().await,
        Err(RewriteError::LocalUnavailable(_))
    ));
}
