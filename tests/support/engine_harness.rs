#![allow(dead_code)]

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tempfile::TempDir;
use tokio::sync::Notify;

use penwright::cache::{CacheKey, OfflineCache};
use penwright::cache::store::DEFAULT_CAPACITY;
use penwright::config::Config;
use penwright::engine::{Engine, EngineParts, RequestId, RewriteObserver};
use penwright::error::{BackendResult, RewriteError};
use penwright::history::MemoryHistory;
use penwright::llm::factory::BackendResolver;
use penwright::llm::traits::{Backend, BackendCapabilities, PartialSink};
use penwright::llm::types::{BackendKind, BackendRequest, RewriteRequest};
use penwright::settings::SettingsProvider;
use penwright::worker::WorkerSupervisor;

pub const WAIT: Duration = Duration::from_secs(2);

// ── Scripted backend ────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum Step {
    /// Report this accumulated text.
    Partial(String),
    Sleep(Duration),
}

pub fn partial(text: &str) -> Step {
    Step::Partial(text.to_string())
}

pub fn sleep_ms(ms: u64) -> Step {
    Step::Sleep(Duration::from_millis(ms))
}

pub struct ScriptedBackend {
    streaming: bool,
    steps: Vec<Step>,
    outcome: BackendResult,
    requests: Mutex<Vec<BackendRequest>>,
}

impl ScriptedBackend {
    pub fn new(steps: Vec<Step>, outcome: BackendResult) -> Arc<Self> {
        Arc::new(Self {
            streaming: true,
            steps,
            outcome,
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn ok(text: &str) -> Arc<Self> {
        Self::new(Vec::new(), Ok(text.to_string()))
    }

    pub fn failing(error: RewriteError) -> Arc<Self> {
        Self::new(Vec::new(), Err(error))
    }

    pub fn requests(&self) -> Vec<BackendRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl Backend for ScriptedBackend {
    fn name(&self) -> &str {
        "OpenAI"
    }

    fn kind(&self) -> BackendKind {
        BackendKind::OpenAi
    }

    fn model(&self) -> &str {
        "gpt-4o-mini"
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            streaming: self.streaming,
            vision: true,
        }
    }

    fn generate<'a>(
        &'a self,
        request: &'a BackendRequest,
        on_partial: PartialSink<'a>,
    ) -> Pin<Box<dyn Future<Output = BackendResult> + Send + 'a>> {
        Box::pin(async move {
            self.requests.lock().unwrap().push(request.clone());
            for step in &self.steps {
                match step {
                    Step::Partial(text) => on_partial(text),
                    Step::Sleep(duration) => tokio::time::sleep(*duration).await,
                }
            }
            self.outcome.clone()
        })
    }
}

/// Hands out one scripted backend per resolution, in order.
pub struct ScriptedResolver {
    queue: Mutex<VecDeque<Arc<ScriptedBackend>>>,
}

impl ScriptedResolver {
    pub fn new(backends: Vec<Arc<ScriptedBackend>>) -> Arc<Self> {
        Arc::new(Self {
            queue: Mutex::new(backends.into()),
        })
    }
}

impl BackendResolver for ScriptedResolver {
    fn resolve(&self, kind: BackendKind) -> Result<Arc<dyn Backend>, RewriteError> {
        match self.queue.lock().unwrap().pop_front() {
            Some(backend) => Ok(backend),
            None => Err(RewriteError::MissingCredential {
                backend: kind.label().to_string(),
            }),
        }
    }
}

// ── Recording observer ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observed {
    Partial(String),
    Complete(BackendResult),
}

#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<(RequestId, Observed)>>,
    completed: Notify,
}

impl RecordingObserver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<Observed> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|(_, event)| event.clone())
            .collect()
    }

    pub fn ids(&self) -> Vec<RequestId> {
        self.events.lock().unwrap().iter().map(|(id, _)| *id).collect()
    }

    pub fn partials(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Observed::Partial(text) => Some(text),
                Observed::Complete(_) => None,
            })
            .collect()
    }

    pub fn completion(&self) -> Option<BackendResult> {
        self.events().into_iter().find_map(|event| match event {
            Observed::Complete(result) => Some(result),
            Observed::Partial(_) => None,
        })
    }

    pub async fn wait_complete(&self) -> BackendResult {
        if let Some(result) = self.completion() {
            return result;
        }
        tokio::time::timeout(WAIT, self.completed.notified())
            .await
            .expect("rewrite did not complete in time");
        self.completion().expect("completion recorded")
    }
}

impl RewriteObserver for RecordingObserver {
    fn on_partial(&self, id: RequestId, text: &str) {
        self.events
            .lock()
            .unwrap()
            .push((id, Observed::Partial(text.to_string())));
    }

    fn on_complete(&self, id: RequestId, result: BackendResult) {
        self.events
            .lock()
            .unwrap()
            .push((id, Observed::Complete(result)));
        self.completed.notify_one();
    }
}

// ── Engine fixture ──────────────────────────────────────────────────────────

pub struct Harness {
    pub engine: Engine,
    pub cache: OfflineCache,
    pub history: Arc<MemoryHistory>,
    pub supervisor: Arc<WorkerSupervisor>,
    pub config: Arc<Config>,
    pub dir: TempDir,
}

pub fn test_config(dir: &TempDir) -> Config {
    Config {
        data_dir: dir.path().to_path_buf(),
        config_path: dir.path().join("config.toml"),
        ..Config::default()
    }
}

pub fn harness_with(config: Config, resolver: Arc<dyn BackendResolver>, dir: TempDir) -> Harness {
    let supervisor = Arc::new(WorkerSupervisor::new(config.supervisor_config()));
    let cache = OfflineCache::with_options(
        config.cache_path(),
        DEFAULT_CAPACITY,
        Duration::from_millis(20),
    );
    let history = Arc::new(MemoryHistory::new());
    let config = Arc::new(config);
    let engine = Engine::spawn(EngineParts {
        settings: config.clone(),
        resolver,
        supervisor: Arc::clone(&supervisor),
        cache: cache.clone(),
        history: history.clone(),
    });
    Harness {
        engine,
        cache,
        history,
        supervisor,
        config,
        dir,
    }
}

pub fn harness(backends: Vec<Arc<ScriptedBackend>>) -> Harness {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    harness_with(config, ScriptedResolver::new(backends), dir)
}

pub fn harness_configured(
    configure: impl FnOnce(&mut Config),
    backends: Vec<Arc<ScriptedBackend>>,
) -> Harness {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(&dir);
    configure(&mut config);
    harness_with(config, ScriptedResolver::new(backends), dir)
}

impl Harness {
    pub fn key_for(&self, request: &RewriteRequest) -> CacheKey {
        let kind = self.config.selected_backend();
        CacheKey::for_request(kind, &self.config.model_for(kind), request)
    }

    /// The cache write after success is fire-and-forget; poll for it.
    pub async fn cached(&self, key: &CacheKey) -> Option<String> {
        let deadline = tokio::time::Instant::now() + WAIT;
        loop {
            if let Some(value) = self.cache.get(key).await {
                return Some(value);
            }
            if tokio::time::Instant::now() >= deadline {
                return None;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}
