//! The engine's owner task. All orchestration state lives here and is only
//! touched from this loop; background work reports back through
//! [`Command`] messages tagged with the request they belong to.

use super::coalesce::Coalescer;
use super::identity::RequestId;
use super::observer::RewriteObserver;
use super::LocalModelStatus;
use crate::cache::{CacheKey, OfflineCache};
use crate::error::{BackendResult, RewriteError};
use crate::history::{HistoryRecord, HistorySink};
use crate::llm::cancel::{CancelHandle, spawn_rewrite};
use crate::llm::factory::BackendResolver;
use crate::llm::prompt::{compose_system_prompt, wrap_input};
use crate::llm::traits::Backend;
use crate::llm::types::{BackendKind, BackendRequest, RewriteRequest};
use crate::settings::SettingsProvider;
use crate::worker::{WorkerPhase, WorkerSupervisor};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::Instant;

pub(super) type LocalReply = oneshot::Sender<Result<(), RewriteError>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub(super) enum LocalOp {
    Load,
    Unload,
}

pub(super) enum Command {
    // ── Caller requests ─────────────────────────────────────────────────
    Rewrite {
        id: RequestId,
        request: RewriteRequest,
        observer: Arc<dyn RewriteObserver>,
    },
    Cancel {
        ack: oneshot::Sender<()>,
    },
    LocalModel {
        op: LocalOp,
        reply: LocalReply,
    },
    Shutdown {
        ack: oneshot::Sender<()>,
    },

    // ── Background completions ──────────────────────────────────────────
    LocalReady {
        id: RequestId,
        result: Result<(), RewriteError>,
    },
    Partial {
        id: RequestId,
        text: String,
    },
    Finished {
        id: RequestId,
        result: BackendResult,
    },
    FallbackChecked {
        id: RequestId,
        cached: Option<String>,
        error: RewriteError,
        /// Partial still buffered when the backend failed.
        held: Option<String>,
    },
    LocalOpFinished {
        op: LocalOp,
        result: Result<(), RewriteError>,
        reply: LocalReply,
    },
    RefreshStatus,
}

struct ActiveRequest {
    id: RequestId,
    request: RewriteRequest,
    kind: BackendKind,
    key: CacheKey,
    observer: Arc<dyn RewriteObserver>,
    /// Resolved adapter waiting for the local worker to come up.
    waiting_backend: Option<Arc<dyn Backend>>,
    preparing: Option<AbortHandle>,
    handle: Option<CancelHandle>,
}

pub(super) struct EngineActor {
    settings: Arc<dyn SettingsProvider>,
    resolver: Arc<dyn BackendResolver>,
    supervisor: Arc<WorkerSupervisor>,
    cache: OfflineCache,
    history: Arc<dyn HistorySink>,
    rx: mpsc::UnboundedReceiver<Command>,
    events: mpsc::WeakUnboundedSender<Command>,
    status: watch::Sender<LocalModelStatus>,
    coalescer: Coalescer,
    active: Option<ActiveRequest>,
    local_op: Option<LocalOp>,
    pending_unload: Option<JoinHandle<()>>,
}

impl EngineActor {
    #[allow(clippy::too_many_arguments)]
    pub(super) fn new(
        settings: Arc<dyn SettingsProvider>,
        resolver: Arc<dyn BackendResolver>,
        supervisor: Arc<WorkerSupervisor>,
        cache: OfflineCache,
        history: Arc<dyn HistorySink>,
        rx: mpsc::UnboundedReceiver<Command>,
        events: mpsc::WeakUnboundedSender<Command>,
        status: watch::Sender<LocalModelStatus>,
        coalescer: Coalescer,
    ) -> Self {
        Self {
            settings,
            resolver,
            supervisor,
            cache,
            history,
            rx,
            events,
            status,
            coalescer,
            active: None,
            local_op: None,
            pending_unload: None,
        }
    }

    pub(super) async fn run(mut self) {
        tracing::debug!("rewrite engine started");
        let mut shutdown_ack = None;
        loop {
            let deadline = self.coalescer.deadline();
            let command = tokio::select! {
                command = self.rx.recv() => command,
                () = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)),
                    if deadline.is_some() =>
                {
                    self.flush_partial();
                    continue;
                }
            };
            match command {
                Some(Command::Shutdown { ack }) => {
                    shutdown_ack = Some(ack);
                    break;
                }
                Some(command) => self.handle(command),
                None => break,
            }
        }

        self.cancel_active();
        if let Some(unload) = self.pending_unload.take() {
            let _ = unload.await;
        }
        if let Err(error) = self.cache.flush().await {
            tracing::warn!(%error, "failed to flush offline cache on shutdown");
        }
        tracing::debug!("rewrite engine stopped");
        if let Some(ack) = shutdown_ack {
            let _ = ack.send(());
        }
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Rewrite {
                id,
                request,
                observer,
            } => self.start(id, request, observer),
            Command::Cancel { ack } => {
                self.cancel_active();
                let _ = ack.send(());
            }
            Command::LocalModel { op, reply } => self.start_local_op(op, reply),
            Command::LocalReady { id, result } => self.on_local_ready(id, result),
            Command::Partial { id, text } => {
                if self.is_active(id) {
                    self.coalescer.push(text, Instant::now());
                }
            }
            Command::Finished { id, result } => self.on_finished(id, result),
            Command::FallbackChecked {
                id,
                cached,
                error,
                held,
            } => self.on_fallback_checked(id, cached, error, held),
            Command::LocalOpFinished { op, result, reply } => {
                self.local_op = None;
                match &result {
                    Ok(()) => tracing::info!(%op, "local model {op} finished"),
                    Err(error) => tracing::warn!(%op, %error, "local model {op} failed"),
                }
                self.publish_status();
                let _ = reply.send(result);
            }
            Command::RefreshStatus => self.publish_status(),
            Command::Shutdown { .. } => {}
        }
    }

    fn is_active(&self, id: RequestId) -> bool {
        self.active.as_ref().is_some_and(|active| active.id == id)
    }

    fn sender(&self) -> Option<mpsc::UnboundedSender<Command>> {
        self.events.upgrade()
    }

    // ── Rewrite lifecycle ───────────────────────────────────────────────

    fn start(&mut self, id: RequestId, request: RewriteRequest, observer: Arc<dyn RewriteObserver>) {
        self.cancel_active();

        let kind = self.settings.selected_backend();
        let model = self.settings.model_for(kind);
        let key = CacheKey::for_request(kind, &model, &request);
        tracing::debug!(request_id = %id, backend = %kind, %model, "rewrite started");

        self.active = Some(ActiveRequest {
            id,
            request,
            kind,
            key,
            observer,
            waiting_backend: None,
            preparing: None,
            handle: None,
        });

        let backend = match self.resolver.resolve(kind) {
            Ok(backend) => backend,
            Err(error) => {
                self.on_finished(id, Err(error));
                return;
            }
        };

        if !kind.is_local() {
            self.dispatch(id, backend);
            return;
        }

        let Some(model_path) = self.settings.local_model_path() else {
            self.on_finished(id, Err(RewriteError::local("no local model configured")));
            return;
        };
        let Some(events) = self.sender() else {
            return;
        };
        let supervisor = Arc::clone(&self.supervisor);
        let pending_unload = self.pending_unload.take();
        let task = tokio::spawn(async move {
            if let Some(unload) = pending_unload {
                let _ = unload.await;
            }
            let result = supervisor.ensure(&model_path).await;
            let _ = events.send(Command::LocalReady { id, result });
        });
        if let Some(active) = self.active.as_mut() {
            active.waiting_backend = Some(backend);
            active.preparing = Some(task.abort_handle());
        }
        self.publish_status();
    }

    fn on_local_ready(&mut self, id: RequestId, result: Result<(), RewriteError>) {
        if !self.is_active(id) {
            return;
        }
        let backend = self.active.as_mut().and_then(|active| {
            active.preparing = None;
            active.waiting_backend.take()
        });
        match (result, backend) {
            (Ok(()), Some(backend)) => self.dispatch(id, backend),
            (Err(error), _) => self.on_finished(id, Err(error)),
            (Ok(()), None) => self.on_finished(
                id,
                Err(RewriteError::local("local backend was not resolved")),
            ),
        }
        self.publish_status();
    }

    fn dispatch(&mut self, id: RequestId, backend: Arc<dyn Backend>) {
        let Some(active) = self.active.as_ref() else {
            return;
        };
        let Some(events) = self.sender() else {
            return;
        };
        let request = &active.request;
        let stream = request.streaming()
            && self.settings.streaming_enabled()
            && backend.supports_streaming();
        let backend_request = BackendRequest {
            model: backend.model().to_string(),
            system_prompt: compose_system_prompt(request),
            user_text: wrap_input(request.text()),
            attachments: request.attachments().to_vec(),
            sampling: backend.sampling(request.aggressiveness()),
            stream,
        };
        tracing::debug!(
            request_id = %id,
            backend = backend.name(),
            stream,
            images = backend_request.attachments.len(),
            "dispatching rewrite"
        );

        let partial_events = events.clone();
        let handle = spawn_rewrite(
            backend,
            backend_request,
            Arc::new(move |text| {
                let _ = partial_events.send(Command::Partial { id, text });
            }),
            Box::new(move |result| {
                let _ = events.send(Command::Finished { id, result });
            }),
        );
        if let Some(active) = self.active.as_mut() {
            active.handle = Some(handle);
        }
    }

    fn flush_partial(&mut self) {
        let Some(text) = self.coalescer.flush() else {
            return;
        };
        if let Some(active) = self.active.as_ref() {
            active.observer.on_partial(active.id, &text);
        }
    }

    fn on_finished(&mut self, id: RequestId, result: BackendResult) {
        if !self.is_active(id) {
            return;
        }
        if let Some(active) = self.active.as_mut() {
            active.handle = None;
        }

        let error = match result {
            Ok(text) => {
                self.flush_partial();
                self.complete(Ok(text), true);
                return;
            }
            Err(error) => error,
        };
        let events = self
            .sender()
            .filter(|_| error.allows_cache_fallback() && self.settings.offline_cache_enabled());
        let Some(events) = events else {
            self.flush_partial();
            self.complete(Err(error), false);
            return;
        };
        // Hold the buffered partial back: a cached answer need not extend it.
        let held = self.coalescer.flush();
        let Some(key) = self.active.as_ref().map(|active| active.key.clone()) else {
            return;
        };
        tracing::debug!(request_id = %id, %error, "rewrite failed, checking offline cache");
        let cache = self.cache.clone();
        tokio::spawn(async move {
            let cached = cache.get(&key).await;
            let _ = events.send(Command::FallbackChecked {
                id,
                cached,
                error,
                held,
            });
        });
    }

    fn on_fallback_checked(
        &mut self,
        id: RequestId,
        cached: Option<String>,
        error: RewriteError,
        held: Option<String>,
    ) {
        if !self.is_active(id) {
            return;
        }
        match cached {
            Some(text) => {
                tracing::info!(request_id = %id, %error, "serving rewrite from offline cache");
                if let Some(active) = self.active.as_ref() {
                    active.observer.on_partial(id, &text);
                }
                self.complete(Ok(text), false);
            }
            None => {
                if let (Some(text), Some(active)) = (held, self.active.as_ref()) {
                    active.observer.on_partial(id, &text);
                }
                self.complete(Err(error), false);
            }
        }
    }

    /// Deliver the final result and retire the active request. Fresh
    /// successes are also recorded to history and the offline cache.
    fn complete(&mut self, result: BackendResult, fresh: bool) {
        let Some(active) = self.active.take() else {
            return;
        };
        self.coalescer.reset();
        let success = match &result {
            Ok(text) if fresh => Some(text.clone()),
            _ => None,
        };
        match &result {
            Ok(_) => tracing::debug!(request_id = %active.id, "rewrite completed"),
            Err(error) => tracing::debug!(request_id = %active.id, %error, "rewrite failed"),
        }
        active.observer.on_complete(active.id, result);

        if let Some(text) = success {
            let history = Arc::clone(&self.history);
            let record = HistoryRecord::new(
                active.request.text(),
                text.clone(),
                active.request.style(),
                active.kind,
            );
            tokio::task::spawn_blocking(move || {
                if let Err(error) = history.record(record) {
                    tracing::warn!(%error, "failed to append history record");
                }
            });
            if self.settings.offline_cache_enabled() {
                let cache = self.cache.clone();
                let key = active.key;
                tokio::spawn(async move { cache.insert(key, text).await });
            }
        }

        if active.kind.is_local() && !self.settings.keep_local_model_loaded() {
            self.schedule_unload();
        }
        self.publish_status();
    }

    /// Invalidate the active request. Nothing it started reaches the
    /// observer afterwards.
    fn cancel_active(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };
        self.coalescer.reset();
        if let Some(handle) = active.handle {
            handle.cancel();
        }
        if let Some(preparing) = active.preparing {
            preparing.abort();
        }
        if active.kind.is_local() {
            self.supervisor.cancel();
        }
        tracing::info!(request_id = %active.id, backend = %active.kind, "rewrite cancelled");
        self.publish_status();
    }

    // ── Local model management ──────────────────────────────────────────

    fn schedule_unload(&mut self) {
        let supervisor = Arc::clone(&self.supervisor);
        let events = self.sender();
        let previous = self.pending_unload.take();
        self.pending_unload = Some(tokio::spawn(async move {
            if let Some(previous) = previous {
                let _ = previous.await;
            }
            supervisor.unload().await;
            if let Some(events) = events {
                let _ = events.send(Command::RefreshStatus);
            }
        }));
    }

    fn start_local_op(&mut self, op: LocalOp, reply: LocalReply) {
        if let Some(running) = self.local_op {
            let _ = reply.send(Err(RewriteError::OperationInProgress(format!(
                "local model {running} in progress"
            ))));
            return;
        }
        if self.active.is_some() {
            let _ = reply.send(Err(RewriteError::OperationInProgress(
                "a rewrite is in progress".into(),
            )));
            return;
        }
        let model_path = match op {
            LocalOp::Load => match self.settings.local_model_path() {
                Some(path) => Some(path),
                None => {
                    let _ = reply.send(Err(RewriteError::local("no local model configured")));
                    return;
                }
            },
            LocalOp::Unload => None,
        };
        let Some(events) = self.sender() else {
            let _ = reply.send(Err(RewriteError::Cancelled));
            return;
        };

        tracing::info!(%op, "local model {op} started");
        self.local_op = Some(op);
        let supervisor = Arc::clone(&self.supervisor);
        let pending_unload = self.pending_unload.take();
        tokio::spawn(async move {
            if let Some(unload) = pending_unload {
                let _ = unload.await;
            }
            let result = match model_path {
                Some(path) => supervisor.ensure(&path).await,
                None => {
                    supervisor.unload().await;
                    Ok(())
                }
            };
            let _ = events.send(Command::LocalOpFinished { op, result, reply });
        });
        self.publish_status();
    }

    fn publish_status(&self) {
        let model = self.supervisor.loaded_model();
        let status = LocalModelStatus {
            loaded: model.is_some(),
            model,
            busy: self.local_op.is_some()
                || self.supervisor.phase() == WorkerPhase::Busy
                || self.active.as_ref().is_some_and(|active| {
                    active.kind.is_local() && (active.preparing.is_some() || active.handle.is_some())
                }),
        };
        self.status.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }
}
