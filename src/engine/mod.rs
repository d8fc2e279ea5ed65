//! Rewrite orchestration: one active request at a time, coalesced partial
//! delivery, offline-cache fallback and local model management.
//!
//! [`Engine`] is a cheap handle onto an actor task that owns every piece of
//! mutable orchestration state. Callbacks from backends and background work
//! are funnelled back into that task and checked against the active
//! [`RequestId`] before anything reaches the caller.

mod actor;
mod coalesce;
mod identity;
mod observer;

pub use coalesce::COALESCE_INTERVAL;
pub use identity::RequestId;
pub use observer::{CallbackObserver, RewriteObserver, RewriteUpdate};

use crate::cache::OfflineCache;
use crate::error::{BackendResult, RewriteError};
use crate::history::HistorySink;
use crate::llm::factory::BackendResolver;
use crate::llm::types::{RewriteRequest, Style};
use crate::settings::SettingsProvider;
use crate::worker::WorkerSupervisor;
use actor::{Command, EngineActor, LocalOp};
use coalesce::Coalescer;
use observer::ChannelObserver;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};

/// Local worker state as the UI layer sees it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalModelStatus {
    pub loaded: bool,
    pub model: Option<PathBuf>,
    pub busy: bool,
}

/// Everything the engine depends on, injected at construction.
pub struct EngineParts {
    pub settings: Arc<dyn SettingsProvider>,
    pub resolver: Arc<dyn BackendResolver>,
    pub supervisor: Arc<WorkerSupervisor>,
    pub cache: OfflineCache,
    pub history: Arc<dyn HistorySink>,
}

pub struct Engine {
    tx: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<LocalModelStatus>,
    cache: OfflineCache,
    settings: Arc<dyn SettingsProvider>,
}

impl Engine {
    /// Start the engine task on the current runtime.
    pub fn spawn(parts: EngineParts) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (status_tx, status) = watch::channel(LocalModelStatus::default());
        let cache = parts.cache.clone();
        let settings = Arc::clone(&parts.settings);
        let actor = EngineActor::new(
            parts.settings,
            parts.resolver,
            parts.supervisor,
            parts.cache,
            parts.history,
            rx,
            tx.downgrade(),
            status_tx,
            Coalescer::new(COALESCE_INTERVAL),
        );
        tokio::spawn(actor.run());
        Self {
            tx,
            status,
            cache,
            settings,
        }
    }

    /// A request for `text` at the configured default aggressiveness.
    pub fn new_request(&self, text: impl Into<String>, style: Style) -> RewriteRequest {
        RewriteRequest::new(text, style).with_aggressiveness(self.settings.aggressiveness())
    }

    /// Start a rewrite, superseding whatever was running.
    pub fn rewrite(&self, request: RewriteRequest, observer: Arc<dyn RewriteObserver>) -> RequestId {
        let id = RequestId::new();
        if self
            .tx
            .send(Command::Rewrite {
                id,
                request,
                observer,
            })
            .is_err()
        {
            tracing::warn!(request_id = %id, "rewrite submitted after engine shutdown");
        }
        id
    }

    pub fn rewrite_with<P, C>(&self, request: RewriteRequest, on_partial: P, on_complete: C) -> RequestId
    where
        P: Fn(&str) + Send + Sync + 'static,
        C: Fn(BackendResult) + Send + Sync + 'static,
    {
        self.rewrite(request, Arc::new(CallbackObserver::new(on_partial, on_complete)))
    }

    /// Rewrite with updates delivered over a channel. The channel closes
    /// after `Completed`, or without it if the request is cancelled or
    /// superseded.
    pub fn rewrite_stream(
        &self,
        request: RewriteRequest,
    ) -> (RequestId, mpsc::UnboundedReceiver<RewriteUpdate>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.rewrite(request, Arc::new(ChannelObserver::new(tx)));
        (id, rx)
    }

    /// Cancel the active request. Once this returns, no callback of that
    /// request reaches its observer.
    pub async fn cancel(&self) {
        let (ack, done) = oneshot::channel();
        if self.tx.send(Command::Cancel { ack }).is_ok() {
            let _ = done.await;
        }
    }

    pub async fn load_local_model(&self) -> Result<(), RewriteError> {
        self.local_op(LocalOp::Load).await
    }

    pub async fn unload_local_model(&self) -> Result<(), RewriteError> {
        self.local_op(LocalOp::Unload).await
    }

    async fn local_op(&self, op: LocalOp) -> Result<(), RewriteError> {
        let (reply, result) = oneshot::channel();
        self.tx
            .send(Command::LocalModel { op, reply })
            .map_err(|_| RewriteError::Cancelled)?;
        result.await.unwrap_or(Err(RewriteError::Cancelled))
    }

    pub fn local_model_status(&self) -> watch::Receiver<LocalModelStatus> {
        self.status.clone()
    }

    pub async fn clear_offline_cache(&self) -> anyhow::Result<()> {
        self.cache.clear().await
    }

    /// Cancel any active request, flush the offline cache and stop the task.
    pub async fn shutdown(self) {
        let (ack, done) = oneshot::channel();
        if self.tx.send(Command::Shutdown { ack }).is_ok() {
            let _ = done.await;
        }
    }
}
