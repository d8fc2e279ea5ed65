//! Callback-style rewrite invocation with deterministic cancellation.

use super::traits::Backend;
use super::types::BackendRequest;
use crate::error::BackendResult;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;

pub type OnPartial = Arc<dyn Fn(String) + Send + Sync>;
pub type OnComplete = Box<dyn FnOnce(BackendResult) + Send>;

/// Handle to one in-flight rewrite.
///
/// Once [`CancelHandle::cancel`] returns, neither callback runs again: the
/// callbacks execute under a gate that `cancel` closes, and the transport
/// task is aborted so the connection is dropped.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    token: CancellationToken,
    gate: Arc<Mutex<bool>>,
    abort: AbortHandle,
}

impl CancelHandle {
    /// Must not be called from inside one of the request's own callbacks.
    pub fn cancel(&self) {
        *self.gate.lock().unwrap_or_else(PoisonError::into_inner) = false;
        self.token.cancel();
        self.abort.abort();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

fn run_gated(gate: &Mutex<bool>, f: impl FnOnce()) {
    let open = gate.lock().unwrap_or_else(PoisonError::into_inner);
    if *open {
        f();
    }
}

/// `rewrite(request, on_partial, on_complete) -> CancelHandle`.
///
/// Spawns the backend call on the runtime. `on_complete` fires exactly once
/// unless the handle is cancelled first, in which case nothing fires.
pub fn spawn_rewrite(
    backend: Arc<dyn Backend>,
    request: BackendRequest,
    on_partial: OnPartial,
    on_complete: OnComplete,
) -> CancelHandle {
    let token = CancellationToken::new();
    let gate = Arc::new(Mutex::new(true));

    let task_token = token.clone();
    let task_gate = Arc::clone(&gate);
    let task = tokio::spawn(async move {
        let partial_gate = Arc::clone(&task_gate);
        let forward = move |text: &str| {
            run_gated(&partial_gate, || on_partial(text.to_string()));
        };
        let result = tokio::select! {
            biased;
            () = task_token.cancelled() => {
                tracing::debug!(backend = backend.name(), "rewrite cancelled");
                return;
            }
            result = backend.generate(&request, &forward) => result,
        };
        run_gated(&task_gate, || on_complete(result));
    });

    CancelHandle {
        token,
        gate,
        abort: task.abort_handle(),
    }
}
