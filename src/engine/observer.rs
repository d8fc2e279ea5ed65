use super::identity::RequestId;
use crate::error::BackendResult;
use tokio::sync::mpsc;

/// Receives the outward-facing events of one rewrite.
///
/// Called on the engine task, so implementations must not block. For a
/// given request, `on_partial` texts never shrink and `on_complete` runs at
/// most once, after the last partial.
pub trait RewriteObserver: Send + Sync {
    fn on_partial(&self, id: RequestId, text: &str);
    fn on_complete(&self, id: RequestId, result: BackendResult);
}

/// Observer built from two closures.
pub struct CallbackObserver<P, C> {
    on_partial: P,
    on_complete: C,
}

impl<P, C> CallbackObserver<P, C>
where
    P: Fn(&str) + Send + Sync,
    C: Fn(BackendResult) + Send + Sync,
{
    pub fn new(on_partial: P, on_complete: C) -> Self {
        Self {
            on_partial,
            on_complete,
        }
    }
}

impl<P, C> RewriteObserver for CallbackObserver<P, C>
where
    P: Fn(&str) + Send + Sync,
    C: Fn(BackendResult) + Send + Sync,
{
    fn on_partial(&self, _id: RequestId, text: &str) {
        (self.on_partial)(text);
    }

    fn on_complete(&self, _id: RequestId, result: BackendResult) {
        (self.on_complete)(result);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RewriteUpdate {
    Partial(String),
    Completed(BackendResult),
}

/// Forwards events into a channel; the receiver sees the channel close when
/// the request finishes or is superseded.
pub(crate) struct ChannelObserver {
    tx: mpsc::UnboundedSender<RewriteUpdate>,
}

impl ChannelObserver {
    pub(crate) fn new(tx: mpsc::UnboundedSender<RewriteUpdate>) -> Self {
        Self { tx }
    }
}

impl RewriteObserver for ChannelObserver {
    fn on_partial(&self, _id: RequestId, text: &str) {
        let _ = self.tx.send(RewriteUpdate::Partial(text.to_string()));
    }

    fn on_complete(&self, _id: RequestId, result: BackendResult) {
        let _ = self.tx.send(RewriteUpdate::Completed(result));
    }
}
