use super::prompt::temperature_for;
use super::types::{BackendKind, BackendRequest, Sampling};
use crate::error::BackendResult;
use std::future::Future;
use std::pin::Pin;

/// Capabilities reported at runtime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackendCapabilities {
    pub streaming: bool,
    pub vision: bool,
}

/// Callback receiving the full accumulated text each time it grows.
pub type PartialSink<'a> = &'a (dyn Fn(&str) + Send + Sync);

pub trait Backend: Send + Sync {
    /// Human-facing name (e.g. "OpenAI"), used in messages and cache keys.
    fn name(&self) -> &str;

    fn kind(&self) -> BackendKind;

    /// Model identifier requests are sent to.
    fn model(&self) -> &str;

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities::default()
    }

    /// Randomness setting for the given aggressiveness.
    fn sampling(&self, aggressiveness: f64) -> Sampling {
        Sampling::Temperature(temperature_for(aggressiveness))
    }

    /// Run one request to completion.
    ///
    /// Resolves exactly once. Every failure is a [`RewriteError`] value, never
    /// a panic. `on_partial` may be called any number of times before that,
    /// always with text that is at least as complete as the previous call.
    ///
    /// [`RewriteError`]: crate::error::RewriteError
    fn generate<'a>(
        &'a self,
        request: &'a BackendRequest,
        on_partial: PartialSink<'a>,
    ) -> Pin<Box<dyn Future<Output = BackendResult> + Send + 'a>>;

    fn supports_streaming(&self) -> bool {
        self.capabilities().streaming
    }

    fn supports_vision(&self) -> bool {
        self.capabilities().vision
    }
}
