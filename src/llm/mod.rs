// ── Wire plumbing ────────────────────────────────────────────────────────────
pub mod http;
pub mod merge;
pub mod sse;
pub mod streaming;

// ── Request model ───────────────────────────────────────────────────────────
pub mod prompt;
pub mod traits;
pub mod types;

// ── Invocation ──────────────────────────────────────────────────────────────
pub mod cancel;
pub mod factory;

// ── Backend implementations ─────────────────────────────────────────────────
pub mod anthropic;
pub mod gemini;
pub mod local;
pub mod openai;

pub use cancel::{CancelHandle, OnComplete, OnPartial, spawn_rewrite};
pub use factory::{BackendResolver, DefaultBackendResolver};
pub use http::build_provider_client_with_timeout;
pub use merge::merge;
pub use sse::{SseDecoder, SseEvent};
pub use traits::{Backend, BackendCapabilities, PartialSink};
pub use types::{
    BackendKind, BackendRequest, EffortTier, ImageAttachment, RewriteRequest, Sampling, Skill,
    Style,
};

pub use anthropic::AnthropicBackend;
pub use gemini::GeminiBackend;
pub use local::LocalBackend;
pub use openai::OpenAiBackend;
