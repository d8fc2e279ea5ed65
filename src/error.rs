use thiserror::Error;

// ─── Rewrite errors ──────────────────────────────────────────────────────────

/// Every failure a rewrite can end in.
///
/// Backend adapters resolve each request with exactly one `BackendResult`;
/// the failure side of that result is always one of these variants, and each
/// one renders a message fit to show a user.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RewriteError {
    // ── Configuration ───────────────────────────────────────────────────
    #[error("{backend} credentials not set")]
    MissingCredential { backend: String },

    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    // ── Transport ───────────────────────────────────────────────────────
    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out")]
    NetworkTimeout,

    // ── Remote responses ────────────────────────────────────────────────
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("{backend} rate-limited the request{}", retry_hint(.retry_after_secs))]
    RateLimited {
        backend: String,
        retry_after_secs: Option<u64>,
    },

    #[error("server error ({status}){}", message_suffix(.message))]
    Server {
        status: u16,
        message: Option<String>,
    },

    #[error("streaming error: {0}")]
    Stream(String),

    // ── Lifecycle ───────────────────────────────────────────────────────
    #[error("request cancelled")]
    Cancelled,

    // ── Local model ─────────────────────────────────────────────────────
    #[error("local model unavailable: {0}")]
    LocalUnavailable(String),

    #[error("{backend} does not accept image attachments")]
    AttachmentsUnsupported { backend: String },

    #[error("worker is busy")]
    WorkerBusy,

    #[error("operation in progress: {0}")]
    OperationInProgress(String),
}

fn retry_hint(retry_after_secs: &Option<u64>) -> String {
    retry_after_secs
        .map(|secs| format!(" (retry after {secs}s)"))
        .unwrap_or_default()
}

fn message_suffix(message: &Option<String>) -> String {
    message
        .as_deref()
        .map(|m| format!(": {m}"))
        .unwrap_or_default()
}

impl RewriteError {
    pub fn invalid_response(detail: impl Into<String>) -> Self {
        Self::InvalidResponse(detail.into())
    }

    pub fn local(detail: impl Into<String>) -> Self {
        Self::LocalUnavailable(detail.into())
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Whether a cached result may stand in for this failure.
    ///
    /// Cancellation is a caller decision, not an outage, so it never falls
    /// back to the offline cache.
    pub fn allows_cache_fallback(&self) -> bool {
        !self.is_cancelled()
    }
}

/// Outcome of one rewrite as produced by a backend adapter.
pub type BackendResult = Result<String, RewriteError>;
