//! Text-only adapter over the local worker process.

use crate::error::{BackendResult, RewriteError};
use crate::llm::{
    prompt::{flatten_prompt, temperature_for},
    traits::{Backend, BackendCapabilities, PartialSink},
    types::{BackendKind, BackendRequest},
};
use crate::worker::WorkerSupervisor;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

pub struct LocalBackend {
    supervisor: Arc<WorkerSupervisor>,
    model: String,
    max_tokens: u32,
}

impl LocalBackend {
    pub fn new(supervisor: Arc<WorkerSupervisor>, model_path: PathBuf, max_tokens: u32) -> Self {
        let model = model_path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| model_path.display().to_string());
        Self {
            supervisor,
            model,
            max_tokens,
        }
    }
}

impl Backend for LocalBackend {
    fn name(&self) -> &str {
        BackendKind::Local.label()
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            streaming: false,
            vision: false,
        }
    }

    fn generate<'a>(
        &'a self,
        request: &'a BackendRequest,
        on_partial: PartialSink<'a>,
    ) -> Pin<Box<dyn Future<Output = BackendResult> + Send + 'a>> {
        Box::pin(async move {
            if !request.attachments.is_empty() {
                return Err(RewriteError::AttachmentsUnsupported {
                    backend: self.name().to_string(),
                });
            }
            let prompt = flatten_prompt(&request.system_prompt, &request.user_text);
            let temperature = request
                .temperature()
                .unwrap_or_else(|| temperature_for(0.5));
            let text = self
                .supervisor
                .generate(prompt, temperature, self.max_tokens)
                .await?;
            if text.is_empty() {
                return Err(RewriteError::invalid_response("worker returned empty output"));
            }
            on_partial(&text);
            Ok(text)
        })
    }
}
