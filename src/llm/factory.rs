use super::anthropic::AnthropicBackend;
use super::gemini::GeminiBackend;
use super::http::build_provider_client_with_timeout;
use super::local::LocalBackend;
use super::openai::OpenAiBackend;
use super::traits::Backend;
use super::types::BackendKind;
use crate::error::RewriteError;
use crate::settings::{SecretStore, SettingsProvider};
use crate::worker::WorkerSupervisor;
use reqwest::Client;
use std::sync::Arc;

/// Maps a backend kind to a ready adapter.
///
/// The engine resolves on every request so credential and settings changes
/// take effect without rebuilding it.
pub trait BackendResolver: Send + Sync {
    fn resolve(&self, kind: BackendKind) -> Result<Arc<dyn Backend>, RewriteError>;
}

/// Builds adapters from the settings provider and secret store.
pub struct DefaultBackendResolver {
    settings: Arc<dyn SettingsProvider>,
    secrets: Arc<dyn SecretStore>,
    client: Client,
    supervisor: Arc<WorkerSupervisor>,
}

impl DefaultBackendResolver {
    pub fn new(
        settings: Arc<dyn SettingsProvider>,
        secrets: Arc<dyn SecretStore>,
        supervisor: Arc<WorkerSupervisor>,
        request_timeout_secs: u64,
    ) -> Self {
        Self {
            settings,
            secrets,
            client: build_provider_client_with_timeout(request_timeout_secs),
            supervisor,
        }
    }

    fn api_key(&self, kind: BackendKind) -> Result<String, RewriteError> {
        self.secrets
            .get(kind)
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty())
            .ok_or_else(|| RewriteError::MissingCredential {
                backend: kind.label().to_string(),
            })
    }
}

impl BackendResolver for DefaultBackendResolver {
    fn resolve(&self, kind: BackendKind) -> Result<Arc<dyn Backend>, RewriteError> {
        let model = self.settings.model_for(kind);
        let base_url = self.settings.base_url_for(kind);
        let backend: Arc<dyn Backend> = match kind {
            BackendKind::OpenAi => Arc::new(
                OpenAiBackend::new(self.client.clone(), self.api_key(kind)?, &base_url, model)?
                    .with_effort_model_prefixes(self.settings.effort_model_prefixes()),
            ),
            BackendKind::Anthropic => Arc::new(AnthropicBackend::new(
                self.client.clone(),
                self.api_key(kind)?,
                &base_url,
                model,
            )?),
            BackendKind::Gemini => Arc::new(GeminiBackend::new(
                self.client.clone(),
                self.api_key(kind)?,
                &base_url,
                model,
            )?),
            BackendKind::Local => {
                let model_path = self
                    .settings
                    .local_model_path()
                    .ok_or_else(|| RewriteError::local("no local model configured"))?;
                Arc::new(LocalBackend::new(
                    Arc::clone(&self.supervisor),
                    model_path,
                    self.settings.local_max_tokens(),
                ))
            }
        };
        tracing::debug!(backend = backend.name(), model = backend.model(), "resolved backend");
        Ok(backend)
    }
}
