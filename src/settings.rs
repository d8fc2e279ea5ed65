//! Collaborator interfaces the engine reads its configuration through.

use crate::llm::types::BackendKind;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::{PoisonError, RwLock};

/// Synchronously readable user settings.
pub trait SettingsProvider: Send + Sync {
    fn selected_backend(&self) -> BackendKind;

    /// Model identifier for a cloud backend.
    fn model_for(&self, backend: BackendKind) -> String;

    /// Endpoint root for a cloud backend.
    fn base_url_for(&self, backend: BackendKind) -> String;

    /// Default edit depth, `0.0..=1.0`.
    fn aggressiveness(&self) -> f64;

    fn streaming_enabled(&self) -> bool;

    fn keep_local_model_loaded(&self) -> bool;

    fn offline_cache_enabled(&self) -> bool;

    fn local_model_path(&self) -> Option<PathBuf>;

    fn local_max_tokens(&self) -> u32;

    /// OpenAI model-name prefixes that take reasoning effort tiers.
    fn effort_model_prefixes(&self) -> Vec<String>;
}

/// Credential storage, one secret per backend.
pub trait SecretStore: Send + Sync {
    fn get(&self, backend: BackendKind) -> Option<String>;
    fn set(&self, backend: BackendKind, secret: String);
    fn delete(&self, backend: BackendKind);
}

/// Process-local secret store.
#[derive(Default)]
pub struct MemorySecretStore {
    secrets: RwLock<HashMap<BackendKind, String>>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeded from `OPENAI_API_KEY`, `ANTHROPIC_API_KEY` and `GEMINI_API_KEY`
    /// (`GOOGLE_API_KEY` as a fallback for Gemini).
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let store = Self::new();
        let sources: [(BackendKind, &[&str]); 3] = [
            (BackendKind::OpenAi, &["OPENAI_API_KEY"]),
            (BackendKind::Anthropic, &["ANTHROPIC_API_KEY"]),
            (BackendKind::Gemini, &["GEMINI_API_KEY", "GOOGLE_API_KEY"]),
        ];
        for (backend, names) in sources {
            let secret = names
                .iter()
                .filter_map(|name| lookup(name))
                .map(|value| value.trim().to_string())
                .find(|value| !value.is_empty());
            if let Some(secret) = secret {
                store.set(backend, secret);
            }
        }
        store
    }
}

impl SecretStore for MemorySecretStore {
    fn get(&self, backend: BackendKind) -> Option<String> {
        self.secrets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&backend)
            .cloned()
    }

    fn set(&self, backend: BackendKind, secret: String) {
        self.secrets
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(backend, secret);
    }

    fn delete(&self, backend: BackendKind) {
        self.secrets
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&backend);
    }
}

impl fmt::Debug for MemorySecretStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secrets = self.secrets.read().unwrap_or_else(PoisonError::into_inner);
        let mut configured: Vec<String> = secrets.keys().map(ToString::to_string).collect();
        configured.sort();
        f.debug_struct("MemorySecretStore")
            .field("configured", &configured)
            .finish()
    }
}
