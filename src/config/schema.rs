use crate::llm::http::DEFAULT_REQUEST_TIMEOUT_SECS;
use crate::llm::types::BackendKind;
use crate::llm::{anthropic, gemini, openai};
use crate::settings::SettingsProvider;
use crate::worker::SupervisorConfig;
use anyhow::{Context, Result};
use directories::UserDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DATA_DIR_NAME: &str = ".penwright";
const CONFIG_FILE_NAME: &str = "config.toml";
const CACHE_FILE_NAME: &str = "offline_cache.json";
const HISTORY_FILE_NAME: &str = "history.jsonl";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    #[serde(skip)]
    pub config_path: PathBuf,
    #[serde(skip)]
    pub data_dir: PathBuf,

    pub default_backend: BackendKind,
    /// Default edit depth, `0.0..=1.0`.
    pub aggressiveness: f64,
    pub streaming: bool,
    pub keep_local_model_loaded: bool,
    pub offline_cache_enabled: bool,
    pub request_timeout_secs: u64,

    pub openai: OpenAiConfig,
    pub anthropic: AnthropicConfig,
    pub gemini: GeminiConfig,
    pub local: LocalConfig,
    pub cache: CacheConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            config_path: PathBuf::new(),
            data_dir: PathBuf::new(),
            default_backend: BackendKind::OpenAi,
            aggressiveness: 0.5,
            streaming: true,
            keep_local_model_loaded: false,
            offline_cache_enabled: true,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            openai: OpenAiConfig::default(),
            anthropic: AnthropicConfig::default(),
            gemini: GeminiConfig::default(),
            local: LocalConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

// ── Cloud backends ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenAiConfig {
    pub model: String,
    pub base_url: String,
    /// Models starting with one of these take `reasoning_effort` tiers
    /// instead of a temperature.
    pub effort_model_prefixes: Vec<String>,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            model: openai::DEFAULT_MODEL.into(),
            base_url: openai::DEFAULT_BASE_URL.into(),
            effort_model_prefixes: ["o1", "o3", "o4", "gpt-5"].map(String::from).to_vec(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnthropicConfig {
    pub model: String,
    pub base_url: String,
}

impl Default for AnthropicConfig {
    fn default() -> Self {
        Self {
            model: anthropic::DEFAULT_MODEL.into(),
            base_url: anthropic::DEFAULT_BASE_URL.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeminiConfig {
    pub model: String,
    pub base_url: String,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            model: gemini::DEFAULT_MODEL.into(),
            base_url: gemini::DEFAULT_BASE_URL.into(),
        }
    }
}

// ── Local worker ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalConfig {
    pub worker_command: String,
    pub worker_args: Vec<String>,
    pub model_path: Option<String>,
    pub max_tokens: u32,
    /// Bounds spawn plus handshake only; generation itself has no timeout.
    pub startup_timeout_secs: u64,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            worker_command: "penwright-worker".into(),
            worker_args: Vec::new(),
            model_path: None,
            max_tokens: 1024,
            startup_timeout_secs: 300,
        }
    }
}

// ── Offline cache ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub persist_debounce_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            persist_debounce_ms: 1000,
        }
    }
}

impl Config {
    /// Load `~/.penwright/config.toml`, writing defaults on first run.
    pub fn load_or_init() -> Result<Self> {
        let home = UserDirs::new()
            .map(|u| u.home_dir().to_path_buf())
            .context("Could not find home directory")?;
        Self::load_or_init_in(&home.join(DATA_DIR_NAME))
    }

    pub fn load_or_init_in(data_dir: &Path) -> Result<Self> {
        if !data_dir.exists() {
            fs::create_dir_all(data_dir).context("Failed to create .penwright directory")?;
        }
        let config_path = data_dir.join(CONFIG_FILE_NAME);

        if config_path.exists() {
            let contents =
                fs::read_to_string(&config_path).context("Failed to read config file")?;
            let mut config: Config =
                toml::from_str(&contents).context("Failed to parse config file")?;
            config.config_path.clone_from(&config_path);
            config.data_dir = data_dir.to_path_buf();
            config.validate();
            Ok(config)
        } else {
            let config = Self {
                config_path,
                data_dir: data_dir.to_path_buf(),
                ..Self::default()
            };
            config.save()?;
            tracing::info!(path = %config.config_path.display(), "wrote default config");
            Ok(config)
        }
    }

    pub fn save(&self) -> Result<()> {
        let toml_str = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(&self.config_path, toml_str).context("Failed to write config file")?;
        Ok(())
    }

    /// Clamp out-of-range values instead of rejecting the file.
    pub fn validate(&mut self) {
        if !(0.0..=1.0).contains(&self.aggressiveness) {
            let clamped = if self.aggressiveness.is_nan() {
                0.5
            } else {
                self.aggressiveness.clamp(0.0, 1.0)
            };
            tracing::warn!(
                configured = self.aggressiveness,
                clamped,
                "aggressiveness out of range"
            );
            self.aggressiveness = clamped;
        }
        if self.request_timeout_secs == 0 {
            tracing::warn!("request_timeout_secs must be positive, using default");
            self.request_timeout_secs = DEFAULT_REQUEST_TIMEOUT_SECS;
        }
    }

    pub fn cache_path(&self) -> PathBuf {
        self.data_dir.join(CACHE_FILE_NAME)
    }

    pub fn history_path(&self) -> PathBuf {
        self.data_dir.join(HISTORY_FILE_NAME)
    }

    pub fn persist_debounce(&self) -> Duration {
        Duration::from_millis(self.cache.persist_debounce_ms)
    }

    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig::new(self.local.worker_command.clone())
            .with_args(self.local.worker_args.clone())
            .with_startup_timeout(Duration::from_secs(self.local.startup_timeout_secs))
    }
}

impl SettingsProvider for Config {
    fn selected_backend(&self) -> BackendKind {
        self.default_backend
    }

    fn model_for(&self, backend: BackendKind) -> String {
        match backend {
            BackendKind::OpenAi => self.openai.model.clone(),
            BackendKind::Anthropic => self.anthropic.model.clone(),
            BackendKind::Gemini => self.gemini.model.clone(),
            BackendKind::Local => self.local.model_path.clone().unwrap_or_default(),
        }
    }

    fn base_url_for(&self, backend: BackendKind) -> String {
        match backend {
            BackendKind::OpenAi => self.openai.base_url.clone(),
            BackendKind::Anthropic => self.anthropic.base_url.clone(),
            BackendKind::Gemini => self.gemini.base_url.clone(),
            BackendKind::Local => String::new(),
        }
    }

    fn aggressiveness(&self) -> f64 {
        self.aggressiveness
    }

    fn streaming_enabled(&self) -> bool {
        self.streaming
    }

    fn keep_local_model_loaded(&self) -> bool {
        self.keep_local_model_loaded
    }

    fn offline_cache_enabled(&self) -> bool {
        self.offline_cache_enabled
    }

    fn local_model_path(&self) -> Option<PathBuf> {
        self.local
            .model_path
            .as_deref()
            .map(|raw| PathBuf::from(shellexpand::tilde(raw).into_owned()))
    }

    fn local_max_tokens(&self) -> u32 {
        self.local.max_tokens
    }

    fn effort_model_prefixes(&self) -> Vec<String> {
        self.openai.effort_model_prefixes.clone()
    }
}
