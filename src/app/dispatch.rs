use crate::cli::commands::{CacheCommands, Cli, Commands, LocalCommands};
use anyhow::{Context, Result, bail};
use penwright::cache::OfflineCache;
use penwright::cache::store::DEFAULT_CAPACITY;
use penwright::config::Config;
use penwright::engine::{Engine, EngineParts, RewriteUpdate};
use penwright::history::JsonlHistory;
use penwright::llm::factory::DefaultBackendResolver;
use penwright::llm::types::{BackendKind, ImageAttachment, Style};
use penwright::settings::MemorySecretStore;
use penwright::worker::WorkerSupervisor;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncReadExt;

struct Runtime {
    engine: Engine,
    supervisor: Arc<WorkerSupervisor>,
}

impl Runtime {
    fn start(config: Config) -> Self {
        let supervisor = Arc::new(WorkerSupervisor::new(config.supervisor_config()));
        let cache = OfflineCache::with_options(
            config.cache_path(),
            DEFAULT_CAPACITY,
            config.persist_debounce(),
        );
        let history = Arc::new(JsonlHistory::new(config.history_path()));
        let timeout_secs = config.request_timeout_secs;
        let settings = Arc::new(config);
        let resolver = Arc::new(DefaultBackendResolver::new(
            settings.clone(),
            Arc::new(MemorySecretStore::from_env()),
            Arc::clone(&supervisor),
            timeout_secs,
        ));
        let engine = Engine::spawn(EngineParts {
            settings,
            resolver,
            supervisor: Arc::clone(&supervisor),
            cache,
            history,
        });
        Self { engine, supervisor }
    }

    async fn stop(self) {
        self.engine.shutdown().await;
        self.supervisor.unload().await;
    }
}

struct RewriteArgs {
    text: Option<String>,
    style: Style,
    backend: Option<BackendKind>,
    model: Option<String>,
    aggressiveness: Option<f64>,
    no_stream: bool,
    images: Vec<PathBuf>,
}

pub async fn dispatch(cli: Cli, config: Config) -> Result<()> {
    match cli.command {
        Commands::Rewrite {
            text,
            style,
            backend,
            model,
            aggressiveness,
            no_stream,
            images,
        } => {
            run_rewrite(
                config,
                RewriteArgs {
                    text,
                    style,
                    backend,
                    model,
                    aggressiveness,
                    no_stream,
                    images,
                },
            )
            .await
        }
        Commands::Cache {
            cache_command: CacheCommands::Clear,
        } => {
            let runtime = Runtime::start(config);
            let cleared = runtime.engine.clear_offline_cache().await;
            runtime.stop().await;
            cleared?;
            println!("Offline cache cleared.");
            Ok(())
        }
        Commands::Local { local_command } => run_local(config, local_command).await,
    }
}

fn apply_overrides(config: &mut Config, backend: Option<BackendKind>, model: Option<String>) {
    if let Some(backend) = backend {
        config.default_backend = backend;
    }
    if let Some(model) = model {
        match config.default_backend {
            BackendKind::OpenAi => config.openai.model = model,
            BackendKind::Anthropic => config.anthropic.model = model,
            BackendKind::Gemini => config.gemini.model = model,
            BackendKind::Local => config.local.model_path = Some(model),
        }
    }
}

fn mime_for(path: &Path) -> Result<&'static str> {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match extension.as_str() {
        "png" => Ok("image/png"),
        "jpg" | "jpeg" => Ok("image/jpeg"),
        "gif" => Ok("image/gif"),
        "webp" => Ok("image/webp"),
        _ => bail!("unsupported image type: {}", path.display()),
    }
}

async fn load_image(path: &Path) -> Result<ImageAttachment> {
    let mime = mime_for(path)?;
    let data = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed reading image: {}", path.display()))?;
    let filename = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok(ImageAttachment::new(filename, mime, data))
}

async fn read_input(text: Option<String>) -> Result<String> {
    let text = match text {
        Some(text) => text,
        None => {
            let mut buffer = String::new();
            tokio::io::stdin()
                .read_to_string(&mut buffer)
                .await
                .context("failed reading stdin")?;
            buffer
        }
    };
    if text.trim().is_empty() {
        bail!("nothing to rewrite");
    }
    Ok(text)
}

async fn run_rewrite(mut config: Config, args: RewriteArgs) -> Result<()> {
    apply_overrides(&mut config, args.backend, args.model);
    let text = read_input(args.text).await?;

    let mut images = Vec::with_capacity(args.images.len());
    for path in &args.images {
        images.push(load_image(path).await?);
    }

    let runtime = Runtime::start(config);
    let mut request = runtime
        .engine
        .new_request(text, args.style)
        .with_streaming(!args.no_stream);
    if let Some(aggressiveness) = args.aggressiveness {
        request = request.with_aggressiveness(aggressiveness);
    }
    for image in images {
        request = request.with_attachment(image);
    }
    let (id, mut updates) = runtime.engine.rewrite_stream(request);
    tracing::debug!(request_id = %id, "rewrite submitted");

    let mut shown = String::new();
    let outcome = loop {
        tokio::select! {
            update = updates.recv() => match update {
                Some(RewriteUpdate::Partial(text)) => show_partial(&mut shown, &text),
                Some(RewriteUpdate::Completed(result)) => break Some(result),
                None => break None,
            },
            _ = tokio::signal::ctrl_c() => {
                runtime.engine.cancel().await;
                break None;
            }
        }
    };
    if !shown.is_empty() {
        eprintln!();
    }
    runtime.stop().await;

    match outcome {
        Some(Ok(text)) => {
            println!("{text}");
            Ok(())
        }
        Some(Err(error)) => Err(error.into()),
        None => bail!("rewrite cancelled"),
    }
}

/// Echo streamed text to stderr, printing only what is new.
fn show_partial(shown: &mut String, text: &str) {
    let mut stderr = std::io::stderr().lock();
    if let Some(suffix) = text.strip_prefix(shown.as_str()) {
        let _ = write!(stderr, "{suffix}");
    } else {
        let _ = write!(stderr, "\n{text}");
    }
    let _ = stderr.flush();
    text.clone_into(shown);
}

async fn run_local(config: Config, command: LocalCommands) -> Result<()> {
    let model = config.local.model_path.clone();
    let runtime = Runtime::start(config);
    let result = match command {
        LocalCommands::Load => runtime.engine.load_local_model().await,
        LocalCommands::Unload => runtime.engine.unload_local_model().await,
    };
    let status = runtime.engine.local_model_status().borrow().clone();
    runtime.stop().await;
    result?;

    match command {
        LocalCommands::Load => println!(
            "Local model {} loaded and answering.",
            status
                .model
                .map(|path| path.display().to_string())
                .or(model)
                .unwrap_or_default()
        ),
        LocalCommands::Unload => println!("Local model unloaded."),
    }
    Ok(())
}
