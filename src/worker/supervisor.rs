//! Owner of the single local model worker process.
//!
//! Lifecycle: `Stopped -> Starting -> Ready <-> Busy`, ending in `Stopped`
//! (orderly) or `Faulted` (the process died or misbehaved). Every spawn gets a
//! new generation number; reader and exit tasks carry the generation they
//! were started for and do nothing once it is no longer current.

use super::protocol::{WorkerCommand, WorkerResponse};
use crate::error::RewriteError;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// How long the exit watcher waits for the output readers to drain so the
/// final stderr line is available for the failure message.
const READER_DRAIN_GRACE: Duration = Duration::from_millis(500);
const SHUTDOWN_WRITE_GRACE: Duration = Duration::from_millis(500);
const MAX_DIAGNOSTIC_CHARS: usize = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum WorkerPhase {
    Stopped,
    Starting,
    Ready,
    Busy,
    Faulted,
}

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Worker executable; `~` is expanded.
    pub command: String,
    /// Arguments placed before `--model <path>`.
    pub args: Vec<String>,
    /// Bound on spawn plus handshake.
    pub startup_timeout: Duration,
}

impl SupervisorConfig {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            startup_timeout: Duration::from_secs(300),
        }
    }

    #[must_use]
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    #[must_use]
    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }
}

type Reply = Result<WorkerResponse, RewriteError>;

/// State shared with the reader and exit tasks.
#[derive(Debug)]
struct WorkerState {
    phase: WorkerPhase,
    /// Generation of the live process, `None` when there is none.
    generation: Option<u64>,
    model_path: Option<PathBuf>,
    pending: Option<oneshot::Sender<Reply>>,
    kill: Option<CancellationToken>,
    last_stderr: Option<String>,
    last_diagnostic: Option<String>,
    last_error_message: Option<String>,
}

impl WorkerState {
    fn new() -> Self {
        Self {
            phase: WorkerPhase::Stopped,
            generation: None,
            model_path: None,
            pending: None,
            kill: None,
            last_stderr: None,
            last_diagnostic: None,
            last_error_message: None,
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation == Some(generation)
    }

    /// Forget the live process and terminate it. Any outstanding call is
    /// resolved with `outcome`.
    fn retire(&mut self, phase: WorkerPhase, outcome: RewriteError) {
        if let Some(pending) = self.pending.take() {
            let _ = pending.send(Err(outcome));
        }
        if let Some(kill) = self.kill.take() {
            kill.cancel();
        }
        self.generation = None;
        self.model_path = None;
        self.phase = phase;
    }

    /// Last stderr line, else the last stray stdout line.
    fn latest_output(&self) -> Option<&str> {
        self.last_stderr
            .as_deref()
            .or(self.last_diagnostic.as_deref())
    }

    /// Most specific explanation available for a dead or failing worker:
    /// explicit error message, then captured output, then `fallback`.
    fn failure_detail(&self, fallback: impl FnOnce() -> String) -> String {
        self.last_error_message
            .clone()
            .or_else(|| self.latest_output().map(str::to_string))
            .unwrap_or_else(fallback)
    }
}

struct Session {
    generation: u64,
    stdin: ChildStdin,
}

pub struct WorkerSupervisor {
    config: SupervisorConfig,
    next_generation: AtomicU64,
    state: Arc<Mutex<WorkerState>>,
    session: tokio::sync::Mutex<Option<Session>>,
}

fn lock(state: &Mutex<WorkerState>) -> MutexGuard<'_, WorkerState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

fn truncate(line: &str) -> String {
    let trimmed = line.trim();
    if trimmed.chars().count() <= MAX_DIAGNOSTIC_CHARS {
        return trimmed.to_string();
    }
    let cut: String = trimmed.chars().take(MAX_DIAGNOSTIC_CHARS).collect();
    format!("{cut}...")
}

fn describe_exit(status: Option<ExitStatus>) -> String {
    match status.and_then(|s| s.code()) {
        Some(code) => format!("worker exited with status {code}"),
        None => "worker terminated unexpectedly".to_string(),
    }
}

impl WorkerSupervisor {
    pub fn new(config: SupervisorConfig) -> Self {
        Self {
            config,
            next_generation: AtomicU64::new(0),
            state: Arc::new(Mutex::new(WorkerState::new())),
            session: tokio::sync::Mutex::new(None),
        }
    }

    pub fn phase(&self) -> WorkerPhase {
        lock(&self.state).phase
    }

    pub fn generation(&self) -> Option<u64> {
        lock(&self.state).generation
    }

    pub fn loaded_model(&self) -> Option<PathBuf> {
        let state = lock(&self.state);
        match state.phase {
            WorkerPhase::Ready | WorkerPhase::Busy => state.model_path.clone(),
            _ => None,
        }
    }

    /// Last non-JSON stdout line seen while no call was outstanding.
    pub fn last_diagnostic(&self) -> Option<String> {
        lock(&self.state).last_diagnostic.clone()
    }

    pub fn last_stderr(&self) -> Option<String> {
        lock(&self.state).last_stderr.clone()
    }

    /// Make sure a worker bound to `model_path` is running and answered a
    /// ping. A live worker on the same model is reused as is.
    pub async fn ensure(&self, model_path: &Path) -> Result<(), RewriteError> {
        let mut session = self.session.lock().await;
        {
            let mut state = lock(&self.state);
            let live = session
                .as_ref()
                .is_some_and(|s| state.is_current(s.generation));
            if live
                && matches!(state.phase, WorkerPhase::Ready | WorkerPhase::Busy)
                && state.model_path.as_deref() == Some(model_path)
            {
                return Ok(());
            }
            if state.generation.is_some() {
                tracing::info!(model = %model_path.display(), "replacing local worker");
            }
            state.retire(
                WorkerPhase::Stopped,
                RewriteError::local("worker restarted for a different model"),
            );
        }
        *session = None;

        if !model_path.is_file() {
            return Err(RewriteError::local(format!(
                "model file not found: {}",
                model_path.display()
            )));
        }

        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let mut live = self.spawn(model_path, generation)?;

        let handshake = async {
            let reply = self.send(&mut live, &WorkerCommand::Ping).await?;
            reply
                .await
                .unwrap_or_else(|_| Err(RewriteError::local("worker stopped during startup")))?
                .into_result()
        };
        let outcome = match tokio::time::timeout(self.config.startup_timeout, handshake).await {
            Ok(outcome) => outcome.map(|_| ()),
            Err(_) => Err(RewriteError::local(format!(
                "worker did not answer within {}s",
                self.config.startup_timeout.as_secs()
            ))),
        };

        let mut state = lock(&self.state);
        match outcome {
            Ok(()) if state.is_current(generation) => {
                state.phase = WorkerPhase::Ready;
                drop(state);
                *session = Some(live);
                tracing::info!(generation, model = %model_path.display(), "local worker ready");
                Ok(())
            }
            Ok(()) => Err(RewriteError::local("worker stopped during startup")),
            Err(error) => {
                let detail = match error {
                    RewriteError::LocalUnavailable(message) => message,
                    other => other.to_string(),
                };
                let detail = match state.latest_output() {
                    Some(output) if !detail.contains(output) => format!("{detail} ({output})"),
                    _ => detail,
                };
                if state.is_current(generation) {
                    state.retire(WorkerPhase::Faulted, RewriteError::local(detail.clone()));
                }
                tracing::warn!(generation, %detail, "local worker failed to start");
                Err(RewriteError::local(format!("failed to load model: {detail}")))
            }
        }
    }

    fn spawn(&self, model_path: &Path, generation: u64) -> Result<Session, RewriteError> {
        let program = shellexpand::tilde(&self.config.command).into_owned();
        let mut child = Command::new(&program)
            .args(&self.config.args)
            .arg("--model")
            .arg(model_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| RewriteError::local(format!("cannot start worker '{program}': {e}")))?;

        let (Some(stdin), Some(stdout), Some(stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            return Err(RewriteError::local("worker pipes unavailable"));
        };

        let kill = CancellationToken::new();
        {
            let mut state = lock(&self.state);
            *state = WorkerState::new();
            state.phase = WorkerPhase::Starting;
            state.generation = Some(generation);
            state.model_path = Some(model_path.to_path_buf());
            state.kill = Some(kill.clone());
        }
        tracing::info!(generation, pid = ?child.id(), "local worker spawned");

        let stderr_task = tokio::spawn(read_stderr(Arc::clone(&self.state), generation, stderr));
        let stdout_task = tokio::spawn(read_stdout(Arc::clone(&self.state), generation, stdout));
        tokio::spawn(watch_exit(
            Arc::clone(&self.state),
            generation,
            child,
            kill,
            [stdout_task, stderr_task],
        ));

        Ok(Session { generation, stdin })
    }

    /// Register the single pending slot and write one command line.
    async fn send(
        &self,
        session: &mut Session,
        command: &WorkerCommand,
    ) -> Result<oneshot::Receiver<Reply>, RewriteError> {
        let line = command.to_line()?;
        let (tx, rx) = oneshot::channel();
        {
            let mut state = lock(&self.state);
            if !state.is_current(session.generation) {
                return Err(RewriteError::local("worker is not running"));
            }
            if state.pending.is_some() {
                return Err(RewriteError::WorkerBusy);
            }
            match state.phase {
                WorkerPhase::Ready => state.phase = WorkerPhase::Busy,
                WorkerPhase::Starting => {}
                WorkerPhase::Busy => return Err(RewriteError::WorkerBusy),
                WorkerPhase::Stopped | WorkerPhase::Faulted => {
                    return Err(RewriteError::local("worker is not running"));
                }
            }
            state.pending = Some(tx);
        }

        tracing::debug!(generation = session.generation, command = command.name(), "worker call");
        let written = async {
            session.stdin.write_all(line.as_bytes()).await?;
            session.stdin.flush().await
        }
        .await;
        if let Err(error) = written {
            // A closed stdin means the process is dying. Kill it and let the
            // exit watcher resolve the call once stderr has drained.
            tracing::warn!(generation = session.generation, %error, "worker stdin write failed");
            let state = lock(&self.state);
            if state.is_current(session.generation)
                && let Some(kill) = &state.kill
            {
                kill.cancel();
            }
        }
        Ok(rx)
    }

    /// One request/response exchange with the running worker.
    ///
    /// Fails with [`RewriteError::WorkerBusy`] while another call is
    /// outstanding; calls are never queued.
    pub async fn call(&self, command: WorkerCommand) -> Result<WorkerResponse, RewriteError> {
        let reply = {
            let mut session = self.session.lock().await;
            let Some(session) = session.as_mut() else {
                return Err(RewriteError::local("local model is not loaded"));
            };
            self.send(session, &command).await?
        };
        reply
            .await
            .unwrap_or_else(|_| Err(RewriteError::local("worker stopped without replying")))
    }

    pub async fn generate(
        &self,
        prompt: String,
        temperature: f64,
        max_tokens: u32,
    ) -> Result<String, RewriteError> {
        self.call(WorkerCommand::Generate {
            prompt,
            temperature,
            max_tokens,
        })
        .await?
        .into_output()
    }

    /// Resolve the outstanding call as cancelled and kill the process. The
    /// protocol has no per-request cancel, so the next call cold-starts.
    pub fn cancel(&self) {
        let mut state = lock(&self.state);
        if state.generation.is_none() {
            return;
        }
        tracing::info!(generation = ?state.generation, "cancelling local worker");
        state.retire(WorkerPhase::Stopped, RewriteError::Cancelled);
    }

    /// Ask the worker to shut down, then terminate it regardless.
    pub async fn unload(&self) {
        let mut session = self.session.lock().await;
        if let Some(live) = session.as_mut() {
            let current = lock(&self.state).is_current(live.generation);
            if current && let Ok(line) = WorkerCommand::Shutdown.to_line() {
                let _ = tokio::time::timeout(SHUTDOWN_WRITE_GRACE, async {
                    let _ = live.stdin.write_all(line.as_bytes()).await;
                    let _ = live.stdin.flush().await;
                })
                .await;
            }
        }
        *session = None;
        let mut state = lock(&self.state);
        if state.generation.is_some() {
            tracing::info!(generation = ?state.generation, "local worker unloaded");
        }
        state.retire(WorkerPhase::Stopped, RewriteError::local("worker was unloaded"));
    }
}

async fn read_stderr(
    state: Arc<Mutex<WorkerState>>,
    generation: u64,
    stderr: tokio::process::ChildStderr,
) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if line.trim().is_empty() {
            continue;
        }
        tracing::debug!(generation, "worker stderr: {line}");
        let mut state = lock(&state);
        if !state.is_current(generation) {
            return;
        }
        state.last_stderr = Some(truncate(&line));
    }
}

async fn read_stdout(
    state: Arc<Mutex<WorkerState>>,
    generation: u64,
    stdout: tokio::process::ChildStdout,
) {
    let mut lines = BufReader::new(stdout).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if line.trim().is_empty() {
            continue;
        }
        let mut state = lock(&state);
        if !state.is_current(generation) {
            return;
        }
        handle_stdout_line(&mut state, generation, &line);
    }
}

fn handle_stdout_line(state: &mut WorkerState, generation: u64, line: &str) {
    match serde_json::from_str::<WorkerResponse>(line) {
        Ok(response) => {
            if let Some(pending) = state.pending.take() {
                if state.phase == WorkerPhase::Busy {
                    state.phase = WorkerPhase::Ready;
                }
                let _ = pending.send(Ok(response));
            } else if !response.is_ok() {
                state.last_error_message = response.message.filter(|m| !m.trim().is_empty());
            } else {
                tracing::debug!(generation, "ignoring unsolicited worker reply");
            }
        }
        Err(error) if state.pending.is_some() => {
            let detail = format!("worker protocol error: {error} in line '{}'", truncate(line));
            tracing::warn!(generation, %detail, "malformed worker reply");
            state.retire(WorkerPhase::Faulted, RewriteError::local(detail));
        }
        Err(_) => {
            tracing::warn!(generation, "worker diagnostic: {line}");
            state.last_diagnostic = Some(truncate(line));
        }
    }
}

async fn watch_exit(
    state: Arc<Mutex<WorkerState>>,
    generation: u64,
    mut child: Child,
    kill: CancellationToken,
    readers: [JoinHandle<()>; 2],
) {
    let status = tokio::select! {
        status = child.wait() => status.ok(),
        () = kill.cancelled() => {
            let _ = child.kill().await;
            child.wait().await.ok()
        }
    };
    let _ = tokio::time::timeout(READER_DRAIN_GRACE, futures_util::future::join_all(readers)).await;

    let mut state = lock(&state);
    if !state.is_current(generation) {
        tracing::debug!(generation, "stale worker exit ignored");
        return;
    }
    let detail = state.failure_detail(|| describe_exit(status));
    tracing::warn!(generation, %detail, "local worker exited");
    state.retire(WorkerPhase::Faulted, RewriteError::local(detail));
}
