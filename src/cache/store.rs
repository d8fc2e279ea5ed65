//! Bounded, content-addressed fallback store persisted as a JSON snapshot.
//!
//! The snapshot is loaded lazily on first access and rewritten atomically a
//! short debounce after the last write, so bursts of inserts cost one write.

use super::key::CacheKey;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

pub const DEFAULT_CAPACITY: usize = 300;
pub const DEFAULT_PERSIST_DEBOUNCE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub key: CacheKey,
    pub value: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct CacheState {
    loaded: bool,
    /// Set by every mutation; cleared only once a snapshot of the same
    /// revision is on disk.
    dirty: bool,
    revision: u64,
    /// Insertion order; ties on `created_at` evict the earlier insert.
    entries: Vec<CacheEntry>,
}

struct Inner {
    path: PathBuf,
    capacity: usize,
    debounce: Duration,
    state: RwLock<CacheState>,
    persist_timer: Mutex<Option<JoinHandle<()>>>,
}

/// Cheap to clone; clones share one store.
#[derive(Clone)]
pub struct OfflineCache {
    inner: Arc<Inner>,
}

impl OfflineCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_options(path, DEFAULT_CAPACITY, DEFAULT_PERSIST_DEBOUNCE)
    }

    pub fn with_options(path: impl Into<PathBuf>, capacity: usize, debounce: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                path: path.into(),
                capacity: capacity.max(1),
                debounce,
                state: RwLock::new(CacheState::default()),
                persist_timer: Mutex::new(None),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub async fn get(&self, key: &CacheKey) -> Option<String> {
        self.ensure_loaded().await;
        let state = self.inner.state.read().await;
        state
            .entries
            .iter()
            .find(|entry| &entry.key == key)
            .map(|entry| entry.value.clone())
    }

    pub async fn insert(&self, key: CacheKey, value: String) {
        self.insert_entry(CacheEntry {
            key,
            value,
            created_at: Utc::now(),
        })
        .await;
    }

    /// Insert with an explicit timestamp, evicting the oldest entries beyond
    /// capacity. Re-inserting a key replaces it.
    pub async fn insert_entry(&self, entry: CacheEntry) {
        self.ensure_loaded().await;
        {
            let mut state = self.inner.state.write().await;
            state.entries.retain(|existing| existing.key != entry.key);
            state.entries.push(entry);
            while state.entries.len() > self.inner.capacity {
                if let Some(oldest) = oldest_index(&state.entries) {
                    let evicted = state.entries.remove(oldest);
                    tracing::debug!(key = %evicted.key, "evicted offline cache entry");
                }
            }
            state.dirty = true;
            state.revision += 1;
        }
        self.schedule_persist();
    }

    pub async fn len(&self) -> usize {
        self.ensure_loaded().await;
        self.inner.state.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drop every entry and delete the snapshot file.
    pub async fn clear(&self) -> Result<()> {
        self.cancel_timer();
        {
            let mut state = self.inner.state.write().await;
            state.entries.clear();
            state.loaded = true;
            state.dirty = false;
            state.revision += 1;
        }
        match tokio::fs::remove_file(&self.inner.path).await {
            Ok(()) => {}
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
            Err(error) => {
                return Err(error).with_context(|| {
                    format!("failed removing cache file: {}", self.inner.path.display())
                });
            }
        }
        tracing::info!(path = %self.inner.path.display(), "offline cache cleared");
        Ok(())
    }

    /// Write a pending snapshot now instead of waiting for the debounce.
    pub async fn flush(&self) -> Result<()> {
        self.cancel_timer();
        self.inner.persist().await
    }

    fn cancel_timer(&self) {
        let mut timer = self
            .inner
            .persist_timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = timer.take() {
            handle.abort();
        }
    }

    fn schedule_persist(&self) {
        let inner = Arc::clone(&self.inner);
        let debounce = self.inner.debounce;
        let mut timer = self
            .inner
            .persist_timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = timer.take() {
            previous.abort();
        }
        *timer = Some(tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            if let Err(error) = inner.persist().await {
                tracing::warn!(%error, "failed to persist offline cache");
            }
        }));
    }

    async fn ensure_loaded(&self) {
        if self.inner.state.read().await.loaded {
            return;
        }
        let mut state = self.inner.state.write().await;
        if state.loaded {
            return;
        }
        let mut entries = load_snapshot(&self.inner.path).await;
        entries.sort_by_key(|entry| entry.created_at);
        if entries.len() > self.inner.capacity {
            let excess = entries.len() - self.inner.capacity;
            entries.drain(..excess);
        }
        tracing::info!(
            path = %self.inner.path.display(),
            entries = entries.len(),
            "offline cache loaded"
        );
        // Entries inserted before the load finished stay newest.
        let inserted = std::mem::take(&mut state.entries);
        entries.retain(|entry| !inserted.iter().any(|new| new.key == entry.key));
        entries.extend(inserted);
        state.entries = entries;
        state.loaded = true;
    }
}

impl Inner {
    async fn persist(&self) -> Result<()> {
        let (snapshot, revision) = {
            let state = self.state.read().await;
            if !state.dirty {
                return Ok(());
            }
            let snapshot =
                serde_json::to_string_pretty(&state.entries).context("failed serializing cache")?;
            (snapshot, state.revision)
        };
        write_atomic(&self.path, &snapshot).await?;

        let mut state = self.state.write().await;
        if state.revision == revision {
            state.dirty = false;
        }
        tracing::debug!(path = %self.path.display(), revision, "offline cache persisted");
        Ok(())
    }
}

fn oldest_index(entries: &[CacheEntry]) -> Option<usize> {
    entries
        .iter()
        .enumerate()
        .min_by_key(|(index, entry)| (entry.created_at, *index))
        .map(|(index, _)| index)
}

async fn load_snapshot(path: &Path) -> Vec<CacheEntry> {
    let raw = match tokio::fs::read(path).await {
        Ok(raw) => raw,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
        Err(error) => {
            tracing::warn!(path = %path.display(), %error, "cannot read offline cache");
            return Vec::new();
        }
    };
    serde_json::from_slice(&raw).unwrap_or_else(|error| {
        tracing::warn!(path = %path.display(), %error, "corrupt offline cache, starting empty");
        Vec::new()
    })
}

async fn write_atomic(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("failed creating cache directory: {}", parent.display()))?;
    }

    let temp_path = path.with_extension("tmp");
    tokio::fs::write(&temp_path, content)
        .await
        .with_context(|| format!("failed writing cache temp file: {}", temp_path.display()))?;

    if let Err(rename_error) = tokio::fs::rename(&temp_path, path).await {
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(rename_error)
            .with_context(|| format!("failed replacing cache file: {}", path.display()));
    }
    Ok(())
}
