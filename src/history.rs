//! History sink collaborator: successful rewrites are offered here after
//! completion.

use crate::llm::types::{BackendKind, Style};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRecord {
    pub original: String,
    pub result: String,
    pub style: Style,
    pub backend: BackendKind,
    pub created_at: DateTime<Utc>,
}

impl HistoryRecord {
    pub fn new(
        original: impl Into<String>,
        result: impl Into<String>,
        style: Style,
        backend: BackendKind,
    ) -> Self {
        Self {
            original: original.into(),
            result: result.into(),
            style,
            backend,
            created_at: Utc::now(),
        }
    }
}

/// Called off the engine task; implementations may block on IO.
pub trait HistorySink: Send + Sync {
    fn record(&self, record: HistoryRecord) -> Result<()>;
}

/// Discards every record.
pub struct NullHistory;

impl HistorySink for NullHistory {
    fn record(&self, _record: HistoryRecord) -> Result<()> {
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryHistory {
    records: Mutex<Vec<HistoryRecord>>,
}

impl MemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<HistoryRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl HistorySink for MemoryHistory {
    fn record(&self, record: HistoryRecord) -> Result<()> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record);
        Ok(())
    }
}

/// Appends one JSON object per line.
pub struct JsonlHistory {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlHistory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl HistorySink for JsonlHistory {
    fn record(&self, record: HistoryRecord) -> Result<()> {
        let mut line = serde_json::to_string(&record).context("failed serializing history")?;
        line.push('\n');

        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed creating {}", parent.display()))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("failed opening history: {}", self.path.display()))?;
        file.write_all(line.as_bytes())
            .with_context(|| format!("failed appending history: {}", self.path.display()))?;
        Ok(())
    }
}
