//! Append-only audit log of a supervision session.
//!
//! The supervisor writes entries and never reads them back. Stores absorb
//! their own I/O failures; an audit write must never stall execution.

use crate::core::TaskId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::warn;

/// What an entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextKind {
    SessionStarted,
    TaskCompleted,
    TaskFailed,
    Decision,
    Aborted,
    SessionFinished,
}

/// A single audit entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextEntry {
    pub session_id: String,
    pub kind: ContextKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<TaskId>,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl ContextEntry {
    pub fn new(session_id: &str, kind: ContextKind, message: impl Into<String>) -> Self {
        Self {
            session_id: session_id.to_string(),
            kind,
            task: None,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn for_task(mut self, task: TaskId) -> Self {
        self.task = Some(task);
        self
    }
}

/// Write-only sink for audit entries.
#[async_trait]
pub trait ContextStore: Send + Sync {
    async fn append(&self, entry: ContextEntry);
}

/// Discards every entry.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullContextStore;

#[async_trait]
impl ContextStore for NullContextStore {
    async fn append(&self, _entry: ContextEntry) {}
}

/// Keeps entries in memory.
#[derive(Debug, Default)]
pub struct MemoryContextStore {
    entries: Mutex<Vec<ContextEntry>>,
}

impl MemoryContextStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn entries(&self) -> Vec<ContextEntry> {
        self.entries.lock().await.clone()
    }

    pub async fn count(&self, kind: ContextKind) -> usize {
        self.entries
            .lock()
            .await
            .iter()
            .filter(|e| e.kind == kind)
            .count()
    }
}

#[async_trait]
impl ContextStore for MemoryContextStore {
    async fn append(&self, entry: ContextEntry) {
        self.entries.lock().await.push(entry);
    }
}

/// Appends one JSON object per line to a file.
#[derive(Debug)]
pub struct JsonlContextStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonlContextStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn write_line(&self, entry: &ContextEntry) -> crate::Result<()> {
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');

        let _guard = self.lock.lock().await;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl ContextStore for JsonlContextStore {
    async fn append(&self, entry: ContextEntry) {
        if let Err(e) = self.write_line(&entry).await {
            warn!(path = %self.path.display(), error = %e, "failed to append context entry");
        }
    }
}
