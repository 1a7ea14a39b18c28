//! Session-scoped record of actions workers have performed.
//!
//! Workers append every action they attempt. Succeeded actions are indexed
//! by `(kind, target, value)` so that other workers in the same session can skip
//! work that is already done. Records are never mutated; the whole ledger
//! is cleared at session teardown.

use crate::core::{Action, ActionKind, TaskId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use tokio::sync::RwLock;
use tracing::debug;

/// One appended ledger entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccomplishmentRecord {
    pub kind: ActionKind,
    pub target: String,
    /// Whether the actuator reported success.
    pub succeeded: bool,
    /// Task the action was performed for.
    pub task: TaskId,
    /// Free-form details such as typed values or actuator observations.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    pub timestamp: DateTime<Utc>,
}

/// Read-only view handed to deciders.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LedgerView {
    pub summary: String,
    /// Latest records across the session.
    pub recent: Vec<AccomplishmentRecord>,
    /// Every record made for the task being decided.
    pub task_history: Vec<AccomplishmentRecord>,
}

impl LedgerView {
    /// Whether any action for the viewed task succeeded.
    pub fn task_progressed(&self) -> bool {
        self.task_history.iter().any(|r| r.succeeded)
    }
}

struct Inner {
    records: Vec<AccomplishmentRecord>,
    accomplished: HashSet<AccomplishedKey>,
}

/// Typed text is part of the key: typing "bob" after "alice" is new work.
type AccomplishedKey = (ActionKind, String, Option<String>);

/// Append-only accomplishment ledger for one session.
pub struct AccomplishmentLedger {
    session_id: String,
    inner: RwLock<Inner>,
}

fn normalize(target: &str) -> String {
    target.trim().to_lowercase()
}

fn key(action: &Action) -> AccomplishedKey {
    (action.kind, normalize(&action.target), action.value.clone())
}

impl AccomplishmentLedger {
    pub fn new(session_id: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            inner: RwLock::new(Inner {
                records: Vec::new(),
                accomplished: HashSet::new(),
            }),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Record a succeeded action.
    pub async fn record(&self, task: TaskId, action: &Action, metadata: BTreeMap<String, String>) {
        self.append(task, action, true, metadata).await;
    }

    /// Record an attempted action that did not succeed.
    pub async fn record_attempt(
        &self,
        task: TaskId,
        action: &Action,
        metadata: BTreeMap<String, String>,
    ) {
        self.append(task, action, false, metadata).await;
    }

    async fn append(
        &self,
        task: TaskId,
        action: &Action,
        succeeded: bool,
        mut metadata: BTreeMap<String, String>,
    ) {
        if let Some(value) = &action.value {
            metadata
                .entry("value".to_string())
                .or_insert_with(|| value.clone());
        }
        let record = AccomplishmentRecord {
            kind: action.kind,
            target: action.target.clone(),
            succeeded,
            task,
            metadata,
            timestamp: Utc::now(),
        };

        let mut inner = self.inner.write().await;
        if succeeded {
            inner.accomplished.insert(key(action));
        }
        inner.records.push(record);
        debug!(
            session = %self.session_id,
            task = %task.short(),
            action = %action,
            succeeded,
            "ledger append"
        );
    }

    /// Whether the same action, value included, already succeeded this session.
    pub async fn has_accomplished(&self, action: &Action) -> bool {
        self.inner.read().await.accomplished.contains(&key(action))
    }

    /// The most recent records, newest last.
    pub async fn recent(&self, limit: usize) -> Vec<AccomplishmentRecord> {
        let inner = self.inner.read().await;
        let start = inner.records.len().saturating_sub(limit);
        inner.records[start..].to_vec()
    }

    /// Short human-readable digest of what has been done.
    pub async fn summary(&self) -> String {
        let inner = self.inner.read().await;
        if inner.records.is_empty() {
            return "No actions recorded yet".to_string();
        }

        let mut per_kind: BTreeMap<ActionKind, usize> = BTreeMap::new();
        let mut failed = 0;
        for record in &inner.records {
            if record.succeeded {
                *per_kind.entry(record.kind).or_default() += 1;
            } else {
                failed += 1;
            }
        }
        let kinds: Vec<String> = per_kind
            .iter()
            .map(|(kind, count)| format!("{} {}", count, kind))
            .collect();
        let mut summary = format!(
            "{} actions recorded ({} succeeded: {})",
            inner.records.len(),
            inner.records.len() - failed,
            kinds.join(", ")
        );
        if failed > 0 {
            summary.push_str(&format!(", {} failed", failed));
        }
        summary
    }

    /// View for deciding the next step of `task`.
    pub async fn view(&self, task: TaskId, limit: usize) -> LedgerView {
        let task_history = self
            .inner
            .read()
            .await
            .records
            .iter()
            .filter(|r| r.task == task)
            .cloned()
            .collect();
        LedgerView {
            summary: self.summary().await,
            recent: self.recent(limit).await,
            task_history,
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.records.is_empty()
    }

    /// Drop every record. Called at session teardown.
    pub async fn clear(&self) {
        let mut inner = self.inner.write().await;
        inner.records.clear();
        inner.accomplished.clear();
    }
}

impl std::fmt::Debug for AccomplishmentLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccomplishmentLedger")
            .field("session_id", &self.session_id)
            .finish_non_exhaustive()
    }
}
