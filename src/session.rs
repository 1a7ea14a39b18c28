//! Session management: the outward interface for running task graphs.
//!
//! A `SessionManager` owns the collaborators and the artifact cache shared
//! by all of its sessions. Each submitted graph runs in its own supervised
//! session on a tokio task, with a fresh ledger and its own cancellation
//! token.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::core::TaskGraph;
use crate::orchestration::collaborators::Collaborators;
use crate::orchestration::supervisor::{
    validate_max_parallel, ExecutionSupervisor, SessionReport, SessionStatus, SupervisorConfig,
};
use crate::orchestration::worker::ElementCache;
use crate::plan;
use crate::storage::CacheConfig;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Handle returned by [`SessionManager::submit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionHandle {
    id: SessionId,
}

impl SessionHandle {
    pub fn id(&self) -> SessionId {
        self.id
    }
}

impl std::fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "session-{}", self.id.short())
    }
}

struct SessionEntry {
    status: Arc<RwLock<SessionStatus>>,
    report: watch::Receiver<Option<SessionReport>>,
    cancel: CancellationToken,
    join: Option<JoinHandle<()>>,
}

/// Runs supervised sessions.
pub struct SessionManager {
    collaborators: Collaborators,
    config: SupervisorConfig,
    cache: Arc<ElementCache>,
    sessions: RwLock<HashMap<SessionId, SessionEntry>>,
    shutdown: CancellationToken,
}

impl SessionManager {
    pub fn new(collaborators: Collaborators, config: SupervisorConfig, cache: &CacheConfig) -> Self {
        Self {
            collaborators,
            config,
            cache: Arc::new(ElementCache::from_config(cache)),
            sessions: RwLock::new(HashMap::new()),
            shutdown: CancellationToken::new(),
        }
    }

    /// The artifact cache shared by every session.
    pub fn cache(&self) -> Arc<ElementCache> {
        self.cache.clone()
    }

    /// Start supervising `graph` with at most `max_parallel` workers.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if `max_parallel` is outside `1..=8`.
    pub async fn submit(&self, graph: TaskGraph, max_parallel: usize) -> Result<SessionHandle> {
        self.start(graph, max_parallel, None).await
    }

    /// Like [`SessionManager::submit`], for a graph planned from `goal`.
    /// Recovery planning and the oracle see the goal.
    pub async fn submit_for_goal(
        &self,
        graph: TaskGraph,
        max_parallel: usize,
        goal: &str,
    ) -> Result<SessionHandle> {
        self.start(graph, max_parallel, Some(goal)).await
    }

    /// Ask the planner for a plan, build its graph and submit it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Planner`] when no planner is configured or planning
    /// fails, and graph errors when the plan is malformed.
    pub async fn plan_and_submit(&self, goal: &str, max_parallel: usize) -> Result<SessionHandle> {
        validate_max_parallel(max_parallel)?;
        let planner = self
            .collaborators
            .planner
            .as_ref()
            .ok_or_else(|| Error::Planner("no planner configured".to_string()))?;

        let plan = planner.create_plan(goal).await?;
        info!(goal, steps = plan.steps.len(), "plan created");
        let built = plan::build_graph(&plan.steps)?;
        self.start(built.graph, max_parallel, Some(goal)).await
    }

    async fn start(
        &self,
        graph: TaskGraph,
        max_parallel: usize,
        goal: Option<&str>,
    ) -> Result<SessionHandle> {
        validate_max_parallel(max_parallel)?;
        let id = SessionId::new();
        let cancel = self.shutdown.child_token();
        let config = self.config.clone().with_max_parallel(max_parallel);

        let mut supervisor = ExecutionSupervisor::new(
            &id.to_string(),
            graph,
            &self.collaborators,
            self.cache.clone(),
            config,
        )?
        .with_cancellation(cancel.clone());
        if let Some(goal) = goal {
            supervisor = supervisor.with_goal(goal);
        }
        let status = supervisor.status_handle();

        let (report_tx, report_rx) = watch::channel(None);
        let join = tokio::spawn(async move {
            let report = supervisor.run().await;
            // Nobody may be waiting for it
            let _ = report_tx.send(Some(report));
        });

        self.sessions.write().await.insert(
            id,
            SessionEntry {
                status,
                report: report_rx,
                cancel,
                join: Some(join),
            },
        );
        info!(session = %id.short(), max_parallel, "session submitted");
        Ok(SessionHandle { id })
    }

    /// Live status of a session.
    pub async fn status(&self, handle: &SessionHandle) -> Result<SessionStatus> {
        let status = {
            let sessions = self.sessions.read().await;
            sessions
                .get(&handle.id)
                .ok_or_else(|| Error::SessionNotFound(handle.id.to_string()))?
                .status
                .clone()
        };
        let snapshot = status.read().await.clone();
        Ok(snapshot)
    }

    /// Wait for the session to finish and return its report. Can be called
    /// any number of times.
    pub async fn result(&self, handle: &SessionHandle) -> Result<SessionReport> {
        let mut report = self.receiver(handle).await?;
        let done = report
            .wait_for(Option::is_some)
            .await
            .map_err(|_| Error::TaskJoin(format!("session {} ended without a report", handle.id)))?;
        done.clone()
            .ok_or_else(|| Error::TaskJoin(format!("session {} ended without a report", handle.id)))
    }

    /// Like [`SessionManager::result`], giving up after `limit`. The session
    /// keeps running on timeout.
    pub async fn result_timeout(&self, handle: &SessionHandle, limit: Duration) -> Result<SessionReport> {
        tokio::time::timeout(limit, self.result(handle))
            .await
            .map_err(|_| Error::Timeout(limit))?
    }

    /// The report if the session already finished.
    pub async fn try_result(&self, handle: &SessionHandle) -> Result<Option<SessionReport>> {
        let report = self.receiver(handle).await?;
        let current = report.borrow().clone();
        Ok(current)
    }

    async fn receiver(&self, handle: &SessionHandle) -> Result<watch::Receiver<Option<SessionReport>>> {
        let sessions = self.sessions.read().await;
        sessions
            .get(&handle.id)
            .map(|entry| entry.report.clone())
            .ok_or_else(|| Error::SessionNotFound(handle.id.to_string()))
    }

    /// Ask one session to stop. It ends `Aborted`.
    pub async fn cancel(&self, handle: &SessionHandle) -> Result<()> {
        let sessions = self.sessions.read().await;
        let entry = sessions
            .get(&handle.id)
            .ok_or_else(|| Error::SessionNotFound(handle.id.to_string()))?;
        entry.cancel.cancel();
        Ok(())
    }

    /// Handles of every session this manager started.
    pub async fn sessions(&self) -> Vec<SessionHandle> {
        let mut ids: Vec<SessionId> = self.sessions.read().await.keys().copied().collect();
        ids.sort();
        ids.into_iter().map(|id| SessionHandle { id }).collect()
    }

    /// Forget every finished session, returning how many were dropped.
    /// Their handles answer [`Error::SessionNotFound`] afterwards.
    pub async fn prune_finished(&self) -> usize {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, entry| entry.report.borrow().is_none());
        let pruned = before - sessions.len();
        if pruned > 0 {
            info!(pruned, live = sessions.len(), "finished sessions pruned");
        }
        pruned
    }

    /// Cancel every live session and wait for them to wind down. Reports
    /// stay available through [`SessionManager::result`].
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let joins: Vec<(SessionId, JoinHandle<()>)> = {
            let mut sessions = self.sessions.write().await;
            sessions
                .iter_mut()
                .filter_map(|(id, entry)| entry.join.take().map(|join| (*id, join)))
                .collect()
        };
        for (id, join) in joins {
            if let Err(e) = join.await {
                warn!(session = %id.short(), error = %e, "session task failed");
            }
        }
        info!("session manager shut down");
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("collaborators", &self.collaborators)
            .field("max_parallel", &self.config.max_parallel)
            .finish_non_exhaustive()
    }
}
