//! Execution supervisor for one task graph.
//!
//! The `ExecutionSupervisor` owns the graph of a session and drives it to a
//! terminal state. Each iteration it checks health, handles deadlocks,
//! dispatches ready tasks to the worker pool and folds worker outcomes back
//! into the graph through the recovery policy. It is the only writer of the
//! graph, so every status transition is serialized with dispatch and
//! completion handling.

use crate::core::{Task, TaskGraph, TaskId, TaskStatus};
use crate::error::{Error, Result};
use crate::orchestration::collaborators::Collaborators;
use crate::orchestration::health::{duration_secs, HealthAssessment, HealthConfig, HealthMonitor};
use crate::orchestration::pool::{WorkerEvent, WorkerPool};
use crate::orchestration::recovery::{
    deadlock_target, AppliedDecision, Directive, RecoveryConfig, RecoveryPolicy, Trigger,
};
use crate::orchestration::worker::{ElementCache, WorkerConfig, WorkerOutcome};
use crate::storage::{AccomplishmentLedger, ContextEntry, ContextKind, ContextStore};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Default number of tasks executing at once.
pub const DEFAULT_MAX_PARALLEL: usize = 4;

/// Upper bound for `max_parallel`.
pub const MAX_PARALLEL_LIMIT: usize = 8;

/// Default supervisor iteration interval.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2000;

/// Default pause after a WAIT directive.
pub const DEFAULT_WAIT_DELAY_MS: u64 = 5000;

/// Configuration for a supervised session.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub max_parallel: usize,
    pub poll_interval: Duration,
    pub wait_delay: Duration,
    pub worker: WorkerConfig,
    pub recovery: RecoveryConfig,
    pub health: HealthConfig,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            max_parallel: DEFAULT_MAX_PARALLEL,
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            wait_delay: Duration::from_millis(DEFAULT_WAIT_DELAY_MS),
            worker: WorkerConfig::default(),
            recovery: RecoveryConfig::default(),
            health: HealthConfig::default(),
        }
    }
}

impl SupervisorConfig {
    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel;
        self
    }

    pub fn validate(&self) -> Result<()> {
        validate_max_parallel(self.max_parallel)?;
        if self.poll_interval.is_zero() {
            return Err(Error::Validation(
                "poll interval must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Check that `max_parallel` lies in `1..=8`.
pub fn validate_max_parallel(max_parallel: usize) -> Result<()> {
    if !(1..=MAX_PARALLEL_LIMIT).contains(&max_parallel) {
        return Err(Error::Validation(format!(
            "max_parallel must be between 1 and {}, got {}",
            MAX_PARALLEL_LIMIT, max_parallel
        )));
    }
    Ok(())
}

/// How a session ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SessionOutcome {
    /// Every task reached a terminal state without an abort.
    Succeeded,
    /// An ABORT was applied.
    Aborted {
        /// Task whose handling led to the abort, if any.
        trigger: Option<TaskId>,
        reason: String,
    },
}

impl SessionOutcome {
    pub fn is_succeeded(&self) -> bool {
        matches!(self, SessionOutcome::Succeeded)
    }
}

/// Final state of one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskReport {
    pub id: TaskId,
    pub description: String,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub superseded: bool,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_failure: Option<String>,
}

impl From<&Task> for TaskReport {
    fn from(task: &Task) -> Self {
        Self {
            id: task.id,
            description: task.description.clone(),
            status: task.status,
            superseded: task.superseded,
            attempts: task.attempts,
            last_failure: task.last_failure.clone(),
        }
    }
}

/// Result of a finished session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionReport {
    pub session_id: String,
    #[serde(flatten)]
    pub outcome: SessionOutcome,
    pub tasks: Vec<TaskReport>,
    pub iterations: u64,
    pub decisions: Vec<AppliedDecision>,
    #[serde(with = "duration_secs")]
    pub elapsed: Duration,
}

impl SessionReport {
    pub fn completed_count(&self) -> usize {
        self.count(TaskStatus::Completed)
    }

    pub fn count(&self, status: TaskStatus) -> usize {
        self.tasks.iter().filter(|t| t.status == status).count()
    }

    pub fn task(&self, id: &TaskId) -> Option<&TaskReport> {
        self.tasks.iter().find(|t| &t.id == id)
    }

    /// Directives applied, in order.
    pub fn directives(&self) -> Vec<Directive> {
        self.decisions.iter().map(|d| d.directive).collect()
    }
}

/// Live view of a session, refreshed every iteration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionStatus {
    pub running: bool,
    pub health: HealthAssessment,
    pub completed_count: usize,
    pub total_count: usize,
    pub iteration: u64,
}

/// Drives one task graph to completion.
pub struct ExecutionSupervisor {
    session_id: String,
    graph: TaskGraph,
    pool: WorkerPool,
    events: mpsc::Receiver<WorkerEvent>,
    health: HealthMonitor,
    policy: RecoveryPolicy,
    cache: Arc<ElementCache>,
    ledger: Arc<AccomplishmentLedger>,
    context: Arc<dyn ContextStore>,
    config: SupervisorConfig,
    status: Arc<RwLock<SessionStatus>>,
    cancel: CancellationToken,
    iterations: u64,
    decisions: Vec<AppliedDecision>,
    aborted: Option<(Option<TaskId>, String)>,
    paused_until: Option<Instant>,
}

impl ExecutionSupervisor {
    /// Create a supervisor with a fresh ledger for `session_id`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] when the configuration is out of range.
    pub fn new(
        session_id: &str,
        graph: TaskGraph,
        collaborators: &Collaborators,
        cache: Arc<ElementCache>,
        config: SupervisorConfig,
    ) -> Result<Self> {
        config.validate()?;

        let ledger = Arc::new(AccomplishmentLedger::new(session_id));
        let (event_tx, events) = mpsc::channel(config.max_parallel * 4);
        let pool = WorkerPool::new(
            config.max_parallel,
            collaborators,
            cache.clone(),
            ledger.clone(),
            config.worker.clone(),
            event_tx,
        );
        let policy = RecoveryPolicy::new(config.recovery.clone(), collaborators.oracle.clone())
            .with_planner(collaborators.planner.clone());

        Ok(Self {
            session_id: session_id.to_string(),
            graph,
            pool,
            events,
            health: HealthMonitor::new(config.health.clone()),
            policy,
            cache,
            ledger,
            context: collaborators.context.clone(),
            config,
            status: Arc::new(RwLock::new(SessionStatus::default())),
            cancel: CancellationToken::new(),
            iterations: 0,
            decisions: Vec::new(),
            aborted: None,
            paused_until: None,
        })
    }

    /// Goal the graph was planned from, passed on to recovery.
    pub fn with_goal(mut self, goal: &str) -> Self {
        self.policy = self.policy.with_goal(goal);
        self
    }

    /// Use an externally owned cancellation token.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn graph(&self) -> &TaskGraph {
        &self.graph
    }

    pub fn ledger(&self) -> Arc<AccomplishmentLedger> {
        self.ledger.clone()
    }

    /// Shared handle to the live status.
    pub fn status_handle(&self) -> Arc<RwLock<SessionStatus>> {
        self.status.clone()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run until the graph is complete or the session is aborted.
    pub async fn run(mut self) -> SessionReport {
        let started = Instant::now();
        info!(
            session = %self.session_id,
            tasks = self.graph.task_count(),
            max_parallel = self.config.max_parallel,
            "session started"
        );
        let message = format!("session started with {} task(s)", self.graph.task_count());
        self.note(ContextKind::SessionStarted, None, message).await;
        self.publish(true).await;

        while !self.is_finished() {
            if self.cancel.is_cancelled() {
                self.abort(None, "session cancelled".to_string()).await;
                break;
            }
            self.iterations += 1;
            if let Err(e) = self.iterate().await {
                error!(session = %self.session_id, error = %e, "fatal graph error");
                self.abort(None, e.to_string()).await;
            }
            let purged = self.cache.purge_expired().await;
            if purged > 0 {
                debug!(purged, "expired cache entries purged");
            }
            self.publish(true).await;
        }

        self.finish(started).await
    }

    fn is_finished(&self) -> bool {
        self.aborted.is_some() || self.graph.is_complete()
    }

    fn paused(&mut self) -> bool {
        match self.paused_until {
            Some(until) if Instant::now() < until => true,
            Some(_) => {
                self.paused_until = None;
                false
            }
            None => false,
        }
    }

    /// One supervisor iteration.
    async fn iterate(&mut self) -> Result<()> {
        if !self.paused() {
            let assessment = self.health.assessment(&self.graph);
            if assessment.needs_attention() && self.policy.may_intervene_for_health() {
                warn!(status = %assessment.status, concerns = ?assessment.concerns, "session health degraded");
                let target = self.graph.unresolved_failures().first().map(|t| (*t).clone());
                let reason = assessment.concerns.join("; ");
                self.recover(Trigger::Health, target, &reason, &assessment).await?;
                if self.is_finished() {
                    return Ok(());
                }
            }

            if self.graph.has_deadlock() {
                let blocked = self.graph.blocked_tasks().len();
                let failed = self.graph.unresolved_failures().len();
                let reason = format!(
                    "deadlock: {} blocked and {} failed task(s) with nothing running",
                    blocked, failed
                );
                warn!(blocked, failed, "deadlock detected");
                let target = deadlock_target(&self.graph).cloned();
                let assessment = self.health.assessment(&self.graph);
                self.recover(Trigger::Deadlock, target, &reason, &assessment).await?;
                if self.is_finished() {
                    return Ok(());
                }
            }
        }

        if !self.paused() {
            self.dispatch()?;
        }

        tokio::select! {
            event = self.events.recv() => {
                if let Some(event) = event {
                    self.handle_event(event).await?;
                }
            }
            _ = tokio::time::sleep(self.config.poll_interval) => {}
            _ = self.cancel.cancelled() => {}
        }

        // Fold in everything else that already arrived
        while !self.is_finished() {
            match self.events.try_recv() {
                Ok(event) => self.handle_event(event).await?,
                Err(_) => break,
            }
        }
        Ok(())
    }

    /// Hand ready tasks to free worker slots. Tasks are marked RUNNING before
    /// their worker is spawned. Returns the number dispatched.
    pub fn dispatch(&mut self) -> Result<usize> {
        let slots = self.pool.available_slots();
        if slots == 0 {
            return Ok(0);
        }
        let ready: Vec<Task> = self
            .graph
            .ready_tasks()
            .into_iter()
            .take(slots)
            .cloned()
            .collect();

        let dispatched = ready.len();
        for task in &ready {
            self.graph.mark_running(&task.id)?;
        }
        for task in ready {
            let task_id = task.id;
            let worker = self.pool.spawn(task)?;
            debug!(task = %task_id.short(), worker = %worker, "task dispatched");
        }
        Ok(dispatched)
    }

    async fn handle_event(&mut self, event: WorkerEvent) -> Result<()> {
        let WorkerEvent::Finished {
            worker,
            task,
            outcome,
        } = event;

        if self.pool.complete(&worker).is_none() {
            debug!(worker = %worker, task = %task.short(), "ignoring outcome of disregarded worker");
            return Ok(());
        }

        match outcome {
            WorkerOutcome::Success => {
                self.graph.mark_completed(&task)?;
                self.health.record_completion();
                self.policy.note_completion();
                info!(task = %task.short(), "task completed");
                self.note(ContextKind::TaskCompleted, Some(task), "task completed".to_string())
                    .await;
            }
            WorkerOutcome::NeedsReplan(reason) => {
                self.fail(task, &reason).await?;
                let target = self.graph.get_task(&task).cloned();
                let assessment = self.health.assessment(&self.graph);
                self.recover(Trigger::WorkerReplan, target, &reason, &assessment)
                    .await?;
            }
            WorkerOutcome::Failure(reason) => {
                self.fail(task, &reason).await?;
                let target = self.graph.get_task(&task).cloned();
                let assessment = self.health.assessment(&self.graph);
                self.recover(Trigger::Failure, target, &reason, &assessment)
                    .await?;
            }
        }
        Ok(())
    }

    async fn fail(&mut self, task: TaskId, reason: &str) -> Result<()> {
        self.graph.mark_failed(&task, reason)?;
        self.health.record_failure();
        warn!(task = %task.short(), reason, "task failed");
        self.note(ContextKind::TaskFailed, Some(task), reason.to_string())
            .await;
        Ok(())
    }

    async fn recover(
        &mut self,
        trigger: Trigger,
        target: Option<Task>,
        reason: &str,
        health: &HealthAssessment,
    ) -> Result<()> {
        let decision = self
            .policy
            .decide(trigger, target.as_ref(), reason, health)
            .await;
        let applied = self.policy.apply(&decision, &mut self.graph)?;

        warn!(
            trigger = ?applied.trigger,
            directive = %applied.directive,
            task = ?applied.target.map(|t| t.short()),
            added = applied.added_tasks.len(),
            reason,
            "recovery directive applied"
        );
        let message = match &applied.note {
            Some(note) => format!("{} for {:?}: {} ({})", applied.directive, trigger, reason, note),
            None => format!("{} for {:?}: {}", applied.directive, trigger, reason),
        };
        self.note(ContextKind::Decision, applied.target, message).await;

        match applied.directive {
            Directive::Abort => {
                self.abort(applied.target, reason.to_string()).await;
            }
            Directive::Wait => {
                self.paused_until = Some(Instant::now() + self.config.wait_delay);
                debug!(delay_ms = self.config.wait_delay.as_millis() as u64, "dispatch paused");
            }
            _ => {}
        }
        self.decisions.push(applied);
        Ok(())
    }

    /// Stop the session: every non-terminal task is aborted and in-flight
    /// workers are disregarded.
    async fn abort(&mut self, trigger: Option<TaskId>, reason: String) {
        if self.aborted.is_some() {
            return;
        }
        let aborted = self.graph.abort_remaining();
        let disregarded = self.pool.disregard_all();
        error!(
            session = %self.session_id,
            aborted = aborted.len(),
            disregarded = disregarded.len(),
            reason = %reason,
            "session aborted"
        );
        self.note(ContextKind::Aborted, trigger, reason.clone()).await;
        self.aborted = Some((trigger, reason));
    }

    async fn note(&self, kind: ContextKind, task: Option<TaskId>, message: String) {
        let mut entry = ContextEntry::new(&self.session_id, kind, message);
        if let Some(task) = task {
            entry = entry.for_task(task);
        }
        self.context.append(entry).await;
    }

    async fn publish(&self, running: bool) {
        let counts = self.graph.counts();
        let status = SessionStatus {
            running,
            health: self.health.assessment(&self.graph),
            completed_count: counts.completed,
            total_count: counts.total(),
            iteration: self.iterations,
        };
        *self.status.write().await = status;
    }

    async fn finish(mut self, started: Instant) -> SessionReport {
        self.pool.disregard_all();
        let outcome = match self.aborted.take() {
            Some((trigger, reason)) => SessionOutcome::Aborted { trigger, reason },
            None => SessionOutcome::Succeeded,
        };

        self.ledger.clear().await;
        self.publish(false).await;

        let counts = self.graph.counts();
        info!(
            session = %self.session_id,
            outcome = ?outcome,
            completed = counts.completed,
            skipped = counts.skipped,
            aborted = counts.aborted,
            iterations = self.iterations,
            "session finished"
        );
        let message = match &outcome {
            SessionOutcome::Succeeded => format!(
                "succeeded: {}/{} completed",
                counts.completed,
                counts.total()
            ),
            SessionOutcome::Aborted { reason, .. } => format!("aborted: {}", reason),
        };
        self.note(ContextKind::SessionFinished, None, message).await;

        SessionReport {
            session_id: self.session_id.clone(),
            outcome,
            tasks: self.graph.all_tasks().into_iter().map(TaskReport::from).collect(),
            iterations: self.iterations,
            decisions: std::mem::take(&mut self.decisions),
            elapsed: started.elapsed(),
        }
    }
}

impl std::fmt::Debug for ExecutionSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionSupervisor")
            .field("session_id", &self.session_id)
            .field("graph", &self.graph)
            .field("pool", &self.pool)
            .field("iterations", &self.iterations)
            .finish_non_exhaustive()
    }
}
