//! Worker pool with bounded concurrency.
//!
//! The `WorkerPool` spawns one disposable [`Worker`] per dispatched task,
//! enforces the `max_parallel` limit and reports outcomes through a
//! channel. Outcomes from workers the pool no longer tracks (for example
//! after [`WorkerPool::disregard_all`]) are meant to be ignored.

use crate::core::{Task, TaskId};
use crate::error::{Error, Result};
use crate::orchestration::collaborators::{Actuator, Collaborators, Decider, Perception};
use crate::orchestration::worker::{ElementCache, Worker, WorkerConfig, WorkerId, WorkerOutcome};
use crate::storage::AccomplishmentLedger;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Events emitted by the pool.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    /// A worker reached a terminal outcome.
    Finished {
        worker: WorkerId,
        task: TaskId,
        outcome: WorkerOutcome,
    },
}

/// A worker tracked by the pool.
#[derive(Debug)]
pub struct WorkerHandle {
    pub id: WorkerId,
    pub task: TaskId,
    pub started_at: Instant,
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

impl WorkerHandle {
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

/// Manages the concurrently running workers of one session.
pub struct WorkerPool {
    active: HashMap<WorkerId, WorkerHandle>,
    max_parallel: usize,
    event_tx: mpsc::Sender<WorkerEvent>,
    perception: Arc<dyn Perception>,
    actuator: Arc<dyn Actuator>,
    decider: Arc<dyn Decider>,
    cache: Arc<ElementCache>,
    ledger: Arc<AccomplishmentLedger>,
    config: WorkerConfig,
    /// Parent of every worker's cancellation token.
    shutdown: CancellationToken,
}

impl WorkerPool {
    pub fn new(
        max_parallel: usize,
        collaborators: &Collaborators,
        cache: Arc<ElementCache>,
        ledger: Arc<AccomplishmentLedger>,
        config: WorkerConfig,
        event_tx: mpsc::Sender<WorkerEvent>,
    ) -> Self {
        Self {
            active: HashMap::new(),
            max_parallel,
            event_tx,
            perception: collaborators.perception.clone(),
            actuator: collaborators.actuator.clone(),
            decider: collaborators.decider.clone(),
            cache,
            ledger,
            config,
            shutdown: CancellationToken::new(),
        }
    }

    /// Spawn a worker for `task`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PoolFull`] if `max_parallel` workers are active.
    pub fn spawn(&mut self, task: Task) -> Result<WorkerId> {
        if !self.has_capacity() {
            return Err(Error::PoolFull {
                max: self.max_parallel,
            });
        }

        let id = WorkerId::new();
        let task_id = task.id;
        let cancel = self.shutdown.child_token();
        let worker = Worker::new(
            id,
            task,
            self.perception.clone(),
            self.actuator.clone(),
            self.decider.clone(),
            self.cache.clone(),
            self.ledger.clone(),
            self.config.clone(),
            cancel.clone(),
        );

        let tx = self.event_tx.clone();
        let join = tokio::spawn(async move {
            let outcome = worker.run().await;
            // The receiver is gone once the session ended
            let _ = tx
                .send(WorkerEvent::Finished {
                    worker: id,
                    task: task_id,
                    outcome,
                })
                .await;
        });

        self.active.insert(
            id,
            WorkerHandle {
                id,
                task: task_id,
                started_at: Instant::now(),
                cancel,
                join,
            },
        );
        info!(worker = %id, task = %task_id.short(), active = self.active.len(), "worker spawned");
        Ok(id)
    }

    /// Stop tracking a finished worker. Returns its task, or `None` if the
    /// worker is unknown and its outcome must be ignored.
    pub fn complete(&mut self, id: &WorkerId) -> Option<TaskId> {
        let handle = self.active.remove(id)?;
        debug!(
            worker = %id,
            task = %handle.task.short(),
            elapsed_ms = handle.started_at.elapsed().as_millis() as u64,
            "worker released"
        );
        Some(handle.task)
    }

    /// Cancel and forget every active worker without waiting for them.
    /// Returns the tasks they were running.
    pub fn disregard_all(&mut self) -> Vec<TaskId> {
        self.shutdown.cancel();
        let tasks: Vec<TaskId> = self.active.drain().map(|(_, h)| h.task).collect();
        if !tasks.is_empty() {
            info!(count = tasks.len(), "disregarding in-flight workers");
        }
        tasks
    }

    /// Cancel a single worker. Its outcome is still reported.
    pub fn cancel(&self, id: &WorkerId) -> bool {
        match self.active.get(id) {
            Some(handle) => {
                handle.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: &WorkerId) -> Option<&WorkerHandle> {
        self.active.get(id)
    }

    /// The worker running `task`, if any.
    pub fn worker_for(&self, task: &TaskId) -> Option<WorkerId> {
        self.active
            .values()
            .find(|h| &h.task == task)
            .map(|h| h.id)
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn is_idle(&self) -> bool {
        self.active.is_empty()
    }

    pub fn has_capacity(&self) -> bool {
        self.active_count() < self.max_parallel
    }

    pub fn available_slots(&self) -> usize {
        self.max_parallel.saturating_sub(self.active_count())
    }

    pub fn max_parallel(&self) -> usize {
        self.max_parallel
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("active", &self.active.len())
            .field("max_parallel", &self.max_parallel)
            .finish_non_exhaustive()
    }
}
