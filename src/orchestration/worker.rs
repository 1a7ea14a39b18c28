//! Disposable worker running one task through observe -> decide -> act.
//!
//! Each round the worker:
//! 1. takes a snapshot and looks its content key up in the artifact cache,
//!    parsing only on a miss
//! 2. asks the decider for the next step, with a view of the session ledger
//! 3. skips actions the ledger already shows as accomplished, otherwise
//!    performs them and records the result
//!
//! Step errors are absorbed and counted; the worker gives up after too many
//! in a row. Iteration and wall-clock budgets end the run with an ordinary
//! failure. A decider-reported mismatch ends it with `NeedsReplan`.

use crate::core::{Action, Task};
use crate::error::Result;
use crate::orchestration::collaborators::{Actuator, Decider, Element, Observation, Perception, Step};
use crate::storage::{AccomplishmentLedger, ArtifactCache};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Default maximum observe/decide/act rounds per task.
pub const DEFAULT_MAX_ITERATIONS: u32 = 50;

/// Default wall-clock budget per task.
pub const DEFAULT_TASK_TIMEOUT_SECS: u64 = 300;

/// Default number of step errors in a row before giving up.
pub const DEFAULT_MAX_CONSECUTIVE_STEP_FAILURES: u32 = 5;

/// Number of ledger records shown to the decider.
const LEDGER_VIEW_LIMIT: usize = 10;

/// Cache of parsed snapshots, shared by every worker.
pub type ElementCache = ArtifactCache<Arc<Vec<Element>>>;

/// Configuration for workers.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub max_iterations: u32,
    /// `None` disables the wall-clock budget.
    pub task_timeout: Option<Duration>,
    pub max_consecutive_step_failures: u32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            task_timeout: Some(Duration::from_secs(DEFAULT_TASK_TIMEOUT_SECS)),
            max_consecutive_step_failures: DEFAULT_MAX_CONSECUTIVE_STEP_FAILURES,
        }
    }
}

/// Unique identifier for a worker. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkerId(pub Uuid);

impl WorkerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for WorkerId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "worker-{}", self.short())
    }
}

/// Terminal outcome of a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum WorkerOutcome {
    Success,
    Failure(String),
    /// The task does not match the observed state and needs new work.
    NeedsReplan(String),
}

/// One worker bound to exactly one task.
pub struct Worker {
    id: WorkerId,
    task: Task,
    perception: Arc<dyn Perception>,
    actuator: Arc<dyn Actuator>,
    decider: Arc<dyn Decider>,
    cache: Arc<ElementCache>,
    ledger: Arc<AccomplishmentLedger>,
    config: WorkerConfig,
    cancel: CancellationToken,
}

impl Worker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: WorkerId,
        task: Task,
        perception: Arc<dyn Perception>,
        actuator: Arc<dyn Actuator>,
        decider: Arc<dyn Decider>,
        cache: Arc<ElementCache>,
        ledger: Arc<AccomplishmentLedger>,
        config: WorkerConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id,
            task,
            perception,
            actuator,
            decider,
            cache,
            ledger,
            config,
            cancel,
        }
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    /// Run until success, failure, mismatch, budget exhaustion or cancellation.
    pub async fn run(self) -> WorkerOutcome {
        let cancel = self.cancel.clone();
        let timeout = self.config.task_timeout;
        let worker = self.id;

        let bounded = async {
            match timeout {
                Some(limit) => match tokio::time::timeout(limit, self.run_rounds()).await {
                    Ok(outcome) => outcome,
                    Err(_) => WorkerOutcome::Failure(format!(
                        "task timed out after {}s",
                        limit.as_secs()
                    )),
                },
                None => self.run_rounds().await,
            }
        };

        let outcome = tokio::select! {
            _ = cancel.cancelled() => WorkerOutcome::Failure("worker cancelled".to_string()),
            outcome = bounded => outcome,
        };
        debug!(worker = %worker, outcome = ?outcome, "worker finished");
        outcome
    }

    async fn run_rounds(&self) -> WorkerOutcome {
        let task_label = self.task.id.short();
        let mut step_failures = 0u32;
        let mut last_error = String::new();

        for round in 1..=self.config.max_iterations {
            if self.cancel.is_cancelled() {
                return WorkerOutcome::Failure("worker cancelled".to_string());
            }

            match self.round().await {
                Ok(RoundResult::Done(outcome)) => return outcome,
                Ok(RoundResult::Progress) => step_failures = 0,
                Ok(RoundResult::Skipped) => {}
                Err(e) => {
                    step_failures += 1;
                    last_error = e.to_string();
                    warn!(
                        worker = %self.id,
                        task = %task_label,
                        round,
                        failures = step_failures,
                        error = %e,
                        "worker step failed"
                    );
                    if step_failures >= self.config.max_consecutive_step_failures {
                        return WorkerOutcome::Failure(format!(
                            "gave up after {} consecutive step failures: {}",
                            step_failures, last_error
                        ));
                    }
                }
            }
        }

        let mut reason = format!(
            "task timed out: not completed within {} iterations",
            self.config.max_iterations
        );
        if !last_error.is_empty() {
            reason.push_str(&format!(" (last error: {})", last_error));
        }
        WorkerOutcome::Failure(reason)
    }

    async fn round(&self) -> Result<RoundResult> {
        let observation = self.observe().await?;
        let view = self.ledger.view(self.task.id, LEDGER_VIEW_LIMIT).await;

        match self.decider.decide(&self.task, &observation, &view).await? {
            Step::Complete => {
                info!(worker = %self.id, task = %self.task.id.short(), "task complete");
                Ok(RoundResult::Done(WorkerOutcome::Success))
            }
            Step::Mismatch(reason) => {
                warn!(worker = %self.id, task = %self.task.id.short(), reason = %reason, "task mismatch");
                Ok(RoundResult::Done(WorkerOutcome::NeedsReplan(reason)))
            }
            Step::Act(action) => self.act(action).await,
        }
    }

    async fn observe(&self) -> Result<Observation> {
        let snapshot = self.perception.snapshot(&self.task).await?;
        let key = snapshot.key();

        if let Some(elements) = self.cache.get(&key).await {
            return Ok(Observation {
                key,
                label: snapshot.label,
                elements,
                cached: true,
            });
        }

        let elements = Arc::new(self.perception.parse(&snapshot).await?);
        self.cache.insert(key.clone(), elements.clone()).await;
        Ok(Observation {
            key,
            label: snapshot.label,
            elements,
            cached: false,
        })
    }

    async fn act(&self, action: Action) -> Result<RoundResult> {
        if action.kind.is_dedupable() && self.ledger.has_accomplished(&action).await {
            debug!(worker = %self.id, action = %action, "already accomplished, skipping");
            return Ok(RoundResult::Skipped);
        }

        match self.actuator.perform(&action).await {
            Ok(outcome) => {
                let mut metadata = BTreeMap::new();
                if !outcome.observations.is_empty() {
                    metadata.insert("observations".to_string(), outcome.observations.join("; "));
                }
                metadata.insert("worker".to_string(), self.id.to_string());

                if outcome.success {
                    self.ledger.record(self.task.id, &action, metadata).await;
                    Ok(RoundResult::Progress)
                } else {
                    self.ledger
                        .record_attempt(self.task.id, &action, metadata)
                        .await;
                    Err(crate::Error::Action(format!(
                        "{} failed: {}",
                        action,
                        outcome.observations.join("; ")
                    )))
                }
            }
            Err(e) => {
                let mut metadata = BTreeMap::new();
                metadata.insert("error".to_string(), e.to_string());
                self.ledger
                    .record_attempt(self.task.id, &action, metadata)
                    .await;
                Err(e)
            }
        }
    }
}

enum RoundResult {
    Done(WorkerOutcome),
    /// An action succeeded.
    Progress,
    /// The chosen action was already accomplished.
    Skipped,
}
