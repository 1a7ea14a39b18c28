//! In-process collaborators for rehearsing a plan without a live target.
//!
//! Every task clicks one element and completes once that click succeeded.
//! Tasks listed as failing have every action rejected by the actuator, so
//! their workers give up and recovery kicks in. Snapshots are identical for
//! every task, which makes the artifact cache visible in the report.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;

use crate::core::{Action, Task, TaskId};
use crate::orchestration::collaborators::{
    ActionOutcome, Actuator, Collaborators, Decider, Element, Observation, Perception, Snapshot, Step,
};
use crate::orchestration::oracle::FallbackOracle;
use crate::orchestration::supervisor::{SessionReport, SupervisorConfig};
use crate::plan::{self, Plan};
use crate::session::SessionManager;
use crate::storage::{CacheConfig, ContextStore, LedgerView};
use crate::{Error, Result};

const SNAPSHOT: &[u8] = b"dry-run screen";

/// Returns the same snapshot for every task.
#[derive(Debug, Default)]
pub struct DryRunPerception;

#[async_trait]
impl Perception for DryRunPerception {
    async fn snapshot(&self, _task: &Task) -> Result<Snapshot> {
        Ok(Snapshot::new(SNAPSHOT).with_label("dry-run"))
    }

    async fn parse(&self, _snapshot: &Snapshot) -> Result<Vec<Element>> {
        Ok(vec![Element::new(1, "button", "Continue")])
    }
}

/// Accepts every action except those aimed at a failing task.
#[derive(Debug, Default)]
pub struct DryRunActuator {
    failing: HashSet<TaskId>,
}

impl DryRunActuator {
    pub fn new(failing: impl IntoIterator<Item = TaskId>) -> Self {
        Self {
            failing: failing.into_iter().collect(),
        }
    }

    fn task_of(target: &str) -> Option<TaskId> {
        let (_, tail) = target.rsplit_once(" [")?;
        tail.strip_suffix(']')?.parse().ok()
    }
}

#[async_trait]
impl Actuator for DryRunActuator {
    async fn perform(&self, action: &Action) -> Result<ActionOutcome> {
        match Self::task_of(&action.target) {
            Some(task) if self.failing.contains(&task) => {
                Ok(ActionOutcome::failed("target rejected the action"))
            }
            _ => Ok(ActionOutcome::ok()),
        }
    }
}

/// Clicks once per task, then completes.
#[derive(Debug, Default)]
pub struct DryRunDecider;

#[async_trait]
impl Decider for DryRunDecider {
    async fn decide(&self, task: &Task, _observation: &Observation, ledger: &LedgerView) -> Result<Step> {
        if ledger.task_progressed() {
            return Ok(Step::Complete);
        }
        Ok(Step::Act(Action::click(&format!(
            "{} [{}]",
            task.description, task.id
        ))))
    }
}

/// Dry-run collaborators with the built-in fallback oracle.
pub fn collaborators(failing: impl IntoIterator<Item = TaskId>) -> Collaborators {
    Collaborators::new(
        Arc::new(DryRunPerception),
        Arc::new(DryRunActuator::new(failing)),
        Arc::new(DryRunDecider),
        Arc::new(FallbackOracle::default()),
    )
}

/// Map `--fail` arguments (step numbers or step names) to task ids.
pub fn resolve_failing(plan: &Plan, built: &plan::BuiltPlan, names: &[String]) -> Result<Vec<TaskId>> {
    names
        .iter()
        .map(|name| {
            let step = match name.parse::<u32>() {
                Ok(number) => plan.step(number),
                Err(_) => plan.steps.iter().find(|s| &s.name == name),
            };
            step.and_then(|s| built.task_id(s.number))
                .ok_or_else(|| Error::Validation(format!("unknown step: {}", name)))
        })
        .collect()
}

/// Rehearse `plan` with the real supervisor and dry-run collaborators.
pub async fn run(
    plan: &Plan,
    fail: &[String],
    config: SupervisorConfig,
    cache: &CacheConfig,
    context: Arc<dyn ContextStore>,
) -> Result<SessionReport> {
    let built = plan::build_graph(&plan.steps)?;
    let failing = resolve_failing(plan, &built, fail)?;
    let max_parallel = config.max_parallel;

    let manager = SessionManager::new(collaborators(failing).with_context(context), config, cache);
    let handle = manager
        .submit_for_goal(built.graph, max_parallel, &plan.goal)
        .await?;
    let report = manager.result(&handle).await;
    manager.shutdown().await;
    report
}
