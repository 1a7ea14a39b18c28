//! Recovery policy scenarios driven through the supervisor.

use std::sync::Arc;

use async_trait::async_trait;

use overseer::core::{Action, Task, TaskStatus};
use overseer::orchestration::recovery::DEFAULT_REPLAN_COOLDOWN_SECS;
use overseer::orchestration::{
    Decider, Directive, Observation, Planner, RecoveryContext, Step, Trigger,
};
use overseer::plan::{Plan, PlanStep};
use overseer::storage::LedgerView;
use overseer::Result;

use crate::fixtures::{chain, collaborators, independent, quiet_config, supervisor, ScriptedOracle};

/// Test: Replan cooldown
/// Given two tasks that fail at the same moment and an oracle that always says REPLAN
/// When the second failure arrives right after the first replan
/// Then it is deferred with WAIT until the cooldown has passed, and only then replanned
#[tokio::test(start_paused = true)]
async fn test_second_replan_waits_out_cooldown() {
    let (graph, ids) = independent(&["Click a", "Click b"]);
    let collaborators = collaborators(&ids, ScriptedOracle::new(Directive::Replan));

    let report = supervisor(graph, &collaborators, quiet_config(2)).run().await;

    assert!(report.outcome.is_succeeded());
    let directives = report.directives();
    assert_eq!(directives.first(), Some(&Directive::Replan));
    assert_eq!(directives.last(), Some(&Directive::Replan));
    assert_eq!(
        directives.iter().filter(|d| **d == Directive::Replan).count(),
        2
    );
    assert!(report.decisions.iter().any(|d| {
        d.directive == Directive::Wait && d.note.as_deref() == Some("replan cooldown active")
    }));
    assert!(report.elapsed.as_secs() >= DEFAULT_REPLAN_COOLDOWN_SECS);

    for id in &ids {
        let task = report.task(id).unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.superseded);
    }
    assert_eq!(report.tasks.len(), 4);
    assert_eq!(report.count(TaskStatus::Completed), 2);
}

/// Planner that answers every recovery request with a two-step fix.
struct FixPlanner;

#[async_trait]
impl Planner for FixPlanner {
    async fn create_plan(&self, goal: &str) -> Result<Plan> {
        Ok(Plan::new(goal, Vec::new()))
    }

    async fn recovery_plan(&self, _goal: &str, _context: &RecoveryContext) -> Result<Vec<PlanStep>> {
        Ok(vec![
            PlanStep::new(1, "reload", "Reload the form"),
            PlanStep::new(2, "refill", "Fill the form again").depends_on([1]),
        ])
    }
}

/// Test: Planner-supplied recovery steps
/// Given a failing step with a dependent and an oracle that says REPLAN without steps
/// When the failure is recovered
/// Then the planner's steps are merged ahead of the dependent, which still completes
#[tokio::test(start_paused = true)]
async fn test_replan_uses_planner_steps() {
    let (graph, ids) = chain(&["Fill form", "Submit form"]);
    let collaborators = collaborators(&ids[..1], ScriptedOracle::new(Directive::Replan))
        .with_planner(Arc::new(FixPlanner));

    let report = supervisor(graph, &collaborators, quiet_config(2)).run().await;

    assert!(report.outcome.is_succeeded());
    assert_eq!(report.directives(), vec![Directive::Replan]);

    let added = &report.decisions[0].added_tasks;
    assert_eq!(added.len(), 2);
    let descriptions: Vec<&str> = added
        .iter()
        .map(|id| report.task(id).unwrap().description.as_str())
        .collect();
    assert_eq!(descriptions, vec!["Reload the form", "Fill the form again"]);
    assert!(added
        .iter()
        .all(|id| report.task(id).unwrap().status == TaskStatus::Completed));

    assert!(report.task(&ids[0]).unwrap().superseded);
    assert_eq!(report.task(&ids[1]).unwrap().status, TaskStatus::Completed);
}

/// Test: Replan budget
/// Given a replan budget of one and two tasks failing in sequence
/// When the second failure asks for another replan
/// Then the policy escalates to ABORT
#[tokio::test(start_paused = true)]
async fn test_exhausted_replan_budget_aborts() {
    let (graph, ids) = chain(&["Click a", "Click b"]);
    // The recovery task for "Click a" succeeds; "Click b" then fails
    let collaborators = collaborators(&ids, ScriptedOracle::new(Directive::Replan));
    let mut config = quiet_config(1);
    config.recovery.max_replans = 1;
    config.recovery.replan_cooldown = std::time::Duration::ZERO;

    let report = supervisor(graph, &collaborators, config).run().await;

    assert!(!report.outcome.is_succeeded());
    assert_eq!(report.directives(), vec![Directive::Replan, Directive::Abort]);
    assert_eq!(report.task(&ids[1]).unwrap().status, TaskStatus::Aborted);
}

/// Decider that reports every planned task as not matching the screen, while
/// recovery tasks click once and complete.
struct WrongPageDecider;

#[async_trait]
impl Decider for WrongPageDecider {
    async fn decide(&self, task: &Task, _observation: &Observation, ledger: &LedgerView) -> Result<Step> {
        if !task.description.starts_with("Recover: ") {
            return Ok(Step::Mismatch("wrong page".to_string()));
        }
        if ledger.task_progressed() {
            return Ok(Step::Complete);
        }
        Ok(Step::Act(Action::click(&format!("{} [{}]", task.description, task.id))))
    }
}

/// Test: Worker replans bypass every replan guard
/// Given six tasks whose workers all report a mismatch, running two at a time
/// When more replans are requested than the budget allows, inside one cooldown window
/// Then every request is applied as REPLAN without consulting the oracle and the session succeeds
#[tokio::test(start_paused = true)]
async fn test_worker_replans_ignore_cooldown_and_budget() {
    let descriptions = ["Open cart", "Pick size", "Pick color", "Add to cart", "Apply coupon", "Pay"];
    let (graph, ids) = independent(&descriptions);
    let oracle = ScriptedOracle::new(Directive::Abort);
    let mut collaborators = collaborators(&[], oracle.clone());
    collaborators.decider = Arc::new(WrongPageDecider);
    let config = quiet_config(2);
    let max_replans = config.recovery.max_replans as usize;

    let report = supervisor(graph, &collaborators, config).run().await;

    assert!(report.outcome.is_succeeded());
    assert_eq!(report.decisions.len(), descriptions.len());
    assert!(report.decisions.len() > max_replans);
    for decision in &report.decisions {
        assert_eq!(decision.trigger, Trigger::WorkerReplan);
        assert_eq!(decision.directive, Directive::Replan);
        assert_eq!(decision.note, None);
    }
    assert!(oracle.triggers().await.is_empty());
    assert!(report.elapsed.as_secs() < DEFAULT_REPLAN_COOLDOWN_SECS);

    for id in &ids {
        assert!(report.task(id).unwrap().superseded);
    }
    assert_eq!(report.count(TaskStatus::Completed), descriptions.len());
}
