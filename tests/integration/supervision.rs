//! End-to-end supervision scenarios.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use overseer::core::{Action, TaskStatus};
use overseer::orchestration::{
    ActionOutcome, Actuator, Directive, FallbackOracle, HealthStatus, SessionOutcome, Trigger,
    WorkerConfig,
};
use overseer::Result;

use crate::fixtures::{
    chain, collaborators, independent, quiet_config, supervisor, ScriptedOracle, SlowActuator,
};

/// Test: Dependent chain runs to completion
/// Given a four-step chain and collaborators that always succeed
/// When the session runs
/// Then every task completes in order without any recovery decision
#[tokio::test(start_paused = true)]
async fn test_chain_of_four_succeeds() {
    let (graph, ids) = chain(&["Open app", "Open settings", "Toggle dark mode", "Save"]);
    let collaborators = collaborators(&[], Arc::new(FallbackOracle::default()));

    let report = supervisor(graph, &collaborators, quiet_config(2)).run().await;

    assert_eq!(report.outcome, SessionOutcome::Succeeded);
    assert_eq!(report.completed_count(), 4);
    assert!(report.decisions.is_empty());
    for id in &ids {
        let task = report.task(id).unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.attempts, 0);
    }
}

/// Counts concurrent actions and remembers the peak.
struct CountingActuator {
    current: AtomicUsize,
    peak: AtomicUsize,
}

#[async_trait]
impl Actuator for CountingActuator {
    async fn perform(&self, _action: &Action) -> Result<ActionOutcome> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(1)).await;
        self.current.fetch_sub(1, Ordering::SeqCst);
        Ok(ActionOutcome::ok())
    }
}

/// Test: Worker pool respects the concurrency bound
/// Given six independent tasks and max_parallel 3
/// When the session runs
/// Then at most three actions are in flight at any time
#[tokio::test(start_paused = true)]
async fn test_concurrency_never_exceeds_max_parallel() {
    let (graph, _) = independent(&["a", "b", "c", "d", "e", "f"]);
    let actuator = Arc::new(CountingActuator {
        current: AtomicUsize::new(0),
        peak: AtomicUsize::new(0),
    });
    let mut collaborators = collaborators(&[], Arc::new(FallbackOracle::default()));
    collaborators.actuator = actuator.clone();

    let report = supervisor(graph, &collaborators, quiet_config(3)).run().await;

    assert!(report.outcome.is_succeeded());
    assert_eq!(report.completed_count(), 6);
    assert_eq!(actuator.peak.load(Ordering::SeqCst), 3);
}

/// Test: Consecutive skips force a replan
/// Given four independent failing tasks, one worker, and an oracle that always says SKIP
/// When each task fails in turn
/// Then the first three are skipped and the fourth failure is turned into a REPLAN
#[tokio::test(start_paused = true)]
async fn test_skip_ceiling_forces_replan() {
    let (graph, ids) = independent(&["Click a", "Click b", "Click c", "Click d"]);
    let oracle = ScriptedOracle::new(Directive::Skip);
    let collaborators = collaborators(&ids, oracle.clone());

    let report = supervisor(graph, &collaborators, quiet_config(1)).run().await;

    assert!(report.outcome.is_succeeded());
    assert_eq!(
        report.directives(),
        vec![Directive::Skip, Directive::Skip, Directive::Skip, Directive::Replan]
    );
    // The forced replan does not consult the oracle
    assert_eq!(oracle.triggers().await, vec![Trigger::Failure; 3]);

    let forced = &report.decisions[3];
    assert_eq!(forced.trigger, Trigger::Failure);
    assert!(forced.note.as_deref().unwrap().contains("consecutive skips"));
    assert_eq!(forced.added_tasks.len(), 1);

    assert_eq!(report.count(TaskStatus::Skipped), 3);
    let last = report.task(&ids[3]).unwrap();
    assert_eq!(last.status, TaskStatus::Failed);
    assert!(last.superseded);

    let recovery = report.task(&forced.added_tasks[0]).unwrap();
    assert!(recovery.description.starts_with("Recover: "));
    assert_eq!(recovery.status, TaskStatus::Completed);
}

/// Test: ABORT stops the session mid-execution
/// Given a three-step chain whose middle step fails and an oracle that says ABORT
/// When the middle step fails
/// Then every task is terminal, the tail never runs, and the session is aborted
#[tokio::test(start_paused = true)]
async fn test_abort_mid_execution() {
    let (graph, ids) = chain(&["Open page", "Submit broken form", "Confirm"]);
    let collaborators = collaborators(&ids[1..2], ScriptedOracle::new(Directive::Abort));

    let report = supervisor(graph, &collaborators, quiet_config(2)).run().await;

    match &report.outcome {
        SessionOutcome::Aborted { trigger, .. } => assert_eq!(*trigger, Some(ids[1])),
        other => panic!("expected abort, got {:?}", other),
    }
    assert_eq!(report.task(&ids[0]).unwrap().status, TaskStatus::Completed);
    assert_eq!(report.task(&ids[1]).unwrap().status, TaskStatus::Aborted);
    assert_eq!(report.task(&ids[2]).unwrap().status, TaskStatus::Aborted);
    assert!(report.tasks.iter().all(|t| matches!(
        t.status,
        TaskStatus::Completed | TaskStatus::Aborted
    )));
    assert_eq!(report.directives(), vec![Directive::Abort]);
}

/// Test: Stalled session is reported as critical
/// Given two tasks whose actions take longer than the stall threshold
/// When 70 seconds pass without a completion
/// Then the oracle is consulted for a CRITICAL health alarm about missing progress
#[tokio::test(start_paused = true)]
async fn test_stall_escalates_to_critical() {
    let (graph, _) = independent(&["Slow export", "Slow import"]);
    let oracle = ScriptedOracle::new(Directive::Wait);
    let mut collaborators = collaborators(&[], oracle.clone());
    collaborators.actuator = Arc::new(SlowActuator {
        delay: Duration::from_secs(300),
    });
    let mut config = quiet_config(2);
    config.worker = WorkerConfig {
        task_timeout: None,
        ..WorkerConfig::default()
    };

    let supervisor = supervisor(graph, &collaborators, config);
    let cancel = supervisor.cancellation_token();
    let status = supervisor.status_handle();
    let session = tokio::spawn(supervisor.run());

    tokio::time::sleep(Duration::from_secs(70)).await;

    let alarms: Vec<_> = oracle
        .contexts()
        .await
        .into_iter()
        .filter(|c| c.trigger == Trigger::Health)
        .collect();
    let critical = alarms
        .iter()
        .find(|c| c.health.status == HealthStatus::Critical)
        .expect("critical health alarm");
    assert!(critical
        .health
        .concerns
        .contains(&"no progress in 60s".to_string()));
    assert!(critical.health.time_since_last_completion > Duration::from_secs(60));
    assert_eq!(status.read().await.completed_count, 0);

    cancel.cancel();
    let report = session.await.unwrap();
    assert_eq!(
        report.outcome,
        SessionOutcome::Aborted {
            trigger: None,
            reason: "session cancelled".to_string(),
        }
    );
    assert_eq!(report.count(TaskStatus::Aborted), 2);
}
