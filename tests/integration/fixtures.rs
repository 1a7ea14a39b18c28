//! Test fixtures for integration tests.
//!
//! Provides helpers for:
//! - Oracles with a fixed directive that record what they were asked
//! - An actuator that takes a long time per action
//! - Predefined task graphs

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use overseer::core::{Action, Task, TaskGraph, TaskId};
use overseer::dry_run;
use overseer::orchestration::{
    ActionOutcome, Actuator, Collaborators, Directive, ElementCache, ExecutionSupervisor, Oracle,
    OracleDecision, RecoveryContext, SupervisorConfig, Trigger,
};
use overseer::Result;

/// Oracle that always answers with the same directive and keeps every
/// context it was consulted with.
pub struct ScriptedOracle {
    directive: Directive,
    seen: Mutex<Vec<RecoveryContext>>,
}

impl ScriptedOracle {
    pub fn new(directive: Directive) -> Arc<Self> {
        Arc::new(Self {
            directive,
            seen: Mutex::new(Vec::new()),
        })
    }

    pub async fn contexts(&self) -> Vec<RecoveryContext> {
        self.seen.lock().await.clone()
    }

    pub async fn triggers(&self) -> Vec<Trigger> {
        self.seen.lock().await.iter().map(|c| c.trigger).collect()
    }
}

#[async_trait]
impl Oracle for ScriptedOracle {
    async fn decide(&self, context: &RecoveryContext) -> Result<OracleDecision> {
        self.seen.lock().await.push(context.clone());
        Ok(OracleDecision::new(self.directive))
    }
}

/// Actuator that takes `delay` for every action, then succeeds.
pub struct SlowActuator {
    pub delay: Duration,
}

#[async_trait]
impl Actuator for SlowActuator {
    async fn perform(&self, _action: &Action) -> Result<ActionOutcome> {
        tokio::time::sleep(self.delay).await;
        Ok(ActionOutcome::ok())
    }
}

/// Dry-run collaborators where `failing` tasks always fail, advised by `oracle`.
pub fn collaborators(failing: &[TaskId], oracle: Arc<dyn Oracle>) -> Collaborators {
    let mut collaborators = dry_run::collaborators(failing.iter().copied());
    collaborators.oracle = oracle;
    collaborators
}

pub fn cache() -> Arc<ElementCache> {
    Arc::new(ElementCache::new(Duration::from_secs(60), 64))
}

/// Supervisor config with the success-rate alarm effectively disabled, so
/// failure-driven scenarios only see the directives they provoke.
pub fn quiet_config(max_parallel: usize) -> SupervisorConfig {
    let mut config = SupervisorConfig::default().with_max_parallel(max_parallel);
    config.health.min_samples = 100;
    config
}

pub fn supervisor(
    graph: TaskGraph,
    collaborators: &Collaborators,
    config: SupervisorConfig,
) -> ExecutionSupervisor {
    ExecutionSupervisor::new("integration", graph, collaborators, cache(), config)
        .expect("valid supervisor config")
}

/// Linear chain: each task depends on the previous one.
pub fn chain(descriptions: &[&str]) -> (TaskGraph, Vec<TaskId>) {
    let mut graph = TaskGraph::new();
    let mut ids: Vec<TaskId> = Vec::new();
    for description in descriptions {
        let task = Task::new(description).with_dependencies(ids.last().copied());
        ids.push(task.id);
        graph.add_task(task).expect("acyclic chain");
    }
    (graph, ids)
}

/// Tasks without any dependencies.
pub fn independent(descriptions: &[&str]) -> (TaskGraph, Vec<TaskId>) {
    let mut graph = TaskGraph::new();
    let mut ids = Vec::new();
    for description in descriptions {
        let task = Task::new(description);
        ids.push(task.id);
        graph.add_task(task).expect("no dependencies");
    }
    (graph, ids)
}
