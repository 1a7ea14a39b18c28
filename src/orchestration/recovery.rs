//! Recovery policy: turns failures, deadlocks and health alarms into
//! bounded directives and applies them to the task graph.
//!
//! Guards, all scoped to one session:
//! - replan cooldown: at most one REPLAN per cooldown window, except for
//!   worker-requested and skip-ceiling replans
//! - skip ceiling: after `skip_ceiling` SKIPs in a row without a completion
//!   the next directive is a REPLAN, whatever the oracle says
//! - replan budget: once `max_replans` REPLANs were applied, REPLAN
//!   escalates to ABORT. Worker-requested replans are never escalated.
//! - health interventions: at most one per cooldown window
//!
//! Directives without a legal target are demoted to WAIT, so an oracle
//! mistake never surfaces as an invalid transition.

use crate::core::{Task, TaskGraph, TaskId, TaskStatus};
use crate::error::{Error, Result};
use crate::orchestration::collaborators::{Oracle, Planner, RecoveryContext};
use crate::orchestration::health::HealthAssessment;
use crate::orchestration::oracle::{FallbackOracle, DEFAULT_FALLBACK_MAX_RETRIES};
use crate::plan::{self, PlanStep};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

/// Default minimum time between two REPLANs.
pub const DEFAULT_REPLAN_COOLDOWN_SECS: u64 = 30;

/// Default number of consecutive SKIPs that forces a REPLAN.
pub const DEFAULT_SKIP_CEILING: u32 = 3;

/// Default number of REPLANs per session before escalating to ABORT.
pub const DEFAULT_MAX_REPLANS: u32 = 5;

/// Recovery directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Directive {
    /// Put the failed task back to pending.
    Retry,
    /// Give up on the task; dependents proceed.
    Skip,
    /// Merge new recovery tasks into the graph.
    Replan,
    /// Stop the session.
    Abort,
    /// Change nothing and pause dispatch.
    Wait,
}

impl std::fmt::Display for Directive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Directive::Retry => "RETRY",
            Directive::Skip => "SKIP",
            Directive::Replan => "REPLAN",
            Directive::Abort => "ABORT",
            Directive::Wait => "WAIT",
        };
        f.write_str(s)
    }
}

/// What prompted a recovery decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    /// A worker reported an ordinary failure.
    Failure,
    /// Nothing is ready or running but work remains.
    Deadlock,
    /// The health monitor reported degraded or critical health.
    Health,
    /// A worker found the task does not match the observed state.
    WorkerReplan,
}

/// Configuration for the recovery policy.
#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    pub replan_cooldown: Duration,
    pub skip_ceiling: u32,
    pub max_replans: u32,
    /// Retries the built-in fallback allows before it skips a task.
    pub fallback_max_retries: u32,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            replan_cooldown: Duration::from_secs(DEFAULT_REPLAN_COOLDOWN_SECS),
            skip_ceiling: DEFAULT_SKIP_CEILING,
            max_replans: DEFAULT_MAX_REPLANS,
            fallback_max_retries: DEFAULT_FALLBACK_MAX_RETRIES,
        }
    }
}

/// A resolved directive, ready to apply.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub trigger: Trigger,
    pub directive: Directive,
    pub target: Option<TaskId>,
    pub reason: String,
    /// Steps merged on REPLAN.
    pub recovery_steps: Vec<PlanStep>,
    /// Why the directive differs from what the oracle asked for, if it does.
    pub note: Option<String>,
}

/// A directive as applied, for the session report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedDecision {
    pub trigger: Trigger,
    pub directive: Directive,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<TaskId>,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub added_tasks: Vec<TaskId>,
    pub at: DateTime<Utc>,
}

/// Pick the task a deadlock decision should address: the first unresolved
/// failure, otherwise a blocked task, preferring one that waits on a task
/// that was never added.
pub fn deadlock_target(graph: &TaskGraph) -> Option<&Task> {
    if let Some(failed) = graph.unresolved_failures().into_iter().next() {
        return Some(failed);
    }
    let blocked = graph.blocked_tasks();
    blocked
        .iter()
        .find(|t| graph.has_missing_dependencies(&t.id))
        .or_else(|| blocked.first())
        .copied()
}

/// Session-scoped recovery state machine.
pub struct RecoveryPolicy {
    config: RecoveryConfig,
    oracle: Arc<dyn Oracle>,
    fallback: FallbackOracle,
    planner: Option<Arc<dyn Planner>>,
    goal: Option<String>,
    last_replan: Option<Instant>,
    last_health_intervention: Option<Instant>,
    consecutive_skips: u32,
    replans: u32,
}

impl RecoveryPolicy {
    pub fn new(config: RecoveryConfig, oracle: Arc<dyn Oracle>) -> Self {
        Self {
            fallback: FallbackOracle::new(config.fallback_max_retries),
            config,
            oracle,
            planner: None,
            goal: None,
            last_replan: None,
            last_health_intervention: None,
            consecutive_skips: 0,
            replans: 0,
        }
    }

    pub fn with_planner(mut self, planner: Option<Arc<dyn Planner>>) -> Self {
        self.planner = planner;
        self
    }

    /// Goal handed to the oracle and to recovery planning.
    pub fn with_goal(mut self, goal: &str) -> Self {
        self.goal = Some(goal.to_string());
        self
    }

    pub fn consecutive_skips(&self) -> u32 {
        self.consecutive_skips
    }

    pub fn replans(&self) -> u32 {
        self.replans
    }

    fn within_cooldown(&self, since: Option<Instant>) -> bool {
        since.is_some_and(|t| t.elapsed() < self.config.replan_cooldown)
    }

    /// Whether a REPLAN applied now would fall inside the cooldown window.
    pub fn cooldown_active(&self) -> bool {
        self.within_cooldown(self.last_replan)
    }

    /// Whether a health-triggered consultation is allowed now.
    pub fn may_intervene_for_health(&self) -> bool {
        !self.cooldown_active() && !self.within_cooldown(self.last_health_intervention)
    }

    fn skip_ceiling_reached(&self) -> bool {
        self.consecutive_skips >= self.config.skip_ceiling
    }

    /// A task completed; the skip streak is broken.
    pub fn note_completion(&mut self) {
        self.consecutive_skips = 0;
    }

    /// Choose a directive for `trigger`, consulting the oracle unless a guard
    /// already forces one.
    pub async fn decide(
        &mut self,
        trigger: Trigger,
        target: Option<&Task>,
        reason: &str,
        health: &HealthAssessment,
    ) -> Decision {
        if trigger == Trigger::Health {
            self.last_health_intervention = Some(Instant::now());
        }

        let context = RecoveryContext {
            trigger,
            task: target.cloned(),
            reason: reason.to_string(),
            health: health.clone(),
            goal: self.goal.clone(),
            consecutive_skips: self.consecutive_skips,
            replans: self.replans,
        };

        let mut note = None;
        let forced = trigger != Trigger::WorkerReplan && self.skip_ceiling_reached();
        let (requested, oracle_steps) = if trigger == Trigger::WorkerReplan {
            (Directive::Replan, Vec::new())
        } else if forced {
            note = Some(format!(
                "{} consecutive skips, replan forced",
                self.consecutive_skips
            ));
            (Directive::Replan, Vec::new())
        } else {
            match self.oracle.decide(&context).await {
                Ok(decision) => (decision.directive, decision.recovery_steps),
                Err(e) => {
                    warn!(error = %e, trigger = ?trigger, "oracle unavailable, using fallback policy");
                    note = Some(format!("oracle unavailable: {}", e));
                    let directive = match self.fallback.decide(&context).await {
                        Ok(decision) => decision.directive,
                        Err(_) => Directive::Replan,
                    };
                    (directive, Vec::new())
                }
            }
        };

        let directive = self.sanitize(requested, trigger, forced, target, &mut note);
        let recovery_steps = if directive == Directive::Replan {
            self.resolve_steps(oracle_steps, target, &context).await
        } else {
            Vec::new()
        };

        Decision {
            trigger,
            directive,
            target: target.map(|t| t.id),
            reason: reason.to_string(),
            recovery_steps,
            note,
        }
    }

    /// Demote directives the current state cannot carry out. Worker replans
    /// skip both replan guards; a skip-ceiling replan skips only the cooldown.
    fn sanitize(
        &self,
        requested: Directive,
        trigger: Trigger,
        forced: bool,
        target: Option<&Task>,
        note: &mut Option<String>,
    ) -> Directive {
        let unresolved_failure =
            target.is_some_and(|t| t.status == TaskStatus::Failed && !t.superseded);
        let skippable = unresolved_failure || target.is_some_and(|t| t.status == TaskStatus::Pending);

        let (directive, why) = match requested {
            Directive::Retry if !unresolved_failure => {
                (Directive::Wait, "retry needs a failed task".to_string())
            }
            Directive::Skip if !skippable => (
                Directive::Wait,
                "skip needs a pending or failed task".to_string(),
            ),
            Directive::Replan if trigger == Trigger::WorkerReplan => return requested,
            Directive::Replan if self.replans >= self.config.max_replans => (
                Directive::Abort,
                format!("replan budget of {} exhausted", self.config.max_replans),
            ),
            Directive::Replan if !forced && self.cooldown_active() => {
                (Directive::Wait, "replan cooldown active".to_string())
            }
            other => return other,
        };

        warn!(requested = %requested, applied = %directive, why = %why, "directive adjusted");
        *note = Some(match note.take() {
            Some(prev) => format!("{}; {}", prev, why),
            None => why,
        });
        directive
    }

    async fn resolve_steps(
        &self,
        oracle_steps: Vec<PlanStep>,
        target: Option<&Task>,
        context: &RecoveryContext,
    ) -> Vec<PlanStep> {
        if usable(&oracle_steps) {
            return oracle_steps;
        }

        if let Some(planner) = &self.planner {
            let goal = self.goal.as_deref().unwrap_or_default();
            match planner.recovery_plan(goal, context).await {
                Ok(steps) if usable(&steps) => return steps,
                Ok(steps) if !steps.is_empty() => {
                    warn!("planner returned an invalid recovery plan, using bridge task")
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "planner recovery failed, using bridge task"),
            }
        }

        let subject = target
            .map(|t| t.description.clone())
            .unwrap_or_else(|| context.reason.clone());
        vec![PlanStep::new(1, "recover", &format!("Recover: {}", subject))]
    }

    /// Apply a decision to the graph and update the guards.
    pub fn apply(&mut self, decision: &Decision, graph: &mut TaskGraph) -> Result<AppliedDecision> {
        let mut added_tasks = Vec::new();

        match decision.directive {
            Directive::Retry => {
                graph.requeue(&require_target(decision)?)?;
            }
            Directive::Skip => {
                let unblocked = graph.mark_skipped(&require_target(decision)?)?;
                self.consecutive_skips += 1;
                info!(
                    unblocked = unblocked.len(),
                    streak = self.consecutive_skips,
                    "task skipped"
                );
            }
            Directive::Replan => {
                added_tasks = self.replan(decision, graph)?;
            }
            Directive::Abort => {
                let aborted = graph.abort_remaining();
                info!(aborted = aborted.len(), "session aborted");
            }
            Directive::Wait => {}
        }

        Ok(AppliedDecision {
            trigger: decision.trigger,
            directive: decision.directive,
            target: decision.target,
            reason: decision.reason.clone(),
            note: decision.note.clone(),
            added_tasks,
            at: Utc::now(),
        })
    }

    fn replan(&mut self, decision: &Decision, graph: &mut TaskGraph) -> Result<Vec<TaskId>> {
        let (tasks, _) = plan::to_tasks(&decision.recovery_steps)?;
        let referenced: HashSet<TaskId> = tasks
            .iter()
            .flat_map(|t| t.dependencies.iter().copied())
            .collect();
        let sinks: Vec<TaskId> = tasks
            .iter()
            .map(|t| t.id)
            .filter(|id| !referenced.contains(id))
            .collect();

        let added = graph.merge(tasks)?;

        if let Some(target) = decision.target {
            match graph.get_task(&target).map(|t| (t.status, t.superseded)) {
                Some((TaskStatus::Failed, false)) => graph.supersede(&target)?,
                Some((TaskStatus::Pending, _)) => {
                    graph.mark_skipped(&target)?;
                }
                _ => {}
            }

            let waiting: Vec<TaskId> = graph
                .dependents(&target)
                .into_iter()
                .filter(|t| t.status == TaskStatus::Pending)
                .map(|t| t.id)
                .collect();
            for dependent in &waiting {
                for sink in &sinks {
                    graph.add_dependency(sink, dependent)?;
                }
            }
        }

        self.replans += 1;
        self.last_replan = Some(Instant::now());
        self.consecutive_skips = 0;
        info!(added = added.len(), replans = self.replans, "recovery tasks merged");
        Ok(added)
    }
}

fn usable(steps: &[PlanStep]) -> bool {
    !steps.is_empty() && plan::to_tasks(steps).is_ok()
}

fn require_target(decision: &Decision) -> Result<TaskId> {
    decision.target.ok_or_else(|| {
        Error::Validation(format!("{} directive without a target task", decision.directive))
    })
}

impl std::fmt::Debug for RecoveryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecoveryPolicy")
            .field("consecutive_skips", &self.consecutive_skips)
            .field("replans", &self.replans)
            .field("cooldown_active", &self.cooldown_active())
            .finish_non_exhaustive()
    }
}
