//! Narrow interfaces to the external collaborators the engine drives.
//!
//! The engine never looks behind these traits: how a plan is written, how a
//! snapshot is parsed into elements, how an action is carried out or how a
//! recovery directive is chosen is up to the implementation. Handles are
//! acquired once by the caller and passed in as [`Collaborators`].

use crate::core::{Action, Task, TaskId};
use crate::error::Result;
use crate::orchestration::health::HealthAssessment;
use crate::orchestration::recovery::{Directive, Trigger};
use crate::plan::{Plan, PlanStep};
use crate::storage::{ContentKey, ContextStore, LedgerView, NullContextStore};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Raw observation of the live target, before parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub bytes: Vec<u8>,
    pub label: Option<String>,
}

impl Snapshot {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
            label: None,
        }
    }

    pub fn with_label(mut self, label: &str) -> Self {
        self.label = Some(label.to_string());
        self
    }

    pub fn key(&self) -> ContentKey {
        ContentKey::of(&self.bytes)
    }
}

/// An interactive element found in a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Element {
    pub id: u32,
    /// Element role such as "button" or "textbox".
    pub role: String,
    pub label: String,
}

impl Element {
    pub fn new(id: u32, role: &str, label: &str) -> Self {
        Self {
            id,
            role: role.to_string(),
            label: label.to_string(),
        }
    }
}

/// Parsed observation handed to the decider.
#[derive(Debug, Clone)]
pub struct Observation {
    pub key: ContentKey,
    pub label: Option<String>,
    pub elements: Arc<Vec<Element>>,
    /// Whether the elements came from the artifact cache.
    pub cached: bool,
}

/// Result of a single actuator call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub success: bool,
    #[serde(default)]
    pub observations: Vec<String>,
}

impl ActionOutcome {
    pub fn ok() -> Self {
        Self {
            success: true,
            observations: Vec::new(),
        }
    }

    pub fn failed(observation: &str) -> Self {
        Self {
            success: false,
            observations: vec![observation.to_string()],
        }
    }
}

/// What a worker should do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Act(Action),
    /// The task is done.
    Complete,
    /// The observed state does not match what the task expects.
    Mismatch(String),
}

/// Input to an oracle consultation.
#[derive(Debug, Clone)]
pub struct RecoveryContext {
    pub trigger: Trigger,
    /// Task the decision would apply to, if any.
    pub task: Option<Task>,
    pub reason: String,
    pub health: HealthAssessment,
    /// Goal of the session, when it was planned from one.
    pub goal: Option<String>,
    pub consecutive_skips: u32,
    pub replans: u32,
}

impl RecoveryContext {
    pub fn task_id(&self) -> Option<TaskId> {
        self.task.as_ref().map(|t| t.id)
    }
}

/// Oracle answer: one directive, plus recovery steps for REPLAN.
#[derive(Debug, Clone, PartialEq)]
pub struct OracleDecision {
    pub directive: Directive,
    pub recovery_steps: Vec<PlanStep>,
}

impl OracleDecision {
    pub fn new(directive: Directive) -> Self {
        Self {
            directive,
            recovery_steps: Vec::new(),
        }
    }

    pub fn replan(steps: Vec<PlanStep>) -> Self {
        Self {
            directive: Directive::Replan,
            recovery_steps: steps,
        }
    }
}

/// Turns a goal into steps.
#[async_trait]
pub trait Planner: Send + Sync {
    async fn create_plan(&self, goal: &str) -> Result<Plan>;

    /// Steps that replace failed or blocked work. Empty means "no idea".
    async fn recovery_plan(&self, _goal: &str, _context: &RecoveryContext) -> Result<Vec<PlanStep>> {
        Ok(Vec::new())
    }
}

/// Observes the live target.
#[async_trait]
pub trait Perception: Send + Sync {
    /// Capture the current state for `task`. Cheap.
    async fn snapshot(&self, task: &Task) -> Result<Snapshot>;

    /// Extract elements from a snapshot. Expensive; results are cached by
    /// the snapshot's content key.
    async fn parse(&self, snapshot: &Snapshot) -> Result<Vec<Element>>;
}

/// Performs atomic actions.
#[async_trait]
pub trait Actuator: Send + Sync {
    async fn perform(&self, action: &Action) -> Result<ActionOutcome>;
}

/// Chooses a worker's next step.
#[async_trait]
pub trait Decider: Send + Sync {
    async fn decide(&self, task: &Task, observation: &Observation, ledger: &LedgerView)
        -> Result<Step>;
}

/// Chooses a recovery directive.
#[async_trait]
pub trait Oracle: Send + Sync {
    async fn decide(&self, context: &RecoveryContext) -> Result<OracleDecision>;
}

/// Handles to every collaborator a session uses.
#[derive(Clone)]
pub struct Collaborators {
    pub perception: Arc<dyn Perception>,
    pub actuator: Arc<dyn Actuator>,
    pub decider: Arc<dyn Decider>,
    pub oracle: Arc<dyn Oracle>,
    pub planner: Option<Arc<dyn Planner>>,
    pub context: Arc<dyn ContextStore>,
}

impl Collaborators {
    pub fn new(
        perception: Arc<dyn Perception>,
        actuator: Arc<dyn Actuator>,
        decider: Arc<dyn Decider>,
        oracle: Arc<dyn Oracle>,
    ) -> Self {
        Self {
            perception,
            actuator,
            decider,
            oracle,
            planner: None,
            context: Arc::new(NullContextStore),
        }
    }

    pub fn with_planner(mut self, planner: Arc<dyn Planner>) -> Self {
        self.planner = Some(planner);
        self
    }

    pub fn with_context(mut self, context: Arc<dyn ContextStore>) -> Self {
        self.context = context;
        self
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators")
            .field("planner", &self.planner.is_some())
            .finish_non_exhaustive()
    }
}
