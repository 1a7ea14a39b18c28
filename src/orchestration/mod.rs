//! Supervised execution of task graphs.
//!
//! The supervisor dispatches ready tasks to a bounded pool of disposable
//! workers, watches session health, and routes failures, deadlocks and
//! health alarms through a cooldown-guarded recovery policy. Perception,
//! actuation, decisions, recovery advice and planning are injected through
//! the traits in [`collaborators`].

pub mod collaborators;
pub mod health;
pub mod oracle;
pub mod pool;
pub mod recovery;
pub mod supervisor;
pub mod worker;

pub use collaborators::{
    ActionOutcome, Actuator, Collaborators, Decider, Element, Observation, Oracle,
    OracleDecision, Perception, Planner, RecoveryContext, Snapshot, Step,
};
pub use health::{HealthAssessment, HealthConfig, HealthMonitor, HealthStatus};
pub use oracle::FallbackOracle;
pub use pool::{WorkerEvent, WorkerHandle, WorkerPool};
pub use recovery::{AppliedDecision, Decision, Directive, RecoveryConfig, RecoveryPolicy, Trigger};
pub use supervisor::{
    ExecutionSupervisor, SessionOutcome, SessionReport, SessionStatus, SupervisorConfig,
    TaskReport,
};
pub use worker::{ElementCache, Worker, WorkerConfig, WorkerId, WorkerOutcome};
