//! Task data model for the execution graph.
//!
//! Tasks are the atomic units of work handed to workers. Each task tracks
//! its status, declared dependencies, attempts and last failure. Status
//! changes go through [`Task::transition`] so that illegal moves surface as
//! [`Error::InvalidTransition`] instead of silently corrupting the graph.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a task within a graph.
///
/// Uses UUID v4 for generation and provides a short form display
/// for human-readable output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    /// Create a new unique task identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return first 8 characters of the UUID for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Scheduling priority. Higher priorities are dispatched first.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

/// Task status in its lifecycle.
///
/// Legal moves are `Pending -> Running`, `Running -> Completed | Failed`,
/// `Pending | Failed -> Skipped`, `Failed -> Pending` (retry) and any
/// non-terminal status to `Aborted`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting for dependencies or for a free worker slot.
    #[default]
    Pending,
    /// Dispatched to a worker.
    Running,
    /// Finished successfully.
    Completed,
    /// The last attempt failed. Terminal only once a recovery decision
    /// resolved it.
    Failed,
    /// Deliberately skipped; satisfies dependents.
    Skipped,
    /// Force-terminated by an abort directive.
    Aborted,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Skipped => "skipped",
            TaskStatus::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

/// A single task in the execution graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier for this task.
    pub id: TaskId,
    /// What the task should accomplish, in plain words.
    pub description: String,
    /// Tasks that must be completed or skipped before this one may run.
    pub dependencies: Vec<TaskId>,
    /// Current execution status.
    pub status: TaskStatus,
    /// Scheduling priority.
    pub priority: Priority,
    /// When the task was created.
    pub created_at: DateTime<Utc>,
    /// When the task last changed status.
    pub updated_at: DateTime<Utc>,
    /// Number of times the task was re-queued after a failure.
    pub attempts: u32,
    /// Reason of the most recent failure, if any.
    pub last_failure: Option<String>,
    /// Set when a recovery decision replaced a failed task with new work.
    /// A superseded failure is terminal and satisfies dependents.
    pub superseded: bool,
}

impl Task {
    /// Create a new pending task with no dependencies.
    pub fn new(description: &str) -> Self {
        let now = Utc::now();
        Self {
            id: TaskId::new(),
            description: description.to_string(),
            dependencies: Vec::new(),
            status: TaskStatus::Pending,
            priority: Priority::Normal,
            created_at: now,
            updated_at: now,
            attempts: 0,
            last_failure: None,
            superseded: false,
        }
    }

    /// Builder: declare the tasks this one depends on.
    pub fn with_dependencies(mut self, deps: impl IntoIterator<Item = TaskId>) -> Self {
        for dep in deps {
            if !self.dependencies.contains(&dep) {
                self.dependencies.push(dep);
            }
        }
        self
    }

    /// Builder: set the scheduling priority.
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Move to `to`, failing with [`Error::InvalidTransition`] when the move
    /// is not legal from the current status.
    pub fn transition(&mut self, to: TaskStatus) -> Result<()> {
        use TaskStatus::*;
        let legal = match (self.status, to) {
            (Pending, Running) => true,
            (Running, Completed) | (Running, Failed) => true,
            (Pending, Skipped) | (Failed, Skipped) => true,
            (Failed, Pending) => !self.superseded,
            (_, Aborted) => !self.is_terminal(),
            _ => false,
        };
        if !legal {
            return Err(Error::InvalidTransition {
                task: self.id,
                from: self.status,
                to,
            });
        }
        self.status = to;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Whether the task no longer needs scheduling.
    pub fn is_terminal(&self) -> bool {
        match self.status {
            TaskStatus::Completed | TaskStatus::Skipped | TaskStatus::Aborted => true,
            TaskStatus::Failed => self.superseded,
            TaskStatus::Pending | TaskStatus::Running => false,
        }
    }

    /// Whether this task counts as done for its dependents' readiness.
    pub fn satisfies_dependents(&self) -> bool {
        match self.status {
            TaskStatus::Completed | TaskStatus::Skipped => true,
            TaskStatus::Failed => self.superseded,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_id_new() {
        let id1 = TaskId::new();
        let id2 = TaskId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_task_id_short() {
        let id = TaskId::new();
        assert_eq!(id.short().len(), 8);
        assert!(id.to_string().starts_with(&id.short()));
    }

    #[test]
    fn test_task_id_from_str() {
        let id = TaskId::new();
        let parsed: TaskId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);

        let result: std::result::Result<TaskId, _> = "invalid".parse();
        assert!(result.is_err());
    }

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::Critical > Priority::High);
        assert!(Priority::High > Priority::Normal);
        assert!(Priority::Normal > Priority::Low);
        assert_eq!(Priority::default(), Priority::Normal);
    }

    #[test]
    fn test_task_status_display() {
        assert_eq!(TaskStatus::Pending.to_string(), "pending");
        assert_eq!(TaskStatus::Skipped.to_string(), "skipped");
        assert_eq!(TaskStatus::Aborted.to_string(), "aborted");
    }

    #[test]
    fn test_task_new() {
        let task = Task::new("Click the login button");
        assert_eq!(task.description, "Click the login button");
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.dependencies.is_empty());
        assert_eq!(task.attempts, 0);
        assert!(task.last_failure.is_none());
        assert!(!task.is_terminal());
    }

    #[test]
    fn test_with_dependencies_dedups() {
        let dep = TaskId::new();
        let task = Task::new("t").with_dependencies([dep, dep]);
        assert_eq!(task.dependencies, vec![dep]);
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut task = Task::new("t");
        task.transition(TaskStatus::Running).unwrap();
        task.transition(TaskStatus::Completed).unwrap();
        assert!(task.is_terminal());
        assert!(task.satisfies_dependents());
    }

    #[test]
    fn test_illegal_transitions_rejected() {
        let mut task = Task::new("t");
        assert!(matches!(
            task.transition(TaskStatus::Completed),
            Err(Error::InvalidTransition { .. })
        ));
        task.transition(TaskStatus::Running).unwrap();
        assert!(task.transition(TaskStatus::Running).is_err());
        assert!(task.transition(TaskStatus::Skipped).is_err());
        task.transition(TaskStatus::Completed).unwrap();
        assert!(task.transition(TaskStatus::Failed).is_err());
        assert!(task.transition(TaskStatus::Aborted).is_err());
        // Status unchanged after rejected moves
        assert_eq!(task.status, TaskStatus::Completed);
    }

    #[test]
    fn test_failed_is_not_terminal_until_superseded() {
        let mut task = Task::new("t");
        task.transition(TaskStatus::Running).unwrap();
        task.transition(TaskStatus::Failed).unwrap();
        assert!(!task.is_terminal());
        assert!(!task.satisfies_dependents());

        task.superseded = true;
        assert!(task.is_terminal());
        assert!(task.satisfies_dependents());
        // A superseded failure cannot be retried
        assert!(task.transition(TaskStatus::Pending).is_err());
    }

    #[test]
    fn test_failed_can_be_retried_or_skipped() {
        let mut task = Task::new("t");
        task.transition(TaskStatus::Running).unwrap();
        task.transition(TaskStatus::Failed).unwrap();
        task.transition(TaskStatus::Pending).unwrap();
        task.transition(TaskStatus::Running).unwrap();
        task.transition(TaskStatus::Failed).unwrap();
        task.transition(TaskStatus::Skipped).unwrap();
        assert!(task.is_terminal());
    }

    #[test]
    fn test_abort_from_non_terminal() {
        let mut pending = Task::new("a");
        pending.transition(TaskStatus::Aborted).unwrap();

        let mut running = Task::new("b");
        running.transition(TaskStatus::Running).unwrap();
        running.transition(TaskStatus::Aborted).unwrap();
        assert!(running.is_terminal());
        assert!(!running.satisfies_dependents());
    }

    #[test]
    fn test_task_serialization() {
        let task = Task::new("Type the username").with_priority(Priority::High);
        let json = serde_json::to_string(&task).unwrap();
        assert!(json.contains("\"priority\":\"high\""));
        assert!(json.contains("\"status\":\"pending\""));
        let parsed: Task = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.id, task.id);
        assert_eq!(parsed.priority, Priority::High);
    }
}
