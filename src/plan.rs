//! Plans produced by a planner and their conversion into task graphs.
//!
//! Steps reference each other by step number. Conversion assigns fresh
//! task ids, resolves numbered dependencies and inserts the tasks into a
//! [`TaskGraph`], which rejects cycles.

use crate::core::{Priority, Task, TaskGraph, TaskId};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// One step of a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    /// Step number, unique within the plan.
    pub number: u32,
    /// Short name for display.
    pub name: String,
    /// What the step should accomplish.
    pub description: String,
    /// Numbers of the steps that must finish first.
    #[serde(default)]
    pub dependencies: Vec<u32>,
    /// Explicit priority; derived from the dependency list when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
}

impl PlanStep {
    pub fn new(number: u32, name: &str, description: &str) -> Self {
        Self {
            number,
            name: name.to_string(),
            description: description.to_string(),
            dependencies: Vec::new(),
            priority: None,
        }
    }

    pub fn depends_on(mut self, deps: impl IntoIterator<Item = u32>) -> Self {
        self.dependencies.extend(deps);
        self
    }

    /// Steps with no dependencies start early at high priority.
    pub fn effective_priority(&self) -> Priority {
        self.priority.unwrap_or(if self.dependencies.is_empty() {
            Priority::High
        } else {
            Priority::Normal
        })
    }
}

/// A goal and the steps that accomplish it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    #[serde(default)]
    pub goal: String,
    pub steps: Vec<PlanStep>,
}

impl Plan {
    pub fn new(goal: &str, steps: Vec<PlanStep>) -> Self {
        Self {
            goal: goal.to_string(),
            steps,
        }
    }

    /// Load a plan from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn step(&self, number: u32) -> Option<&PlanStep> {
        self.steps.iter().find(|s| s.number == number)
    }
}

/// A graph built from a plan, with the step-number to task-id mapping.
#[derive(Debug)]
pub struct BuiltPlan {
    pub graph: TaskGraph,
    pub step_ids: HashMap<u32, TaskId>,
}

impl BuiltPlan {
    pub fn task_id(&self, number: u32) -> Option<TaskId> {
        self.step_ids.get(&number).copied()
    }
}

/// Convert steps into tasks with fresh ids and resolved dependencies.
///
/// Fails with [`Error::Validation`] on duplicate step numbers or on a
/// dependency naming a step that is not in `steps`.
pub fn to_tasks(steps: &[PlanStep]) -> Result<(Vec<Task>, HashMap<u32, TaskId>)> {
    let mut step_ids = HashMap::with_capacity(steps.len());
    for step in steps {
        if step_ids.insert(step.number, TaskId::new()).is_some() {
            return Err(Error::Validation(format!(
                "duplicate step number {}",
                step.number
            )));
        }
    }

    let mut tasks = Vec::with_capacity(steps.len());
    for step in steps {
        let mut deps = Vec::with_capacity(step.dependencies.len());
        for number in &step.dependencies {
            let id = step_ids.get(number).copied().ok_or_else(|| {
                Error::Validation(format!(
                    "step {} depends on unknown step {}",
                    step.number, number
                ))
            })?;
            deps.push(id);
        }

        let mut task = Task::new(&step.description)
            .with_dependencies(deps)
            .with_priority(step.effective_priority());
        if let Some(&id) = step_ids.get(&step.number) {
            task.id = id;
        }
        tasks.push(task);
    }
    Ok((tasks, step_ids))
}

/// Build a task graph from plan steps.
pub fn build_graph(steps: &[PlanStep]) -> Result<BuiltPlan> {
    let (tasks, step_ids) = to_tasks(steps)?;
    let mut graph = TaskGraph::new();
    graph.merge(tasks)?;
    Ok(BuiltPlan { graph, step_ids })
}
