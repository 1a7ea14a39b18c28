//! Task graph for dependency management.
//!
//! `TaskGraph` keeps tasks in a petgraph `StableDiGraph` arena with a
//! `TaskId -> NodeIndex` index. Edges point from a dependency to its
//! dependent. Node indices stay valid while recovery tasks are merged in
//! mid-execution, and cycle detection only walks the closure of the edges
//! being added.

use crate::core::task::{Task, TaskId, TaskStatus};
use crate::error::{Error, Result};
use petgraph::algo::{has_path_connecting, toposort};
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::HashMap;

/// Per-status task counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub aborted: usize,
}

impl StatusCounts {
    pub fn total(&self) -> usize {
        self.pending + self.running + self.completed + self.failed + self.skipped + self.aborted
    }
}

/// The task dependency graph.
pub struct TaskGraph {
    /// Task arena; edges run dependency -> dependent.
    graph: StableDiGraph<Task, ()>,
    /// Index mapping from TaskId to NodeIndex for fast lookups.
    task_index: HashMap<TaskId, NodeIndex>,
    /// Insertion sequence per task, used as the readiness tie-breaker.
    sequence: HashMap<TaskId, u64>,
    next_sequence: u64,
    /// Dependents waiting on a task id that has not been inserted yet.
    awaiting: HashMap<TaskId, Vec<TaskId>>,
}

impl TaskGraph {
    /// Create a new empty graph.
    pub fn new() -> Self {
        Self {
            graph: StableDiGraph::new(),
            task_index: HashMap::new(),
            sequence: HashMap::new(),
            next_sequence: 0,
            awaiting: HashMap::new(),
        }
    }

    /// Add a task together with the edges implied by its dependency list.
    ///
    /// Dependencies on ids that are not in the graph yet are remembered and
    /// wired once that task arrives; until then they are unsatisfied.
    ///
    /// # Errors
    /// - [`Error::DuplicateTask`] if the id is already present
    /// - [`Error::Cycle`] if the new edges would close a cycle
    ///
    /// The graph is left untouched on error.
    pub fn add_task(&mut self, task: Task) -> Result<NodeIndex> {
        let id = task.id;
        if self.task_index.contains_key(&id) {
            return Err(Error::DuplicateTask(id));
        }
        if task.dependencies.contains(&id) {
            return Err(Error::Cycle { task: id });
        }

        let present: Vec<NodeIndex> = task
            .dependencies
            .iter()
            .filter_map(|dep| self.task_index.get(dep).copied())
            .collect();
        let waiting: Vec<NodeIndex> = self
            .awaiting
            .get(&id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|w| self.task_index.get(w).copied())
                    .collect()
            })
            .unwrap_or_default();

        // New edges are d -> id and id -> w; a cycle exists iff some w
        // already reaches some d.
        for &w in &waiting {
            for &d in &present {
                if w == d || has_path_connecting(&self.graph, w, d, None) {
                    return Err(Error::Cycle { task: id });
                }
            }
        }

        let missing: Vec<TaskId> = task
            .dependencies
            .iter()
            .filter(|dep| !self.task_index.contains_key(dep))
            .copied()
            .collect();

        let index = self.graph.add_node(task);
        for d in present {
            self.graph.add_edge(d, index, ());
        }
        for w in waiting {
            self.graph.add_edge(index, w, ());
        }
        self.awaiting.remove(&id);
        for m in missing {
            self.awaiting.entry(m).or_default().push(id);
        }

        self.task_index.insert(id, index);
        self.sequence.insert(id, self.next_sequence);
        self.next_sequence += 1;
        Ok(index)
    }

    /// Insert a batch of tasks atomically: either all are added or none.
    pub fn merge(&mut self, tasks: Vec<Task>) -> Result<Vec<TaskId>> {
        let mut inserted = Vec::with_capacity(tasks.len());
        for task in tasks {
            let id = task.id;
            if let Err(err) = self.add_task(task) {
                for done in inserted.iter().rev() {
                    self.detach(done);
                }
                return Err(err);
            }
            inserted.push(id);
        }
        Ok(inserted)
    }

    /// Add a dependency edge between two existing tasks.
    ///
    /// `dependency` must finish before `dependent` can start.
    pub fn add_dependency(&mut self, dependency: &TaskId, dependent: &TaskId) -> Result<()> {
        let dep_index = self.index_of(dependency)?;
        let dependent_index = self.index_of(dependent)?;

        if dep_index == dependent_index
            || has_path_connecting(&self.graph, dependent_index, dep_index, None)
        {
            return Err(Error::Cycle { task: *dependent });
        }
        if self.graph.find_edge(dep_index, dependent_index).is_some() {
            return Ok(());
        }

        self.graph.add_edge(dep_index, dependent_index, ());
        if let Some(task) = self.graph.node_weight_mut(dependent_index) {
            task.dependencies.push(*dependency);
        }
        Ok(())
    }

    /// Remove a task inserted by a failed merge, restoring pending edges.
    fn detach(&mut self, id: &TaskId) {
        let Some(index) = self.task_index.remove(id) else {
            return;
        };
        self.sequence.remove(id);

        let dependents: Vec<TaskId> = self
            .graph
            .neighbors_directed(index, Direction::Outgoing)
            .filter_map(|n| self.graph.node_weight(n).map(|t| t.id))
            .collect();
        if !dependents.is_empty() {
            self.awaiting.entry(*id).or_default().extend(dependents);
        }

        if let Some(task) = self.graph.remove_node(index) {
            for dep in &task.dependencies {
                if let Some(list) = self.awaiting.get_mut(dep) {
                    list.retain(|w| w != id);
                    if list.is_empty() {
                        self.awaiting.remove(dep);
                    }
                }
            }
        }
    }

    fn index_of(&self, id: &TaskId) -> Result<NodeIndex> {
        self.task_index
            .get(id)
            .copied()
            .ok_or(Error::TaskNotFound(*id))
    }

    /// Get a reference to a task by its ID.
    pub fn get_task(&self, id: &TaskId) -> Option<&Task> {
        self.task_index
            .get(id)
            .and_then(|&index| self.graph.node_weight(index))
    }

    fn task_mut(&mut self, id: &TaskId) -> Result<&mut Task> {
        let index = self.index_of(id)?;
        self.graph
            .node_weight_mut(index)
            .ok_or(Error::TaskNotFound(*id))
    }

    /// Check if the graph contains a task.
    pub fn contains_task(&self, id: &TaskId) -> bool {
        self.task_index.contains_key(id)
    }

    pub fn task_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn dependency_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// All tasks in insertion order.
    pub fn all_tasks(&self) -> Vec<&Task> {
        let mut tasks: Vec<&Task> = self.graph.node_weights().collect();
        tasks.sort_by_key(|t| self.sequence.get(&t.id).copied().unwrap_or(u64::MAX));
        tasks
    }

    /// Tasks that directly depend on `id`.
    pub fn dependents(&self, id: &TaskId) -> Vec<&Task> {
        match self.task_index.get(id) {
            Some(&index) => self
                .graph
                .neighbors_directed(index, Direction::Outgoing)
                .filter_map(|n| self.graph.node_weight(n))
                .collect(),
            None => Vec::new(),
        }
    }

    /// Dependencies of `id` that do not yet satisfy it, including ids that
    /// are not in the graph.
    pub fn unsatisfied_dependencies(&self, id: &TaskId) -> Vec<TaskId> {
        let Some(task) = self.get_task(id) else {
            return Vec::new();
        };
        task.dependencies
            .iter()
            .filter(|dep| {
                !self
                    .get_task(dep)
                    .map(Task::satisfies_dependents)
                    .unwrap_or(false)
            })
            .copied()
            .collect()
    }

    /// Whether any dependency of `id` refers to a task that was never added.
    pub fn has_missing_dependencies(&self, id: &TaskId) -> bool {
        self.get_task(id)
            .map(|t| t.dependencies.iter().any(|d| !self.contains_task(d)))
            .unwrap_or(false)
    }

    fn is_ready_task(&self, task: &Task) -> bool {
        task.status == TaskStatus::Pending
            && task.dependencies.iter().all(|dep| {
                self.get_task(dep)
                    .map(Task::satisfies_dependents)
                    .unwrap_or(false)
            })
    }

    fn scheduling_order<'a>(&self, tasks: &mut [&'a Task]) {
        tasks.sort_by_key(|t| {
            (
                Reverse(t.priority),
                self.sequence.get(&t.id).copied().unwrap_or(u64::MAX),
            )
        });
    }

    // ========== Scheduling Operations ==========

    /// Pending tasks whose dependencies are all completed or skipped, in
    /// priority-then-insertion order.
    pub fn ready_tasks(&self) -> Vec<&Task> {
        let mut ready: Vec<&Task> = self
            .graph
            .node_weights()
            .filter(|t| self.is_ready_task(t))
            .collect();
        self.scheduling_order(&mut ready);
        ready
    }

    /// Pending tasks that are not ready, in scheduling order.
    pub fn blocked_tasks(&self) -> Vec<&Task> {
        let mut blocked: Vec<&Task> = self
            .graph
            .node_weights()
            .filter(|t| t.status == TaskStatus::Pending && !self.is_ready_task(t))
            .collect();
        self.scheduling_order(&mut blocked);
        blocked
    }

    /// Failed tasks that still await a recovery decision.
    pub fn unresolved_failures(&self) -> Vec<&Task> {
        let mut failed: Vec<&Task> = self
            .graph
            .node_weights()
            .filter(|t| t.status == TaskStatus::Failed && !t.superseded)
            .collect();
        self.scheduling_order(&mut failed);
        failed
    }

    /// PENDING -> RUNNING.
    pub fn mark_running(&mut self, id: &TaskId) -> Result<()> {
        self.task_mut(id)?.transition(TaskStatus::Running)
    }

    /// RUNNING -> COMPLETED.
    pub fn mark_completed(&mut self, id: &TaskId) -> Result<()> {
        self.task_mut(id)?.transition(TaskStatus::Completed)
    }

    /// RUNNING -> FAILED, recording the reason.
    pub fn mark_failed(&mut self, id: &TaskId, reason: &str) -> Result<()> {
        let task = self.task_mut(id)?;
        task.transition(TaskStatus::Failed)?;
        task.last_failure = Some(reason.to_string());
        Ok(())
    }

    /// PENDING | FAILED -> SKIPPED. Returns the dependents that became ready.
    pub fn mark_skipped(&mut self, id: &TaskId) -> Result<Vec<TaskId>> {
        self.task_mut(id)?.transition(TaskStatus::Skipped)?;
        Ok(self
            .dependents(id)
            .into_iter()
            .filter(|t| self.is_ready_task(t))
            .map(|t| t.id)
            .collect())
    }

    /// FAILED -> PENDING for another attempt.
    pub fn requeue(&mut self, id: &TaskId) -> Result<()> {
        let task = self.task_mut(id)?;
        task.transition(TaskStatus::Pending)?;
        task.attempts += 1;
        Ok(())
    }

    /// Mark a failed task as replaced by recovery work; it becomes terminal
    /// and satisfies its dependents.
    pub fn supersede(&mut self, id: &TaskId) -> Result<()> {
        let task = self.task_mut(id)?;
        if task.status != TaskStatus::Failed || task.superseded {
            return Err(Error::InvalidTransition {
                task: *id,
                from: task.status,
                to: TaskStatus::Failed,
            });
        }
        task.superseded = true;
        task.updated_at = chrono::Utc::now();
        Ok(())
    }

    /// Force every non-terminal task to ABORTED. Returns the affected ids.
    pub fn abort_remaining(&mut self) -> Vec<TaskId> {
        let mut aborted = Vec::new();
        for task in self.graph.node_weights_mut() {
            if !task.is_terminal() && task.transition(TaskStatus::Aborted).is_ok() {
                aborted.push(task.id);
            }
        }
        aborted
    }

    /// True when every task is terminal.
    pub fn is_complete(&self) -> bool {
        self.graph.node_weights().all(Task::is_terminal)
    }

    /// True when non-terminal tasks remain, none is running, and none is ready.
    pub fn has_deadlock(&self) -> bool {
        let mut any_open = false;
        for task in self.graph.node_weights() {
            if task.status == TaskStatus::Running {
                return false;
            }
            if !task.is_terminal() {
                any_open = true;
            }
            if self.is_ready_task(task) {
                return false;
            }
        }
        any_open
    }

    pub fn running_count(&self) -> usize {
        self.graph
            .node_weights()
            .filter(|t| t.status == TaskStatus::Running)
            .count()
    }

    pub fn counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for task in self.graph.node_weights() {
            match task.status {
                TaskStatus::Pending => counts.pending += 1,
                TaskStatus::Running => counts.running += 1,
                TaskStatus::Completed => counts.completed += 1,
                TaskStatus::Failed => counts.failed += 1,
                TaskStatus::Skipped => counts.skipped += 1,
                TaskStatus::Aborted => counts.aborted += 1,
            }
        }
        counts
    }

    /// Tasks in an order where every task follows its dependencies.
    pub fn topological_order(&self) -> Result<Vec<&Task>> {
        let sorted = toposort(&self.graph, None).map_err(|cycle| {
            let task = self
                .graph
                .node_weight(cycle.node_id())
                .map(|t| t.id)
                .unwrap_or_default();
            Error::Cycle { task }
        })?;

        Ok(sorted
            .into_iter()
            .filter_map(|index| self.graph.node_weight(index))
            .collect())
    }
}

impl Default for TaskGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TaskGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskGraph")
            .field("tasks", &self.task_count())
            .field("dependencies", &self.dependency_count())
            .field("awaiting", &self.awaiting.len())
            .finish()
    }
}
