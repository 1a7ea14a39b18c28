//! Core domain models for supervised execution.
//!
//! This module contains the task model, the dependency graph that the
//! supervisor drives to completion, and the actions workers perform.

pub mod action;
pub mod dag;
pub mod task;

pub use action::{Action, ActionKind};
pub use dag::{StatusCounts, TaskGraph};
pub use task::{Priority, Task, TaskId, TaskStatus};
