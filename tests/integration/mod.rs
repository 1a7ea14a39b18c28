//! Integration test suite for overseer.
//!
//! These tests drive the real supervisor, recovery policy and stores
//! through in-process collaborators. Time is paused, so stall and
//! cooldown scenarios run instantly.
//!
//! # Test Categories
//!
//! - `supervision`: end-to-end sessions (success, forced replan, abort)
//! - `recovery`: cooldown and health interventions
//! - `storage`: artifact cache and ledger scoping across sessions
//! - `plans`: plan files through the dry-run path

mod fixtures;

mod plans;
mod recovery;
mod storage;
mod supervision;
