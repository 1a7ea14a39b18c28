//! Deterministic oracle used when no external one is configured, and as
//! the backstop when an external oracle errors.

use crate::core::TaskId;
use crate::error::Result;
use crate::orchestration::collaborators::{Oracle, OracleDecision, RecoveryContext};
use crate::orchestration::health::HealthStatus;
use crate::orchestration::recovery::{Directive, Trigger};
use async_trait::async_trait;
use lru::LruCache;
use std::num::NonZeroUsize;
use tokio::sync::Mutex;

/// Default number of retries before the fallback oracle skips a task.
pub const DEFAULT_FALLBACK_MAX_RETRIES: u32 = 2;

/// Tasks whose last failure reason is remembered at once.
pub const DEFAULT_TRACKED_TASKS: usize = 1024;

/// Rule-based oracle.
///
/// - failure: retry a reason seen for the first time, skip once the same
///   reason repeats or the task used up its retries
/// - deadlock: replan
/// - health: replan when critical, wait when degraded
/// - worker replan: replan
///
/// Reasons are kept only for tasks that may fail again: a skipped task is
/// forgotten, and at most `tracked` tasks are remembered, least recently
/// failed first out.
pub struct FallbackOracle {
    max_retries: u32,
    last_reasons: Mutex<LruCache<TaskId, String>>,
}

impl FallbackOracle {
    pub fn new(max_retries: u32) -> Self {
        Self::with_capacity(max_retries, DEFAULT_TRACKED_TASKS)
    }

    /// A zero `tracked` is treated as one.
    pub fn with_capacity(max_retries: u32, tracked: usize) -> Self {
        let tracked = NonZeroUsize::new(tracked).unwrap_or(NonZeroUsize::MIN);
        Self {
            max_retries,
            last_reasons: Mutex::new(LruCache::new(tracked)),
        }
    }

    /// Number of tasks with a remembered failure reason.
    pub async fn tracked(&self) -> usize {
        self.last_reasons.lock().await.len()
    }

    async fn on_failure(&self, context: &RecoveryContext) -> Directive {
        let Some(task) = &context.task else {
            return Directive::Wait;
        };
        let mut last = self.last_reasons.lock().await;
        let repeated = last.peek(&task.id) == Some(&context.reason);

        if repeated || task.attempts >= self.max_retries {
            last.pop(&task.id);
            Directive::Skip
        } else {
            last.put(task.id, context.reason.clone());
            Directive::Retry
        }
    }
}

impl std::fmt::Debug for FallbackOracle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackOracle")
            .field("max_retries", &self.max_retries)
            .finish_non_exhaustive()
    }
}

impl Default for FallbackOracle {
    fn default() -> Self {
        Self::new(DEFAULT_FALLBACK_MAX_RETRIES)
    }
}

#[async_trait]
impl Oracle for FallbackOracle {
    async fn decide(&self, context: &RecoveryContext) -> Result<OracleDecision> {
        let directive = match context.trigger {
            Trigger::Failure => self.on_failure(context).await,
            Trigger::Deadlock | Trigger::WorkerReplan => Directive::Replan,
            Trigger::Health => match context.health.status {
                HealthStatus::Critical => Directive::Replan,
                _ => Directive::Wait,
            },
        };
        Ok(OracleDecision::new(directive))
    }
}
