//! Health monitoring for a supervision session.
//!
//! The `HealthMonitor` keeps a rolling window of task outcomes and the time
//! of the last completion, and turns them into a [`HealthAssessment`]:
//!
//! - `Critical` when nothing completed within the stall threshold, or the
//!   success rate fell below the minimum with enough samples
//! - `Degraded` when either metric is within the degraded margin of its
//!   critical threshold
//! - `Healthy` otherwise
//!
//! Concerns are advisory text handed to the recovery policy; control flow
//! only looks at the status and the deadlock flag.

use crate::core::TaskGraph;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

/// Default time without a completion before the session is critical.
pub const DEFAULT_STALL_THRESHOLD_SECS: u64 = 60;

/// Default minimum success rate before the session is critical.
pub const DEFAULT_MIN_SUCCESS_RATE: f64 = 0.5;

/// Default number of outcomes required before the success rate counts.
pub const DEFAULT_MIN_SAMPLES: usize = 2;

/// Default size of the rolling outcome window.
pub const DEFAULT_WINDOW: usize = 20;

/// Default fraction of a threshold that counts as degraded.
pub const DEFAULT_DEGRADED_MARGIN: f64 = 0.5;

/// Configuration for health monitoring.
#[derive(Debug, Clone)]
pub struct HealthConfig {
    pub stall_threshold: Duration,
    pub min_success_rate: f64,
    pub min_samples: usize,
    pub window: usize,
    pub degraded_margin: f64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            stall_threshold: Duration::from_secs(DEFAULT_STALL_THRESHOLD_SECS),
            min_success_rate: DEFAULT_MIN_SUCCESS_RATE,
            min_samples: DEFAULT_MIN_SAMPLES,
            window: DEFAULT_WINDOW,
            degraded_margin: DEFAULT_DEGRADED_MARGIN,
        }
    }
}

impl HealthConfig {
    /// Stall duration beyond which the session is degraded.
    fn degraded_stall(&self) -> Duration {
        self.stall_threshold.mul_f64(1.0 - self.degraded_margin)
    }

    /// Success rate below which the session is degraded.
    fn degraded_rate(&self) -> f64 {
        (self.min_success_rate * (1.0 + self.degraded_margin)).min(1.0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    #[default]
    Healthy,
    Degraded,
    Critical,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Degraded => write!(f, "degraded"),
            HealthStatus::Critical => write!(f, "critical"),
        }
    }
}

/// Result of a health check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthAssessment {
    pub status: HealthStatus,
    /// Completed / (completed + failed) over the window; `None` when empty.
    pub success_rate: Option<f64>,
    /// Outcomes in the window.
    pub samples: usize,
    #[serde(with = "duration_secs")]
    pub time_since_last_completion: Duration,
    /// Non-terminal tasks remain but none is ready or running.
    pub deadlocked: bool,
    pub concerns: Vec<String>,
}

impl Default for HealthAssessment {
    fn default() -> Self {
        Self {
            status: HealthStatus::Healthy,
            success_rate: None,
            samples: 0,
            time_since_last_completion: Duration::ZERO,
            deadlocked: false,
            concerns: Vec::new(),
        }
    }
}

impl HealthAssessment {
    pub fn needs_attention(&self) -> bool {
        self.status != HealthStatus::Healthy
    }
}

pub(crate) mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs_f64(f64::deserialize(d)?.max(0.0)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Completed,
    Failed,
}

/// Health monitor for one session.
#[derive(Debug)]
pub struct HealthMonitor {
    config: HealthConfig,
    window: VecDeque<(Outcome, Instant)>,
    started_at: Instant,
    last_completion: Option<Instant>,
}

impl HealthMonitor {
    /// Create a monitor; the stall clock starts now.
    pub fn new(config: HealthConfig) -> Self {
        Self {
            config,
            window: VecDeque::new(),
            started_at: Instant::now(),
            last_completion: None,
        }
    }

    pub fn config(&self) -> &HealthConfig {
        &self.config
    }

    fn push(&mut self, outcome: Outcome) {
        let now = Instant::now();
        self.window.push_back((outcome, now));
        while self.window.len() > self.config.window.max(1) {
            self.window.pop_front();
        }
        if outcome == Outcome::Completed {
            self.last_completion = Some(now);
        }
    }

    /// A task transitioned to COMPLETED.
    pub fn record_completion(&mut self) {
        self.push(Outcome::Completed);
    }

    /// A task attempt ended in failure.
    pub fn record_failure(&mut self) {
        self.push(Outcome::Failed);
    }

    pub fn samples(&self) -> usize {
        self.window.len()
    }

    pub fn success_rate(&self) -> Option<f64> {
        if self.window.is_empty() {
            return None;
        }
        let completed = self
            .window
            .iter()
            .filter(|(o, _)| *o == Outcome::Completed)
            .count();
        Some(completed as f64 / self.window.len() as f64)
    }

    /// Time since the last completion, or since the session started.
    pub fn time_since_last_completion(&self) -> Duration {
        Instant::now().duration_since(self.last_completion.unwrap_or(self.started_at))
    }

    /// Assess the session against `graph`.
    pub fn assessment(&self, graph: &TaskGraph) -> HealthAssessment {
        let config = &self.config;
        let stalled_for = self.time_since_last_completion();
        let success_rate = self.success_rate();
        let samples = self.samples();
        let rate_counts = samples >= config.min_samples;
        // A finished graph cannot stall
        let idle = !graph.is_complete();

        let mut status = HealthStatus::Healthy;
        let mut concerns = Vec::new();

        if idle && stalled_for > config.stall_threshold {
            status = HealthStatus::Critical;
            concerns.push(format!(
                "no progress in {}s",
                config.stall_threshold.as_secs()
            ));
        } else if idle && stalled_for > config.degraded_stall() {
            status = status.max(HealthStatus::Degraded);
            concerns.push(format!(
                "slow progress: no completion for {}s",
                stalled_for.as_secs()
            ));
        }

        if let Some(rate) = success_rate.filter(|_| rate_counts) {
            if rate < config.min_success_rate {
                status = HealthStatus::Critical;
                concerns.push(format!(
                    "success rate below {:.0}%",
                    config.min_success_rate * 100.0
                ));
            } else if rate < config.degraded_rate() {
                status = status.max(HealthStatus::Degraded);
                concerns.push(format!("success rate down to {:.0}%", rate * 100.0));
            }
        }

        let deadlocked = graph.has_deadlock();
        if deadlocked {
            concerns.push(format!(
                "deadlock: {} pending task(s) blocked with nothing running",
                graph.blocked_tasks().len()
            ));
        }

        HealthAssessment {
            status,
            success_rate,
            samples,
            time_since_last_completion: stalled_for,
            deadlocked,
            concerns,
        }
    }
}
