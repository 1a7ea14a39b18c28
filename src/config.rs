use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::orchestration::health::{
    HealthConfig, DEFAULT_DEGRADED_MARGIN, DEFAULT_MIN_SAMPLES, DEFAULT_MIN_SUCCESS_RATE,
    DEFAULT_STALL_THRESHOLD_SECS, DEFAULT_WINDOW,
};
use crate::orchestration::oracle::DEFAULT_FALLBACK_MAX_RETRIES;
use crate::orchestration::recovery::{
    RecoveryConfig, DEFAULT_MAX_REPLANS, DEFAULT_REPLAN_COOLDOWN_SECS, DEFAULT_SKIP_CEILING,
};
use crate::orchestration::supervisor::{
    validate_max_parallel, SupervisorConfig, DEFAULT_MAX_PARALLEL, DEFAULT_POLL_INTERVAL_MS,
    DEFAULT_WAIT_DELAY_MS,
};
use crate::orchestration::worker::{
    WorkerConfig, DEFAULT_MAX_CONSECUTIVE_STEP_FAILURES, DEFAULT_MAX_ITERATIONS,
    DEFAULT_TASK_TIMEOUT_SECS,
};
use crate::storage::artifact::{CacheConfig, DEFAULT_CAPACITY, DEFAULT_TTL_SECS};
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorSection {
    pub max_parallel: usize,
    pub poll_interval_ms: u64,
    pub wait_delay_ms: u64,
}

impl Default for SupervisorSection {
    fn default() -> Self {
        Self {
            max_parallel: DEFAULT_MAX_PARALLEL,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            wait_delay_ms: DEFAULT_WAIT_DELAY_MS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSection {
    pub max_iterations: u32,
    /// 0 disables the wall-clock budget.
    pub task_timeout_secs: u64,
    pub max_consecutive_step_failures: u32,
}

impl Default for WorkerSection {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            task_timeout_secs: DEFAULT_TASK_TIMEOUT_SECS,
            max_consecutive_step_failures: DEFAULT_MAX_CONSECUTIVE_STEP_FAILURES,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoverySection {
    pub replan_cooldown_secs: u64,
    pub skip_ceiling: u32,
    pub max_replans: u32,
    pub fallback_max_retries: u32,
}

impl Default for RecoverySection {
    fn default() -> Self {
        Self {
            replan_cooldown_secs: DEFAULT_REPLAN_COOLDOWN_SECS,
            skip_ceiling: DEFAULT_SKIP_CEILING,
            max_replans: DEFAULT_MAX_REPLANS,
            fallback_max_retries: DEFAULT_FALLBACK_MAX_RETRIES,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthSection {
    pub stall_threshold_secs: u64,
    pub min_success_rate: f64,
    pub min_samples: usize,
    pub window: usize,
    pub degraded_margin: f64,
}

impl Default for HealthSection {
    fn default() -> Self {
        Self {
            stall_threshold_secs: DEFAULT_STALL_THRESHOLD_SECS,
            min_success_rate: DEFAULT_MIN_SUCCESS_RATE,
            min_samples: DEFAULT_MIN_SAMPLES,
            window: DEFAULT_WINDOW,
            degraded_margin: DEFAULT_DEGRADED_MARGIN,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSection {
    pub ttl_secs: u64,
    pub capacity: usize,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            ttl_secs: DEFAULT_TTL_SECS,
            capacity: DEFAULT_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub supervisor: SupervisorSection,
    #[serde(default)]
    pub worker: WorkerSection,
    #[serde(default)]
    pub recovery: RecoverySection,
    #[serde(default)]
    pub health: HealthSection,
    #[serde(default)]
    pub cache: CacheSection,
}

impl Config {
    pub fn overseer_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".overseer"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::overseer_dir()?.join("overseer.toml"))
    }

    /// Default location for the JSON-lines context log.
    pub fn context_log_path() -> Result<PathBuf> {
        Ok(Self::overseer_dir()?.join("context.jsonl"))
    }

    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        debug!(path = %path.display(), "loading config");
        if !path.exists() {
            debug!("config file not found, using defaults");
            return Ok(Self::default());
        }
        let config: Self = toml::from_str(&fs::read_to_string(path)?)?;
        config.validate()?;
        debug!(
            max_parallel = config.supervisor.max_parallel,
            max_iterations = config.worker.max_iterations,
            replan_cooldown_secs = config.recovery.replan_cooldown_secs,
            "config loaded"
        );
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        Self::ensure_dirs()?;
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        debug!(path = %path.display(), "config saved");
        Ok(())
    }

    pub fn ensure_dirs() -> Result<()> {
        let dir = Self::overseer_dir()?;
        if !dir.exists() {
            debug!(dir = %dir.display(), "creating overseer directory");
            fs::create_dir_all(&dir)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        validate_max_parallel(self.supervisor.max_parallel)?;

        let checks = [
            (self.supervisor.poll_interval_ms == 0, "supervisor.poll_interval_ms must be positive"),
            (self.worker.max_iterations == 0, "worker.max_iterations must be positive"),
            (
                self.worker.max_consecutive_step_failures == 0,
                "worker.max_consecutive_step_failures must be positive",
            ),
            (self.recovery.skip_ceiling == 0, "recovery.skip_ceiling must be positive"),
            (
                !(0.0..=1.0).contains(&self.health.min_success_rate),
                "health.min_success_rate must be within 0..=1",
            ),
            (
                !(0.0..1.0).contains(&self.health.degraded_margin),
                "health.degraded_margin must be within 0..1",
            ),
            (self.health.window == 0, "health.window must be positive"),
            (self.cache.capacity == 0, "cache.capacity must be positive"),
        ];
        match checks.iter().find(|(failed, _)| *failed) {
            Some((_, message)) => Err(Error::Validation(message.to_string())),
            None => Ok(()),
        }
    }

    pub fn worker_config(&self) -> WorkerConfig {
        let timeout = self.worker.task_timeout_secs;
        WorkerConfig {
            max_iterations: self.worker.max_iterations,
            task_timeout: (timeout > 0).then(|| Duration::from_secs(timeout)),
            max_consecutive_step_failures: self.worker.max_consecutive_step_failures,
        }
    }

    pub fn recovery_config(&self) -> RecoveryConfig {
        RecoveryConfig {
            replan_cooldown: Duration::from_secs(self.recovery.replan_cooldown_secs),
            skip_ceiling: self.recovery.skip_ceiling,
            max_replans: self.recovery.max_replans,
            fallback_max_retries: self.recovery.fallback_max_retries,
        }
    }

    pub fn health_config(&self) -> HealthConfig {
        HealthConfig {
            stall_threshold: Duration::from_secs(self.health.stall_threshold_secs),
            min_success_rate: self.health.min_success_rate,
            min_samples: self.health.min_samples,
            window: self.health.window,
            degraded_margin: self.health.degraded_margin,
        }
    }

    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            ttl: Duration::from_secs(self.cache.ttl_secs),
            capacity: self.cache.capacity,
        }
    }

    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig {
            max_parallel: self.supervisor.max_parallel,
            poll_interval: Duration::from_millis(self.supervisor.poll_interval_ms),
            wait_delay: Duration::from_millis(self.supervisor.wait_delay_ms),
            worker: self.worker_config(),
            recovery: self.recovery_config(),
            health: self.health_config(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.supervisor.max_parallel, 4);
        assert_eq!(config.supervisor.poll_interval_ms, 2000);
        assert_eq!(config.worker.max_iterations, 50);
        assert_eq!(config.recovery.replan_cooldown_secs, 30);
        assert_eq!(config.recovery.skip_ceiling, 3);
        assert_eq!(config.health.stall_threshold_secs, 60);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let config = Config::load_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("overseer.toml");
        fs::write(
            &path,
            "[supervisor]\nmax_parallel = 2\n\n[recovery]\nskip_ceiling = 5\n",
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.supervisor.max_parallel, 2);
        assert_eq!(config.supervisor.wait_delay_ms, 5000);
        assert_eq!(config.recovery.skip_ceiling, 5);
        assert_eq!(config.recovery.max_replans, 5);
        assert_eq!(config.cache, CacheSection::default());
    }

    #[test]
    fn test_out_of_range_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("overseer.toml");
        fs::write(&path, "[supervisor]\nmax_parallel = 12\n").unwrap();
        assert!(matches!(Config::load_from(&path), Err(Error::Validation(_))));

        let mut config = Config::default();
        config.health.min_success_rate = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("overseer.toml");
        let mut config = Config::default();
        config.worker.task_timeout_secs = 0;
        config.cache.ttl_secs = 10;
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_runtime_views() {
        let mut config = Config::default();
        config.worker.task_timeout_secs = 0;
        config.supervisor.max_parallel = 3;

        let supervisor = config.supervisor_config();
        assert_eq!(supervisor.max_parallel, 3);
        assert_eq!(supervisor.poll_interval, Duration::from_secs(2));
        assert_eq!(supervisor.wait_delay, Duration::from_secs(5));
        assert_eq!(supervisor.worker.task_timeout, None);
        assert_eq!(supervisor.recovery.replan_cooldown, Duration::from_secs(30));
        assert_eq!(supervisor.health.stall_threshold, Duration::from_secs(60));
        assert_eq!(config.cache_config().ttl, Duration::from_secs(3600));
    }
}
