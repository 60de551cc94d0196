use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::common::error::config_error;

pub const ENABLED_KEY: &str = "dynamicAllocation.enabled";
pub const MIN_EXECUTORS_KEY: &str = "dynamicAllocation.minExecutors";
pub const MAX_EXECUTORS_KEY: &str = "dynamicAllocation.maxExecutors";
pub const INITIAL_EXECUTORS_KEY: &str = "dynamicAllocation.initialExecutors";
pub const BACKLOG_TIMEOUT_KEY: &str = "dynamicAllocation.schedulerBacklogTimeout";
pub const SUSTAINED_BACKLOG_TIMEOUT_KEY: &str =
    "dynamicAllocation.sustainedSchedulerBacklogTimeout";
pub const IDLE_TIMEOUT_KEY: &str = "dynamicAllocation.executorIdleTimeout";
pub const CACHED_IDLE_TIMEOUT_KEY: &str = "dynamicAllocation.cachedExecutorIdleTimeout";
pub const ALLOCATION_RATIO_KEY: &str = "dynamicAllocation.executorAllocationRatio";
pub const EXECUTOR_CORES_KEY: &str = "executor.cores";
pub const TASK_CPUS_KEY: &str = "task.cpus";

/// Configuration of the allocation controller. Immutable after the controller
/// has been started.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocationConfig {
    pub enabled: bool,
    pub min_executors: u64,
    pub max_executors: u64,
    pub initial_executors: u64,
    /// How long the scheduler queue has to stay non-empty before the first
    /// ramp-up step fires.
    pub scheduler_backlog_timeout: Duration,
    /// Delay between successive ramp-up steps while the backlog persists.
    pub sustained_scheduler_backlog_timeout: Duration,
    /// How long an executor has to be task-free before it becomes a removal
    /// candidate.
    pub executor_idle_timeout: Duration,
    /// Idle timeout applied to executors that hold cached blocks.
    /// `None` means such executors are never retired by the idle timer.
    pub cached_executor_idle_timeout: Option<Duration>,
    pub executor_allocation_ratio: f64,
    pub tick_interval: Duration,
    pub executor_cores: u32,
    pub task_cpus: u32,
}

impl Default for AllocationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            min_executors: 0,
            max_executors: u64::MAX,
            initial_executors: 0,
            scheduler_backlog_timeout: Duration::from_secs(1),
            sustained_scheduler_backlog_timeout: Duration::from_secs(1),
            executor_idle_timeout: Duration::from_secs(60),
            cached_executor_idle_timeout: None,
            executor_allocation_ratio: 1.0,
            tick_interval: Duration::from_millis(100),
            executor_cores: 1,
            task_cpus: 1,
        }
    }
}

impl AllocationConfig {
    /// Builds a configuration from `(key, value)` string pairs.
    /// Keys that do not belong to the controller are ignored; they are owned by
    /// other parts of the framework.
    pub fn from_entries<K, V, I>(entries: I) -> crate::Result<Self>
    where
        K: AsRef<str>,
        V: AsRef<str>,
        I: IntoIterator<Item = (K, V)>,
    {
        let mut config = Self::default();
        let mut has_initial = false;
        let mut has_sustained = false;

        for (key, value) in entries {
            let (key, value) = (key.as_ref(), value.as_ref());
            match key {
                ENABLED_KEY => config.enabled = parse_bool(key, value)?,
                MIN_EXECUTORS_KEY => config.min_executors = parse_int(key, value)?,
                MAX_EXECUTORS_KEY => config.max_executors = parse_int(key, value)?,
                INITIAL_EXECUTORS_KEY => {
                    config.initial_executors = parse_int(key, value)?;
                    has_initial = true;
                }
                BACKLOG_TIMEOUT_KEY => {
                    config.scheduler_backlog_timeout = parse_duration(key, value)?
                }
                SUSTAINED_BACKLOG_TIMEOUT_KEY => {
                    config.sustained_scheduler_backlog_timeout = parse_duration(key, value)?;
                    has_sustained = true;
                }
                IDLE_TIMEOUT_KEY => config.executor_idle_timeout = parse_duration(key, value)?,
                CACHED_IDLE_TIMEOUT_KEY => {
                    config.cached_executor_idle_timeout = Some(parse_duration(key, value)?)
                }
                ALLOCATION_RATIO_KEY => {
                    config.executor_allocation_ratio = parse_float(key, value)?
                }
                EXECUTOR_CORES_KEY => config.executor_cores = parse_int(key, value)?,
                TASK_CPUS_KEY => config.task_cpus = parse_int(key, value)?,
                _ => {}
            }
        }

        if !has_initial {
            config.initial_executors = config.min_executors;
        }
        if !has_sustained {
            config.sustained_scheduler_backlog_timeout = config.scheduler_backlog_timeout;
        }
        Ok(config)
    }

    /// Checks the bounds required before the controller may start.
    pub fn validate(&self) -> crate::Result<()> {
        if self.min_executors > self.max_executors {
            return config_error(format!(
                "{MIN_EXECUTORS_KEY} ({}) must be less than or equal to {MAX_EXECUTORS_KEY} ({})",
                self.min_executors, self.max_executors
            ));
        }
        if self.initial_executors < self.min_executors
            || self.initial_executors > self.max_executors
        {
            return config_error(format!(
                "{INITIAL_EXECUTORS_KEY} ({}) must lie within [{}, {}]",
                self.initial_executors, self.min_executors, self.max_executors
            ));
        }
        if self.scheduler_backlog_timeout.is_zero() {
            return config_error(format!("{BACKLOG_TIMEOUT_KEY} must be positive"));
        }
        if self.sustained_scheduler_backlog_timeout.is_zero() {
            return config_error(format!("{SUSTAINED_BACKLOG_TIMEOUT_KEY} must be positive"));
        }
        if self.executor_idle_timeout.is_zero() {
            return config_error(format!("{IDLE_TIMEOUT_KEY} must be positive"));
        }
        if self.executor_allocation_ratio <= 0.0 || self.executor_allocation_ratio > 1.0 {
            return config_error(format!(
                "{ALLOCATION_RATIO_KEY} ({}) must lie within (0, 1]",
                self.executor_allocation_ratio
            ));
        }
        if self.executor_cores == 0 {
            return config_error(format!("{EXECUTOR_CORES_KEY} must be at least 1"));
        }
        if self.task_cpus == 0 {
            return config_error(format!("{TASK_CPUS_KEY} must be at least 1"));
        }
        Ok(())
    }

    /// Interval of the periodic schedule tick.
    /// The environment override is designed for tests and debugging.
    pub fn effective_tick_interval(&self) -> Duration {
        std::env::var("EXALLOC_TICK_INTERVAL_MS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(self.tick_interval)
    }
}

fn parse_bool(key: &str, value: &str) -> crate::Result<bool> {
    value
        .parse()
        .map_err(|_| format!("Invalid boolean value `{value}` of key {key}").into())
}

fn parse_int<T: std::str::FromStr>(key: &str, value: &str) -> crate::Result<T> {
    value
        .parse()
        .map_err(|_| format!("Invalid integer value `{value}` of key {key}").into())
}

fn parse_float(key: &str, value: &str) -> crate::Result<f64> {
    value
        .parse()
        .map_err(|_| format!("Invalid float value `{value}` of key {key}").into())
}

fn parse_duration(key: &str, value: &str) -> crate::Result<Duration> {
    humantime::parse_duration(value)
        .map_err(|e| format!("Invalid duration value `{value}` of key {key}: {e}").into())
}
