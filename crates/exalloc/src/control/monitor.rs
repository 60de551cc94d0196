use std::time::{Duration, Instant};

use crate::common::ids::ProfileId;
use crate::control::config::AllocationConfig;
use crate::control::ExecutorId;
use crate::{Map, Set};

struct TrackedExecutor {
    host: String,
    profile: ProfileId,
    running_tasks: u32,
    cached_blocks: u32,
    /// `None` while at least one task is running.
    idle_since: Option<Instant>,
}

impl TrackedExecutor {
    fn is_idle(&self) -> bool {
        self.running_tasks == 0
    }
}

/// Tracks the set of live executors, how busy each of them is, and for how
/// long the idle ones have been idle.
pub struct ExecutorMonitor {
    executors: Map<ExecutorId, TrackedExecutor>,
    per_profile: Map<ProfileId, Set<ExecutorId>>,
    idle_timeout: Duration,
    cached_idle_timeout: Option<Duration>,
}

impl ExecutorMonitor {
    pub fn new(config: &AllocationConfig) -> Self {
        Self {
            executors: Default::default(),
            per_profile: Default::default(),
            idle_timeout: config.executor_idle_timeout,
            cached_idle_timeout: config.cached_executor_idle_timeout,
        }
    }

    /// Registers a new executor, idle as of `now`. Duplicate registrations
    /// keep the existing record.
    pub fn add(&mut self, id: ExecutorId, host: String, profile: ProfileId, now: Instant) {
        if self.executors.contains_key(&id) {
            log::debug!("Executor {id} was added twice");
            return;
        }
        self.per_profile
            .entry(profile)
            .or_default()
            .insert(id.clone());
        self.executors.insert(
            id,
            TrackedExecutor {
                host,
                profile,
                running_tasks: 0,
                cached_blocks: 0,
                idle_since: Some(now),
            },
        );
    }

    /// Forgets an executor; returns its profile, or `None` for an id that was
    /// not tracked.
    pub fn remove(&mut self, id: &str) -> Option<ProfileId> {
        let executor = self.executors.remove(id)?;
        if let Some(ids) = self.per_profile.get_mut(&executor.profile) {
            ids.remove(id);
        }
        log::debug!("Executor {id} on host {} is gone", executor.host);
        Some(executor.profile)
    }

    pub fn task_start(&mut self, id: &str) {
        let Some(executor) = self.executors.get_mut(id) else {
            log::debug!("Task start on unknown executor {id}");
            return;
        };
        executor.running_tasks += 1;
        executor.idle_since = None;
    }

    pub fn task_end(&mut self, id: &str, now: Instant) {
        let Some(executor) = self.executors.get_mut(id) else {
            log::debug!("Task end on unknown executor {id}");
            return;
        };
        executor.running_tasks = executor.running_tasks.saturating_sub(1);
        if executor.running_tasks == 0 {
            executor.idle_since = Some(now);
        }
    }

    pub fn set_cached_blocks(&mut self, id: &str, cached_blocks: u32) {
        let Some(executor) = self.executors.get_mut(id) else {
            log::debug!("Cached block update on unknown executor {id}");
            return;
        };
        executor.cached_blocks = cached_blocks;
    }

    /// Executors whose idle timer has expired, ordered by how long they have
    /// been idle (longest first), ties broken by id.
    pub fn timed_out_executors(&self, now: Instant) -> Vec<ExecutorId> {
        let mut expired: Vec<(Instant, &ExecutorId)> = self
            .executors
            .iter()
            .filter_map(|(id, executor)| {
                let idle_since = executor.idle_since?;
                let timeout = if executor.cached_blocks > 0 {
                    self.cached_idle_timeout?
                } else {
                    self.idle_timeout
                };
                (now.saturating_duration_since(idle_since) >= timeout).then_some((idle_since, id))
            })
            .collect();
        expired.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(b.1)));
        expired.into_iter().map(|(_, id)| id.clone()).collect()
    }

    pub fn executor_count(&self) -> usize {
        self.executors.len()
    }

    pub fn executor_count_with_profile(&self, profile: ProfileId) -> usize {
        self.per_profile
            .get(&profile)
            .map(|ids| ids.len())
            .unwrap_or(0)
    }

    pub fn profile_of(&self, id: &str) -> Option<ProfileId> {
        self.executors.get(id).map(|executor| executor.profile)
    }

    pub fn is_idle(&self, id: &str) -> bool {
        self.executors
            .get(id)
            .map(|executor| executor.is_idle())
            .unwrap_or(false)
    }

    pub fn clear(&mut self) {
        self.executors.clear();
        self.per_profile.clear();
    }
}
