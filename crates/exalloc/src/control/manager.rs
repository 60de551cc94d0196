use std::time::Instant;

use crate::common::ids::{ProfileId, StageAttemptId, StageId};
use crate::control::client::HostLocalTaskCounts;
use crate::control::config::AllocationConfig;
use crate::control::intake::LocalityHints;
use crate::control::monitor::ExecutorMonitor;
use crate::control::profile::{ResourceProfile, ResourceProfileRegistry, DEFAULT_PROFILE_ID};
use crate::control::workload::WorkloadTracker;
use crate::control::ExecutorId;
use crate::{Map, Set};

/// Why an executor is being asked to die. Only surplus removals lower the
/// target; an idle-timeout removal leaves the target alone so that the
/// scheduler can ramp back up naturally if work arrives again.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RemovalReason {
    Idle,
    Surplus,
}

/// Allocation state of a single resource profile.
struct ProfileState {
    /// Desired executor count, as last declared to the cluster client.
    target: u64,
    /// Size of the next ramp-up step.
    to_add: u64,
    /// Executors that have been asked to die but whose death has not been
    /// confirmed yet.
    pending_removal: Set<ExecutorId>,
}

impl ProfileState {
    fn new(target: u64) -> Self {
        Self {
            target,
            to_add: 1,
            pending_removal: Set::default(),
        }
    }
}

/// Outcome of one schedule tick. The actual cluster RPCs are performed by the
/// caller after the state mutation has finished.
#[derive(Debug, Default)]
pub struct SchedulePlan {
    /// Whether the per-profile totals should be re-declared to the cluster.
    pub sync_targets: bool,
    /// Idle executors accepted for removal this tick.
    pub to_kill: Vec<ExecutorId>,
}

/// Read-only view of the controller state, for tests and debugging endpoints.
#[derive(Debug, Clone)]
pub struct AllocationSnapshot {
    pub profiles: Map<ProfileId, ProfileSnapshot>,
    pub executor_count: usize,
    pub add_time: Option<Instant>,
}

#[derive(Debug, Clone)]
pub struct ProfileSnapshot {
    pub target: u64,
    pub to_add: u64,
    pub pending_removal: Vec<ExecutorId>,
    pub running: usize,
    pub max_needed: u64,
    pub locality_aware_tasks: u32,
    pub host_local_task_counts: Map<String, u32>,
}

/// Owns the per-profile targets and decides, on every tick, whether to ask the
/// cluster for more executors or to retire idle ones.
pub struct AllocationManager {
    config: AllocationConfig,
    registry: ResourceProfileRegistry,
    workload: WorkloadTracker,
    profiles: Map<ProfileId, ProfileState>,
    /// Instant at which the next ramp-up step is authorised. `None` while no
    /// backlog timer is armed.
    add_time: Option<Instant>,
    /// True until the first stage is submitted. While initializing, targets
    /// are neither shrunk nor ramped, so that an externally pre-provisioned
    /// fleet is not re-targeted before any workload is known.
    initializing: bool,
}

impl AllocationManager {
    /// Validates the configuration and sets up the default profile with
    /// `target = initial_executors`. Fails fast on invalid bounds.
    pub fn new(config: AllocationConfig) -> crate::Result<Self> {
        config.validate()?;
        let registry = ResourceProfileRegistry::new(&config);
        let mut profiles = Map::default();
        profiles.insert(
            DEFAULT_PROFILE_ID,
            ProfileState::new(config.initial_executors),
        );
        Ok(Self {
            config,
            registry,
            workload: WorkloadTracker::default(),
            profiles,
            add_time: None,
            initializing: true,
        })
    }

    /// Registers a resource profile, returning its id. Duplicate profiles
    /// (by value) return the previously assigned id.
    pub fn register_profile(&mut self, profile: ResourceProfile) -> ProfileId {
        let id = self.registry.get_or_create(profile);
        self.profiles.entry(id).or_insert_with(|| ProfileState::new(0));
        id
    }

    pub fn has_profile(&self, id: ProfileId) -> bool {
        self.registry.contains(id)
    }

    /// Current desired executor count of the profile.
    pub fn target_executors(&self, profile: ProfileId) -> u64 {
        self.profiles
            .get(&profile)
            .map(|state| state.target)
            .unwrap_or(0)
    }

    /// Forgets all runtime state and returns the targets to their post-start
    /// values. Does not kill any executors by itself.
    pub fn reset(&mut self, monitor: &mut ExecutorMonitor) {
        for (id, state) in self.profiles.iter_mut() {
            state.target = if *id == DEFAULT_PROFILE_ID {
                self.config.initial_executors
            } else {
                0
            };
            state.to_add = 1;
            state.pending_removal.clear();
        }
        self.add_time = None;
        self.initializing = true;
        monitor.clear();
    }

    // Event sink, driven by the event intake

    pub fn on_stage_submitted(
        &mut self,
        id: StageAttemptId,
        profile: ProfileId,
        task_count: u32,
        locality: LocalityHints,
    ) {
        self.initializing = false;
        self.profiles
            .entry(profile)
            .or_insert_with(|| ProfileState::new(0));
        self.workload.stage_submitted(id, profile, task_count, locality);
    }

    pub fn on_stage_completed(&mut self, stage: StageId) {
        self.workload.stage_completed(stage);
    }

    /// Returns false for a task of an unknown stage attempt.
    pub fn on_task_started(&mut self, id: StageAttemptId, index: u32, speculative: bool) -> bool {
        self.workload.task_started(id, index, speculative)
    }

    /// Returns false for a task of an unknown stage attempt.
    pub fn on_task_ended(
        &mut self,
        id: StageAttemptId,
        index: u32,
        speculative: bool,
        success: bool,
    ) -> bool {
        self.workload.task_ended(id, index, speculative, success)
    }

    pub fn on_speculative_task_submitted(&mut self, stage: StageId) -> bool {
        self.workload.speculative_task_submitted(stage)
    }

    /// The cluster has confirmed the death of an executor; it no longer counts
    /// as pending removal.
    pub fn on_executor_removed(&mut self, id: &str) {
        for state in self.profiles.values_mut() {
            state.pending_removal.remove(id);
        }
    }

    // Backlog timers

    /// Arms the backlog timer. Re-entry while the timer is armed does not
    /// restart it.
    pub fn on_scheduler_backlogged(&mut self, now: Instant) {
        if self.add_time.is_none() {
            self.add_time = Some(now + self.config.scheduler_backlog_timeout);
        }
    }

    /// The scheduler queue has drained; disarm the timer and restart the
    /// exponential ramp from one.
    pub fn on_scheduler_queue_empty(&mut self) {
        self.add_time = None;
        for state in self.profiles.values_mut() {
            state.to_add = 1;
        }
    }

    /// Re-derives the backlog timer from the tracked workload. Called after
    /// every workload-changing event so that `add_time` is armed exactly while
    /// pending tasks exist.
    pub fn sync_backlog_timer(&mut self, now: Instant) {
        if self.workload.has_pending_tasks() {
            self.on_scheduler_backlogged(now);
        } else {
            self.on_scheduler_queue_empty();
        }
    }

    /// Upper bound on the number of executors the profile can currently make
    /// use of, derived from its pending, running and speculative tasks.
    pub fn max_needed(&self, profile: ProfileId) -> u64 {
        let tasks = self.workload.pending_tasks(profile) + self.workload.running_tasks(profile);
        let tasks_per_executor = self
            .registry
            .get(profile)
            .map(|p| p.max_tasks_per_executor(&self.config))
            .unwrap_or(1) as u64;
        let scaled = tasks as f64 * self.config.executor_allocation_ratio;
        (scaled / tasks_per_executor as f64).ceil() as u64
    }

    /// The periodic tick: shrink over-sized targets, fire the ramp-up step if
    /// the backlog timer expired, and collect idle executors for removal.
    pub fn schedule(&mut self, monitor: &ExecutorMonitor, now: Instant) -> SchedulePlan {
        let targets_changed = self.update_and_sync_targets(now);

        let expired = monitor.timed_out_executors(now);
        let to_kill = if expired.is_empty() {
            Vec::new()
        } else {
            self.remove_executors(&expired, RemovalReason::Idle, monitor)
        };

        SchedulePlan {
            sync_targets: targets_changed || !to_kill.is_empty(),
            to_kill,
        }
    }

    /// Brings each profile target in line with its current demand and fires
    /// pending ramp-up steps. Returns whether any target changed.
    fn update_and_sync_targets(&mut self, now: Instant) -> bool {
        if self.initializing {
            return false;
        }

        let ids: Vec<ProfileId> = self.profiles.keys().copied().collect();
        let mut changed = false;

        for id in &ids {
            let max_needed = self.max_needed(*id);
            let (min, max) = (self.config.min_executors, self.config.max_executors);
            let state = self.profiles.get_mut(id).unwrap();
            if state.target > max_needed {
                let new_target = max_needed.clamp(min, max);
                if new_target != state.target {
                    log::debug!(
                        "Lowering target of profile {id} from {} to {new_target} (demand {max_needed})",
                        state.target
                    );
                    state.target = new_target;
                    state.to_add = 1;
                    changed = true;
                }
            }
        }

        if let Some(add_time) = self.add_time {
            if now >= add_time {
                for id in ids {
                    let max_needed = self.max_needed(id);
                    if self.add_executors_to_target(max_needed, id) > 0 {
                        changed = true;
                    }
                }
                self.add_time = Some(now + self.config.sustained_scheduler_backlog_timeout);
            }
        }

        changed
    }

    /// One exponential ramp-up step. Returns the number of executors added to
    /// the target.
    fn add_executors_to_target(&mut self, max_needed: u64, profile: ProfileId) -> u64 {
        let max = self.config.max_executors;
        let Some(state) = self.profiles.get_mut(&profile) else {
            return 0;
        };

        if state.target >= max_needed || state.target >= max {
            state.to_add = 1;
            return 0;
        }

        let delta = state
            .to_add
            .min(max_needed - state.target)
            .min(max - state.target);
        state.target += delta;
        state.to_add = if state.target == max || state.target == max_needed {
            1
        } else {
            state.to_add * 2
        };
        log::debug!(
            "Raising target of profile {profile} by {delta} to {} (demand {max_needed})",
            state.target
        );
        delta
    }

    /// Accepts removal candidates one by one, skipping executors that are
    /// already dying and refusing removals that would drop a profile below its
    /// executor floor. Returns the accepted subset, in input order.
    pub fn remove_executors(
        &mut self,
        candidates: &[ExecutorId],
        reason: RemovalReason,
        monitor: &ExecutorMonitor,
    ) -> Vec<ExecutorId> {
        let min = self.config.min_executors;
        let mut accepted = Vec::new();

        for id in candidates {
            let Some(profile) = monitor.profile_of(id) else {
                log::debug!("Not removing unknown executor {id}");
                continue;
            };
            let state = self
                .profiles
                .entry(profile)
                .or_insert_with(|| ProfileState::new(0));
            if state.pending_removal.contains(id) {
                log::debug!("Executor {id} is already pending removal");
                continue;
            }
            let running = monitor.executor_count_with_profile(profile) as u64;
            let remaining = running
                .saturating_sub(state.pending_removal.len() as u64)
                .saturating_sub(1);
            if remaining < min {
                log::debug!(
                    "Not removing executor {id}: profile {profile} would drop below its floor of {min}"
                );
                continue;
            }

            state.pending_removal.insert(id.clone());
            if reason == RemovalReason::Surplus {
                state.target = state.target.saturating_sub(1).max(min);
            }
            accepted.push(id.clone());
        }

        if !accepted.is_empty() {
            log::info!(
                "Accepted {} executor(s) for removal ({reason:?})",
                accepted.len()
            );
        }
        accepted
    }

    /// The consolidated declaration pushed to the cluster client.
    pub fn cluster_request(
        &self,
    ) -> (Map<ProfileId, u64>, Map<ProfileId, u32>, HostLocalTaskCounts) {
        let mut targets = Map::default();
        let mut locality_aware = Map::default();
        let mut host_counts: HostLocalTaskCounts = Map::default();
        for (id, state) in &self.profiles {
            targets.insert(*id, state.target);
            let (task_count, hosts) = self.workload.locality_summary(*id);
            locality_aware.insert(*id, task_count);
            host_counts.insert(*id, hosts);
        }
        (targets, locality_aware, host_counts)
    }

    pub fn snapshot(&self, monitor: &ExecutorMonitor) -> AllocationSnapshot {
        let profiles = self
            .profiles
            .iter()
            .map(|(id, state)| {
                let mut pending_removal: Vec<ExecutorId> =
                    state.pending_removal.iter().cloned().collect();
                pending_removal.sort_unstable();
                let (locality_aware_tasks, host_local_task_counts) =
                    self.workload.locality_summary(*id);
                (
                    *id,
                    ProfileSnapshot {
                        target: state.target,
                        to_add: state.to_add,
                        pending_removal,
                        running: monitor.executor_count_with_profile(*id),
                        max_needed: self.max_needed(*id),
                        locality_aware_tasks,
                        host_local_task_counts,
                    },
                )
            })
            .collect();
        AllocationSnapshot {
            profiles,
            executor_count: monitor.executor_count(),
            add_time: self.add_time,
        }
    }
}
