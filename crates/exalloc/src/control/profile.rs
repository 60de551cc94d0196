use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::common::ids::ProfileId;
use crate::control::config::AllocationConfig;
use crate::Map;

pub const DEFAULT_PROFILE_ID: ProfileId = ProfileId::new(0);

/// A named resource requirement, e.g. `("gpus", 2)`.
#[derive(Debug, Clone, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceEntry {
    pub name: String,
    pub amount: u64,
}

pub type ResourceEntries = SmallVec<[ResourceEntry; 2]>;

#[derive(Debug, Clone, Default, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorResources {
    /// Cores per executor. Falls back to `executor.cores` when not set.
    pub cores: Option<u32>,
    pub memory_mb: Option<u64>,
    pub custom: ResourceEntries,
}

#[derive(Debug, Clone, Default, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskResources {
    /// Cpus per task. Falls back to `task.cpus` when not set.
    pub cpus: Option<u32>,
    pub custom: ResourceEntries,
}

/// A bundle of per-executor and per-task resource requirements that a stage may
/// be associated with. Profiles are immutable once registered and are compared
/// by value; the fluent `require_*` methods exist for building them before
/// registration.
#[derive(Debug, Clone, Default, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceProfile {
    pub executor: ExecutorResources,
    pub task: TaskResources,
}

impl ResourceProfile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn require_cores(mut self, cores: u32) -> Self {
        self.executor.cores = Some(cores);
        self
    }

    pub fn require_memory_mb(mut self, memory_mb: u64) -> Self {
        self.executor.memory_mb = Some(memory_mb);
        self
    }

    pub fn require_executor_resource(mut self, name: &str, amount: u64) -> Self {
        insert_entry(&mut self.executor.custom, name, amount);
        self
    }

    pub fn require_task_cpus(mut self, cpus: u32) -> Self {
        self.task.cpus = Some(cpus);
        self
    }

    pub fn require_task_resource(mut self, name: &str, amount: u64) -> Self {
        insert_entry(&mut self.task.custom, name, amount);
        self
    }

    /// How many tasks fit onto a single executor of this profile, never less
    /// than one.
    pub fn max_tasks_per_executor(&self, config: &AllocationConfig) -> u32 {
        let cores = self.executor.cores.unwrap_or(config.executor_cores);
        let cpus = self.task.cpus.unwrap_or(config.task_cpus).max(1);
        (cores / cpus).max(1)
    }
}

/// Entries are kept sorted by name so that profiles differing only in the
/// order of `require_*` calls compare equal.
fn insert_entry(entries: &mut ResourceEntries, name: &str, amount: u64) {
    match entries.iter_mut().find(|entry| entry.name == name) {
        Some(entry) => entry.amount = amount,
        None => {
            entries.push(ResourceEntry {
                name: name.to_string(),
                amount,
            });
            entries.sort_by(|a, b| a.name.cmp(&b.name));
        }
    }
}

/// Assigns dense integer ids to resource profiles, starting from the default
/// profile at id 0.
pub struct ResourceProfileRegistry {
    profiles: Vec<ResourceProfile>,
    ids: Map<ResourceProfile, ProfileId>,
}

impl ResourceProfileRegistry {
    /// Creates a registry whose default profile is derived from the
    /// `executor.cores` / `task.cpus` configuration.
    pub fn new(config: &AllocationConfig) -> Self {
        let default_profile = ResourceProfile::new()
            .require_cores(config.executor_cores)
            .require_task_cpus(config.task_cpus);
        let mut ids = Map::default();
        ids.insert(default_profile.clone(), DEFAULT_PROFILE_ID);
        Self {
            profiles: vec![default_profile],
            ids,
        }
    }

    /// Returns the id of the given profile, assigning the next dense id if the
    /// profile was not seen before. Registration is keyed by value equality.
    pub fn get_or_create(&mut self, profile: ResourceProfile) -> ProfileId {
        if let Some(id) = self.ids.get(&profile) {
            return *id;
        }
        let id = ProfileId::new(self.profiles.len() as u32);
        self.ids.insert(profile.clone(), id);
        self.profiles.push(profile);
        id
    }

    pub fn get(&self, id: ProfileId) -> Option<&ResourceProfile> {
        self.profiles.get(id.as_num() as usize)
    }

    pub fn contains(&self, id: ProfileId) -> bool {
        (id.as_num() as usize) < self.profiles.len()
    }

    pub fn default_id(&self) -> ProfileId {
        DEFAULT_PROFILE_ID
    }
}
