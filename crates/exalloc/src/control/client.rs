use std::future::Future;
use std::pin::Pin;

use crate::common::ids::ProfileId;
use crate::control::{AllocResult, ExecutorId};
use crate::Map;

/// Number of pending tasks per host that would prefer to run there, per
/// resource profile. Forwarded to the cluster manager so that it can place
/// executors close to their data.
pub type HostLocalTaskCounts = Map<ProfileId, Map<String, u32>>;

/// Contract to the external cluster manager.
///
/// The controller is the source of truth for *desired* state; implementations
/// turn these declarations into actual executor processes. Both calls may be
/// retried with the same arguments: `request_total_executors` declares totals
/// rather than deltas, and killing an already dead executor is a no-op.
pub trait ClusterClient {
    /// Declares the desired total number of executors per resource profile,
    /// together with locality preferences of the pending tasks. Returns
    /// whether the declaration was accepted.
    fn request_total_executors(
        &mut self,
        targets: Map<ProfileId, u64>,
        locality_aware_tasks: Map<ProfileId, u32>,
        host_local_task_counts: HostLocalTaskCounts,
    ) -> Pin<Box<dyn Future<Output = AllocResult<bool>>>>;

    /// Asks the cluster manager to kill the given executors, returning the
    /// subset it actually acted on. With `replace = false` the cluster must
    /// not spin up substitutes for the killed executors.
    fn kill_executors(
        &mut self,
        ids: Vec<ExecutorId>,
        replace: bool,
        force: bool,
        count_failures: bool,
    ) -> Pin<Box<dyn Future<Output = AllocResult<Vec<ExecutorId>>>>>;

    /// Whether the cluster manager still considers the executor alive.
    fn is_executor_active(&self, id: &str) -> bool;
}
