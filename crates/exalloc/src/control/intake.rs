use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::common::ids::{AttemptId, ProfileId, StageAttemptId, StageId};
use crate::control::manager::AllocationManager;
use crate::control::monitor::ExecutorMonitor;
use crate::control::ExecutorId;
use crate::Map;

/// Locality preferences of the tasks of one stage attempt.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LocalityHints {
    /// Number of tasks that have any locality preference at all.
    pub task_count: u32,
    /// Host → number of pending tasks preferring that host.
    pub host_tasks: Map<String, u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskInfo {
    pub index: u32,
    pub executor_id: ExecutorId,
    pub speculative: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorInfo {
    pub host: String,
    pub profile: ProfileId,
}

/// Terminal state of a task. Anything other than `Success` is treated as a
/// fault whose task will be resubmitted by the scheduler.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskEndReason {
    Success,
    Failed,
    Killed,
}

impl TaskEndReason {
    pub fn is_success(&self) -> bool {
        matches!(self, TaskEndReason::Success)
    }
}

/// Scheduler events consumed by the controller. This enum is the system
/// boundary towards upstream schedulers; timestamps are assigned on receipt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SchedulerEvent {
    StageSubmitted {
        stage: StageId,
        attempt: AttemptId,
        profile: ProfileId,
        task_count: u32,
        locality: LocalityHints,
    },
    StageCompleted {
        stage: StageId,
    },
    TaskStart {
        stage: StageId,
        attempt: AttemptId,
        task: TaskInfo,
    },
    TaskEnd {
        stage: StageId,
        attempt: AttemptId,
        reason: TaskEndReason,
        task: TaskInfo,
    },
    SpeculativeTaskSubmitted {
        stage: StageId,
    },
    ExecutorAdded {
        id: ExecutorId,
        info: ExecutorInfo,
    },
    ExecutorRemoved {
        id: ExecutorId,
    },
    ExecutorBlocksUpdated {
        id: ExecutorId,
        cached_blocks: u32,
    },
}

/// Routes one scheduler event into the manager and the monitor.
///
/// After every event that can change the task backlog, the backlog timer is
/// re-derived, so that it is armed exactly while pending tasks exist.
/// Inconsistent events (unknown tasks, unknown executors, duplicates) are
/// tolerated; events referring to a profile the registry never assigned are
/// dropped.
pub fn dispatch(
    event: SchedulerEvent,
    now: Instant,
    manager: &mut AllocationManager,
    monitor: &mut ExecutorMonitor,
) {
    match event {
        SchedulerEvent::StageSubmitted {
            stage,
            attempt,
            profile,
            task_count,
            locality,
        } => {
            if !manager.has_profile(profile) {
                log::error!("Dropping submission of stage {stage}: unknown profile {profile}");
                return;
            }
            manager.on_stage_submitted(
                StageAttemptId::new(stage, attempt),
                profile,
                task_count,
                locality,
            );
            manager.sync_backlog_timer(now);
        }
        SchedulerEvent::StageCompleted { stage } => {
            manager.on_stage_completed(stage);
            manager.sync_backlog_timer(now);
        }
        SchedulerEvent::TaskStart {
            stage,
            attempt,
            task,
        } => {
            let id = StageAttemptId::new(stage, attempt);
            if !manager.on_task_started(id, task.index, task.speculative) {
                log::debug!("Task start for unknown stage attempt {id}");
            }
            monitor.task_start(&task.executor_id);
            manager.sync_backlog_timer(now);
        }
        SchedulerEvent::TaskEnd {
            stage,
            attempt,
            reason,
            task,
        } => {
            let id = StageAttemptId::new(stage, attempt);
            if !manager.on_task_ended(id, task.index, task.speculative, reason.is_success()) {
                log::debug!("Task end for unknown stage attempt {id}");
            }
            monitor.task_end(&task.executor_id, now);
            manager.sync_backlog_timer(now);
        }
        SchedulerEvent::SpeculativeTaskSubmitted { stage } => {
            if !manager.on_speculative_task_submitted(stage) {
                log::debug!("Speculative task for stage {stage} without a live attempt");
            }
            manager.sync_backlog_timer(now);
        }
        SchedulerEvent::ExecutorAdded { id, info } => {
            if !manager.has_profile(info.profile) {
                log::error!("Dropping executor {id}: unknown profile {}", info.profile);
                return;
            }
            monitor.add(id, info.host, info.profile, now);
        }
        SchedulerEvent::ExecutorRemoved { id } => {
            if monitor.remove(&id).is_none() {
                log::debug!("Removal of unknown executor {id}");
            }
            manager.on_executor_removed(&id);
        }
        SchedulerEvent::ExecutorBlocksUpdated { id, cached_blocks } => {
            monitor.set_cached_blocks(&id, cached_blocks);
        }
    }
}
