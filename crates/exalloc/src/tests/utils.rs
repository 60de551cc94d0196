use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::time::{Duration, Instant};

use derive_builder::Builder;

use crate::common::ids::ProfileId;
use crate::control::client::HostLocalTaskCounts;
use crate::control::intake::dispatch;
use crate::control::profile::DEFAULT_PROFILE_ID;
use crate::control::{
    AllocResult, AllocationConfig, AllocationManager, ClusterClient, ExecutorId, ExecutorInfo,
    ExecutorMonitor, SchedulerEvent, TaskEndReason, TaskInfo,
};
use crate::{Map, Set};

// Controller definitions
#[derive(Builder)]
#[builder(pattern = "owned", build_fn(name = "finish"))]
pub struct Allocator {
    #[builder(default = "0")]
    min_executors: u64,
    #[builder(default = "10")]
    max_executors: u64,
    #[builder(default = "0")]
    initial_executors: u64,
    #[builder(default = "Duration::from_secs(1)")]
    backlog_timeout: Duration,
    #[builder(default = "Duration::from_secs(1)")]
    sustained_backlog_timeout: Duration,
    #[builder(default = "Duration::from_secs(60)")]
    idle_timeout: Duration,
    #[builder(default)]
    cached_idle_timeout: Option<Duration>,
    #[builder(default = "1.0")]
    allocation_ratio: f64,
    #[builder(default = "1")]
    executor_cores: u32,
    #[builder(default = "1")]
    task_cpus: u32,
}

impl AllocatorBuilder {
    pub fn build(self) -> (AllocationManager, ExecutorMonitor) {
        let Allocator {
            min_executors,
            max_executors,
            initial_executors,
            backlog_timeout,
            sustained_backlog_timeout,
            idle_timeout,
            cached_idle_timeout,
            allocation_ratio,
            executor_cores,
            task_cpus,
        } = self.finish().unwrap();
        let config = AllocationConfig {
            enabled: true,
            min_executors,
            max_executors,
            initial_executors,
            scheduler_backlog_timeout: backlog_timeout,
            sustained_scheduler_backlog_timeout: sustained_backlog_timeout,
            executor_idle_timeout: idle_timeout,
            cached_executor_idle_timeout: cached_idle_timeout,
            executor_allocation_ratio: allocation_ratio,
            tick_interval: Duration::from_millis(100),
            executor_cores,
            task_cpus,
        };
        let manager = AllocationManager::new(config.clone()).unwrap();
        let monitor = ExecutorMonitor::new(&config);
        (manager, monitor)
    }
}

// Event constructors
pub fn stage_submitted_event(stage: u32, task_count: u32) -> SchedulerEvent {
    stage_attempt_submitted_event(stage, 0, task_count)
}

pub fn stage_attempt_submitted_event(stage: u32, attempt: u32, task_count: u32) -> SchedulerEvent {
    SchedulerEvent::StageSubmitted {
        stage: stage.into(),
        attempt: attempt.into(),
        profile: DEFAULT_PROFILE_ID,
        task_count,
        locality: Default::default(),
    }
}

pub fn task_start_event(stage: u32, index: u32, executor: &str) -> SchedulerEvent {
    SchedulerEvent::TaskStart {
        stage: stage.into(),
        attempt: 0.into(),
        task: TaskInfo {
            index,
            executor_id: executor.to_string(),
            speculative: false,
        },
    }
}

pub fn task_end_event(
    stage: u32,
    index: u32,
    executor: &str,
    reason: TaskEndReason,
) -> SchedulerEvent {
    SchedulerEvent::TaskEnd {
        stage: stage.into(),
        attempt: 0.into(),
        reason,
        task: TaskInfo {
            index,
            executor_id: executor.to_string(),
            speculative: false,
        },
    }
}

pub fn executor_added_event(id: &str) -> SchedulerEvent {
    SchedulerEvent::ExecutorAdded {
        id: id.to_string(),
        info: ExecutorInfo {
            host: "host-a".to_string(),
            profile: DEFAULT_PROFILE_ID,
        },
    }
}

// Stage events do not touch the monitor, so these helpers drive the manager
// directly, the same way the intake routes them.
pub fn submit_stage(manager: &mut AllocationManager, stage: u32, task_count: u32, now: Instant) {
    submit_stage_attempt(manager, stage, 0, task_count, now);
}

pub fn submit_stage_attempt(
    manager: &mut AllocationManager,
    stage: u32,
    attempt: u32,
    task_count: u32,
    now: Instant,
) {
    manager.on_stage_submitted(
        (stage, attempt).into(),
        DEFAULT_PROFILE_ID,
        task_count,
        Default::default(),
    );
    manager.sync_backlog_timer(now);
}

pub fn complete_stage(manager: &mut AllocationManager, stage: u32, now: Instant) {
    manager.on_stage_completed(stage.into());
    manager.sync_backlog_timer(now);
}

pub fn add_executor(
    manager: &mut AllocationManager,
    monitor: &mut ExecutorMonitor,
    id: &str,
    now: Instant,
) {
    dispatch(executor_added_event(id), now, manager, monitor);
}

pub fn start_task(
    manager: &mut AllocationManager,
    monitor: &mut ExecutorMonitor,
    stage: u32,
    index: u32,
    executor: &str,
    now: Instant,
) {
    dispatch(task_start_event(stage, index, executor), now, manager, monitor);
}

pub fn end_task(
    manager: &mut AllocationManager,
    monitor: &mut ExecutorMonitor,
    stage: u32,
    index: u32,
    executor: &str,
    now: Instant,
) {
    dispatch(
        task_end_event(stage, index, executor, TaskEndReason::Success),
        now,
        manager,
        monitor,
    );
}

pub fn fail_task(
    manager: &mut AllocationManager,
    monitor: &mut ExecutorMonitor,
    stage: u32,
    index: u32,
    executor: &str,
    now: Instant,
) {
    dispatch(
        task_end_event(stage, index, executor, TaskEndReason::Failed),
        now,
        manager,
        monitor,
    );
}

// Cluster client mock
#[derive(Default)]
pub struct ClusterState {
    pub target_requests: Vec<Map<ProfileId, u64>>,
    pub locality_requests: Vec<Map<ProfileId, u32>>,
    pub killed: Vec<ExecutorId>,
    pub reject_requests: bool,
    pub inactive: Set<ExecutorId>,
}

pub struct MockClusterClient {
    state: Rc<RefCell<ClusterState>>,
}

pub fn mock_cluster_client() -> (MockClusterClient, Rc<RefCell<ClusterState>>) {
    let state = Rc::new(RefCell::new(ClusterState::default()));
    (
        MockClusterClient {
            state: state.clone(),
        },
        state,
    )
}

impl ClusterClient for MockClusterClient {
    fn request_total_executors(
        &mut self,
        targets: Map<ProfileId, u64>,
        locality_aware_tasks: Map<ProfileId, u32>,
        _host_local_task_counts: HostLocalTaskCounts,
    ) -> Pin<Box<dyn Future<Output = AllocResult<bool>>>> {
        let state = self.state.clone();
        Box::pin(async move {
            let mut state = state.borrow_mut();
            if state.reject_requests {
                return Ok(false);
            }
            state.target_requests.push(targets);
            state.locality_requests.push(locality_aware_tasks);
            Ok(true)
        })
    }

    fn kill_executors(
        &mut self,
        ids: Vec<ExecutorId>,
        _replace: bool,
        _force: bool,
        _count_failures: bool,
    ) -> Pin<Box<dyn Future<Output = AllocResult<Vec<ExecutorId>>>>> {
        let state = self.state.clone();
        Box::pin(async move {
            state.borrow_mut().killed.extend(ids.iter().cloned());
            Ok(ids)
        })
    }

    fn is_executor_active(&self, id: &str) -> bool {
        !self.state.borrow().inactive.contains(id)
    }
}
