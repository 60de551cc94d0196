use std::future::Future;

use crate::common::ids::ProfileId;
use crate::common::rpc::{make_rpc_queue, ResponseToken, RpcReceiver, RpcSender};
use crate::common::utils::time::now_monotonic;
use crate::control::client::ClusterClient;
use crate::control::config::AllocationConfig;
use crate::control::intake::{dispatch, SchedulerEvent};
use crate::control::manager::{AllocationManager, AllocationSnapshot, RemovalReason};
use crate::control::monitor::ExecutorMonitor;
use crate::control::profile::ResourceProfile;
use crate::control::ExecutorId;

#[derive(Debug)]
pub enum AllocationMessage {
    /// An inbound scheduler event.
    Event(SchedulerEvent),
    // Requests
    RegisterProfile(ResourceProfile, ResponseToken<ProfileId>),
    GetSnapshot(ResponseToken<AllocationSnapshot>),
    TargetExecutors(ProfileId, ResponseToken<u64>),
    /// Explicit kill request; these removals lower the target.
    KillExecutors(Vec<ExecutorId>, ResponseToken<Vec<ExecutorId>>),
    Reset(ResponseToken<()>),
    QuitService,
}

/// Handle to a running allocation controller. Cheap to clone; all state lives
/// in the worker task behind the queue.
#[derive(Clone)]
pub struct AllocationService {
    sender: RpcSender<AllocationMessage>,
}

impl AllocationService {
    /// Hands a scheduler event to the controller. Events posted after `stop`
    /// are dropped.
    pub fn post_event(&self, event: SchedulerEvent) {
        self.send(AllocationMessage::Event(event));
    }

    pub async fn register_profile(&self, profile: ResourceProfile) -> ProfileId {
        let (token, response) = ResponseToken::make();
        self.send(AllocationMessage::RegisterProfile(profile, token));
        response.await.unwrap()
    }

    pub async fn snapshot(&self) -> AllocationSnapshot {
        let (token, response) = ResponseToken::make();
        self.send(AllocationMessage::GetSnapshot(token));
        response.await.unwrap()
    }

    /// Current desired executor count of the profile.
    pub async fn target_executors(&self, profile: ProfileId) -> u64 {
        let (token, response) = ResponseToken::make();
        self.send(AllocationMessage::TargetExecutors(profile, token));
        response.await.unwrap()
    }

    /// Asks the cluster to kill specific executors because they are no longer
    /// needed. Returns the ids that were accepted for removal.
    pub async fn kill_executors(&self, ids: Vec<ExecutorId>) -> Vec<ExecutorId> {
        let (token, response) = ResponseToken::make();
        self.send(AllocationMessage::KillExecutors(ids, token));
        response.await.unwrap()
    }

    /// Returns the controller to its post-start state. Processed in queue
    /// order, hence strictly after any RPC already in flight.
    pub async fn reset(&self) {
        let (token, response) = ResponseToken::make();
        self.send(AllocationMessage::Reset(token));
        response.await.unwrap()
    }

    pub fn stop(&self) {
        self.send(AllocationMessage::QuitService);
    }

    fn send(&self, message: AllocationMessage) {
        let _ = self.sender.send(message);
    }
}

/// Validates the configuration and builds the controller together with its
/// worker loop. The returned future has to be spawned by the caller; dropping
/// it stops the controller.
pub fn create_allocation_service(
    config: AllocationConfig,
    client: Box<dyn ClusterClient>,
) -> crate::Result<(AllocationService, impl Future<Output = ()>)> {
    let manager = AllocationManager::new(config.clone())?;
    let monitor = ExecutorMonitor::new(&config);
    let (sender, receiver) = make_rpc_queue();
    let process = allocation_process(config, manager, monitor, client, receiver);
    Ok((AllocationService { sender }, process))
}

/// The single worker loop: drains scheduler events and requests, and runs the
/// periodic schedule tick whenever its deadline passes.
pub async fn allocation_process(
    config: AllocationConfig,
    mut manager: AllocationManager,
    mut monitor: ExecutorMonitor,
    mut client: Box<dyn ClusterClient>,
    mut receiver: RpcReceiver<AllocationMessage>,
) {
    let tick_interval = config.effective_tick_interval();
    let mut next_tick = now_monotonic() + tick_interval;
    loop {
        let wait = next_tick.saturating_duration_since(now_monotonic());
        match tokio::time::timeout(wait, receiver.recv()).await {
            Ok(None) | Ok(Some(AllocationMessage::QuitService)) => break,
            Ok(Some(message)) => {
                handle_message(&mut manager, &mut monitor, client.as_mut(), message).await;
            }
            Err(_) => {
                let now = now_monotonic();
                run_tick(&mut manager, &monitor, client.as_mut(), now).await;
                next_tick = now + tick_interval;
            }
        }
    }
    log::debug!("Allocation controller has stopped");
}

async fn handle_message(
    manager: &mut AllocationManager,
    monitor: &mut ExecutorMonitor,
    client: &mut dyn ClusterClient,
    message: AllocationMessage,
) {
    match message {
        AllocationMessage::Event(event) => {
            log::debug!("Handling scheduler event {event:?}");
            dispatch(event, now_monotonic(), manager, monitor);
        }
        AllocationMessage::RegisterProfile(profile, response) => {
            response.respond(manager.register_profile(profile));
        }
        AllocationMessage::GetSnapshot(response) => {
            response.respond(manager.snapshot(monitor));
        }
        AllocationMessage::TargetExecutors(profile, response) => {
            response.respond(manager.target_executors(profile));
        }
        AllocationMessage::KillExecutors(ids, response) => {
            let candidates: Vec<ExecutorId> = ids
                .into_iter()
                .filter(|id| {
                    let active = client.is_executor_active(id);
                    if !active {
                        log::debug!("Not killing executor {id}, it is no longer active");
                    }
                    active
                })
                .collect();
            let accepted = manager.remove_executors(&candidates, RemovalReason::Surplus, monitor);
            let killed = kill_executors(client, accepted).await;
            if !killed.is_empty() {
                push_targets(manager, client).await;
            }
            response.respond(killed);
        }
        AllocationMessage::Reset(response) => {
            manager.reset(monitor);
            response.respond(());
        }
        AllocationMessage::QuitService => unreachable!(),
    }
}

/// One schedule tick: mutate state first, then perform the staged cluster
/// calls. Events arriving while an RPC is in flight are reconciled by the
/// next tick.
async fn run_tick(
    manager: &mut AllocationManager,
    monitor: &ExecutorMonitor,
    client: &mut dyn ClusterClient,
    now: std::time::Instant,
) {
    let plan = manager.schedule(monitor, now);
    if !plan.to_kill.is_empty() {
        kill_executors(client, plan.to_kill).await;
    }
    if plan.sync_targets {
        push_targets(manager, client).await;
    }
}

/// Declares the consolidated per-profile totals to the cluster. A refused or
/// failed declaration is retried by the next tick; the target state is not
/// rolled back.
async fn push_targets(manager: &AllocationManager, client: &mut dyn ClusterClient) {
    let (targets, locality_aware, host_counts) = manager.cluster_request();
    match client
        .request_total_executors(targets, locality_aware, host_counts)
        .await
    {
        Ok(true) => {}
        Ok(false) => log::warn!("The cluster manager refused the executor target declaration"),
        Err(error) => log::warn!("Could not declare executor targets: {error:?}"),
    }
}

async fn kill_executors(client: &mut dyn ClusterClient, ids: Vec<ExecutorId>) -> Vec<ExecutorId> {
    match client.kill_executors(ids, false, false, false).await {
        Ok(killed) => {
            log::info!("Requested removal of {} executor(s)", killed.len());
            killed
        }
        Err(error) => {
            log::warn!("Could not kill executors: {error:?}");
            Vec::new()
        }
    }
}
