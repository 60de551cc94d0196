//! This module implements the dynamic executor allocation controller, a background
//! process that continually adjusts how many executors a job should hold, based on
//! its task backlog and on how long executors have been sitting idle.
//!
//! The controller only expresses *desired state*; actually starting or stopping
//! executor processes is the business of the [`ClusterClient`] it is given.
pub mod client;
pub mod config;
pub mod intake;
pub mod manager;
pub mod monitor;
pub mod profile;
pub mod service;
mod workload;

/// Executors are identified by opaque strings minted by the cluster manager.
pub type ExecutorId = String;

pub type AllocResult<T> = anyhow::Result<T>;

pub use client::ClusterClient;
pub use config::AllocationConfig;
pub use intake::{ExecutorInfo, LocalityHints, SchedulerEvent, TaskEndReason, TaskInfo};
pub use manager::{AllocationManager, AllocationSnapshot, RemovalReason, SchedulePlan};
pub use monitor::ExecutorMonitor;
pub use profile::{ResourceProfile, ResourceProfileRegistry, DEFAULT_PROFILE_ID};
pub use service::{create_allocation_service, AllocationService};
