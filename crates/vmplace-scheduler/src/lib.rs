//! Plugin-based placement scheduler for QEMU virtual machines on Proxmox VE.
//!
//! This crate decides where a new virtual machine should run and which VMID
//! it gets, then creates it through a [`ComputeBackend`](vmplace_backend::ComputeBackend).
//! It handles:
//!
//! - Node selection with filter and score plugins
//! - VMID allocation with a single configured VMID plugin
//! - A FIFO queue drained by one background worker per [`Scheduler`]
//! - Request cancellation and an optional whole-worker timeout
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    Reconciliation callers                        │
//! └─────────────────────────────────────────────────────────────────┘
//!          │ select_node / select_vmid            │ create_qemu
//!          │                                      ▼
//!          │                         ┌─────────────────────────┐
//!          │                         │    SchedulingQueue      │
//!          │                         └─────────────────────────┘
//!          │                                      │ worker
//!          ▼                                      ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         Scheduler                                │
//! │  ┌──────────────┐   ┌───────────────┐   ┌──────────────────┐   │
//! │  │  NodeInfo    │──▶│ NodeScheduler │──▶│  VmIdScheduler   │   │
//! │  │  snapshot    │   │ filter, score │   │  VMID plugin     │   │
//! │  └──────────────┘   └───────────────┘   └──────────────────┘   │
//! │                 plugins from the Manager's Registry             │
//! └─────────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                 ComputeBackend (Proxmox VE API)                  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use tokio_util::sync::CancellationToken;
//! use vmplace_backend::{ProxmoxClient, ProxmoxConfig, VmCreateSpec};
//! use vmplace_scheduler::{Manager, SchedulerOptions, SchedulingHints, VmRequest};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = Manager::from_path(None)?;
//! let backend = Arc::new(ProxmoxClient::new(ProxmoxConfig::from_env())?);
//! let scheduler = manager.scheduler(backend, SchedulerOptions::new());
//! scheduler.run_async()?;
//!
//! let hints = SchedulingHints::new().with_node_name_regex("^pve-")?;
//! let request = VmRequest::new(VmCreateSpec::new("web-01", 2, 2048)).with_hints(hints);
//!
//! let result = scheduler.create_qemu(CancellationToken::new(), request).await?;
//! println!("created {} on {}", result.vmid(), result.node());
//!
//! scheduler.stop().await;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod config;
pub mod error;
pub mod framework;
pub mod manager;
pub mod node_scheduler;
pub mod plugins;
pub mod queue;
pub mod scheduler;
pub mod vmid_scheduler;

pub use config::{PluginConfig, SchedulerConfig, ServiceConfig};
pub use error::{Result, SchedulerError};
pub use framework::{
    CycleState, PluginName, Registry, SchedulerResult, SchedulingHints, Status, VmIdRange,
    VmRequest,
};
pub use manager::Manager;
pub use node_scheduler::NodeScheduler;
pub use queue::SchedulingQueue;
pub use scheduler::{Scheduler, SchedulerOptions, SchedulerState};
pub use vmid_scheduler::VmIdScheduler;
