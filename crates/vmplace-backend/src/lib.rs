//! Compute backend abstraction for vmplace.
//!
//! The scheduler never talks to a hypervisor directly. It consumes the small
//! capability set defined by [`ComputeBackend`]:
//!
//! - list the nodes of the cluster with their capacity and usage
//! - list the virtual machine instances on one node
//! - ask for the next free VMID
//! - create an instance on a node under a chosen VMID
//!
//! [`ProxmoxClient`] implements it against the Proxmox VE REST API.
//!
//! # Example
//!
//! ```no_run
//! use vmplace_backend::{ComputeBackend, ProxmoxClient, ProxmoxConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = ProxmoxClient::new(ProxmoxConfig::from_env())?;
//!
//! for node in client.list_nodes().await? {
//!     let instances = client.list_instances(&node.name).await?;
//!     println!("{}: {} instances", node.name, instances.len());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Testing
//!
//! Enable the `test-utils` feature for an in-memory [`MockBackend`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
#[cfg(any(test, feature = "test-utils"))]
pub mod mock;
pub mod proxmox;
pub mod types;

pub use error::{BackendError, Result};
pub use proxmox::{ProxmoxClient, ProxmoxConfig};
pub use types::{Instance, InstanceStats, InstanceStatus, NodeStats, VmCreateSpec, VmId};

#[cfg(any(test, feature = "test-utils"))]
pub use mock::MockBackend;

use async_trait::async_trait;

/// The capability set a compute backend offers to the scheduler.
#[async_trait]
pub trait ComputeBackend: Send + Sync {
    /// List every node of the cluster.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be reached or answers badly.
    async fn list_nodes(&self) -> Result<Vec<NodeStats>>;

    /// List the virtual machine instances on a node.
    ///
    /// # Errors
    ///
    /// Returns an error if the node is unknown or the listing fails.
    async fn list_instances(&self, node: &str) -> Result<Vec<InstanceStats>>;

    /// Ask the backend for the next VMID it considers free.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be reached or answers badly.
    async fn next_available_id(&self) -> Result<VmId>;

    /// Create an instance on `node` under `vmid`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend rejects the creation.
    async fn create_instance(&self, node: &str, vmid: VmId, spec: &VmCreateSpec)
        -> Result<Instance>;
}
