//! Node snapshots.
//!
//! A snapshot is rebuilt from the backend for every scheduling attempt and is
//! never patched in place.

use std::collections::HashSet;

use futures::future::try_join_all;
use futures::TryFutureExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use vmplace_backend::{ComputeBackend, InstanceStats, NodeStats, VmId};

use super::guarded;
use crate::error::{Result, SchedulerError};

/// One node's resource statistics together with the instances on it.
#[derive(Debug, Clone)]
pub struct NodeInfo {
    node: NodeStats,
    instances: Vec<InstanceStats>,
}

impl NodeInfo {
    /// Create a node info from stats fetched together.
    #[must_use]
    pub fn new(node: NodeStats, instances: Vec<InstanceStats>) -> Self {
        Self { node, instances }
    }

    /// Name of the node.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.node.name
    }

    /// Capacity and usage of the node.
    #[must_use]
    pub fn node(&self) -> &NodeStats {
        &self.node
    }

    /// Instances on the node.
    #[must_use]
    pub fn instances(&self) -> &[InstanceStats] {
        &self.instances
    }

    /// Sum of virtual CPUs of the running instances.
    #[must_use]
    pub fn running_vcpus(&self) -> u64 {
        self.instances
            .iter()
            .filter(|i| i.status.is_running())
            .map(|i| u64::from(i.cpus))
            .sum()
    }

    /// Sum of maximum memory of every instance, running or not, in bytes.
    #[must_use]
    pub fn allocated_memory(&self) -> u64 {
        self.instances.iter().map(|i| i.max_mem).sum()
    }
}

/// Build a snapshot of every online node in the cluster.
///
/// Instance listings are fetched concurrently. Any failure discards the
/// whole snapshot.
///
/// # Errors
///
/// Returns `Backend` if any listing fails, or `Cancelled` if `cancel` fires.
pub async fn snapshot(
    backend: &dyn ComputeBackend,
    cancel: &CancellationToken,
) -> Result<Vec<NodeInfo>> {
    let nodes = guarded(
        cancel,
        backend
            .list_nodes()
            .map_err(|e| SchedulerError::backend("listing nodes", e)),
    )
    .await?;

    let (online, offline): (Vec<NodeStats>, Vec<NodeStats>) =
        nodes.into_iter().partition(|n| n.online);
    for node in &offline {
        debug!(node = %node.name, "Skipping node that is not online");
    }

    let listings = online.iter().map(|node| {
        backend.list_instances(&node.name).map_err(|e| {
            SchedulerError::backend(format!("listing instances on node {}", node.name), e)
        })
    });
    let instances = guarded(cancel, try_join_all(listings)).await?;

    Ok(online
        .into_iter()
        .zip(instances)
        .map(|(node, instances)| NodeInfo::new(node, instances))
        .collect())
}

/// Every VMID in use across the snapshot.
#[must_use]
pub fn used_ids(nodes: &[NodeInfo]) -> HashSet<VmId> {
    nodes
        .iter()
        .flat_map(|n| n.instances.iter().map(|i| i.vmid))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use vmplace_backend::mock::{instance, node};
    use vmplace_backend::{InstanceStatus, MockBackend};

    const GIB: u64 = 1024 * 1024 * 1024;

    fn backend() -> MockBackend {
        let backend = MockBackend::with_nodes([node("pve1", 8, 16 * GIB), node("pve2", 4, 8 * GIB)]);
        backend.add_instance("pve1", instance(100, 2, GIB, InstanceStatus::Running));
        backend.add_instance("pve1", instance(101, 4, 2 * GIB, InstanceStatus::Stopped));
        backend.add_instance("pve2", instance(200, 1, GIB, InstanceStatus::Running));
        backend
    }

    #[tokio::test]
    async fn snapshot_pairs_nodes_with_instances() {
        let backend = backend();
        let nodes = snapshot(&backend, &CancellationToken::new()).await.unwrap();

        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].name(), "pve1");
        assert_eq!(nodes[0].running_vcpus(), 2);
        assert_eq!(nodes[0].allocated_memory(), 3 * GIB);
        assert_eq!(nodes[1].instances().len(), 1);

        let used = used_ids(&nodes);
        assert_eq!(used.len(), 3);
        assert!(used.contains(&VmId::new(200)));
    }

    #[tokio::test]
    async fn snapshot_skips_offline_nodes() {
        let backend = backend();
        let mut down = node("pve3", 8, 16 * GIB);
        down.online = false;
        backend.add_node(down);

        let nodes = snapshot(&backend, &CancellationToken::new()).await.unwrap();
        assert_eq!(nodes.len(), 2);
        assert!(nodes.iter().all(|n| n.name() != "pve3"));
    }

    #[tokio::test]
    async fn snapshot_is_all_or_nothing() {
        let backend = backend();
        backend.set_fail_list_instances("pve2", true);

        let err = snapshot(&backend, &CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            SchedulerError::Backend { context, .. } => {
                assert_eq!(context, "listing instances on node pve2");
            }
            other => panic!("expected Backend error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn snapshot_honours_cancellation() {
        let backend = backend();
        let cancel = CancellationToken::new();
        cancel.cancel();

        assert!(matches!(
            snapshot(&backend, &cancel).await,
            Err(SchedulerError::Cancelled)
        ));
    }
}
