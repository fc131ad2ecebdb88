//! In-memory backend for testing without a real cluster.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::types::{Instance, InstanceStats, InstanceStatus, NodeStats, VmCreateSpec, VmId};
use crate::{BackendError, ComputeBackend, Result};

/// Lowest id the mock hands out, matching Proxmox.
const FIRST_VMID: u32 = 100;

/// Build an online node with no load.
#[must_use]
pub fn node(name: &str, max_cpu: u32, max_mem: u64) -> NodeStats {
    NodeStats {
        name: name.to_string(),
        online: true,
        cpu_used: 0.0,
        max_cpu,
        mem_used: 0,
        max_mem,
    }
}

/// Build an instance with the given resources.
#[must_use]
pub fn instance(vmid: u32, cpus: u32, max_mem: u64, status: InstanceStatus) -> InstanceStats {
    InstanceStats {
        vmid: VmId::new(vmid),
        name: format!("vm-{vmid}"),
        status,
        cpus,
        max_mem,
    }
}

/// A mock backend that keeps nodes and instances in memory.
#[derive(Default)]
pub struct MockBackend {
    state: Mutex<MockState>,
}

#[derive(Default)]
struct MockState {
    nodes: Vec<MockNode>,
    fail_list_nodes: bool,
    fail_create: bool,
    create_delay: Option<Duration>,
    created: Vec<Instance>,
    calls: HashMap<&'static str, usize>,
}

struct MockNode {
    stats: NodeStats,
    instances: Vec<InstanceStats>,
    fail_listing: bool,
}

impl MockBackend {
    /// Create an empty mock backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mock backend with the given nodes.
    #[must_use]
    pub fn with_nodes(nodes: impl IntoIterator<Item = NodeStats>) -> Self {
        let backend = Self::new();
        for stats in nodes {
            backend.add_node(stats);
        }
        backend
    }

    /// Add a node.
    pub fn add_node(&self, stats: NodeStats) {
        self.state.lock().nodes.push(MockNode {
            stats,
            instances: Vec::new(),
            fail_listing: false,
        });
    }

    /// Place an instance on a node. Unknown nodes are ignored.
    pub fn add_instance(&self, node: &str, instance: InstanceStats) {
        if let Some(n) = self.state.lock().nodes.iter_mut().find(|n| n.stats.name == node) {
            n.instances.push(instance);
        }
    }

    /// Make `list_nodes` fail.
    pub fn set_fail_list_nodes(&self, fail: bool) {
        self.state.lock().fail_list_nodes = fail;
    }

    /// Make `list_instances` fail for one node.
    pub fn set_fail_list_instances(&self, node: &str, fail: bool) {
        if let Some(n) = self.state.lock().nodes.iter_mut().find(|n| n.stats.name == node) {
            n.fail_listing = fail;
        }
    }

    /// Make `create_instance` fail.
    pub fn set_fail_create(&self, fail: bool) {
        self.state.lock().fail_create = fail;
    }

    /// Delay every `create_instance` call.
    pub fn set_create_delay(&self, delay: Duration) {
        self.state.lock().create_delay = Some(delay);
    }

    /// Instances created through the backend, in creation order.
    #[must_use]
    pub fn created(&self) -> Vec<Instance> {
        self.state.lock().created.clone()
    }

    /// Number of times a backend method was called.
    #[must_use]
    pub fn call_count(&self, method: &str) -> usize {
        self.state.lock().calls.get(method).copied().unwrap_or(0)
    }

    fn record(&self, method: &'static str) {
        *self.state.lock().calls.entry(method).or_default() += 1;
    }
}

#[async_trait]
impl ComputeBackend for MockBackend {
    async fn list_nodes(&self) -> Result<Vec<NodeStats>> {
        self.record("list_nodes");
        let state = self.state.lock();

        if state.fail_list_nodes {
            return Err(BackendError::Api {
                status: 503,
                message: "mock: list_nodes unavailable".to_string(),
            });
        }

        Ok(state.nodes.iter().map(|n| n.stats.clone()).collect())
    }

    async fn list_instances(&self, node: &str) -> Result<Vec<InstanceStats>> {
        self.record("list_instances");
        let state = self.state.lock();

        let n = state
            .nodes
            .iter()
            .find(|n| n.stats.name == node)
            .ok_or_else(|| BackendError::NotFound(node.to_string()))?;

        if n.fail_listing {
            return Err(BackendError::Api {
                status: 500,
                message: format!("mock: cannot list instances on {node}"),
            });
        }

        Ok(n.instances.clone())
    }

    async fn next_available_id(&self) -> Result<VmId> {
        self.record("next_available_id");
        let state = self.state.lock();

        let mut used: Vec<u32> = state
            .nodes
            .iter()
            .flat_map(|n| n.instances.iter().map(|i| i.vmid.get()))
            .collect();
        used.sort_unstable();

        let mut candidate = FIRST_VMID;
        for id in used {
            if id == candidate {
                candidate += 1;
            } else if id > candidate {
                break;
            }
        }

        Ok(VmId::new(candidate))
    }

    async fn create_instance(
        &self,
        node: &str,
        vmid: VmId,
        spec: &VmCreateSpec,
    ) -> Result<Instance> {
        self.record("create_instance");
        let delay = self.state.lock().create_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock();

        if state.fail_create {
            return Err(BackendError::Api {
                status: 500,
                message: "mock: create failed".to_string(),
            });
        }

        let exists = state
            .nodes
            .iter()
            .any(|n| n.instances.iter().any(|i| i.vmid == vmid));
        if exists {
            return Err(BackendError::Api {
                status: 500,
                message: format!("VM {vmid} already exists"),
            });
        }

        let n = state
            .nodes
            .iter_mut()
            .find(|n| n.stats.name == node)
            .ok_or_else(|| BackendError::NotFound(node.to_string()))?;

        n.instances.push(InstanceStats {
            vmid,
            name: spec.name.clone(),
            status: InstanceStatus::Stopped,
            cpus: u32::try_from(spec.requested_vcpus()).unwrap_or(u32::MAX),
            max_mem: spec.memory_bytes(),
        });

        let instance = Instance {
            node: node.to_string(),
            vmid,
            task: Some(format!("UPID:{node}:mock:qmcreate:{vmid}")),
        };
        state.created.push(instance.clone());

        Ok(instance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GIB: u64 = 1024 * 1024 * 1024;

    #[tokio::test]
    async fn next_id_skips_used_ids() {
        let backend = MockBackend::with_nodes([node("pve1", 8, 16 * GIB)]);
        assert_eq!(backend.next_available_id().await.unwrap(), VmId::new(100));

        backend.add_instance("pve1", instance(100, 1, GIB, InstanceStatus::Running));
        backend.add_instance("pve1", instance(101, 1, GIB, InstanceStatus::Stopped));
        backend.add_instance("pve1", instance(105, 1, GIB, InstanceStatus::Stopped));

        assert_eq!(backend.next_available_id().await.unwrap(), VmId::new(102));
    }

    #[tokio::test]
    async fn create_records_instance() {
        let backend = MockBackend::with_nodes([node("pve1", 8, 16 * GIB)]);
        let spec = VmCreateSpec::new("web", 2, 1024);

        let created = backend
            .create_instance("pve1", VmId::new(100), &spec)
            .await
            .unwrap();

        assert_eq!(created.vmid, VmId::new(100));
        assert_eq!(backend.created().len(), 1);
        assert_eq!(backend.list_instances("pve1").await.unwrap().len(), 1);

        // Same id twice is rejected.
        assert!(backend
            .create_instance("pve1", VmId::new(100), &spec)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn failure_injection() {
        let backend = MockBackend::with_nodes([node("pve1", 8, 16 * GIB)]);

        backend.set_fail_list_nodes(true);
        assert!(backend.list_nodes().await.is_err());

        backend.set_fail_list_instances("pve1", true);
        assert!(backend.list_instances("pve1").await.is_err());
        assert!(matches!(
            backend.list_instances("pve9").await,
            Err(BackendError::NotFound(_))
        ));

        assert_eq!(backend.call_count("list_instances"), 2);
    }
}
