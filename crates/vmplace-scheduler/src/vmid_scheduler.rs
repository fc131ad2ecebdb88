//! VMID allocation.

use std::sync::Arc;

use futures::TryFutureExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use vmplace_backend::{ComputeBackend, VmId};

use crate::error::{Result, SchedulerError};
use crate::framework::node_info::used_ids;
use crate::framework::{guarded, Code, CycleState, NodeInfo, Registry, VmRequest};

/// Runs the active VMID plugin of a [`Registry`].
pub struct VmIdScheduler<'a> {
    registry: &'a Arc<Registry>,
    backend: &'a dyn ComputeBackend,
}

impl<'a> VmIdScheduler<'a> {
    /// Create a VMID scheduler over the given plugins and backend.
    #[must_use]
    pub fn new(registry: &'a Arc<Registry>, backend: &'a dyn ComputeBackend) -> Self {
        Self { registry, backend }
    }

    /// Choose the VMID for the request.
    ///
    /// The plugin sees the backend's suggested id and every id already
    /// present in `nodes`. It runs on the blocking pool with `cancel`, so a
    /// long search neither stalls the runtime nor outlives its caller.
    ///
    /// # Errors
    ///
    /// Returns `Backend` if the suggestion cannot be fetched,
    /// `NoVmIdAvailable` if the plugin finds no id, `PluginExecution` if the
    /// plugin fails, or `Cancelled`.
    pub async fn schedule(
        &self,
        state: &mut CycleState,
        cancel: &CancellationToken,
        request: &VmRequest,
        nodes: &[NodeInfo],
    ) -> Result<VmId> {
        let baseline = guarded(
            cancel,
            self.backend
                .next_available_id()
                .map_err(|e| SchedulerError::backend("fetching next vmid", e)),
        )
        .await?;
        let used = used_ids(nodes);
        let in_use = used.len();

        let registry = Arc::clone(self.registry);
        let plugin_name = registry.vmid().name();
        let token = cancel.clone();
        let owned = request.clone();
        let mut plugin_state = std::mem::take(state);
        let selection = tokio::task::spawn_blocking(move || {
            let selected = registry
                .vmid()
                .select(&mut plugin_state, &token, &owned, baseline, &used);
            (plugin_state, selected)
        })
        .map_err(|e| SchedulerError::Internal(format!("{plugin_name} plugin failed: {e}")));

        let (plugin_state, selected) = guarded(cancel, selection).await?;
        *state = plugin_state;

        let vmid = selected.map_err(|status| {
            let plugin = plugin_name.to_string();
            let reason = status.message();
            if cancel.is_cancelled() {
                SchedulerError::Cancelled
            } else if status.code() == Code::Unschedulable {
                SchedulerError::NoVmIdAvailable { plugin, reason }
            } else {
                SchedulerError::PluginExecution { plugin, reason }
            }
        })?;

        debug!(%baseline, %vmid, in_use, "Selected vmid");
        Ok(vmid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SchedulerConfig;
    use crate::framework::{SchedulingHints, VmIdRange};
    use crate::plugins::testing::{idle_node, node_info, request, running, GIB};
    use vmplace_backend::mock::node;
    use vmplace_backend::MockBackend;

    fn registry(vmid: &str) -> Arc<Registry> {
        let config = SchedulerConfig::from_yaml(&format!("vmid: {vmid}\n")).unwrap();
        Arc::new(Registry::from_config(&config).unwrap())
    }

    fn cluster() -> (MockBackend, Vec<NodeInfo>) {
        let backend = MockBackend::with_nodes([node("pve1", 8, 16 * GIB)]);
        let used = [100, 101, 103];
        for vmid in used {
            backend.add_instance("pve1", running(vmid, 1, GIB));
        }
        let nodes = vec![node_info(
            node("pve1", 8, 16 * GIB),
            used.iter().map(|v| running(*v, 1, GIB)).collect(),
        )];
        (backend, nodes)
    }

    #[tokio::test]
    async fn next_id_uses_backend_suggestion() {
        let (backend, nodes) = cluster();
        let registry = registry("NextID");

        let vmid = VmIdScheduler::new(&registry, &backend)
            .schedule(
                &mut CycleState::new(),
                &CancellationToken::new(),
                &request(1, 512),
                &nodes,
            )
            .await
            .unwrap();

        assert_eq!(vmid, VmId::new(102));
        assert_eq!(backend.call_count("next_available_id"), 1);
    }

    #[tokio::test]
    async fn exhausted_range_is_no_vmid_available() {
        let (backend, nodes) = cluster();
        let registry = registry("Range");
        let range = VmIdRange::new(VmId::new(100), VmId::new(101)).unwrap();
        let req = request(1, 512).with_hints(SchedulingHints::new().with_vmid_range(range));

        let err = VmIdScheduler::new(&registry, &backend)
            .schedule(&mut CycleState::new(), &CancellationToken::new(), &req, &nodes)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            SchedulerError::NoVmIdAvailable { ref plugin, .. } if plugin == "Range"
        ));
    }

    #[tokio::test]
    async fn range_skips_ids_from_snapshot() {
        let (backend, nodes) = cluster();
        let registry = registry("Range");
        let range = VmIdRange::new(VmId::new(100), VmId::new(110)).unwrap();
        let req = request(1, 512).with_hints(SchedulingHints::new().with_vmid_range(range));

        let vmid = VmIdScheduler::new(&registry, &backend)
            .schedule(&mut CycleState::new(), &CancellationToken::new(), &req, &nodes)
            .await
            .unwrap();
        assert_eq!(vmid, VmId::new(102));
    }

    #[tokio::test]
    async fn cancelled_before_backend_call() {
        let backend = MockBackend::with_nodes([node("pve1", 8, 16 * GIB)]);
        let registry = registry("NextID");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = VmIdScheduler::new(&registry, &backend)
            .schedule(
                &mut CycleState::new(),
                &cancel,
                &request(1, 512),
                &[idle_node("pve1")],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::Cancelled));
    }

    #[tokio::test]
    async fn cancellation_interrupts_an_unbounded_scan() {
        let (backend, nodes) = cluster();
        let registry = registry("Regex");
        let req = request(1, 512)
            .with_hints(SchedulingHints::new().with_vmid_regex("^abc$").unwrap());
        let cancel = CancellationToken::new();

        let canceller = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                cancel.cancel();
            })
        };

        // The scan runs off the runtime thread, so the canceller gets to fire.
        let err = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            VmIdScheduler::new(&registry, &backend).schedule(
                &mut CycleState::new(),
                &cancel,
                &req,
                &nodes,
            ),
        )
        .await
        .expect("scan held the runtime")
        .unwrap_err();

        assert!(matches!(err, SchedulerError::Cancelled));
        canceller.await.unwrap();
    }
}
