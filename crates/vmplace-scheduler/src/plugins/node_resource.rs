//! Scoring by the reciprocal of resource utilization.

use crate::framework::{CycleState, NodeInfo, Plugin, PluginName, ScorePlugin, Status, VmRequest};

/// Floor applied to each utilization fraction.
///
/// An idle node would otherwise divide by zero; with the floor the best
/// possible score is `1 / (0.01 * 0.01) = 10_000`.
pub const MIN_UTILIZATION: f64 = 0.01;

/// Prefers nodes with low CPU and memory utilization.
///
/// Score is `1 / (cpu_utilization * memory_utilization)`, truncated.
#[derive(Debug, Clone, Copy, Default)]
pub struct NodeResource;

impl Plugin for NodeResource {
    fn name(&self) -> PluginName {
        PluginName::NodeResource
    }
}

impl ScorePlugin for NodeResource {
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    fn score(
        &self,
        _state: &mut CycleState,
        _request: &VmRequest,
        node: &NodeInfo,
    ) -> Result<i64, Status> {
        let stats = node.node();
        if stats.max_cpu == 0 || stats.max_mem == 0 {
            return Err(Status::error(format!(
                "node {} reports zero capacity (cpus={}, memory={})",
                stats.name, stats.max_cpu, stats.max_mem
            )));
        }

        let cpu = (stats.cpu_used / f64::from(stats.max_cpu)).max(MIN_UTILIZATION);
        let mem = (stats.mem_used as f64 / stats.max_mem as f64).max(MIN_UTILIZATION);

        Ok((1.0 / (cpu * mem)) as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framework::Code;
    use crate::plugins::testing::{node_info, request, GIB};
    use vmplace_backend::mock::node;

    fn loaded(cpu_used: f64, mem_used: u64) -> NodeInfo {
        let mut stats = node("pve1", 10, 10 * GIB);
        stats.cpu_used = cpu_used;
        stats.mem_used = mem_used;
        node_info(stats, Vec::new())
    }

    fn score(info: &NodeInfo) -> Result<i64, Status> {
        NodeResource.score(&mut CycleState::new(), &request(1, 512), info)
    }

    #[test]
    fn reciprocal_of_utilization() {
        // 1 / (0.5 * 0.5)
        assert_eq!(score(&loaded(5.0, 5 * GIB)).unwrap(), 4);
        // 1 / (0.2 * 0.5)
        assert_eq!(score(&loaded(2.0, 5 * GIB)).unwrap(), 10);
    }

    #[test]
    fn lighter_nodes_score_higher() {
        let busy = score(&loaded(8.0, 8 * GIB)).unwrap();
        let quiet = score(&loaded(2.0, 3 * GIB)).unwrap();
        assert!(quiet > busy);
    }

    #[test]
    fn idle_node_is_clamped() {
        assert_eq!(score(&loaded(0.0, 0)).unwrap(), 10_000);
        assert_eq!(score(&loaded(0.0, 5 * GIB)).unwrap(), 200);
    }

    #[test]
    fn zero_capacity_is_an_error() {
        let info = node_info(node("broken", 0, GIB), Vec::new());
        let status = score(&info).unwrap_err();
        assert_eq!(status.code(), Code::Error);
        assert!(status.message().contains("broken"));
    }
}
