//! Node selection: the filter and score phases.

use tracing::debug;

use crate::error::{Result, SchedulerError};
use crate::framework::{CycleState, NodeInfo, Registry, VmRequest};

/// Per-plugin scores of every candidate node.
///
/// Row `i` belongs to the `i`th candidate, column `j` to the `j`th score
/// plugin, so iteration order always follows the candidate list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoreMatrix {
    nodes: Vec<String>,
    scores: Vec<Vec<i64>>,
}

impl ScoreMatrix {
    /// Candidate names in ranking order.
    #[must_use]
    pub fn nodes(&self) -> &[String] {
        &self.nodes
    }

    /// Per-plugin scores of the `index`th candidate.
    #[must_use]
    pub fn row(&self, index: usize) -> Option<&[i64]> {
        self.scores.get(index).map(Vec::as_slice)
    }

    /// Aggregate score of every candidate.
    #[must_use]
    pub fn totals(&self) -> Vec<i64> {
        self.scores
            .iter()
            .map(|row| row.iter().fold(0_i64, |acc, s| acc.saturating_add(*s)))
            .collect()
    }
}

/// Runs the filter and score plugins of a [`Registry`] over a node snapshot.
#[derive(Debug)]
pub struct NodeScheduler<'a> {
    registry: &'a Registry,
}

impl<'a> NodeScheduler<'a> {
    /// Create a node scheduler over the given plugins.
    #[must_use]
    pub fn new(registry: &'a Registry) -> Self {
        Self { registry }
    }

    /// Pick the node that should host the request.
    ///
    /// # Errors
    ///
    /// Returns `NoNodesAvailable` if every node is filtered out,
    /// `PluginExecution` if a score plugin fails.
    pub fn schedule(
        &self,
        state: &mut CycleState,
        request: &VmRequest,
        nodes: &[NodeInfo],
    ) -> Result<String> {
        let feasible = self.filter(state, request, nodes)?;

        if let [only] = feasible.as_slice() {
            debug!(node = %only.name(), "Single feasible node, skipping score phase");
            return Ok(only.name().to_string());
        }

        let matrix = self.score(state, request, &feasible)?;
        select_host(&matrix)
    }

    /// Nodes accepted by every enabled filter, in snapshot order.
    ///
    /// Each node stops at the first filter that rejects it.
    ///
    /// # Errors
    ///
    /// Returns `NoNodesAvailable`, naming each rejecting plugin, if no node
    /// is left.
    pub fn filter<'n>(
        &self,
        state: &mut CycleState,
        request: &VmRequest,
        nodes: &'n [NodeInfo],
    ) -> Result<Vec<&'n NodeInfo>> {
        let mut feasible = Vec::with_capacity(nodes.len());
        let mut reasons = Vec::new();

        'nodes: for node in nodes {
            for plugin in self.registry.filters() {
                let status = plugin.filter(state, request, node);
                if !status.is_success() {
                    let status = status.with_plugin(plugin.name().as_str());
                    debug!(node = %node.name(), reason = %status, "Node filtered out");
                    reasons.push(format!("{}: {status}", node.name()));
                    continue 'nodes;
                }
            }
            feasible.push(node);
        }

        if feasible.is_empty() {
            return Err(SchedulerError::NoNodesAvailable {
                total: nodes.len(),
                reasons,
            });
        }

        debug!(
            feasible = feasible.len(),
            total = nodes.len(),
            "Filter phase finished"
        );
        Ok(feasible)
    }

    /// Score every candidate with every enabled score plugin.
    ///
    /// # Errors
    ///
    /// Returns `PluginExecution` on the first plugin failure; a partial
    /// matrix is never returned.
    pub fn score(
        &self,
        state: &mut CycleState,
        request: &VmRequest,
        nodes: &[&NodeInfo],
    ) -> Result<ScoreMatrix> {
        let mut scores = Vec::with_capacity(nodes.len());

        for node in nodes {
            let mut row = Vec::with_capacity(self.registry.scorers().len());
            for plugin in self.registry.scorers() {
                let score = plugin.score(state, request, node).map_err(|status| {
                    SchedulerError::PluginExecution {
                        plugin: plugin.name().to_string(),
                        reason: status.message(),
                    }
                })?;
                row.push(score);
            }
            debug!(node = %node.name(), scores = ?row, "Scored node");
            scores.push(row);
        }

        Ok(ScoreMatrix {
            nodes: nodes.iter().map(|n| n.name().to_string()).collect(),
            scores,
        })
    }
}

/// The candidate with the strictly greatest aggregate score. Ties go to the
/// earliest candidate.
///
/// # Errors
///
/// Returns `NoScoredNodes` if the matrix is empty.
pub fn select_host(matrix: &ScoreMatrix) -> Result<String> {
    let mut best: Option<(usize, i64)> = None;

    for (index, total) in matrix.totals().into_iter().enumerate() {
        if best.map_or(true, |(_, top)| total > top) {
            best = Some((index, total));
        }
    }

    let (index, total) = best.ok_or(SchedulerError::NoScoredNodes)?;
    let node = matrix.nodes[index].clone();
    debug!(node = %node, score = total, "Selected host");
    Ok(node)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SchedulerConfig;
    use crate::plugins::testing::{idle_node, node_info, request, running, GIB};
    use vmplace_backend::mock::node;

    fn registry(yaml: &str) -> Registry {
        Registry::from_config(&SchedulerConfig::from_yaml(yaml).unwrap()).unwrap()
    }

    /// Deterministic plugins only.
    fn no_random() -> Registry {
        registry("plugins:\n  Random:\n    enable: false\n")
    }

    fn loaded(name: &str, cpu_used: f64, mem_used: u64) -> NodeInfo {
        let mut stats = node(name, 10, 10 * GIB);
        stats.cpu_used = cpu_used;
        stats.mem_used = mem_used;
        node_info(stats, Vec::new())
    }

    fn matrix(nodes: &[&str], scores: Vec<Vec<i64>>) -> ScoreMatrix {
        ScoreMatrix {
            nodes: nodes.iter().map(ToString::to_string).collect(),
            scores,
        }
    }

    #[test]
    fn filter_reports_first_rejecting_plugin() {
        let registry = no_random();
        let nodes = vec![idle_node("pve1"), idle_node("pve2")];
        let mut req = request(1, 512);
        req.spec.node = Some("pve3".to_string());

        let err = NodeScheduler::new(&registry)
            .filter(&mut CycleState::new(), &req, &nodes)
            .unwrap_err();

        match err {
            SchedulerError::NoNodesAvailable { total, reasons } => {
                assert_eq!(total, 2);
                assert_eq!(reasons.len(), 2);
                assert!(reasons[0].starts_with("pve1: NodeName: "));
                assert!(reasons[1].starts_with("pve2: NodeName: "));
            }
            other => panic!("expected NoNodesAvailable, got {other:?}"),
        }
    }

    #[test]
    fn filter_keeps_snapshot_order() {
        let registry = no_random();
        let nodes = vec![
            idle_node("pve1"),
            node_info(node("small", 1, 16 * GIB), vec![running(100, 4, GIB)]),
            idle_node("pve3"),
        ];

        let feasible = NodeScheduler::new(&registry)
            .filter(&mut CycleState::new(), &request(2, 512), &nodes)
            .unwrap();
        let names: Vec<_> = feasible.iter().map(|n| n.name()).collect();
        assert_eq!(names, ["pve1", "pve3"]);
    }

    #[test]
    fn single_feasible_node_skips_scoring() {
        // A zero-capacity node would make NodeResource fail if it were scored.
        let registry = registry("plugins:\n  CPUOvercommit:\n    enable: false\n  MemoryOvercommit:\n    enable: false\n");
        let nodes = vec![node_info(node("odd", 0, 0), Vec::new()), idle_node("pve2")];
        let mut req = request(1, 512);
        req.spec.node = Some("odd".to_string());

        let chosen = NodeScheduler::new(&registry)
            .schedule(&mut CycleState::new(), &req, &nodes)
            .unwrap();
        assert_eq!(chosen, "odd");
    }

    #[test]
    fn scoring_failure_is_fatal() {
        let registry = registry("plugins:\n  CPUOvercommit:\n    enable: false\n  MemoryOvercommit:\n    enable: false\n");
        let nodes = vec![idle_node("pve1"), node_info(node("odd", 0, 0), Vec::new())];

        let err = NodeScheduler::new(&registry)
            .schedule(&mut CycleState::new(), &request(1, 512), &nodes)
            .unwrap_err();
        assert!(matches!(
            err,
            SchedulerError::PluginExecution { ref plugin, .. } if plugin == "NodeResource"
        ));
    }

    #[test]
    fn least_loaded_node_wins() {
        let registry = no_random();
        let nodes = vec![
            loaded("busy", 8.0, 8 * GIB),
            loaded("quiet", 2.0, 5 * GIB),
            loaded("medium", 5.0, 5 * GIB),
        ];

        let chosen = NodeScheduler::new(&registry)
            .schedule(&mut CycleState::new(), &request(1, 512), &nodes)
            .unwrap();
        assert_eq!(chosen, "quiet");
    }

    #[test]
    fn ties_go_to_first_candidate() {
        let m = matrix(&["a", "b", "c"], vec![vec![5, 5], vec![3, 7], vec![10, 0]]);
        assert_eq!(m.totals(), vec![10, 10, 10]);
        assert_eq!(m.row(1), Some(&[3, 7][..]));
        assert_eq!(select_host(&m).unwrap(), "a");

        let m = matrix(&["a", "b"], vec![vec![1], vec![2]]);
        assert_eq!(select_host(&m).unwrap(), "b");
    }

    #[test]
    fn empty_matrix_is_an_error() {
        assert!(matches!(
            select_host(&matrix(&[], Vec::new())),
            Err(SchedulerError::NoScoredNodes)
        ));
    }

    #[test]
    fn no_score_plugins_picks_first_feasible() {
        let registry = registry(
            "plugins:\n  Random:\n    enable: false\n  NodeResource:\n    enable: false\n",
        );
        let nodes = vec![loaded("pve1", 9.0, 9 * GIB), loaded("pve2", 1.0, GIB)];

        let chosen = NodeScheduler::new(&registry)
            .schedule(&mut CycleState::new(), &request(1, 512), &nodes)
            .unwrap();
        assert_eq!(chosen, "pve1");
    }
}
