//! Filter matching node names against the request's pattern hint.

use crate::framework::{CycleState, FilterPlugin, NodeInfo, Plugin, PluginName, Status, VmRequest};

/// Accepts nodes whose name matches the `node_name_regex` hint, or every
/// node when the hint is absent.
#[derive(Debug, Clone, Copy, Default)]
pub struct NodeRegex;

impl Plugin for NodeRegex {
    fn name(&self) -> PluginName {
        PluginName::NodeRegex
    }
}

impl FilterPlugin for NodeRegex {
    fn filter(&self, _state: &mut CycleState, request: &VmRequest, node: &NodeInfo) -> Status {
        let Some(pattern) = request.hints.node_name_regex() else {
            return Status::success();
        };

        if pattern.is_match(node.name()) {
            Status::success()
        } else {
            Status::unschedulable(format!(
                "node {} does not match pattern {pattern}",
                node.name()
            ))
        }
    }
}
