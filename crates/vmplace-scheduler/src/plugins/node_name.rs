//! Filter honoring a pinned node name.

use crate::framework::{CycleState, FilterPlugin, NodeInfo, Plugin, PluginName, Status, VmRequest};

/// Accepts every node when the request is not pinned, otherwise only the pinned one.
#[derive(Debug, Clone, Copy, Default)]
pub struct NodeName;

impl Plugin for NodeName {
    fn name(&self) -> PluginName {
        PluginName::NodeName
    }
}

impl FilterPlugin for NodeName {
    fn filter(&self, _state: &mut CycleState, request: &VmRequest, node: &NodeInfo) -> Status {
        match request.spec.pinned_node() {
            Some(pinned) if pinned != node.name() => Status::unschedulable(format!(
                "node {} does not match requested node {pinned}",
                node.name()
            )),
            _ => Status::success(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::testing::{idle_node, request};

    #[test]
    fn unpinned_request_fits_anywhere() {
        let status = NodeName.filter(&mut CycleState::new(), &request(1, 512), &idle_node("pve1"));
        assert!(status.is_success());
    }

    #[test]
    fn pinned_request_fits_only_its_node() {
        let mut req = request(1, 512);
        req.spec.node = Some("pve2".to_string());
        let mut state = CycleState::new();

        assert!(NodeName.filter(&mut state, &req, &idle_node("pve2")).is_success());

        let status = NodeName.filter(&mut state, &req, &idle_node("pve1"));
        assert!(!status.is_success());
        assert_eq!(status.reasons()[0], "node pve1 does not match requested node pve2");
    }

    #[test]
    fn empty_pin_is_ignored() {
        let mut req = request(1, 512);
        req.spec.node = Some(String::new());

        assert!(NodeName
            .filter(&mut CycleState::new(), &req, &idle_node("pve1"))
            .is_success());
    }
}
