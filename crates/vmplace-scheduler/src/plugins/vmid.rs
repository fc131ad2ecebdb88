//! VMID selection plugins.
//!
//! All three share one policy: the smallest qualifying id wins, and running
//! past [`VMID_SCAN_LIMIT`] is an unschedulable status.

use std::collections::HashSet;

use regex::Regex;
use tokio_util::sync::CancellationToken;
use vmplace_backend::VmId;

use crate::framework::{CycleState, Plugin, PluginName, Status, VmIdPlugin, VmRequest};

/// Scans never reach this id.
pub const VMID_SCAN_LIMIT: u32 = 1_000_000_000;

/// Ids examined between two looks at the cancellation token.
const CANCEL_CHECK_INTERVAL: u32 = 4096;

/// First id at or above `from` that is unused and matches `pattern`.
fn scan(
    cancel: &CancellationToken,
    from: VmId,
    used: &HashSet<VmId>,
    pattern: &Regex,
) -> Result<VmId, Status> {
    for raw in from.get()..VMID_SCAN_LIMIT {
        if raw % CANCEL_CHECK_INTERVAL == 0 && cancel.is_cancelled() {
            return Err(Status::error(format!("vmid scan cancelled at {raw}")));
        }
        let id = VmId::new(raw);
        if !used.contains(&id) && pattern.is_match(&id.to_string()) {
            return Ok(id);
        }
    }

    Err(Status::unschedulable(format!(
        "no unused vmid matching {pattern} between {from} and {VMID_SCAN_LIMIT}"
    )))
}

/// Uses the backend's suggested id, or scans upward from it when the
/// request carries a `vmid_regex` hint.
#[derive(Debug, Clone, Copy, Default)]
pub struct NextId;

impl Plugin for NextId {
    fn name(&self) -> PluginName {
        PluginName::NextId
    }
}

impl VmIdPlugin for NextId {
    fn select(
        &self,
        _state: &mut CycleState,
        cancel: &CancellationToken,
        request: &VmRequest,
        baseline: VmId,
        used: &HashSet<VmId>,
    ) -> Result<VmId, Status> {
        match request.hints.vmid_regex() {
            Some(pattern) => scan(cancel, baseline, used, pattern),
            None => Ok(baseline),
        }
    }
}

/// Picks the first unused id of the `vmid_range` hint.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdRange;

impl Plugin for IdRange {
    fn name(&self) -> PluginName {
        PluginName::Range
    }
}

impl VmIdPlugin for IdRange {
    fn select(
        &self,
        state: &mut CycleState,
        _cancel: &CancellationToken,
        request: &VmRequest,
        baseline: VmId,
        used: &HashSet<VmId>,
    ) -> Result<VmId, Status> {
        let Some(range) = request.hints.vmid_range() else {
            state.set_message(
                self.name().as_str(),
                format!("no vmid range hint, using {baseline}"),
            );
            return Ok(baseline);
        };

        range
            .iter()
            .find(|id| !used.contains(id))
            .ok_or_else(|| Status::unschedulable(format!("every vmid in {range} is in use")))
    }
}

/// Picks the first unused id at or above the baseline matching the
/// `vmid_regex` hint.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdRegex;

impl Plugin for IdRegex {
    fn name(&self) -> PluginName {
        PluginName::Regex
    }
}

impl VmIdPlugin for IdRegex {
    fn select(
        &self,
        state: &mut CycleState,
        cancel: &CancellationToken,
        request: &VmRequest,
        baseline: VmId,
        used: &HashSet<VmId>,
    ) -> Result<VmId, Status> {
        let Some(pattern) = request.hints.vmid_regex() else {
            state.set_message(
                self.name().as_str(),
                format!("no vmid pattern hint, using {baseline}"),
            );
            return Ok(baseline);
        };

        scan(cancel, baseline, used, pattern)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framework::{Code, SchedulingHints, VmIdRange};
    use crate::plugins::testing::request;

    fn ids(values: &[u32]) -> HashSet<VmId> {
        values.iter().copied().map(VmId::new).collect()
    }

    fn range_request(start: u32, end: u32) -> VmRequest {
        let range = VmIdRange::new(VmId::new(start), VmId::new(end)).unwrap();
        request(1, 512).with_hints(SchedulingHints::new().with_vmid_range(range))
    }

    fn regex_request(pattern: &str) -> VmRequest {
        request(1, 512).with_hints(SchedulingHints::new().with_vmid_regex(pattern).unwrap())
    }

    #[test]
    fn range_takes_first_gap() {
        let id = IdRange
            .select(
                &mut CycleState::new(),
                &CancellationToken::new(),
                &range_request(10, 15),
                VmId::new(100),
                &ids(&[10, 11, 13]),
            )
            .unwrap();
        assert_eq!(id, VmId::new(12));
    }

    #[test]
    fn exhausted_range_is_unschedulable() {
        let status = IdRange
            .select(
                &mut CycleState::new(),
                &CancellationToken::new(),
                &range_request(10, 12),
                VmId::new(100),
                &ids(&[10, 11, 12]),
            )
            .unwrap_err();
        assert_eq!(status.code(), Code::Unschedulable);
    }

    #[test]
    fn range_without_hint_falls_back_to_baseline() {
        let mut state = CycleState::new();
        let id = IdRange
            .select(
                &mut state,
                &CancellationToken::new(),
                &request(1, 512),
                VmId::new(104),
                &ids(&[100]),
            )
            .unwrap();

        assert_eq!(id, VmId::new(104));
        assert!(state.messages()["Range"].contains("104"));
        assert!(state.error().is_none());
    }

    #[test]
    fn next_id_passes_baseline_through() {
        let id = NextId
            .select(
                &mut CycleState::new(),
                &CancellationToken::new(),
                &request(1, 512),
                VmId::new(107),
                &ids(&[]),
            )
            .unwrap();
        assert_eq!(id, VmId::new(107));
    }

    #[test]
    fn next_id_scans_with_pattern() {
        let id = NextId
            .select(
                &mut CycleState::new(),
                &CancellationToken::new(),
                &regex_request("^2\\d\\d$"),
                VmId::new(105),
                &ids(&[200, 201]),
            )
            .unwrap();
        assert_eq!(id, VmId::new(202));
    }

    #[test]
    fn regex_scans_upward_from_baseline() {
        let id = IdRegex
            .select(
                &mut CycleState::new(),
                &CancellationToken::new(),
                &regex_request("5$"),
                VmId::new(100),
                &ids(&[105, 115]),
            )
            .unwrap();
        assert_eq!(id, VmId::new(125));
    }

    #[test]
    fn regex_without_hint_falls_back_to_baseline() {
        let mut state = CycleState::new();
        let id = IdRegex
            .select(
                &mut state,
                &CancellationToken::new(),
                &request(1, 512),
                VmId::new(100),
                &ids(&[]),
            )
            .unwrap();
        assert_eq!(id, VmId::new(100));
        assert!(state.messages().contains_key("Regex"));
    }

    #[test]
    fn scan_stops_at_limit() {
        let pattern = Regex::new("^1$").unwrap();
        let status = scan(
            &CancellationToken::new(),
            VmId::new(VMID_SCAN_LIMIT - 3),
            &ids(&[]),
            &pattern,
        )
        .unwrap_err();
        assert_eq!(status.code(), Code::Unschedulable);
    }

    #[test]
    fn scan_gives_up_once_cancelled() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let started = std::time::Instant::now();

        let status = IdRegex
            .select(
                &mut CycleState::new(),
                &cancel,
                &regex_request("^abc$"),
                VmId::new(100),
                &ids(&[]),
            )
            .unwrap_err();

        assert_eq!(status.code(), Code::Error);
        assert!(status.message().contains("cancelled at 4096"));
        assert!(started.elapsed() < std::time::Duration::from_secs(1));
    }
}
