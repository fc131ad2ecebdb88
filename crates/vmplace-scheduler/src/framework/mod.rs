//! Plugin framework.
//!
//! A scheduling attempt runs three kinds of plugins:
//!
//! - [`FilterPlugin`]s accept or reject each node
//! - [`ScorePlugin`]s rank the nodes that survived filtering
//! - one [`VmIdPlugin`] picks the identifier for the new instance
//!
//! Plugins are pure functions of the request, a [`NodeInfo`] snapshot and the
//! attempt's [`CycleState`]. They never talk to the backend themselves.

pub mod hints;
pub mod node_info;
pub mod registry;
pub mod types;

use std::collections::HashSet;
use std::future::Future;

use tokio_util::sync::CancellationToken;
use vmplace_backend::VmId;

use crate::error::{Result, SchedulerError};

pub use hints::{RawHints, SchedulingHints, VmIdRange, VmRequest};
pub use node_info::NodeInfo;
pub use registry::{PluginName, Registry};
pub use types::{Code, CycleState, SchedulerResult, Status};

/// Common behavior of every plugin.
pub trait Plugin: Send + Sync {
    /// The plugin's registered name.
    fn name(&self) -> PluginName;
}

/// Decides whether a node can host the request.
pub trait FilterPlugin: Plugin {
    /// Return a successful status to accept the node; anything else rejects it.
    fn filter(&self, state: &mut CycleState, request: &VmRequest, node: &NodeInfo) -> Status;
}

/// Ranks a feasible node. Higher is better.
pub trait ScorePlugin: Plugin {
    /// Score `node` for the request.
    ///
    /// # Errors
    ///
    /// Returns a failed status if no trustworthy score can be computed.
    fn score(
        &self,
        state: &mut CycleState,
        request: &VmRequest,
        node: &NodeInfo,
    ) -> std::result::Result<i64, Status>;
}

/// Chooses the VMID of the new instance.
pub trait VmIdPlugin: Plugin {
    /// Pick an id not present in `used`.
    ///
    /// `baseline` is the id the backend suggests as next free. Runs on the
    /// blocking pool; long searches must give up once `cancel` fires.
    ///
    /// # Errors
    ///
    /// Returns an unschedulable status when no id qualifies, or an error
    /// status when the plugin fails or is cancelled.
    fn select(
        &self,
        state: &mut CycleState,
        cancel: &CancellationToken,
        request: &VmRequest,
        baseline: VmId,
        used: &HashSet<VmId>,
    ) -> std::result::Result<VmId, Status>;
}

/// Run `fut` unless `cancel` fires first.
pub(crate) async fn guarded<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(SchedulerError::Cancelled),
        result = fut => result,
    }
}
