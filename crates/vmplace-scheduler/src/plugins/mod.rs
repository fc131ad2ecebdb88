//! Built-in plugins.
//!
//! | name | kind | behavior |
//! |---|---|---|
//! | `NodeName` | filter | honors a pinned node |
//! | `NodeRegex` | filter | node name must match the pattern hint |
//! | `CPUOvercommit` | filter | running vCPUs + request over physical CPUs ≤ ratio |
//! | `MemoryOvercommit` | filter | allocated memory + request over physical memory < ratio |
//! | `Random` | score | uniform in `[0, 100)` |
//! | `NodeResource` | score | reciprocal of CPU × memory utilization |
//! | `NextID` | vmid | backend's next id, or first match of the pattern hint |
//! | `Range` | vmid | first free id of the range hint |
//! | `Regex` | vmid | first free id matching the pattern hint |

pub mod node_name;
pub mod node_regex;
pub mod node_resource;
pub mod overcommit;
pub mod random;
pub mod vmid;

use crate::config::PluginConfig;
use crate::error::{Result, SchedulerError};
use crate::framework::{FilterPlugin, PluginName, ScorePlugin, VmIdPlugin};

pub use node_name::NodeName;
pub use node_regex::NodeRegex;
pub use node_resource::NodeResource;
pub use overcommit::{CpuOvercommit, MemoryOvercommit};
pub use random::Random;
pub use vmid::{IdRange, IdRegex, NextId, VMID_SCAN_LIMIT};

fn wrong_kind(name: PluginName, expected: &str) -> SchedulerError {
    SchedulerError::Config(format!("{name} is not a {expected} plugin"))
}

/// Construct a filter plugin.
pub(crate) fn new_filter(name: PluginName, config: &PluginConfig) -> Result<Box<dyn FilterPlugin>> {
    let plugin: Box<dyn FilterPlugin> = match name {
        PluginName::NodeName => Box::new(NodeName),
        PluginName::NodeRegex => Box::new(NodeRegex),
        PluginName::CpuOvercommit => Box::new(CpuOvercommit::new(config.args(name)?)?),
        PluginName::MemoryOvercommit => Box::new(MemoryOvercommit::new(config.args(name)?)?),
        _ => return Err(wrong_kind(name, "filter")),
    };
    Ok(plugin)
}

/// Construct a score plugin.
pub(crate) fn new_scorer(name: PluginName, _config: &PluginConfig) -> Result<Box<dyn ScorePlugin>> {
    let plugin: Box<dyn ScorePlugin> = match name {
        PluginName::Random => Box::new(Random),
        PluginName::NodeResource => Box::new(NodeResource),
        _ => return Err(wrong_kind(name, "score")),
    };
    Ok(plugin)
}

/// Construct a VMID plugin.
pub(crate) fn new_vmid(name: PluginName, _config: &PluginConfig) -> Result<Box<dyn VmIdPlugin>> {
    let plugin: Box<dyn VmIdPlugin> = match name {
        PluginName::NextId => Box::new(NextId),
        PluginName::Range => Box::new(IdRange),
        PluginName::Regex => Box::new(IdRegex),
        _ => return Err(wrong_kind(name, "vmid")),
    };
    Ok(plugin)
}

#[cfg(test)]
pub(crate) mod testing {
    //! Fixtures shared by the plugin tests.

    use vmplace_backend::mock::{instance, node};
    use vmplace_backend::{InstanceStats, InstanceStatus, NodeStats, VmCreateSpec};

    use crate::framework::{NodeInfo, VmRequest};

    pub const GIB: u64 = 1024 * 1024 * 1024;
    pub const MIB: u64 = 1024 * 1024;

    pub fn node_info(stats: NodeStats, instances: Vec<InstanceStats>) -> NodeInfo {
        NodeInfo::new(stats, instances)
    }

    pub fn idle_node(name: &str) -> NodeInfo {
        node_info(node(name, 8, 16 * GIB), Vec::new())
    }

    pub fn running(vmid: u32, cpus: u32, max_mem: u64) -> InstanceStats {
        instance(vmid, cpus, max_mem, InstanceStatus::Running)
    }

    pub fn stopped(vmid: u32, cpus: u32, max_mem: u64) -> InstanceStats {
        instance(vmid, cpus, max_mem, InstanceStatus::Stopped)
    }

    pub fn request(cores: u32, memory_mib: u64) -> VmRequest {
        VmRequest::new(VmCreateSpec::new("test-vm", cores, memory_mib))
    }
}
