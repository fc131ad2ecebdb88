//! Overcommit filters.
//!
//! The two filters differ: CPU counts only running instances
//! and allows the ratio to reach the threshold, memory counts every
//! instance and must stay strictly below it.

use serde::Deserialize;

use crate::error::{Result, SchedulerError};
use crate::framework::{CycleState, FilterPlugin, NodeInfo, Plugin, PluginName, Status, VmRequest};

fn validate_ratio(plugin: PluginName, ratio: f64) -> Result<f64> {
    if ratio.is_finite() && ratio > 0.0 {
        Ok(ratio)
    } else {
        Err(SchedulerError::Config(format!(
            "{plugin} ratio must be a positive number, got {ratio}"
        )))
    }
}

/// Parameters of [`CpuOvercommit`].
#[derive(Debug, Clone, Deserialize)]
pub struct CpuOvercommitArgs {
    /// Maximum allowed vCPU to physical CPU ratio.
    #[serde(default = "CpuOvercommitArgs::default_ratio")]
    pub ratio: f64,
}

impl CpuOvercommitArgs {
    const fn default_ratio() -> f64 {
        4.0
    }
}

impl Default for CpuOvercommitArgs {
    fn default() -> Self {
        Self {
            ratio: Self::default_ratio(),
        }
    }
}

/// Rejects nodes whose running vCPUs plus the request would exceed
/// `ratio` × physical CPUs.
#[derive(Debug, Clone)]
pub struct CpuOvercommit {
    ratio: f64,
}

impl CpuOvercommit {
    /// Create the filter.
    ///
    /// # Errors
    ///
    /// Returns `Config` if the ratio is not a positive number.
    pub fn new(args: CpuOvercommitArgs) -> Result<Self> {
        Ok(Self {
            ratio: validate_ratio(PluginName::CpuOvercommit, args.ratio)?,
        })
    }
}

impl Plugin for CpuOvercommit {
    fn name(&self) -> PluginName {
        PluginName::CpuOvercommit
    }
}

impl FilterPlugin for CpuOvercommit {
    #[allow(clippy::cast_precision_loss)]
    fn filter(&self, _state: &mut CycleState, request: &VmRequest, node: &NodeInfo) -> Status {
        let vcpus = node.running_vcpus() + request.spec.requested_vcpus();
        let ratio = vcpus as f64 / f64::from(node.node().max_cpu);

        if ratio <= self.ratio {
            Status::success()
        } else {
            Status::unschedulable(format!(
                "cpu overcommit ratio {ratio:.2} exceeds {} ({vcpus} vCPUs on {} CPUs)",
                self.ratio,
                node.node().max_cpu
            ))
        }
    }
}

/// Parameters of [`MemoryOvercommit`].
#[derive(Debug, Clone, Deserialize)]
pub struct MemoryOvercommitArgs {
    /// Allocated to physical memory ratio that must not be reached.
    #[serde(default = "MemoryOvercommitArgs::default_ratio")]
    pub ratio: f64,
}

impl MemoryOvercommitArgs {
    const fn default_ratio() -> f64 {
        1.0
    }
}

impl Default for MemoryOvercommitArgs {
    fn default() -> Self {
        Self {
            ratio: Self::default_ratio(),
        }
    }
}

/// Rejects nodes whose allocated memory plus the request would reach
/// `ratio` × physical memory.
#[derive(Debug, Clone)]
pub struct MemoryOvercommit {
    ratio: f64,
}

impl MemoryOvercommit {
    /// Create the filter.
    ///
    /// # Errors
    ///
    /// Returns `Config` if the ratio is not a positive number.
    pub fn new(args: MemoryOvercommitArgs) -> Result<Self> {
        Ok(Self {
            ratio: validate_ratio(PluginName::MemoryOvercommit, args.ratio)?,
        })
    }
}

impl Plugin for MemoryOvercommit {
    fn name(&self) -> PluginName {
        PluginName::MemoryOvercommit
    }
}

impl FilterPlugin for MemoryOvercommit {
    #[allow(clippy::cast_precision_loss)]
    fn filter(&self, _state: &mut CycleState, request: &VmRequest, node: &NodeInfo) -> Status {
        let allocated = node
            .allocated_memory()
            .saturating_add(request.spec.memory_bytes());
        let ratio = allocated as f64 / node.node().max_mem as f64;

        if ratio < self.ratio {
            Status::success()
        } else {
            Status::unschedulable(format!(
                "memory overcommit ratio {ratio:.2} reaches {}",
                self.ratio
            ))
        }
    }
}
