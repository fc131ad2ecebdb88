//! The fixed set of plugins and the registry built from configuration.

use std::fmt;
use std::str::FromStr;

use tracing::info;

use super::{FilterPlugin, ScorePlugin, VmIdPlugin};
use crate::config::SchedulerConfig;
use crate::error::{Result, SchedulerError};
use crate::plugins;

/// What a plugin does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PluginKind {
    /// Accepts or rejects nodes.
    Filter,
    /// Ranks nodes.
    Score,
    /// Chooses VMIDs.
    VmId,
}

/// Every plugin the scheduler knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PluginName {
    /// Honors a pinned node name.
    NodeName,
    /// Matches node names against the request's pattern hint.
    NodeRegex,
    /// Caps the running-vCPU to physical-CPU ratio.
    CpuOvercommit,
    /// Caps the allocated-memory to physical-memory ratio.
    MemoryOvercommit,
    /// Uniform random score.
    Random,
    /// Prefers lightly loaded nodes.
    NodeResource,
    /// Uses the backend's next free id.
    NextId,
    /// Picks the first free id of a range.
    Range,
    /// Picks the first free id matching a pattern.
    Regex,
}

impl PluginName {
    /// Filters in the order they run.
    pub const FILTERS: [Self; 4] = [
        Self::NodeName,
        Self::NodeRegex,
        Self::CpuOvercommit,
        Self::MemoryOvercommit,
    ];

    /// Score plugins in the order they run.
    pub const SCORERS: [Self; 2] = [Self::Random, Self::NodeResource];

    /// VMID plugins.
    pub const VMID: [Self; 3] = [Self::NextId, Self::Range, Self::Regex];

    /// The name used in configuration documents.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NodeName => "NodeName",
            Self::NodeRegex => "NodeRegex",
            Self::CpuOvercommit => "CPUOvercommit",
            Self::MemoryOvercommit => "MemoryOvercommit",
            Self::Random => "Random",
            Self::NodeResource => "NodeResource",
            Self::NextId => "NextID",
            Self::Range => "Range",
            Self::Regex => "Regex",
        }
    }

    /// What the plugin does.
    #[must_use]
    pub const fn kind(self) -> PluginKind {
        match self {
            Self::NodeName | Self::NodeRegex | Self::CpuOvercommit | Self::MemoryOvercommit => {
                PluginKind::Filter
            }
            Self::Random | Self::NodeResource => PluginKind::Score,
            Self::NextId | Self::Range | Self::Regex => PluginKind::VmId,
        }
    }
}

impl fmt::Display for PluginName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PluginName {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self> {
        Self::FILTERS
            .into_iter()
            .chain(Self::SCORERS)
            .chain(Self::VMID)
            .find(|name| name.as_str() == s)
            .ok_or_else(|| SchedulerError::Config(format!("unknown plugin {s:?}")))
    }
}

/// The plugin set of one [`Manager`](crate::Manager), built once at startup.
pub struct Registry {
    filters: Vec<Box<dyn FilterPlugin>>,
    scorers: Vec<Box<dyn ScorePlugin>>,
    vmid: Box<dyn VmIdPlugin>,
}

impl Registry {
    /// Build the enabled plugins from a configuration document.
    ///
    /// # Errors
    ///
    /// Returns `Config` for unknown plugin names, invalid parameters, or an
    /// unusable VMID plugin selection.
    pub fn from_config(config: &SchedulerConfig) -> Result<Self> {
        for name in config.plugins.keys() {
            name.parse::<PluginName>()?;
        }

        let vmid_name: PluginName = config.vmid.parse()?;
        if vmid_name.kind() != PluginKind::VmId {
            return Err(SchedulerError::Config(format!(
                "{vmid_name} is not a vmid plugin"
            )));
        }
        if !config.plugin(vmid_name).enable {
            return Err(SchedulerError::Config(format!(
                "vmid plugin {vmid_name} is selected but disabled"
            )));
        }

        let filters = PluginName::FILTERS
            .into_iter()
            .filter(|name| config.plugin(*name).enable)
            .map(|name| plugins::new_filter(name, &config.plugin(name)))
            .collect::<Result<Vec<_>>>()?;

        let scorers = PluginName::SCORERS
            .into_iter()
            .filter(|name| config.plugin(*name).enable)
            .map(|name| plugins::new_scorer(name, &config.plugin(name)))
            .collect::<Result<Vec<_>>>()?;

        let vmid = plugins::new_vmid(vmid_name, &config.plugin(vmid_name))?;

        let registry = Self {
            filters,
            scorers,
            vmid,
        };

        info!(
            filters = ?registry.filter_names(),
            scorers = ?registry.scorer_names(),
            vmid = %registry.vmid.name(),
            "Built plugin registry"
        );

        Ok(registry)
    }

    /// Enabled filters, in run order.
    #[must_use]
    pub fn filters(&self) -> &[Box<dyn FilterPlugin>] {
        &self.filters
    }

    /// Enabled score plugins, in run order.
    #[must_use]
    pub fn scorers(&self) -> &[Box<dyn ScorePlugin>] {
        &self.scorers
    }

    /// The active VMID plugin.
    #[must_use]
    pub fn vmid(&self) -> &dyn VmIdPlugin {
        self.vmid.as_ref()
    }

    /// Names of the enabled filters.
    #[must_use]
    pub fn filter_names(&self) -> Vec<PluginName> {
        self.filters.iter().map(|p| p.name()).collect()
    }

    /// Names of the enabled score plugins.
    #[must_use]
    pub fn scorer_names(&self) -> Vec<PluginName> {
        self.scorers.iter().map(|p| p.name()).collect()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("filters", &self.filter_names())
            .field("scorers", &self.scorer_names())
            .field("vmid", &self.vmid.name())
            .finish()
    }
}
