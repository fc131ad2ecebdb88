//! Scheduler and service configuration.
//!
//! The plugin document is YAML:
//!
//! ```yaml
//! vmid: Range
//! plugins:
//!   CPUOvercommit:
//!     config:
//!       ratio: 8
//!   Random:
//!     enable: false
//! ```
//!
//! Plugins missing from the document are enabled with their defaults.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use vmplace_backend::ProxmoxConfig;

use crate::error::{Result, SchedulerError};
use crate::framework::PluginName;

/// Enable flag and parameters for one plugin.
#[derive(Debug, Clone, Deserialize)]
pub struct PluginConfig {
    /// Whether the plugin runs.
    #[serde(default = "PluginConfig::default_enable")]
    pub enable: bool,
    /// Plugin-specific parameters.
    #[serde(default)]
    pub config: Option<serde_yaml::Value>,
}

impl PluginConfig {
    const fn default_enable() -> bool {
        true
    }

    /// Decode the plugin parameters, falling back to `T::default()` when absent.
    ///
    /// # Errors
    ///
    /// Returns `Config` if the parameters do not match `T`.
    pub fn args<T: DeserializeOwned + Default>(&self, plugin: PluginName) -> Result<T> {
        match &self.config {
            None | Some(serde_yaml::Value::Null) => Ok(T::default()),
            Some(value) => serde_yaml::from_value(value.clone()).map_err(|e| {
                SchedulerError::Config(format!("invalid parameters for plugin {plugin}: {e}"))
            }),
        }
    }
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            enable: Self::default_enable(),
            config: None,
        }
    }
}

/// The plugin configuration document.
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Name of the active VMID plugin.
    #[serde(default = "SchedulerConfig::default_vmid")]
    pub vmid: String,
    /// Per-plugin settings keyed by plugin name.
    #[serde(default)]
    pub plugins: BTreeMap<String, PluginConfig>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            vmid: Self::default_vmid(),
            plugins: BTreeMap::new(),
        }
    }
}

impl SchedulerConfig {
    fn default_vmid() -> String {
        PluginName::NextId.as_str().to_string()
    }

    /// Parse a YAML document. An empty document yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns `ConfigParse` if the document is not valid.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Load the document at `path`. No path, or an empty one, yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns `ConfigRead` if the file cannot be read, or `ConfigParse` if
    /// it is not valid.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path.filter(|p| !p.as_os_str().is_empty()) else {
            return Ok(Self::default());
        };

        let yaml = std::fs::read_to_string(path).map_err(|source| SchedulerError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;

        Self::from_yaml(&yaml)
    }

    /// Settings for a plugin, or the defaults if it is not listed.
    #[must_use]
    pub fn plugin(&self, name: PluginName) -> PluginConfig {
        self.plugins.get(name.as_str()).cloned().unwrap_or_default()
    }
}

/// Configuration of the scheduler service binary.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Address the HTTP server listens on.
    pub listen_addr: String,
    /// Path of the plugin configuration document.
    pub plugin_config: Option<PathBuf>,
    /// Stop the worker after this long.
    pub timeout: Option<Duration>,
    /// Proxmox connection settings.
    pub proxmox: ProxmoxConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
            plugin_config: None,
            timeout: None,
            proxmox: ProxmoxConfig::default(),
        }
    }
}

impl ServiceConfig {
    /// Load configuration from environment variables.
    ///
    /// Supported environment variables:
    /// - `LISTEN_ADDR`: HTTP listen address
    /// - `SCHEDULER_CONFIG`: path of the plugin configuration document
    /// - `SCHEDULER_TIMEOUT_SECS`: stop the worker after this many seconds
    /// - plus the `PROXMOX_*` variables read by [`ProxmoxConfig::from_env`]
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self {
            proxmox: ProxmoxConfig::from_env(),
            ..Self::default()
        };

        if let Ok(val) = std::env::var("LISTEN_ADDR") {
            config.listen_addr = val;
        }
        if let Ok(val) = std::env::var("SCHEDULER_CONFIG") {
            if !val.is_empty() {
                config.plugin_config = Some(PathBuf::from(val));
            }
        }
        if let Ok(val) = std::env::var("SCHEDULER_TIMEOUT_SECS") {
            if let Ok(n) = val.parse() {
                config.timeout = Some(Duration::from_secs(n));
            }
        }

        config
    }
}
