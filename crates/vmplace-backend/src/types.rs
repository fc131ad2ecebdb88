//! Types exchanged with a compute backend.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Numeric identifier a backend uses to address a virtual machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VmId(u32);

impl VmId {
    /// Create a new `VmId`.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Return the raw numeric value.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for VmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for VmId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(Self)
    }
}

impl From<u32> for VmId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

/// Point-in-time resource statistics of one hypervisor node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeStats {
    /// Node name as known to the cluster.
    pub name: String,
    /// Whether the node currently reports itself online.
    pub online: bool,
    /// CPU cores currently in use (fractional).
    pub cpu_used: f64,
    /// Number of physical CPU threads on the node.
    pub max_cpu: u32,
    /// Memory currently in use, in bytes.
    pub mem_used: u64,
    /// Total memory on the node, in bytes.
    pub max_mem: u64,
}

/// Run state of a virtual machine instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    /// The instance is running.
    Running,
    /// The instance exists but is powered off.
    Stopped,
    /// The instance is suspended.
    Paused,
    /// The state could not be determined.
    #[default]
    Unknown,
}

impl InstanceStatus {
    /// Parse a status from the string the Proxmox API reports.
    #[must_use]
    pub fn from_pve_status(status: &str) -> Self {
        match status {
            "running" => Self::Running,
            "stopped" => Self::Stopped,
            "paused" | "suspended" => Self::Paused,
            _ => Self::Unknown,
        }
    }

    /// Check if the instance is consuming CPU.
    #[must_use]
    pub const fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }
}

/// Resource statistics of one virtual machine instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceStats {
    /// Instance identifier.
    pub vmid: VmId,
    /// Instance name.
    pub name: String,
    /// Current run state.
    pub status: InstanceStatus,
    /// Number of virtual CPUs assigned.
    pub cpus: u32,
    /// Maximum memory assigned, in bytes.
    pub max_mem: u64,
}

/// Specification of a virtual machine to create.
///
/// Fields the scheduler reasons about are typed; any other backend option
/// (disks, network devices, boot order, ...) travels in `options`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmCreateSpec {
    /// Name of the virtual machine.
    pub name: String,
    /// Pin the instance to this node, if set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,
    /// Cores per socket.
    #[serde(default = "VmCreateSpec::default_cores")]
    pub cores: u32,
    /// CPU sockets. Zero means one.
    #[serde(default)]
    pub sockets: u32,
    /// Memory in MiB.
    pub memory: u64,
    /// Storage target for the instance's disks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage: Option<String>,
    /// Additional backend-specific creation options.
    #[serde(flatten)]
    pub options: BTreeMap<String, String>,
}

impl VmCreateSpec {
    const fn default_cores() -> u32 {
        1
    }

    /// Create a spec with the given name, cores and memory (MiB).
    #[must_use]
    pub fn new(name: impl Into<String>, cores: u32, memory: u64) -> Self {
        Self {
            name: name.into(),
            node: None,
            cores,
            sockets: 0,
            memory,
            storage: None,
            options: BTreeMap::new(),
        }
    }

    /// Pin the spec to a node.
    #[must_use]
    pub fn on_node(mut self, node: impl Into<String>) -> Self {
        self.node = Some(node.into());
        self
    }

    /// The pinned node name, if any non-empty pin is present.
    #[must_use]
    pub fn pinned_node(&self) -> Option<&str> {
        self.node.as_deref().filter(|n| !n.is_empty())
    }

    /// Total virtual CPUs requested (cores × sockets, sockets defaulting to 1).
    #[must_use]
    pub fn requested_vcpus(&self) -> u64 {
        u64::from(self.cores) * u64::from(self.sockets.max(1))
    }

    /// Requested memory in bytes.
    #[must_use]
    pub const fn memory_bytes(&self) -> u64 {
        self.memory.saturating_mul(1024 * 1024)
    }

    /// Render the spec as Proxmox form parameters for the given id.
    #[must_use]
    pub fn form_params(&self, vmid: VmId) -> Vec<(String, String)> {
        let mut params = vec![
            ("vmid".to_string(), vmid.to_string()),
            ("name".to_string(), self.name.clone()),
            ("cores".to_string(), self.cores.to_string()),
            ("sockets".to_string(), self.sockets.max(1).to_string()),
            ("memory".to_string(), self.memory.to_string()),
        ];
        params.extend(self.options.iter().map(|(k, v)| (k.clone(), v.clone())));
        params
    }
}

/// A virtual machine created by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    /// Node the instance was created on.
    pub node: String,
    /// Identifier assigned to the instance.
    pub vmid: VmId,
    /// Backend task tracking the creation, if the backend reports one.
    pub task: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_status_from_pve() {
        assert_eq!(InstanceStatus::from_pve_status("running"), InstanceStatus::Running);
        assert_eq!(InstanceStatus::from_pve_status("stopped"), InstanceStatus::Stopped);
        assert_eq!(InstanceStatus::from_pve_status("suspended"), InstanceStatus::Paused);
        assert_eq!(InstanceStatus::from_pve_status("weird"), InstanceStatus::Unknown);
        assert!(InstanceStatus::Running.is_running());
        assert!(!InstanceStatus::Paused.is_running());
    }

    #[test]
    fn requested_vcpus_defaults_sockets_to_one() {
        let mut spec = VmCreateSpec::new("web", 2, 512);
        assert_eq!(spec.requested_vcpus(), 2);

        spec.sockets = 2;
        assert_eq!(spec.requested_vcpus(), 4);
    }

    #[test]
    fn empty_pin_is_no_pin() {
        let spec = VmCreateSpec::new("web", 1, 512).on_node("");
        assert_eq!(spec.pinned_node(), None);

        let spec = spec.on_node("pve1");
        assert_eq!(spec.pinned_node(), Some("pve1"));
    }

    #[test]
    fn spec_deserializes_extra_options() {
        let spec: VmCreateSpec = serde_json::from_str(
            r#"{"name":"db","memory":2048,"net0":"virtio,bridge=vmbr0","storage":"local-lvm"}"#,
        )
        .unwrap();

        assert_eq!(spec.cores, 1);
        assert_eq!(spec.sockets, 0);
        assert_eq!(spec.storage.as_deref(), Some("local-lvm"));
        assert_eq!(spec.options.get("net0").map(String::as_str), Some("virtio,bridge=vmbr0"));
        assert_eq!(spec.memory_bytes(), 2048 * 1024 * 1024);
    }

    #[test]
    fn form_params_include_vmid_and_options() {
        let mut spec = VmCreateSpec::new("db", 4, 4096);
        spec.options.insert("scsi0".to_string(), "local-lvm:32".to_string());

        let params = spec.form_params(VmId::new(120));
        assert!(params.contains(&("vmid".to_string(), "120".to_string())));
        assert!(params.contains(&("sockets".to_string(), "1".to_string())));
        assert!(params.contains(&("scsi0".to_string(), "local-lvm:32".to_string())));
    }

    #[test]
    fn vmid_parses_and_displays() {
        let id: VmId = " 104 ".parse().unwrap();
        assert_eq!(id, VmId::new(104));
        assert_eq!(id.to_string(), "104");
        assert!("abc".parse::<VmId>().is_err());
    }
}
