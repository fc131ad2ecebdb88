//! Proxmox VE implementation of [`ComputeBackend`].
//!
//! Talks to the `/api2/json` REST API using an API token. Every response is
//! wrapped in a `{"data": ...}` envelope which is stripped here.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use crate::types::{Instance, InstanceStats, InstanceStatus, NodeStats, VmCreateSpec, VmId};
use crate::{BackendError, ComputeBackend, Result};

/// Connection settings for a Proxmox VE cluster.
#[derive(Debug, Clone)]
pub struct ProxmoxConfig {
    /// Base URL of any cluster member, e.g. `https://pve1:8006`.
    pub url: String,
    /// API token id in `user@realm!name` form.
    pub token_id: String,
    /// API token secret.
    pub token_secret: String,
    /// Accept self-signed certificates.
    pub insecure_tls: bool,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl Default for ProxmoxConfig {
    fn default() -> Self {
        Self {
            url: "https://localhost:8006".to_string(),
            token_id: String::new(),
            token_secret: String::new(),
            insecure_tls: false,
            timeout: Duration::from_secs(30),
        }
    }
}

impl ProxmoxConfig {
    /// Load configuration from environment variables.
    ///
    /// Supported environment variables:
    /// - `PROXMOX_URL`: base URL of the API
    /// - `PROXMOX_TOKEN_ID`: API token id (`user@realm!name`)
    /// - `PROXMOX_TOKEN_SECRET`: API token secret
    /// - `PROXMOX_INSECURE_TLS`: `true`/`1` to accept self-signed certificates
    /// - `PROXMOX_TIMEOUT_SECS`: per-request timeout in seconds
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("PROXMOX_URL") {
            config.url = val;
        }
        if let Ok(val) = std::env::var("PROXMOX_TOKEN_ID") {
            config.token_id = val;
        }
        if let Ok(val) = std::env::var("PROXMOX_TOKEN_SECRET") {
            config.token_secret = val;
        }
        if let Ok(val) = std::env::var("PROXMOX_INSECURE_TLS") {
            config.insecure_tls = matches!(val.to_lowercase().as_str(), "1" | "true" | "yes");
        }
        if let Ok(val) = std::env::var("PROXMOX_TIMEOUT_SECS") {
            if let Ok(n) = val.parse() {
                config.timeout = Duration::from_secs(n);
            }
        }

        config
    }

    fn authorization(&self) -> String {
        format!("PVEAPIToken={}={}", self.token_id, self.token_secret)
    }
}

#[derive(Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Deserialize)]
struct PveNode {
    node: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    cpu: f64,
    #[serde(default)]
    maxcpu: u32,
    #[serde(default)]
    mem: u64,
    #[serde(default)]
    maxmem: u64,
}

impl From<PveNode> for NodeStats {
    fn from(n: PveNode) -> Self {
        Self {
            online: n.status == "online",
            cpu_used: n.cpu * f64::from(n.maxcpu),
            max_cpu: n.maxcpu,
            mem_used: n.mem,
            max_mem: n.maxmem,
            name: n.node,
        }
    }
}

#[derive(Deserialize)]
struct PveQemu {
    vmid: u32,
    #[serde(default)]
    name: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    cpus: u32,
    #[serde(default)]
    maxmem: u64,
}

impl From<PveQemu> for InstanceStats {
    fn from(q: PveQemu) -> Self {
        Self {
            vmid: VmId::new(q.vmid),
            status: InstanceStatus::from_pve_status(&q.status),
            name: q.name,
            cpus: q.cpus,
            max_mem: q.maxmem,
        }
    }
}

/// Proxmox VE API client.
#[derive(Debug, Clone)]
pub struct ProxmoxClient {
    http: reqwest::Client,
    base_url: String,
    authorization: String,
}

impl ProxmoxClient {
    /// Create a new client from the given configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the token is missing or the HTTP client cannot be built.
    pub fn new(config: ProxmoxConfig) -> Result<Self> {
        if config.token_id.is_empty() || config.token_secret.is_empty() {
            return Err(BackendError::Config(
                "Proxmox API token id and secret are required".to_string(),
            ));
        }

        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .connect_timeout(Duration::from_secs(5))
            .danger_accept_invalid_certs(config.insecure_tls)
            .build()
            .map_err(|e| BackendError::Config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: config.url.trim_end_matches('/').to_string(),
            authorization: config.authorization(),
        })
    }

    /// Get the base URL of the API.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/api2/json{path}", self.base_url)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self
            .http
            .get(self.endpoint(path))
            .header(AUTHORIZATION, &self.authorization)
            .send()
            .await?;

        Self::decode(response).await
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
        let status = response.status();

        if !status.is_success() {
            let mut message = response.text().await.unwrap_or_default();
            if message.is_empty() {
                message = status.canonical_reason().unwrap_or_default().to_string();
            }
            if status == StatusCode::NOT_FOUND {
                return Err(BackendError::NotFound(message));
            }
            return Err(BackendError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let envelope: Envelope<T> = response
            .json()
            .await
            .map_err(|e| BackendError::Decode(e.to_string()))?;

        Ok(envelope.data)
    }
}

#[async_trait]
impl ComputeBackend for ProxmoxClient {
    async fn list_nodes(&self) -> Result<Vec<NodeStats>> {
        let nodes: Vec<PveNode> = self.get("/nodes").await?;
        Ok(nodes.into_iter().map(NodeStats::from).collect())
    }

    async fn list_instances(&self, node: &str) -> Result<Vec<InstanceStats>> {
        let vms: Vec<PveQemu> = self.get(&format!("/nodes/{node}/qemu")).await?;
        Ok(vms.into_iter().map(InstanceStats::from).collect())
    }

    async fn next_available_id(&self) -> Result<VmId> {
        // The API serves the id as a JSON string.
        let raw: serde_json::Value = self.get("/cluster/nextid").await?;
        let id = match &raw {
            serde_json::Value::String(s) => s.parse().ok(),
            serde_json::Value::Number(n) => n
                .as_u64()
                .and_then(|n| u32::try_from(n).ok())
                .map(VmId::new),
            _ => None,
        };

        id.ok_or_else(|| BackendError::Decode(format!("unexpected nextid payload: {raw}")))
    }

    async fn create_instance(
        &self,
        node: &str,
        vmid: VmId,
        spec: &VmCreateSpec,
    ) -> Result<Instance> {
        let response = self
            .http
            .post(self.endpoint(&format!("/nodes/{node}/qemu")))
            .header(AUTHORIZATION, &self.authorization)
            .form(&spec.form_params(vmid))
            .send()
            .await?;

        let task: Option<String> = Self::decode(response).await?;

        debug!(node, vmid = %vmid, task = ?task, "Submitted qemu creation");

        Ok(Instance {
            node: node.to_string(),
            vmid,
            task,
        })
    }
}
