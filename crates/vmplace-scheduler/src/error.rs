//! Error types for the scheduler crate.

use std::path::PathBuf;

use thiserror::Error;
use vmplace_backend::BackendError;

use crate::scheduler::SchedulerState;

/// Errors that can occur while scheduling a virtual machine.
#[derive(Error, Debug)]
pub enum SchedulerError {
    /// Every node was rejected by the filter plugins.
    #[error("0/{total} nodes are available: {}", reasons.join("; "))]
    NoNodesAvailable {
        /// Number of nodes that were considered.
        total: usize,
        /// One entry per rejected node, naming the rejecting plugin.
        reasons: Vec<String>,
    },

    /// The score phase was handed no nodes to rank.
    #[error("no nodes were scored")]
    NoScoredNodes,

    /// No VMID could be allocated.
    #[error("no vmid available ({plugin}): {reason}")]
    NoVmIdAvailable {
        /// The VMID plugin that gave up.
        plugin: String,
        /// Why it gave up.
        reason: String,
    },

    /// A score or VMID plugin failed.
    #[error("plugin {plugin} failed: {reason}")]
    PluginExecution {
        /// The failing plugin.
        plugin: String,
        /// The underlying cause.
        reason: String,
    },

    /// The compute backend failed.
    #[error("backend error while {context}: {source}")]
    Backend {
        /// What the scheduler was doing.
        context: String,
        /// The backend failure.
        #[source]
        source: BackendError,
    },

    /// A scheduling hint could not be parsed.
    #[error("invalid scheduling hint: {0}")]
    InvalidHint(String),

    /// The plugin configuration is invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// The plugin configuration file could not be read.
    #[error("failed to read configuration {path}: {source}")]
    ConfigRead {
        /// Path of the configuration file.
        path: PathBuf,
        /// The I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// The plugin configuration file is not valid YAML.
    #[error("failed to parse configuration: {0}")]
    ConfigParse(#[from] serde_yaml::Error),

    /// The request was cancelled by its caller.
    #[error("request cancelled")]
    Cancelled,

    /// The scheduler stopped before the request was processed.
    #[error("scheduler is stopped")]
    Stopped,

    /// A scheduling attempt ended abnormally.
    #[error("internal error: {0}")]
    Internal(String),

    /// The requested lifecycle transition is not allowed.
    #[error("scheduler cannot be started from state {state:?}")]
    InvalidLifecycle {
        /// Current state of the scheduler.
        state: SchedulerState,
    },
}

impl SchedulerError {
    /// Wrap a backend error with what the scheduler was doing at the time.
    #[must_use]
    pub fn backend(context: impl Into<String>, source: BackendError) -> Self {
        Self::Backend {
            context: context.into(),
            source,
        }
    }

    /// Check if this error is retriable.
    ///
    /// Capacity errors are retriable because the cluster changes over time.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Backend { source, .. } => source.is_retriable(),
            Self::NoNodesAvailable { .. } | Self::NoScoredNodes | Self::NoVmIdAvailable { .. } => {
                true
            }
            Self::PluginExecution { .. }
            | Self::InvalidHint(_)
            | Self::Config(_)
            | Self::ConfigRead { .. }
            | Self::ConfigParse(_)
            | Self::Cancelled
            | Self::Stopped
            | Self::Internal(_)
            | Self::InvalidLifecycle { .. } => false,
        }
    }

    /// Get the HTTP status code for this error.
    #[must_use]
    pub fn http_status_code(&self) -> u16 {
        match self {
            Self::InvalidHint(_) => 400,
            Self::InvalidLifecycle { .. } => 409,
            Self::NoNodesAvailable { .. } | Self::NoScoredNodes | Self::NoVmIdAvailable { .. } => {
                422
            }
            Self::Cancelled => 499,
            Self::PluginExecution { .. }
            | Self::Config(_)
            | Self::ConfigRead { .. }
            | Self::ConfigParse(_)
            | Self::Internal(_) => 500,
            Self::Backend { .. } => 502,
            Self::Stopped => 503,
        }
    }
}

/// A specialized Result type for scheduler operations.
pub type Result<T> = std::result::Result<T, SchedulerError>;
