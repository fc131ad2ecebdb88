//! Value types shared by plugins and the pipeline drivers.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use vmplace_backend::VmId;

/// Outcome class of one plugin invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Code {
    /// The plugin accepted the node or produced a value.
    Success,
    /// The plugin rejected the node, or found nothing to allocate.
    Unschedulable,
    /// The plugin itself failed.
    Error,
}

/// Result of one plugin invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    code: Code,
    reasons: Vec<String>,
    error: Option<String>,
    plugin: Option<String>,
}

impl Status {
    /// A successful status.
    #[must_use]
    pub const fn success() -> Self {
        Self {
            code: Code::Success,
            reasons: Vec::new(),
            error: None,
            plugin: None,
        }
    }

    /// A rejection with a human-readable reason.
    #[must_use]
    pub fn unschedulable(reason: impl Into<String>) -> Self {
        Self {
            code: Code::Unschedulable,
            reasons: vec![reason.into()],
            error: None,
            plugin: None,
        }
    }

    /// A plugin failure caused by `err`.
    #[must_use]
    pub fn error(err: impl fmt::Display) -> Self {
        Self {
            code: Code::Error,
            reasons: Vec::new(),
            error: Some(err.to_string()),
            plugin: None,
        }
    }

    /// Attach the name of the plugin that produced this status.
    #[must_use]
    pub fn with_plugin(mut self, plugin: impl Into<String>) -> Self {
        self.plugin = Some(plugin.into());
        self
    }

    /// The outcome class.
    #[must_use]
    pub const fn code(&self) -> Code {
        self.code
    }

    /// Check if the invocation succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.code == Code::Success
    }

    /// Human-readable reasons.
    #[must_use]
    pub fn reasons(&self) -> &[String] {
        &self.reasons
    }

    /// The originating error, if the plugin failed.
    #[must_use]
    pub fn error_message(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Name of the plugin that produced this status, if known.
    #[must_use]
    pub fn plugin(&self) -> Option<&str> {
        self.plugin.as_deref()
    }

    /// The error if present, otherwise the reasons joined together.
    #[must_use]
    pub fn message(&self) -> String {
        match &self.error {
            Some(err) => err.clone(),
            None => self.reasons.join(", "),
        }
    }
}

impl Default for Status {
    fn default() -> Self {
        Self::success()
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.plugin {
            Some(plugin) => write!(f, "{plugin}: {}", self.message()),
            None => write!(f, "{}", self.message()),
        }
    }
}

/// Final placement decision for one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerResult {
    node: String,
    vmid: VmId,
    storage: Option<String>,
}

impl SchedulerResult {
    /// Create a new result.
    #[must_use]
    pub fn new(node: impl Into<String>, vmid: VmId, storage: Option<String>) -> Self {
        Self {
            node: node.into(),
            vmid,
            storage,
        }
    }

    /// Selected node.
    #[must_use]
    pub fn node(&self) -> &str {
        &self.node
    }

    /// Selected VMID.
    #[must_use]
    pub const fn vmid(&self) -> VmId {
        self.vmid
    }

    /// Selected storage target.
    #[must_use]
    pub fn storage(&self) -> Option<&str> {
        self.storage.as_deref()
    }
}

/// Scratch space for a single scheduling attempt.
///
/// Created at the start of an attempt and dropped at its end.
#[derive(Debug, Default)]
pub struct CycleState {
    completed: bool,
    error: Option<String>,
    messages: BTreeMap<String, String>,
    result: Option<SchedulerResult>,
}

impl CycleState {
    /// Create an empty state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an informational message on behalf of a plugin.
    pub fn set_message(&mut self, plugin: impl Into<String>, message: impl Into<String>) {
        self.messages.insert(plugin.into(), message.into());
    }

    /// Messages recorded so far, keyed by plugin name.
    #[must_use]
    pub fn messages(&self) -> &BTreeMap<String, String> {
        &self.messages
    }

    /// Mark the attempt as finished with a result.
    pub fn complete(&mut self, result: SchedulerResult) {
        self.completed = true;
        self.result = Some(result);
    }

    /// Mark the attempt as finished with an error.
    pub fn fail(&mut self, error: impl fmt::Display) {
        self.completed = true;
        self.error = Some(error.to_string());
    }

    /// Check if the attempt has finished.
    #[must_use]
    pub const fn is_completed(&self) -> bool {
        self.completed
    }

    /// The error the attempt failed with.
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// The result the attempt completed with.
    #[must_use]
    pub fn result(&self) -> Option<&SchedulerResult> {
        self.result.as_ref()
    }
}
