//! Per-request scheduling hints.
//!
//! Hints steer individual plugins for a single request. Every hint is
//! optional; a missing hint makes its plugin fall back to its default policy.

use std::fmt;
use std::str::FromStr;

use regex::Regex;
use serde::Deserialize;
use vmplace_backend::{VmCreateSpec, VmId};

use crate::error::{Result, SchedulerError};

/// An inclusive range of VMIDs, written `start-end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmIdRange {
    start: VmId,
    end: VmId,
}

impl VmIdRange {
    /// Create a range.
    ///
    /// # Errors
    ///
    /// Returns `InvalidHint` if `start` is greater than `end`.
    pub fn new(start: VmId, end: VmId) -> Result<Self> {
        if start > end {
            return Err(SchedulerError::InvalidHint(format!(
                "vmid range start {start} is greater than end {end}"
            )));
        }
        Ok(Self { start, end })
    }

    /// First id of the range.
    #[must_use]
    pub const fn start(&self) -> VmId {
        self.start
    }

    /// Last id of the range.
    #[must_use]
    pub const fn end(&self) -> VmId {
        self.end
    }

    /// Iterate over every id of the range in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = VmId> {
        (self.start.get()..=self.end.get()).map(VmId::new)
    }
}

impl FromStr for VmIdRange {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || SchedulerError::InvalidHint(format!("vmid range must be start-end: {s:?}"));

        let (start, end) = s.trim().split_once('-').ok_or_else(invalid)?;
        let start = start.parse().map_err(|_| invalid())?;
        let end = end.parse().map_err(|_| invalid())?;

        Self::new(start, end)
    }
}

impl fmt::Display for VmIdRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// Hints as they arrive over the wire, before validation.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawHints {
    /// Pattern node names must match.
    #[serde(default)]
    pub node_name_regex: Option<String>,
    /// Range to allocate the VMID from, as `start-end`.
    #[serde(default)]
    pub vmid_range: Option<String>,
    /// Pattern the VMID's decimal form must match.
    #[serde(default)]
    pub vmid_regex: Option<String>,
}

/// Validated scheduling hints for one request.
///
/// Patterns use search semantics: `1\d\d` matches `4123`. Anchor them with
/// `^...$` to match whole values.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(try_from = "RawHints")]
pub struct SchedulingHints {
    node_name_regex: Option<Regex>,
    vmid_range: Option<VmIdRange>,
    vmid_regex: Option<Regex>,
}

fn compile(kind: &str, pattern: &str) -> Result<Regex> {
    Regex::new(pattern)
        .map_err(|e| SchedulerError::InvalidHint(format!("{kind} {pattern:?}: {e}")))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl SchedulingHints {
    /// Hints with nothing set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict candidate nodes to names matching `pattern`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidHint` if the pattern does not compile.
    pub fn with_node_name_regex(mut self, pattern: &str) -> Result<Self> {
        self.node_name_regex = Some(compile("node name regex", pattern)?);
        Ok(self)
    }

    /// Allocate the VMID from `range`.
    #[must_use]
    pub fn with_vmid_range(mut self, range: VmIdRange) -> Self {
        self.vmid_range = Some(range);
        self
    }

    /// Allocate a VMID whose decimal form matches `pattern`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidHint` if the pattern does not compile.
    pub fn with_vmid_regex(mut self, pattern: &str) -> Result<Self> {
        self.vmid_regex = Some(compile("vmid regex", pattern)?);
        Ok(self)
    }

    /// Node name pattern, if set.
    #[must_use]
    pub fn node_name_regex(&self) -> Option<&Regex> {
        self.node_name_regex.as_ref()
    }

    /// VMID range, if set.
    #[must_use]
    pub fn vmid_range(&self) -> Option<VmIdRange> {
        self.vmid_range
    }

    /// VMID pattern, if set.
    #[must_use]
    pub fn vmid_regex(&self) -> Option<&Regex> {
        self.vmid_regex.as_ref()
    }
}

impl TryFrom<RawHints> for SchedulingHints {
    type Error = SchedulerError;

    fn try_from(raw: RawHints) -> Result<Self> {
        let mut hints = Self::new();

        if let Some(pattern) = non_empty(raw.node_name_regex) {
            hints = hints.with_node_name_regex(&pattern)?;
        }
        if let Some(range) = non_empty(raw.vmid_range) {
            hints = hints.with_vmid_range(range.parse()?);
        }
        if let Some(pattern) = non_empty(raw.vmid_regex) {
            hints = hints.with_vmid_regex(&pattern)?;
        }

        Ok(hints)
    }
}

/// A virtual machine creation request together with its hints.
#[derive(Debug, Clone, Deserialize)]
pub struct VmRequest {
    /// What to create.
    pub spec: VmCreateSpec,
    /// How to steer placement and id allocation.
    #[serde(default)]
    pub hints: SchedulingHints,
}

impl VmRequest {
    /// A request without hints.
    #[must_use]
    pub fn new(spec: VmCreateSpec) -> Self {
        Self {
            spec,
            hints: SchedulingHints::default(),
        }
    }

    /// Replace the hints.
    #[must_use]
    pub fn with_hints(mut self, hints: SchedulingHints) -> Self {
        self.hints = hints;
        self
    }
}
