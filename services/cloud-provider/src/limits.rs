//! Cluster-wide resource limits handed to the provider by the autoscaler.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub const RESOURCE_CORES: &str = "cpu";
pub const RESOURCE_MEMORY: &str = "memory";

/// Minimum and maximum totals per resource name.
///
/// A resource without an entry is unbounded: its minimum is 0 and its
/// maximum is `u64::MAX`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimiter {
    #[serde(default)]
    min_limits: BTreeMap<String, u64>,
    #[serde(default)]
    max_limits: BTreeMap<String, u64>,
}

impl ResourceLimiter {
    pub fn new(min_limits: BTreeMap<String, u64>, max_limits: BTreeMap<String, u64>) -> Self {
        Self {
            min_limits,
            max_limits,
        }
    }

    pub fn min(&self, resource: &str) -> u64 {
        self.min_limits.get(resource).copied().unwrap_or(0)
    }

    pub fn max(&self, resource: &str) -> u64 {
        self.max_limits.get(resource).copied().unwrap_or(u64::MAX)
    }

    /// Every resource with at least one bound, in name order.
    pub fn resources(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .min_limits
            .keys()
            .chain(self.max_limits.keys())
            .map(String::as_str)
            .collect();
        names.sort_unstable();
        names.dedup();
        names
    }

    pub fn is_unbounded(&self) -> bool {
        self.min_limits.is_empty() && self.max_limits.is_empty()
    }
}

impl std::fmt::Display for ResourceLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let bounds: Vec<String> = self
            .resources()
            .into_iter()
            .map(|r| format!("{r}:{}-{}", self.min(r), self.max(r)))
            .collect();
        write!(f, "{{{}}}", bounds.join(", "))
    }
}
