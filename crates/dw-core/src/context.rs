//! Facts about the cluster under test.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Platform and topology of the cluster, fetched once per run.
///
/// Both fields are best effort. When unknown, rules scoped to a platform or
/// topology never match.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterContext {
    /// Infrastructure platform type (e.g. `AWS`, `BareMetal`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    /// Control plane topology (e.g. `HighlyAvailable`, `SingleReplica`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topology: Option<String>,
}

impl ClusterContext {
    pub fn new(platform: Option<String>, topology: Option<String>) -> Self {
        Self { platform, topology }
    }
}

impl fmt::Display for ClusterContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "platform={} topology={}",
            self.platform.as_deref().unwrap_or("unknown"),
            self.topology.as_deref().unwrap_or("unknown")
        )
    }
}
