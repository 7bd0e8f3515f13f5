//! Cluster member identity.

use std::fmt;

use serde::{Deserialize, Serialize};

/// One member of the cluster.
///
/// The name must match the member's replication-layer server ID; the
/// ring and the replicated log are two views of the same roster, and
/// they join on this name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Member {
    /// Stable member name (the replication server ID).
    pub name: String,
    /// The member's replication address.
    pub address: String,
}

impl Member {
    /// Creates a member.
    #[must_use]
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
        }
    }
}

impl fmt::Display for Member {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.address)
    }
}
