//! Error types for the banshee-cluster crate.

use thiserror::Error;

/// Errors that can occur interacting with the cluster.
#[derive(Debug, Error)]
pub enum ClusterError {
    /// The membership backend could not be queried.
    #[error("membership query failed: {reason}")]
    Membership {
        /// What the backend reported.
        reason: String,
    },

    /// A broadcast through the replicated log failed.
    #[error("broadcast failed: {reason}")]
    Broadcast {
        /// Why the broadcast did not go through.
        reason: String,
    },
}

/// Result type for cluster operations.
pub type Result<T> = std::result::Result<T, ClusterError>;
