//! Error types for the banshee-node crate.

use thiserror::Error;

/// Errors starting or running a node.
#[derive(Debug, Error)]
pub enum NodeError {
    /// The configuration is unusable.
    #[error("invalid configuration: {reason}")]
    Config {
        /// What is wrong with it.
        reason: String,
    },

    /// Reading the configuration file failed.
    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    /// Parsing the configuration file failed.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    /// The replication layer failed.
    #[error(transparent)]
    Replication(#[from] banshee_replication::ReplicationError),

    /// A background service stopped the node.
    #[error(transparent)]
    Service(#[from] banshee_services::ServiceError),

    /// A broadcast into the replicated log failed.
    #[error(transparent)]
    Cluster(#[from] banshee_cluster::ClusterError),
}

/// Result type for node operations.
pub type Result<T> = std::result::Result<T, NodeError>;
