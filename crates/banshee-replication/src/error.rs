//! Error types for the banshee-replication crate.

use thiserror::Error;

/// Errors that can occur replicating and applying log entries.
#[derive(Debug, Error)]
pub enum ReplicationError {
    /// A committed entry could not be decoded or applied.
    ///
    /// This is the one error class that must stop the node: every
    /// replica applies the same committed entries, so an entry this
    /// node cannot apply either fails everywhere (and the cluster is
    /// wedged on a bad entry) or marks local divergence. Continuing
    /// past it would fork replicated state silently.
    #[error("fatal apply failure: {reason}")]
    FatalApply {
        /// What went wrong applying the entry.
        reason: String,
    },

    /// The operation needs the leader and this node is not it.
    #[error("not the leader (current leader: {})", leader.as_deref().unwrap_or("unknown"))]
    NotLeader {
        /// The current leader's address, when known.
        leader: Option<String>,
    },

    /// No leader is currently known. Retryable: an election is likely
    /// in progress.
    #[error("no known leader")]
    NoLeader,

    /// A transport-level call failed.
    #[error("transport error: {reason}")]
    Transport {
        /// The underlying failure.
        reason: String,
    },

    /// The leader rejected a forwarded proposal.
    #[error("forwarded proposal rejected: {reason}")]
    Rejected {
        /// The leader's stated reason.
        reason: String,
    },

    /// The replication driver has stopped.
    #[error("replication driver has stopped")]
    Shutdown,

    /// Snapshot serialization or restore failed.
    #[error("snapshot serialization failed: {0}")]
    Snapshot(#[from] serde_json::Error),

    /// The backing store failed while building a snapshot.
    #[error("store error: {0}")]
    Store(#[from] banshee_store::StoreError),

    /// An I/O error on the transport listener.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for replication operations.
pub type Result<T> = std::result::Result<T, ReplicationError>;
