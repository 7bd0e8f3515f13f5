//! Error types for the banshee-store crate.

use thiserror::Error;

/// Errors that can occur writing to a store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// One or more writes failed while draining a write buffer.
    ///
    /// The buffer flushes in batches; every batch error is collected
    /// here rather than aborting the drain halfway through.
    #[error("buffer flush failed with {} error(s)", errors.len())]
    Flush {
        /// The individual flush failures, in the order they occurred.
        errors: Vec<StoreError>,
    },

    /// The backing store rejected a write.
    #[error("storage backend error: {reason}")]
    Backend {
        /// What the backend reported.
        reason: String,
    },
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
