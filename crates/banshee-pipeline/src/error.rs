//! Error types for the banshee-pipeline crate.

use thiserror::Error;

/// Errors that can occur processing events through the pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A store write failed.
    #[error("store write failed: {0}")]
    Store(#[from] banshee_store::StoreError),

    /// The incoming data failed validation.
    #[error(transparent)]
    Model(#[from] banshee_model::ModelError),
}

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;
