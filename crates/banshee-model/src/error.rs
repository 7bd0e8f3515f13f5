//! Error types for the banshee-model crate.

use thiserror::Error;

/// Errors that can occur constructing or validating model types.
#[derive(Debug, Error)]
pub enum ModelError {
    /// A silence failed validation.
    #[error("invalid silence: {reason}")]
    InvalidSilence {
        /// The reason the silence is invalid.
        reason: String,
    },

    /// A matcher failed validation or parsing.
    #[error("invalid matcher: {reason}")]
    InvalidMatcher {
        /// The reason the matcher is invalid.
        reason: String,
    },

    /// A regex matcher carried a pattern that does not compile.
    #[error("invalid matcher regex: {0}")]
    BadRegex(#[from] regex::Error),
}

/// Result type for model operations.
pub type Result<T> = std::result::Result<T, ModelError>;
