//! Error types for the banshee-proto crate.

use thiserror::Error;

/// Errors that can occur encoding or decoding wire messages.
#[derive(Debug, Error)]
pub enum ProtoError {
    /// The bytes are not a valid protobuf frame.
    #[error("malformed wire frame: {0}")]
    Decode(#[from] prost::DecodeError),

    /// The frame decoded but carried a status value outside the enum.
    #[error("unknown alert status value {value}")]
    UnknownStatus {
        /// The unrecognized enum value.
        value: i32,
    },

    /// A millisecond timestamp is outside the representable range.
    #[error("timestamp {millis}ms is out of range")]
    BadTimestamp {
        /// The out-of-range value.
        millis: i64,
    },

    /// A log entry was missing its payload union.
    #[error("log entry has no payload")]
    EmptyEntry,
}

/// Result type for wire operations.
pub type Result<T> = std::result::Result<T, ProtoError>;
