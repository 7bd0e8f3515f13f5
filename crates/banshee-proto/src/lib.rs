//! Wire types for Banshee's replicated log.
//!
//! Everything that crosses the network between cluster members lives
//! here: the [`wire::LogEntry`] union that carries replicated
//! mutations, the [`rpc`] frames the replication transport speaks,
//! and strict conversions between wire and model types. Encoding is
//! prost, length-delimited; timestamps are milliseconds since epoch.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod convert;
pub mod error;
pub mod rpc;
pub mod wire;

pub use error::{ProtoError, Result};
pub use wire::{LogEntry, Payload, WireAck, WireAlert, WireMatcher, WireSilence};
