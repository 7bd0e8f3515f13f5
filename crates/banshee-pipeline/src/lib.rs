//! The Banshee ingest pipeline.
//!
//! Committed events flow from the replicated log into the
//! [`EventDelegate`], which merges them with stored state and writes
//! the result through the [`BufferedStore`]. The merge rules here are
//! what make repeated, out-of-order observations of the same alert
//! converge to one sensible record on every node.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod buffer;
pub mod delegate;
pub mod error;

pub use buffer::BufferedStore;
pub use delegate::{EventDelegate, StoreEventDelegate};
pub use error::{PipelineError, Result};
