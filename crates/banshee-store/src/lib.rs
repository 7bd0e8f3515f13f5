//! Alert and silence storage for Banshee.
//!
//! The [`Store`] trait is the seam between the replication layer
//! (which writes committed state) and the background services (which
//! query it). Queries go through composable [`filter`] predicates;
//! the in-memory [`MemoryStore`] is the node-local backend.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod filter;
pub mod memory;
pub mod store;

pub use error::{Result, StoreError};
pub use filter::{AlertFilter, SilenceFilter};
pub use memory::MemoryStore;
pub use store::Store;
