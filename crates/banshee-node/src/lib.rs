//! A full Banshee node.
//!
//! This crate composes the workspace into one runnable process: the
//! in-memory alert store and its write buffer, the replicated log
//! driving a shared state machine, the consistent-hash ring that
//! elects a single notifying node per alert, and the timeout and
//! notify sweeps, all supervised together.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod node;

pub use config::NodeConfig;
pub use error::{NodeError, Result};
pub use node::{Node, NodeRuntime};
