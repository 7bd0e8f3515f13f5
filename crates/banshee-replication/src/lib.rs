//! Raft-style replicated log driving the alert state machine.
//!
//! Every mutation to alert state goes through a single replicated
//! log: nodes propose [`LogEntry`](banshee_proto::LogEntry) frames,
//! the leader commits them on a majority, and every node applies them
//! in the same order to its [`StateMachine`]. Apply failures are
//! fatal; a node that cannot follow the log stops rather than
//! diverge.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod broadcaster;
pub mod core;
pub mod error;
pub mod state_machine;
pub mod tcp;
pub mod transport;

pub use broadcaster::RaftBroadcaster;
pub use core::{RaftConfig, RaftHandle, RaftStatus, Role, spawn};
pub use error::{ReplicationError, Result};
pub use state_machine::{AlertStateMachine, StateMachine};
pub use tcp::{RpcServer, TcpTransport};
pub use transport::{InMemoryNetwork, RaftTransport};
