//! The transport seam between replication peers.
//!
//! The driver never talks to the network directly; it goes through a
//! [`RaftTransport`], which has a TCP implementation for production
//! and an in-process one for tests.

use std::collections::HashMap;
use std::sync::Arc;

use banshee_proto::LogEntry;
use banshee_proto::rpc::{
    AddMemberRequest, AppendEntriesReply, AppendEntriesRequest, ApplyLogRequest,
    InstallSnapshotReply, InstallSnapshotRequest, Request, Response, VoteReply, VoteRequest,
};
use futures::future::BoxFuture;
use parking_lot::RwLock;

use crate::core::RaftHandle;
use crate::error::{ReplicationError, Result};

/// Outbound calls to a replication peer, addressed by the peer's
/// replication address.
pub trait RaftTransport: Send + Sync {
    /// Asks a peer for its vote.
    fn request_vote<'a>(
        &'a self,
        address: &'a str,
        request: VoteRequest,
    ) -> BoxFuture<'a, Result<VoteReply>>;

    /// Replicates entries to a peer (or heartbeats with none).
    fn append_entries<'a>(
        &'a self,
        address: &'a str,
        request: AppendEntriesRequest,
    ) -> BoxFuture<'a, Result<AppendEntriesReply>>;

    /// Ships a snapshot to a peer that fell behind the compacted log.
    fn install_snapshot<'a>(
        &'a self,
        address: &'a str,
        request: InstallSnapshotRequest,
    ) -> BoxFuture<'a, Result<InstallSnapshotReply>>;

    /// Forwards a proposal to the leader at `address`.
    fn forward_apply<'a>(
        &'a self,
        address: &'a str,
        entry: LogEntry,
    ) -> BoxFuture<'a, Result<()>>;

    /// Asks the node at `address` to admit a new cluster member.
    fn add_member<'a>(
        &'a self,
        address: &'a str,
        request: AddMemberRequest,
    ) -> BoxFuture<'a, Result<()>>;
}

fn unexpected_response() -> ReplicationError {
    ReplicationError::Transport {
        reason: "peer answered with the wrong response variant".to_string(),
    }
}

/// An in-process wiring of replication handles, keyed by address.
///
/// Registering every node's handle under its address gives a full
/// cluster in one process, with the same call paths the TCP transport
/// exercises. Test-oriented, but not test-only: single-binary
/// multi-node setups use it too.
#[derive(Default, Clone)]
pub struct InMemoryNetwork {
    handles: Arc<RwLock<HashMap<String, RaftHandle>>>,
}

impl InMemoryNetwork {
    /// Creates an empty network.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a node's handle under its address.
    pub fn register(&self, address: impl Into<String>, handle: RaftHandle) {
        self.handles.write().insert(address.into(), handle);
    }

    /// Removes a node from the network, partitioning it away.
    pub fn deregister(&self, address: &str) {
        self.handles.write().remove(address);
    }

    /// Returns a transport routing through this network.
    #[must_use]
    pub fn transport(&self) -> Arc<dyn RaftTransport> {
        Arc::new(InMemoryTransport {
            network: self.clone(),
        })
    }

    fn lookup(&self, address: &str) -> Result<RaftHandle> {
        self.handles
            .read()
            .get(address)
            .cloned()
            .ok_or_else(|| ReplicationError::Transport {
                reason: format!("no node registered at {address}"),
            })
    }
}

struct InMemoryTransport {
    network: InMemoryNetwork,
}

impl InMemoryTransport {
    async fn call(&self, address: &str, request: Request) -> Result<Response> {
        let handle = self.network.lookup(address)?;
        handle.handle_rpc(request).await
    }
}

impl RaftTransport for InMemoryTransport {
    fn request_vote<'a>(
        &'a self,
        address: &'a str,
        request: VoteRequest,
    ) -> BoxFuture<'a, Result<VoteReply>> {
        Box::pin(async move {
            match self.call(address, Request::RequestVote(request)).await? {
                Response::RequestVote(reply) => Ok(reply),
                _ => Err(unexpected_response()),
            }
        })
    }

    fn append_entries<'a>(
        &'a self,
        address: &'a str,
        request: AppendEntriesRequest,
    ) -> BoxFuture<'a, Result<AppendEntriesReply>> {
        Box::pin(async move {
            match self.call(address, Request::AppendEntries(request)).await? {
                Response::AppendEntries(reply) => Ok(reply),
                _ => Err(unexpected_response()),
            }
        })
    }

    fn install_snapshot<'a>(
        &'a self,
        address: &'a str,
        request: InstallSnapshotRequest,
    ) -> BoxFuture<'a, Result<InstallSnapshotReply>> {
        Box::pin(async move {
            match self.call(address, Request::InstallSnapshot(request)).await? {
                Response::InstallSnapshot(reply) => Ok(reply),
                _ => Err(unexpected_response()),
            }
        })
    }

    fn forward_apply<'a>(&'a self, address: &'a str, entry: LogEntry) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let request = Request::ApplyLog(ApplyLogRequest { entry: Some(entry) });
            match self.call(address, request).await? {
                Response::ApplyLog(reply) if reply.ok => Ok(()),
                Response::ApplyLog(reply) => Err(ReplicationError::Rejected {
                    reason: reply.error,
                }),
                _ => Err(unexpected_response()),
            }
        })
    }

    fn add_member<'a>(
        &'a self,
        address: &'a str,
        request: AddMemberRequest,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            match self.call(address, Request::AddMember(request)).await? {
                Response::AddMember(reply) if reply.ok => Ok(()),
                Response::AddMember(reply) => Err(ReplicationError::Rejected {
                    reason: reply.error,
                }),
                _ => Err(unexpected_response()),
            }
        })
    }
}
