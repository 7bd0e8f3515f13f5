//! TCP transport for replication traffic.
//!
//! Frames are a four-byte big-endian length followed by the encoded
//! [`RpcRequest`] or [`RpcResponse`]. The client side opens one
//! connection per call; the server side answers frames on a
//! connection until the client closes it.


use banshee_proto::LogEntry;
use banshee_proto::rpc::{
    AddMemberRequest, AppendEntriesReply, AppendEntriesRequest, ApplyLogRequest,
    InstallSnapshotReply, InstallSnapshotRequest, Request, Response, RpcRequest, RpcResponse,
    VoteReply, VoteRequest,
};
use futures::future::BoxFuture;
use prost::Message;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::core::RaftHandle;
use crate::error::{ReplicationError, Result};
use crate::transport::RaftTransport;

/// Hard cap on a single frame. Snapshots are the largest traffic.
const MAX_FRAME_LEN: usize = 64 << 20;

async fn write_frame(stream: &mut TcpStream, body: &[u8]) -> Result<()> {
    stream.write_u32(body.len() as u32).await?;
    stream.write_all(body).await?;
    stream.flush().await?;
    Ok(())
}

/// Reads one frame; `None` on a clean close before the length prefix.
async fn read_frame(stream: &mut TcpStream) -> Result<Option<Vec<u8>>> {
    let len = match stream.read_u32().await {
        Ok(len) => len as usize,
        Err(error) if error.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(error) => return Err(error.into()),
    };
    if len > MAX_FRAME_LEN {
        return Err(ReplicationError::Transport {
            reason: format!("frame of {len} bytes exceeds the {MAX_FRAME_LEN} byte cap"),
        });
    }
    let mut body = vec![0u8; len];
    stream.read_exact(&mut body).await?;
    Ok(Some(body))
}

/// [`RaftTransport`] over per-call TCP connections.
#[derive(Default)]
pub struct TcpTransport;

impl TcpTransport {
    /// Creates a TCP transport.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    async fn call(&self, address: &str, request: Request) -> Result<Response> {
        let mut stream = TcpStream::connect(address).await?;
        write_frame(&mut stream, &RpcRequest::new(request).encode_to_vec()).await?;

        let Some(body) = read_frame(&mut stream).await? else {
            return Err(ReplicationError::Transport {
                reason: format!("{address} closed the connection before replying"),
            });
        };
        let response =
            RpcResponse::decode(body.as_slice()).map_err(|error| ReplicationError::Transport {
                reason: format!("undecodable response from {address}: {error}"),
            })?;
        response.response.ok_or_else(|| ReplicationError::Transport {
            reason: format!("{address} replied with an empty frame"),
        })
    }
}

impl RaftTransport for TcpTransport {
    fn request_vote<'a>(
        &'a self,
        address: &'a str,
        request: VoteRequest,
    ) -> BoxFuture<'a, Result<VoteReply>> {
        Box::pin(async move {
            match self.call(address, Request::RequestVote(request)).await? {
                Response::RequestVote(reply) => Ok(reply),
                _ => Err(wrong_variant(address)),
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
                _ => Err(wrong_variant(address)),
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
                _ => Err(wrong_variant(address)),
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
                _ => Err(wrong_variant(address)),
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
                _ => Err(wrong_variant(address)),
            }
        })
    }
}

fn wrong_variant(address: &str) -> ReplicationError {
    ReplicationError::Transport {
        reason: format!("{address} answered with the wrong response variant"),
    }
}

/// Accepts replication connections and routes their frames to the
/// local driver.
pub struct RpcServer {
    handle: RaftHandle,
    listen: String,
}

impl RpcServer {
    /// Creates a server answering for the given driver on `listen`.
    #[must_use]
    pub fn new(handle: RaftHandle, listen: impl Into<String>) -> Self {
        Self {
            handle,
            listen: listen.into(),
        }
    }

    /// Serves until shutdown.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        let listener = TcpListener::bind(&self.listen).await?;
        info!(address = %self.listen, "replication server listening");

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let handle = self.handle.clone();
                        tokio::spawn(async move {
                            if let Err(error) = serve_connection(stream, handle).await {
                                debug!(%error, %peer, "replication connection ended with error");
                            }
                        });
                    }
                    Err(error) => warn!(%error, "failed to accept replication connection"),
                },
                _ = shutdown.recv() => return Ok(()),
            }
        }
    }
}

async fn serve_connection(mut stream: TcpStream, handle: RaftHandle) -> Result<()> {
    while let Some(body) = read_frame(&mut stream).await? {
        let request =
            RpcRequest::decode(body.as_slice()).map_err(|error| ReplicationError::Transport {
                reason: format!("undecodable request frame: {error}"),
            })?;
        let Some(request) = request.request else {
            return Err(ReplicationError::Transport {
                reason: "request frame carries no call".to_string(),
            });
        };

        let response = handle.handle_rpc(request).await?;
        write_frame(&mut stream, &RpcResponse::new(response).encode_to_vec()).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use banshee_model::{Alert, AlertStatus, Labels};
    use banshee_pipeline::{BufferedStore, StoreEventDelegate};
    use banshee_proto::WireAlert;
    use banshee_store::MemoryStore;

    use crate::core::{RaftConfig, Role, spawn};
    use crate::state_machine::AlertStateMachine;

    async fn spawn_tcp_node(
        name: &str,
        shutdown: &broadcast::Sender<()>,
    ) -> (RaftHandle, Arc<MemoryStore>, Arc<BufferedStore>, String) {
        let store = Arc::new(MemoryStore::new());
        let buffer = Arc::new(BufferedStore::new(
            store.clone(),
            16,
            Duration::from_millis(50),
        ));
        let delegate = Arc::new(StoreEventDelegate::new(store.clone(), buffer.clone()));
        let machine = Arc::new(AlertStateMachine::new(
            delegate,
            store.clone(),
            buffer.clone(),
        ));

        // Bind on an ephemeral port so tests never collide.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);

        let config = RaftConfig::new(name, &address);
        let (handle, _) = spawn(config, machine, Arc::new(TcpTransport::new()), shutdown);

        let server = RpcServer::new(handle.clone(), address.clone());
        let server_shutdown = shutdown.subscribe();
        tokio::spawn(async move { server.run(server_shutdown).await });

        (handle, store, buffer, address)
    }

    async fn wait_for_leader(handle: &RaftHandle) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            if let Ok(status) = handle.status().await
                && status.role == Role::Leader
            {
                return;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "timed out waiting for leadership"
            );
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    #[tokio::test]
    async fn forwarded_proposal_lands_over_tcp() {
        let (shutdown, _) = broadcast::channel(1);
        let (handle, store, buffer, address) = spawn_tcp_node("node-0", &shutdown).await;
        wait_for_leader(&handle).await;

        // Talk to the node purely over the wire, as a follower would.
        let transport = TcpTransport::new();
        let alert = Alert::new(Labels::from([("alertname", "disk_full")]))
            .with_status(AlertStatus::Firing);
        let entry = LogEntry::post_alerts("node-1", vec![WireAlert::from_model(&alert)]);
        transport.forward_apply(&address, entry).await.unwrap();

        buffer.flush().unwrap();
        assert_eq!(store.alert_count(), 1);
        let _ = shutdown.send(());
    }

    #[tokio::test]
    async fn oversized_frames_are_rejected() {
        let (shutdown, _) = broadcast::channel(1);
        let (handle, _, _, address) = spawn_tcp_node("node-0", &shutdown).await;
        wait_for_leader(&handle).await;

        let mut stream = TcpStream::connect(&address).await.unwrap();
        stream.write_u32(u32::MAX).await.unwrap();
        stream.flush().await.unwrap();

        // The server drops the connection instead of allocating.
        let mut buf = [0u8; 1];
        let read = stream.read(&mut buf).await.unwrap();
        assert_eq!(read, 0);
        let _ = shutdown.send(());
    }

    #[tokio::test]
    async fn connecting_nowhere_is_a_transport_error() {
        let transport = TcpTransport::new();
        let result = transport
            .request_vote(
                "127.0.0.1:1",
                VoteRequest {
                    term: 1,
                    candidate_id: "node-0".to_string(),
                    last_log_index: 0,
                    last_log_term: 0,
                },
            )
            .await;
        assert!(result.is_err());
    }
}
