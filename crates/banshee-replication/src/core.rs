//! The replication driver: a raft-style replicated log.
//!
//! One task per node owns all consensus state; everything else talks
//! to it through message passing. Proposals go through a bounded
//! queue with a single consumer, so commit order matches submission
//! order on a given node, and a proposal landing on a follower is
//! forwarded to the leader transparently.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use banshee_cluster::{Member, MembershipSource};
use banshee_proto::LogEntry;
use banshee_proto::rpc::{
    AddMemberReply, AddMemberRequest, AppendEntriesReply, AppendEntriesRequest, ApplyLogReply,
    ApplyLogRequest, InstallSnapshotReply, InstallSnapshotRequest, LogRecord, Request, Response,
    VoteReply, VoteRequest,
};
use futures::future::BoxFuture;
use prost::Message;
use rand::Rng;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::error::{ReplicationError, Result};
use crate::state_machine::StateMachine;
use crate::transport::RaftTransport;

/// Tuning for one replication node.
#[derive(Debug, Clone)]
pub struct RaftConfig {
    /// This node's server ID (its cluster member name).
    pub id: String,
    /// This node's replication address.
    pub address: String,
    /// Known peers at startup.
    pub peers: Vec<Member>,
    /// Lower bound of the randomized election timeout.
    pub election_timeout_min: Duration,
    /// Upper bound of the randomized election timeout.
    pub election_timeout_max: Duration,
    /// How often the leader heartbeats followers.
    pub heartbeat_interval: Duration,
    /// Log length that triggers compaction into a snapshot.
    pub snapshot_threshold: usize,
    /// Capacity of the proposal queue.
    pub proposal_queue_capacity: usize,
}

impl RaftConfig {
    /// Creates a config with default timing for the given identity.
    #[must_use]
    pub fn new(id: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
            peers: Vec::new(),
            election_timeout_min: Duration::from_millis(300),
            election_timeout_max: Duration::from_millis(600),
            heartbeat_interval: Duration::from_millis(100),
            snapshot_threshold: 4096,
            proposal_queue_capacity: 256,
        }
    }

    /// Sets the startup peer roster.
    #[must_use]
    pub fn with_peers(mut self, peers: Vec<Member>) -> Self {
        self.peers = peers;
        self
    }
}

/// A node's current consensus role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Passively replicating from a leader.
    Follower,
    /// Standing for election.
    Candidate,
    /// Accepting proposals and replicating to followers.
    Leader,
}

/// A point-in-time view of a node's consensus state.
#[derive(Debug, Clone)]
pub struct RaftStatus {
    /// This node's server ID.
    pub id: String,
    /// This node's role.
    pub role: Role,
    /// Current term.
    pub term: u64,
    /// The known leader, if any.
    pub leader: Option<Member>,
    /// Index of the last log entry.
    pub last_log_index: u64,
    /// Highest committed index.
    pub commit_index: u64,
    /// Highest applied index.
    pub last_applied: u64,
    /// The full roster, this node included.
    pub members: Vec<Member>,
}

struct Peer {
    address: String,
    voter: bool,
    next_index: u64,
    match_index: u64,
}

struct ProposalJob {
    entry: LogEntry,
    reply: oneshot::Sender<Result<()>>,
}

enum Envelope {
    Rpc {
        request: Request,
        reply: oneshot::Sender<Response>,
    },
    Propose {
        entry: LogEntry,
        ack: oneshot::Sender<Result<()>>,
    },
    Status {
        reply: oneshot::Sender<RaftStatus>,
    },
    VoteResult {
        peer: String,
        sent_term: u64,
        reply: VoteReply,
    },
    AppendResult {
        peer: String,
        sent_term: u64,
        sent_up_to: u64,
        reply: AppendEntriesReply,
    },
    SnapshotResult {
        peer: String,
        sent_term: u64,
        last_included_index: u64,
        reply: InstallSnapshotReply,
    },
}

/// A cheap, cloneable handle to a running replication driver.
#[derive(Clone)]
pub struct RaftHandle {
    driver: mpsc::UnboundedSender<Envelope>,
    proposals: mpsc::Sender<ProposalJob>,
    transport: Arc<dyn RaftTransport>,
}

impl RaftHandle {
    /// Proposes an entry and waits until it is committed and applied.
    ///
    /// Routed through the bounded proposal queue; proposals from one
    /// node commit in the order they were submitted. On a follower
    /// the entry is forwarded to the leader.
    pub async fn propose(&self, entry: LogEntry) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.proposals
            .send(ProposalJob { entry, reply: tx })
            .await
            .map_err(|_| ReplicationError::Shutdown)?;
        rx.await.map_err(|_| ReplicationError::Shutdown)?
    }

    /// Hands an inbound RPC to the driver and waits for its answer.
    pub async fn handle_rpc(&self, request: Request) -> Result<Response> {
        let (tx, rx) = oneshot::channel();
        self.driver
            .send(Envelope::Rpc { request, reply: tx })
            .map_err(|_| ReplicationError::Shutdown)?;
        rx.await.map_err(|_| ReplicationError::Shutdown)
    }

    /// Returns the driver's current status.
    pub async fn status(&self) -> Result<RaftStatus> {
        let (tx, rx) = oneshot::channel();
        self.driver
            .send(Envelope::Status { reply: tx })
            .map_err(|_| ReplicationError::Shutdown)?;
        rx.await.map_err(|_| ReplicationError::Shutdown)
    }

    /// Asks this node to admit a new cluster member. Succeeds once
    /// the roster change has committed; only the leader accepts it.
    pub async fn add_member(
        &self,
        id: impl Into<String>,
        address: impl Into<String>,
        voter: bool,
        timeout: Duration,
    ) -> Result<()> {
        let request = AddMemberRequest {
            id: id.into(),
            address: address.into(),
            voter,
            timeout_seconds: timeout.as_secs() as u32,
        };
        match self.handle_rpc(Request::AddMember(request)).await? {
            Response::AddMember(reply) if reply.ok => Ok(()),
            Response::AddMember(reply) => Err(ReplicationError::Rejected {
                reason: reply.error,
            }),
            _ => Err(ReplicationError::Transport {
                reason: "wrong response variant for a roster change".to_string(),
            }),
        }
    }

    /// Proposes directly to the local driver, forwarding to the
    /// leader if this node is a follower.
    async fn submit(&self, entry: LogEntry) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.driver
            .send(Envelope::Propose {
                entry: entry.clone(),
                ack: tx,
            })
            .map_err(|_| ReplicationError::Shutdown)?;

        match rx.await.map_err(|_| ReplicationError::Shutdown)? {
            Ok(()) => Ok(()),
            Err(ReplicationError::NotLeader {
                leader: Some(address),
            }) => self.transport.forward_apply(&address, entry).await,
            Err(ReplicationError::NotLeader { leader: None }) => Err(ReplicationError::NoLeader),
            Err(error) => Err(error),
        }
    }
}

impl MembershipSource for RaftHandle {
    fn members(&self) -> BoxFuture<'_, banshee_cluster::Result<Vec<Member>>> {
        Box::pin(async move {
            self.status()
                .await
                .map(|status| status.members)
                .map_err(|error| banshee_cluster::ClusterError::Membership {
                    reason: error.to_string(),
                })
        })
    }
}

/// Starts a replication node: the driver task plus the proposal
/// consumer. The returned join handle resolves when the driver stops;
/// an `Err` there means a fatal apply failure and the node must not
/// continue.
pub fn spawn(
    config: RaftConfig,
    machine: Arc<dyn StateMachine>,
    transport: Arc<dyn RaftTransport>,
    shutdown: &broadcast::Sender<()>,
) -> (RaftHandle, JoinHandle<Result<()>>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let (proposal_tx, proposal_rx) = mpsc::channel(config.proposal_queue_capacity.max(1));

    let handle = RaftHandle {
        driver: tx.clone(),
        proposals: proposal_tx,
        transport: Arc::clone(&transport),
    };

    let driver = RaftDriver::new(config, machine, transport, tx, rx);
    let task = tokio::spawn(driver.run(shutdown.subscribe()));
    tokio::spawn(run_proposals(proposal_rx, handle.clone(), shutdown.subscribe()));

    (handle, task)
}

async fn run_proposals(
    mut rx: mpsc::Receiver<ProposalJob>,
    handle: RaftHandle,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            job = rx.recv() => match job {
                Some(job) => {
                    let result = handle.submit(job.entry).await;
                    let _ = job.reply.send(result);
                }
                None => return,
            },
            _ = shutdown.recv() => return,
        }
    }
}

struct RaftDriver {
    config: RaftConfig,
    machine: Arc<dyn StateMachine>,
    transport: Arc<dyn RaftTransport>,
    tx: mpsc::UnboundedSender<Envelope>,
    rx: mpsc::UnboundedReceiver<Envelope>,

    role: Role,
    term: u64,
    voted_for: Option<String>,
    votes: HashSet<String>,
    leader: Option<String>,

    // log[0] sits at index first_index; entries before it live in the
    // snapshot.
    log: Vec<LogRecord>,
    first_index: u64,
    snapshot_last_index: u64,
    snapshot_last_term: u64,
    snapshot_data: Option<Arc<Vec<u8>>>,

    commit_index: u64,
    last_applied: u64,

    peers: HashMap<String, Peer>,
    pending: HashMap<u64, oneshot::Sender<Result<()>>>,
    election_deadline: Instant,
}

impl RaftDriver {
    fn new(
        config: RaftConfig,
        machine: Arc<dyn StateMachine>,
        transport: Arc<dyn RaftTransport>,
        tx: mpsc::UnboundedSender<Envelope>,
        rx: mpsc::UnboundedReceiver<Envelope>,
    ) -> Self {
        let peers = config
            .peers
            .iter()
            .filter(|member| member.name != config.id)
            .map(|member| {
                (
                    member.name.clone(),
                    Peer {
                        address: member.address.clone(),
                        voter: true,
                        next_index: 1,
                        match_index: 0,
                    },
                )
            })
            .collect();

        Self {
            config,
            machine,
            transport,
            tx,
            rx,
            role: Role::Follower,
            term: 0,
            voted_for: None,
            votes: HashSet::new(),
            leader: None,
            log: Vec::new(),
            first_index: 1,
            snapshot_last_index: 0,
            snapshot_last_term: 0,
            snapshot_data: None,
            commit_index: 0,
            last_applied: 0,
            peers,
            pending: HashMap::new(),
            election_deadline: Instant::now(),
        }
    }

    async fn run(mut self, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        let mut heartbeat = tokio::time::interval(self.config.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.reset_election_deadline();
        info!(id = %self.config.id, peers = self.peers.len(), "replication driver started");

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    self.fail_pending(|| ReplicationError::Shutdown);
                    return Ok(());
                }
                envelope = self.rx.recv() => match envelope {
                    Some(envelope) => self.handle(envelope)?,
                    None => return Ok(()),
                },
                () = tokio::time::sleep_until(self.election_deadline),
                    if self.role != Role::Leader => self.start_election(),
                _ = heartbeat.tick(), if self.role == Role::Leader => self.broadcast_appends(),
            }
        }
    }

    fn handle(&mut self, envelope: Envelope) -> Result<()> {
        match envelope {
            Envelope::Rpc { request, reply } => self.handle_rpc(request, reply)?,
            Envelope::Propose { entry, ack } => self.handle_propose(entry, ack)?,
            Envelope::Status { reply } => {
                let _ = reply.send(self.status());
            }
            Envelope::VoteResult {
                peer,
                sent_term,
                reply,
            } => self.handle_vote_result(&peer, sent_term, &reply),
            Envelope::AppendResult {
                peer,
                sent_term,
                sent_up_to,
                reply,
            } => self.handle_append_result(&peer, sent_term, sent_up_to, &reply)?,
            Envelope::SnapshotResult {
                peer,
                sent_term,
                last_included_index,
                reply,
            } => self.handle_snapshot_result(&peer, sent_term, last_included_index, &reply),
        }
        Ok(())
    }

    fn handle_rpc(&mut self, request: Request, reply: oneshot::Sender<Response>) -> Result<()> {
        match request {
            Request::RequestVote(request) => {
                let response = self.handle_request_vote(&request);
                let _ = reply.send(Response::RequestVote(response));
            }
            Request::AppendEntries(request) => {
                let response = self.handle_append_entries(request)?;
                let _ = reply.send(Response::AppendEntries(response));
            }
            Request::InstallSnapshot(request) => {
                let response = self.handle_install_snapshot(request)?;
                let _ = reply.send(Response::InstallSnapshot(response));
            }
            Request::ApplyLog(request) => self.handle_apply_log(request, reply)?,
            Request::AddMember(request) => self.handle_add_member(request, reply)?,
        }
        Ok(())
    }

    // -- elections --

    fn start_election(&mut self) {
        self.term += 1;
        self.role = Role::Candidate;
        self.voted_for = Some(self.config.id.clone());
        self.votes = HashSet::from([self.config.id.clone()]);
        self.leader = None;
        self.reset_election_deadline();
        debug!(term = self.term, "election timeout; standing as candidate");

        let request = VoteRequest {
            term: self.term,
            candidate_id: self.config.id.clone(),
            last_log_index: self.last_log_index(),
            last_log_term: self.last_log_term(),
        };

        for (name, peer) in self.peers.iter().filter(|(_, p)| p.voter) {
            let transport = Arc::clone(&self.transport);
            let tx = self.tx.clone();
            let name = name.clone();
            let address = peer.address.clone();
            let request = request.clone();
            let sent_term = self.term;
            tokio::spawn(async move {
                match transport.request_vote(&address, request).await {
                    Ok(reply) => {
                        let _ = tx.send(Envelope::VoteResult {
                            peer: name,
                            sent_term,
                            reply,
                        });
                    }
                    Err(error) => debug!(%error, peer = %name, "vote request failed"),
                }
            });
        }

        // A cluster of one elects itself.
        self.try_win();
    }

    fn handle_vote_result(&mut self, peer: &str, sent_term: u64, reply: &VoteReply) {
        if reply.term > self.term {
            self.step_down(reply.term);
            return;
        }
        if self.role == Role::Candidate && sent_term == self.term && reply.granted {
            self.votes.insert(peer.to_string());
            self.try_win();
        }
    }

    fn try_win(&mut self) {
        if self.role != Role::Candidate || self.votes.len() <= self.voter_count() / 2 {
            return;
        }
        info!(term = self.term, "won election; leading");
        self.role = Role::Leader;
        self.leader = Some(self.config.id.clone());
        let next = self.last_log_index() + 1;
        for peer in self.peers.values_mut() {
            peer.next_index = next;
            peer.match_index = 0;
        }
        self.broadcast_appends();
    }

    fn handle_request_vote(&mut self, request: &VoteRequest) -> VoteReply {
        if request.term > self.term {
            self.step_down(request.term);
        }

        let up_to_date = request.last_log_term > self.last_log_term()
            || (request.last_log_term == self.last_log_term()
                && request.last_log_index >= self.last_log_index());
        let granted = request.term == self.term
            && up_to_date
            && self
                .voted_for
                .as_deref()
                .is_none_or(|voted| voted == request.candidate_id);

        if granted {
            self.voted_for = Some(request.candidate_id.clone());
            self.reset_election_deadline();
        }

        VoteReply {
            term: self.term,
            granted,
        }
    }

    // -- log replication --

    fn broadcast_appends(&self) {
        for (name, peer) in &self.peers {
            if peer.next_index < self.first_index {
                self.send_snapshot(name, peer);
                continue;
            }

            let offset = (peer.next_index - self.first_index) as usize;
            let request = AppendEntriesRequest {
                term: self.term,
                leader_id: self.config.id.clone(),
                prev_log_index: peer.next_index - 1,
                prev_log_term: self.term_at(peer.next_index - 1).unwrap_or(0),
                entries: self.log[offset..].to_vec(),
                leader_commit: self.commit_index,
            };
            let sent_up_to = self.last_log_index();
            let sent_term = self.term;

            let transport = Arc::clone(&self.transport);
            let tx = self.tx.clone();
            let name = name.clone();
            let address = peer.address.clone();
            tokio::spawn(async move {
                match transport.append_entries(&address, request).await {
                    Ok(reply) => {
                        let _ = tx.send(Envelope::AppendResult {
                            peer: name,
                            sent_term,
                            sent_up_to,
                            reply,
                        });
                    }
                    Err(error) => debug!(%error, peer = %name, "append failed"),
                }
            });
        }
    }

    fn send_snapshot(&self, name: &str, peer: &Peer) {
        let Some(data) = self.snapshot_data.as_ref() else {
            warn!(peer = %name, "peer is behind the compacted log but no snapshot is held");
            return;
        };
        let request = InstallSnapshotRequest {
            term: self.term,
            leader_id: self.config.id.clone(),
            last_included_index: self.snapshot_last_index,
            last_included_term: self.snapshot_last_term,
            data: data.as_ref().clone(),
        };
        let sent_term = self.term;
        let last_included_index = self.snapshot_last_index;

        let transport = Arc::clone(&self.transport);
        let tx = self.tx.clone();
        let name = name.to_string();
        let address = peer.address.clone();
        tokio::spawn(async move {
            match transport.install_snapshot(&address, request).await {
                Ok(reply) => {
                    let _ = tx.send(Envelope::SnapshotResult {
                        peer: name,
                        sent_term,
                        last_included_index,
                        reply,
                    });
                }
                Err(error) => debug!(%error, peer = %name, "snapshot install failed"),
            }
        });
    }

    fn handle_append_result(
        &mut self,
        name: &str,
        sent_term: u64,
        sent_up_to: u64,
        reply: &AppendEntriesReply,
    ) -> Result<()> {
        if reply.term > self.term {
            self.step_down(reply.term);
            return Ok(());
        }
        if self.role != Role::Leader || sent_term != self.term {
            return Ok(());
        }
        let Some(peer) = self.peers.get_mut(name) else {
            return Ok(());
        };

        if reply.success {
            peer.match_index = peer.match_index.max(sent_up_to);
            peer.next_index = peer.match_index + 1;
            self.advance_commit()?;
        } else {
            // Back up towards the follower's log end; the next
            // heartbeat retries from there.
            let hint = reply.match_index.saturating_add(1);
            peer.next_index = peer.next_index.saturating_sub(1).clamp(1, hint.max(1));
        }
        Ok(())
    }

    fn handle_snapshot_result(
        &mut self,
        name: &str,
        sent_term: u64,
        last_included_index: u64,
        reply: &InstallSnapshotReply,
    ) {
        if reply.term > self.term {
            self.step_down(reply.term);
            return;
        }
        if self.role != Role::Leader || sent_term != self.term {
            return;
        }
        if let Some(peer) = self.peers.get_mut(name) {
            peer.match_index = peer.match_index.max(last_included_index);
            peer.next_index = last_included_index + 1;
        }
    }

    fn handle_append_entries(
        &mut self,
        request: AppendEntriesRequest,
    ) -> Result<AppendEntriesReply> {
        if request.term < self.term {
            return Ok(AppendEntriesReply {
                term: self.term,
                success: false,
                match_index: self.last_log_index(),
            });
        }

        if request.term > self.term {
            self.term = request.term;
            self.voted_for = None;
        }
        self.role = Role::Follower;
        self.leader = Some(request.leader_id.clone());
        self.reset_election_deadline();

        let consistent = request.prev_log_index < self.first_index
            || (request.prev_log_index <= self.last_log_index()
                && self.term_at(request.prev_log_index) == Some(request.prev_log_term));
        if !consistent {
            return Ok(AppendEntriesReply {
                term: self.term,
                success: false,
                match_index: self
                    .last_log_index()
                    .min(request.prev_log_index.saturating_sub(1)),
            });
        }

        let mut index = request.prev_log_index;
        for record in request.entries {
            index += 1;
            if index < self.first_index {
                // Already covered by our snapshot.
                continue;
            }
            if index <= self.last_log_index() {
                if self.term_at(index) == Some(record.term) {
                    continue;
                }
                // Conflicting suffix from a deposed leader; ours loses.
                self.log.truncate((index - self.first_index) as usize);
            }
            self.log.push(record);
        }

        if request.leader_commit > self.commit_index {
            self.commit_index = request.leader_commit.min(self.last_log_index());
            self.apply_committed()?;
        }

        Ok(AppendEntriesReply {
            term: self.term,
            success: true,
            match_index: self.last_log_index(),
        })
    }

    fn handle_install_snapshot(
        &mut self,
        request: InstallSnapshotRequest,
    ) -> Result<InstallSnapshotReply> {
        if request.term < self.term {
            return Ok(InstallSnapshotReply { term: self.term });
        }

        if request.term > self.term {
            self.term = request.term;
            self.voted_for = None;
        }
        self.role = Role::Follower;
        self.leader = Some(request.leader_id.clone());
        self.reset_election_deadline();

        if request.last_included_index > self.last_applied {
            info!(
                through = request.last_included_index,
                "installing snapshot from leader"
            );
            self.machine
                .restore(&request.data)
                .map_err(|error| ReplicationError::FatalApply {
                    reason: format!("snapshot restore failed: {error}"),
                })?;
            self.log.clear();
            self.first_index = request.last_included_index + 1;
            self.snapshot_last_index = request.last_included_index;
            self.snapshot_last_term = request.last_included_term;
            self.snapshot_data = Some(Arc::new(request.data));
            self.commit_index = request.last_included_index;
            self.last_applied = request.last_included_index;
        }

        Ok(InstallSnapshotReply { term: self.term })
    }

    // -- proposals --

    fn handle_propose(&mut self, entry: LogEntry, ack: oneshot::Sender<Result<()>>) -> Result<()> {
        if self.role != Role::Leader {
            let _ = ack.send(Err(ReplicationError::NotLeader {
                leader: self.leader_address(),
            }));
            return Ok(());
        }

        let index = self.append_local(LogRecord {
            term: self.term,
            data: entry.encode_frame(),
            config: false,
        });
        self.pending.insert(index, ack);
        self.advance_commit()?;
        self.broadcast_appends();
        Ok(())
    }

    fn handle_apply_log(
        &mut self,
        request: ApplyLogRequest,
        reply: oneshot::Sender<Response>,
    ) -> Result<()> {
        let Some(entry) = request.entry else {
            let _ = reply.send(Response::ApplyLog(ApplyLogReply {
                ok: false,
                error: "apply request carries no entry".to_string(),
            }));
            return Ok(());
        };
        if self.role != Role::Leader {
            let _ = reply.send(Response::ApplyLog(ApplyLogReply {
                ok: false,
                error: "not the leader".to_string(),
            }));
            return Ok(());
        }

        let index = self.append_local(LogRecord {
            term: self.term,
            data: entry.encode_frame(),
            config: false,
        });
        let (ack, committed) = oneshot::channel();
        self.pending.insert(index, ack);
        self.advance_commit()?;
        self.broadcast_appends();

        tokio::spawn(async move {
            let response = match committed.await {
                Ok(Ok(())) => ApplyLogReply {
                    ok: true,
                    error: String::new(),
                },
                Ok(Err(error)) => ApplyLogReply {
                    ok: false,
                    error: error.to_string(),
                },
                Err(_) => ApplyLogReply {
                    ok: false,
                    error: "replication driver stopped".to_string(),
                },
            };
            let _ = reply.send(Response::ApplyLog(response));
        });
        Ok(())
    }

    fn handle_add_member(
        &mut self,
        request: AddMemberRequest,
        reply: oneshot::Sender<Response>,
    ) -> Result<()> {
        if self.role != Role::Leader {
            let _ = reply.send(Response::AddMember(AddMemberReply {
                ok: false,
                error: "not the leader".to_string(),
            }));
            return Ok(());
        }
        if request.id == self.config.id || self.peers.contains_key(&request.id) {
            let _ = reply.send(Response::AddMember(AddMemberReply {
                ok: true,
                error: String::new(),
            }));
            return Ok(());
        }

        info!(member = %request.id, address = %request.address, "proposing roster change");

        // Start replicating to the newcomer right away; followers
        // learn of it when the config entry commits.
        self.peers.insert(
            request.id.clone(),
            Peer {
                address: request.address.clone(),
                voter: request.voter,
                next_index: self.last_log_index() + 1,
                match_index: 0,
            },
        );

        let timeout = Duration::from_secs(u64::from(request.timeout_seconds.max(1)));
        let index = self.append_local(LogRecord {
            term: self.term,
            data: request.encode_to_vec(),
            config: true,
        });
        let (ack, committed) = oneshot::channel();
        self.pending.insert(index, ack);
        self.advance_commit()?;
        self.broadcast_appends();

        tokio::spawn(async move {
            let response = match tokio::time::timeout(timeout, committed).await {
                Ok(Ok(Ok(()))) => AddMemberReply {
                    ok: true,
                    error: String::new(),
                },
                Ok(Ok(Err(error))) => AddMemberReply {
                    ok: false,
                    error: error.to_string(),
                },
                Ok(Err(_)) => AddMemberReply {
                    ok: false,
                    error: "replication driver stopped".to_string(),
                },
                Err(_) => AddMemberReply {
                    ok: false,
                    error: "timed out waiting for the roster change to commit".to_string(),
                },
            };
            let _ = reply.send(Response::AddMember(response));
        });
        Ok(())
    }

    // -- commit and apply --

    fn advance_commit(&mut self) -> Result<()> {
        let mut advanced = false;
        for index in (self.commit_index + 1)..=self.last_log_index() {
            // Only entries from the current term commit by counting;
            // older entries ride along with them.
            if self.term_at(index) != Some(self.term) {
                continue;
            }
            let replicas = 1 + self
                .peers
                .values()
                .filter(|p| p.voter && p.match_index >= index)
                .count();
            if replicas > self.voter_count() / 2 {
                self.commit_index = index;
                advanced = true;
            }
        }
        if advanced {
            self.apply_committed()?;
        }
        Ok(())
    }

    fn apply_committed(&mut self) -> Result<()> {
        while self.last_applied < self.commit_index {
            let index = self.last_applied + 1;
            let offset = (index - self.first_index) as usize;
            let record = self.log[offset].clone();

            if record.config {
                self.apply_config(&record.data);
            } else if let Err(error) = self.machine.apply(&record.data) {
                error!(%error, index, "fatal error applying committed entry; stopping");
                return Err(error);
            }

            self.last_applied = index;
            if let Some(ack) = self.pending.remove(&index) {
                let _ = ack.send(Ok(()));
            }
        }
        self.maybe_compact();
        Ok(())
    }

    fn apply_config(&mut self, data: &[u8]) {
        match AddMemberRequest::decode(data) {
            Ok(request) => {
                if request.id != self.config.id && !self.peers.contains_key(&request.id) {
                    info!(member = %request.id, address = %request.address, "admitting cluster member");
                    self.peers.insert(
                        request.id,
                        Peer {
                            address: request.address,
                            voter: request.voter,
                            next_index: self.last_log_index() + 1,
                            match_index: 0,
                        },
                    );
                }
            }
            Err(error) => warn!(%error, "ignoring undecodable roster-change entry"),
        }
    }

    fn maybe_compact(&mut self) {
        if self.log.len() < self.config.snapshot_threshold || self.last_applied < self.first_index
        {
            return;
        }
        match self.machine.snapshot() {
            Ok(data) => {
                let last_term = self.term_at(self.last_applied).unwrap_or(self.snapshot_last_term);
                let keep_from = (self.last_applied + 1 - self.first_index) as usize;
                self.log.drain(..keep_from);
                self.snapshot_last_index = self.last_applied;
                self.snapshot_last_term = last_term;
                self.first_index = self.last_applied + 1;
                self.snapshot_data = Some(Arc::new(data));
                info!(through = self.snapshot_last_index, "compacted log into snapshot");
            }
            Err(error) => warn!(%error, "snapshot failed; keeping the full log"),
        }
    }

    // -- bookkeeping --

    fn append_local(&mut self, record: LogRecord) -> u64 {
        self.log.push(record);
        self.last_log_index()
    }

    fn step_down(&mut self, term: u64) {
        debug!(term, "observed a higher term; stepping down");
        self.term = term;
        self.role = Role::Follower;
        self.voted_for = None;
        self.votes.clear();
        self.leader = None;
        self.reset_election_deadline();
        self.fail_pending(|| ReplicationError::NotLeader { leader: None });
    }

    fn fail_pending(&mut self, make_error: impl Fn() -> ReplicationError) {
        for (_, ack) in self.pending.drain() {
            let _ = ack.send(Err(make_error()));
        }
    }

    fn reset_election_deadline(&mut self) {
        let min = self.config.election_timeout_min.as_millis() as u64;
        let max = (self.config.election_timeout_max.as_millis() as u64).max(min);
        let wait = rand::thread_rng().gen_range(min..=max);
        self.election_deadline = Instant::now() + Duration::from_millis(wait);
    }

    fn last_log_index(&self) -> u64 {
        self.first_index - 1 + self.log.len() as u64
    }

    fn last_log_term(&self) -> u64 {
        self.term_at(self.last_log_index()).unwrap_or(0)
    }

    fn term_at(&self, index: u64) -> Option<u64> {
        if index == 0 {
            return Some(0);
        }
        if index == self.snapshot_last_index {
            return Some(self.snapshot_last_term);
        }
        if index < self.first_index {
            return None;
        }
        self.log
            .get((index - self.first_index) as usize)
            .map(|record| record.term)
    }

    fn voter_count(&self) -> usize {
        1 + self.peers.values().filter(|p| p.voter).count()
    }

    fn leader_address(&self) -> Option<String> {
        let leader = self.leader.as_deref()?;
        if leader == self.config.id {
            return Some(self.config.address.clone());
        }
        self.peers.get(leader).map(|peer| peer.address.clone())
    }

    fn status(&self) -> RaftStatus {
        let mut members: Vec<Member> = self
            .peers
            .iter()
            .map(|(name, peer)| Member::new(name.clone(), peer.address.clone()))
            .collect();
        members.push(Member::new(
            self.config.id.clone(),
            self.config.address.clone(),
        ));
        members.sort_by(|a, b| a.name.cmp(&b.name));

        let leader = self.leader.as_deref().and_then(|id| {
            if id == self.config.id {
                Some(Member::new(id, self.config.address.clone()))
            } else {
                self.peers
                    .get(id)
                    .map(|peer| Member::new(id, peer.address.clone()))
            }
        });

        RaftStatus {
            id: self.config.id.clone(),
            role: self.role,
            term: self.term,
            leader,
            last_log_index: self.last_log_index(),
            commit_index: self.commit_index,
            last_applied: self.last_applied,
            members,
        }
    }
}
