//! RPC frames for the replication transport.
//!
//! Every call on the wire is one [`RpcRequest`] answered by one
//! [`RpcResponse`]; the transport prefixes each with a four-byte
//! big-endian length. Consensus traffic (votes, appends, snapshots),
//! proposal forwarding, and roster administration all share this
//! surface.

use prost::Message;

use crate::wire::LogEntry;

/// One record in an append batch: the entry bytes plus the term they
/// were appended under.
#[derive(Clone, PartialEq, Message)]
pub struct LogRecord {
    /// Term the leader appended this entry in.
    #[prost(uint64, tag = "1")]
    pub term: u64,
    /// The encoded [`LogEntry`] frame, or an encoded
    /// [`AddMemberRequest`] when `config` is set.
    #[prost(bytes = "vec", tag = "2")]
    pub data: Vec<u8>,
    /// Marks a roster-change entry. Config entries are applied to the
    /// peer set instead of the state machine.
    #[prost(bool, tag = "3")]
    pub config: bool,
}

/// Forward a proposal to the leader.
#[derive(Clone, PartialEq, Message)]
pub struct ApplyLogRequest {
    /// The entry to propose.
    #[prost(message, optional, tag = "1")]
    pub entry: Option<LogEntry>,
}

/// Reply to a forwarded proposal.
#[derive(Clone, PartialEq, Message)]
pub struct ApplyLogReply {
    /// Whether the entry was committed.
    #[prost(bool, tag = "1")]
    pub ok: bool,
    /// Failure reason when not ok.
    #[prost(string, tag = "2")]
    pub error: String,
}

/// Grow the cluster roster.
#[derive(Clone, PartialEq, Message)]
pub struct AddMemberRequest {
    /// The new member's server ID.
    #[prost(string, tag = "1")]
    pub id: String,
    /// The new member's replication address.
    #[prost(string, tag = "2")]
    pub address: String,
    /// Whether the member votes in elections.
    #[prost(bool, tag = "3")]
    pub voter: bool,
    /// How long the leader may spend admitting the member.
    #[prost(uint32, tag = "4")]
    pub timeout_seconds: u32,
}

/// Reply to a roster change.
#[derive(Clone, PartialEq, Message)]
pub struct AddMemberReply {
    /// Whether the member was admitted.
    #[prost(bool, tag = "1")]
    pub ok: bool,
    /// Failure reason when not ok.
    #[prost(string, tag = "2")]
    pub error: String,
}

/// A candidate asking for a vote.
#[derive(Clone, PartialEq, Message)]
pub struct VoteRequest {
    /// Candidate's term.
    #[prost(uint64, tag = "1")]
    pub term: u64,
    /// Candidate's server ID.
    #[prost(string, tag = "2")]
    pub candidate_id: String,
    /// Index of the candidate's last log entry.
    #[prost(uint64, tag = "3")]
    pub last_log_index: u64,
    /// Term of the candidate's last log entry.
    #[prost(uint64, tag = "4")]
    pub last_log_term: u64,
}

/// Reply to a vote request.
#[derive(Clone, PartialEq, Message)]
pub struct VoteReply {
    /// The voter's current term.
    #[prost(uint64, tag = "1")]
    pub term: u64,
    /// Whether the vote was granted.
    #[prost(bool, tag = "2")]
    pub granted: bool,
}

/// Leader replicating entries (or heartbeating with none).
#[derive(Clone, PartialEq, Message)]
pub struct AppendEntriesRequest {
    /// Leader's term.
    #[prost(uint64, tag = "1")]
    pub term: u64,
    /// Leader's server ID.
    #[prost(string, tag = "2")]
    pub leader_id: String,
    /// Index of the entry preceding the batch.
    #[prost(uint64, tag = "3")]
    pub prev_log_index: u64,
    /// Term of the entry preceding the batch.
    #[prost(uint64, tag = "4")]
    pub prev_log_term: u64,
    /// The entries to append; empty for a heartbeat.
    #[prost(message, repeated, tag = "5")]
    pub entries: Vec<LogRecord>,
    /// Leader's commit index.
    #[prost(uint64, tag = "6")]
    pub leader_commit: u64,
}

/// Reply to an append.
#[derive(Clone, PartialEq, Message)]
pub struct AppendEntriesReply {
    /// The follower's current term.
    #[prost(uint64, tag = "1")]
    pub term: u64,
    /// Whether the entries were appended.
    #[prost(bool, tag = "2")]
    pub success: bool,
    /// Highest log index the follower now matches.
    #[prost(uint64, tag = "3")]
    pub match_index: u64,
}

/// Leader shipping a snapshot to a follower that fell behind the
/// compacted log.
#[derive(Clone, PartialEq, Message)]
pub struct InstallSnapshotRequest {
    /// Leader's term.
    #[prost(uint64, tag = "1")]
    pub term: u64,
    /// Leader's server ID.
    #[prost(string, tag = "2")]
    pub leader_id: String,
    /// Index of the last entry the snapshot covers.
    #[prost(uint64, tag = "3")]
    pub last_included_index: u64,
    /// Term of that entry.
    #[prost(uint64, tag = "4")]
    pub last_included_term: u64,
    /// The serialized state machine.
    #[prost(bytes = "vec", tag = "5")]
    pub data: Vec<u8>,
}

/// Reply to a snapshot install.
#[derive(Clone, PartialEq, Message)]
pub struct InstallSnapshotReply {
    /// The follower's current term.
    #[prost(uint64, tag = "1")]
    pub term: u64,
}

/// The request union.
#[derive(Clone, PartialEq, prost::Oneof)]
pub enum Request {
    /// Forwarded proposal.
    #[prost(message, tag = "1")]
    ApplyLog(ApplyLogRequest),
    /// Roster change.
    #[prost(message, tag = "2")]
    AddMember(AddMemberRequest),
    /// Election vote.
    #[prost(message, tag = "3")]
    RequestVote(VoteRequest),
    /// Replication append or heartbeat.
    #[prost(message, tag = "4")]
    AppendEntries(AppendEntriesRequest),
    /// Snapshot install.
    #[prost(message, tag = "5")]
    InstallSnapshot(InstallSnapshotRequest),
}

/// The response union.
#[derive(Clone, PartialEq, prost::Oneof)]
pub enum Response {
    /// Forwarded proposal result.
    #[prost(message, tag = "1")]
    ApplyLog(ApplyLogReply),
    /// Roster change result.
    #[prost(message, tag = "2")]
    AddMember(AddMemberReply),
    /// Vote result.
    #[prost(message, tag = "3")]
    RequestVote(VoteReply),
    /// Append result.
    #[prost(message, tag = "4")]
    AppendEntries(AppendEntriesReply),
    /// Snapshot result.
    #[prost(message, tag = "5")]
    InstallSnapshot(InstallSnapshotReply),
}

/// One request frame.
#[derive(Clone, PartialEq, Message)]
pub struct RpcRequest {
    /// The call being made.
    #[prost(oneof = "Request", tags = "1, 2, 3, 4, 5")]
    pub request: Option<Request>,
}

/// One response frame.
#[derive(Clone, PartialEq, Message)]
pub struct RpcResponse {
    /// The call's result.
    #[prost(oneof = "Response", tags = "1, 2, 3, 4, 5")]
    pub response: Option<Response>,
}

impl RpcRequest {
    /// Wraps a request variant in a frame.
    #[must_use]
    pub fn new(request: Request) -> Self {
        Self {
            request: Some(request),
        }
    }
}

impl RpcResponse {
    /// Wraps a response variant in a frame.
    #[must_use]
    pub fn new(response: Response) -> Self {
        Self {
            response: Some(response),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_round_trips() {
        let request = RpcRequest::new(Request::RequestVote(VoteRequest {
            term: 3,
            candidate_id: "node-2".to_string(),
            last_log_index: 10,
            last_log_term: 2,
        }));

        let decoded = RpcRequest::decode(request.encode_to_vec().as_slice()).unwrap();
        assert_eq!(decoded, request);
    }

    #[test]
    fn response_round_trips() {
        let response = RpcResponse::new(Response::AppendEntries(AppendEntriesReply {
            term: 3,
            success: true,
            match_index: 12,
        }));

        let decoded = RpcResponse::decode(response.encode_to_vec().as_slice()).unwrap();
        assert_eq!(decoded, response);
    }

    #[test]
    fn forwarded_entry_survives_nesting() {
        let entry = LogEntry::post_silences("node-3", vec![]);
        let request = RpcRequest::new(Request::ApplyLog(ApplyLogRequest {
            entry: Some(entry.clone()),
        }));

        let decoded = RpcRequest::decode(request.encode_to_vec().as_slice()).unwrap();
        match decoded.request {
            Some(Request::ApplyLog(apply)) => assert_eq!(apply.entry, Some(entry)),
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn config_records_are_discriminated() {
        let record = LogRecord {
            term: 2,
            data: AddMemberRequest {
                id: "node-4".to_string(),
                address: "127.0.0.1:4004".to_string(),
                voter: true,
                timeout_seconds: 10,
            }
            .encode_to_vec(),
            config: true,
        };

        let decoded = LogRecord::decode(record.encode_to_vec().as_slice()).unwrap();
        assert!(decoded.config);
        let request = AddMemberRequest::decode(decoded.data.as_slice()).unwrap();
        assert_eq!(request.id, "node-4");
    }
}
