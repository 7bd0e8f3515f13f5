//! Consistent-hash sharding of alerts across the cluster.
//!
//! Exactly one member should ever notify for a given alert. The ring
//! makes that assignment a pure function of the alert's shard labels
//! and the current membership, so every node computes the same answer
//! without coordinating.

use std::collections::{BTreeMap, HashMap};

use banshee_model::{Alert, Labels};
use parking_lot::RwLock;
use tracing::debug;

use crate::member::Member;

/// Virtual points each member contributes to the ring. More points
/// smooth the distribution; 64 keeps a small cluster well balanced.
const VIRTUAL_POINTS: usize = 64;

fn hash64(bytes: &[u8]) -> u64 {
    let hash = blake3::hash(bytes);
    let mut out = [0u8; 8];
    out.copy_from_slice(&hash.as_bytes()[..8]);
    u64::from_le_bytes(out)
}

/// A consistent-hash ring over member names.
#[derive(Debug, Default)]
struct HashRing {
    points: BTreeMap<u64, String>,
    members: HashMap<String, Member>,
}

impl HashRing {
    fn add(&mut self, member: Member) {
        for replica in 0..VIRTUAL_POINTS {
            let point = hash64(format!("{}\u{1f}{replica}", member.name).as_bytes());
            self.points.insert(point, member.name.clone());
        }
        self.members.insert(member.name.clone(), member);
    }

    fn remove(&mut self, name: &str) {
        self.points.retain(|_, owner| owner != name);
        self.members.remove(name);
    }

    /// Walks clockwise from the key's hash to the owning member.
    fn locate(&self, key: &[u8]) -> Option<&Member> {
        let hash = hash64(key);
        let owner = self
            .points
            .range(hash..)
            .next()
            .or_else(|| self.points.iter().next())?
            .1;
        self.members.get(owner)
    }
}

struct RingState {
    ring: HashRing,
    shard_labels: Vec<String>,
}

/// Maps alerts to the member authoritative for them.
///
/// Seeded with the local member so a single-node cluster is always
/// authoritative for everything. Membership mutations and lookups
/// serialize through one lock, so an alert is never mapped against a
/// half-updated ring.
pub struct RingClusterer {
    local: Member,
    state: RwLock<RingState>,
}

impl RingClusterer {
    /// Creates a ring containing only the local member.
    ///
    /// The local member's name must equal this node's replication
    /// server ID, or sharding decisions will disagree with the
    /// roster.
    #[must_use]
    pub fn new(local: Member) -> Self {
        let mut ring = HashRing::default();
        ring.add(local.clone());
        Self {
            local,
            state: RwLock::new(RingState {
                ring,
                shard_labels: Vec::new(),
            }),
        }
    }

    /// Restricts sharding to the given label keys. An empty set (the
    /// default) shards on the full label set.
    pub fn set_shard_labels(&self, keys: Vec<String>) {
        self.state.write().shard_labels = keys;
    }

    /// Adds a member to the ring.
    pub fn add_node(&self, member: Member) {
        debug!(member = %member, "adding member to hash ring");
        self.state.write().ring.add(member);
    }

    /// Removes a member from the ring by name. Removing the local
    /// member is ignored; the ring is never empty.
    pub fn remove_node(&self, name: &str) {
        if name == self.local.name {
            return;
        }
        debug!(member = name, "removing member from hash ring");
        self.state.write().ring.remove(name);
    }

    /// The member authoritative for the given label set.
    ///
    /// Deterministic: fixed membership and shard labels always map
    /// the same labels to the same member.
    #[must_use]
    pub fn authoritative_node(&self, labels: &Labels) -> Member {
        let state = self.state.read();
        let key = if state.shard_labels.is_empty() {
            labels.hash_bytes()
        } else {
            labels.subset(&state.shard_labels).hash_bytes()
        };

        state
            .ring
            .locate(&key)
            .cloned()
            .unwrap_or_else(|| self.local.clone())
    }

    /// Returns true if this node should notify for the alert.
    #[must_use]
    pub fn is_authoritative_for(&self, alert: &Alert) -> bool {
        self.authoritative_node(&alert.labels).name == self.local.name
    }

    /// The current ring membership.
    #[must_use]
    pub fn nodes(&self) -> Vec<Member> {
        self.state.read().ring.members.values().cloned().collect()
    }

    /// The local member.
    #[must_use]
    pub fn local(&self) -> &Member {
        &self.local
    }
}

impl crate::observer::ClusterObserver for RingClusterer {
    fn server_added(&self, member: &Member) {
        self.add_node(member.clone());
    }

    fn server_removed(&self, member: &Member) {
        self.remove_node(&member.name);
    }
}
