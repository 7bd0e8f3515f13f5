//! Cluster-awareness for Banshee nodes.
//!
//! Two concerns live here: deciding *who owns what* (the
//! [`RingClusterer`], a consistent-hash ring over the roster) and
//! noticing *who is here* (the [`StateObserver`], which polls a
//! [`MembershipSource`] and pushes roster deltas to registered
//! [`ClusterObserver`]s — the ring among them). The [`Broadcaster`]
//! trait is the contract for pushing mutations into the replicated
//! log.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod broadcast;
pub mod error;
pub mod member;
pub mod observer;
pub mod ring;

pub use broadcast::Broadcaster;
pub use error::{ClusterError, Result};
pub use member::Member;
pub use observer::{ClusterObserver, MembershipSource, ObserverId, StateObserver};
pub use ring::RingClusterer;
