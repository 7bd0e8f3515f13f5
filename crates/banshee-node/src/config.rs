//! Node configuration.

use std::path::Path;
use std::time::Duration;

use banshee_cluster::Member;
use serde::Deserialize;

use crate::error::{NodeError, Result};

/// Everything a node needs to know at startup. Deserialized from a
/// JSON file; every field except `name` and `listen_address` has a
/// sensible default.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    /// This node's stable name (its replication server ID and its
    /// cluster member name).
    pub name: String,
    /// Address the replication server listens on.
    pub listen_address: String,
    /// Seed roster: every member of the cluster at startup, this node
    /// included.
    #[serde(default)]
    pub seed_peers: Vec<Member>,
    /// Labels whose values shard alerts across the ring. Empty means
    /// the full label set.
    #[serde(default)]
    pub shard_labels: Vec<String>,

    /// Write-buffer capacity before an early flush.
    #[serde(default = "default_buffer_max_len")]
    pub buffer_max_len: usize,
    /// Write-buffer flush cadence, in milliseconds.
    #[serde(default = "default_buffer_flush_interval_ms")]
    pub buffer_flush_interval_ms: u64,

    /// Timeout-sweep cadence, in milliseconds.
    #[serde(default = "default_sweep_tick_ms")]
    pub timeout_tick_ms: u64,
    /// Notify-sweep cadence, in milliseconds.
    #[serde(default = "default_sweep_tick_ms")]
    pub notify_tick_ms: u64,
    /// How long after a notification a still-firing alert notifies
    /// again, in seconds.
    #[serde(default = "default_renotify_interval_secs")]
    pub renotify_interval_secs: u64,

    /// Capacity of the log-proposal queue.
    #[serde(default = "default_proposal_queue_capacity")]
    pub proposal_queue_capacity: usize,
    /// Lower bound of the randomized election timeout, in
    /// milliseconds.
    #[serde(default = "default_election_timeout_min_ms")]
    pub election_timeout_min_ms: u64,
    /// Upper bound of the randomized election timeout, in
    /// milliseconds.
    #[serde(default = "default_election_timeout_max_ms")]
    pub election_timeout_max_ms: u64,
    /// Leader heartbeat cadence, in milliseconds.
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    /// Log length that triggers compaction into a snapshot.
    #[serde(default = "default_snapshot_threshold")]
    pub snapshot_threshold: usize,

    /// Membership poll cadence, in milliseconds.
    #[serde(default = "default_observer_poll_interval_ms")]
    pub observer_poll_interval_ms: u64,
}

fn default_buffer_max_len() -> usize {
    256
}

fn default_buffer_flush_interval_ms() -> u64 {
    100
}

fn default_sweep_tick_ms() -> u64 {
    1_000
}

fn default_renotify_interval_secs() -> u64 {
    3 * 60 * 60
}

fn default_proposal_queue_capacity() -> usize {
    256
}

fn default_election_timeout_min_ms() -> u64 {
    300
}

fn default_election_timeout_max_ms() -> u64 {
    600
}

fn default_heartbeat_interval_ms() -> u64 {
    100
}

fn default_snapshot_threshold() -> usize {
    4_096
}

fn default_observer_poll_interval_ms() -> u64 {
    2_000
}

impl NodeConfig {
    /// Creates a config with defaults for the given identity.
    #[must_use]
    pub fn new(name: impl Into<String>, listen_address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            listen_address: listen_address.into(),
            seed_peers: Vec::new(),
            shard_labels: Vec::new(),
            buffer_max_len: default_buffer_max_len(),
            buffer_flush_interval_ms: default_buffer_flush_interval_ms(),
            timeout_tick_ms: default_sweep_tick_ms(),
            notify_tick_ms: default_sweep_tick_ms(),
            renotify_interval_secs: default_renotify_interval_secs(),
            proposal_queue_capacity: default_proposal_queue_capacity(),
            election_timeout_min_ms: default_election_timeout_min_ms(),
            election_timeout_max_ms: default_election_timeout_max_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            snapshot_threshold: default_snapshot_threshold(),
            observer_poll_interval_ms: default_observer_poll_interval_ms(),
        }
    }

    /// Loads a config from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the config.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(NodeError::Config {
                reason: "node name must not be empty".to_string(),
            });
        }
        if self.listen_address.is_empty() {
            return Err(NodeError::Config {
                reason: "listen address must not be empty".to_string(),
            });
        }
        if self.election_timeout_max_ms < self.election_timeout_min_ms {
            return Err(NodeError::Config {
                reason: "election timeout max must be at least the min".to_string(),
            });
        }
        Ok(())
    }

    /// The write-buffer flush cadence.
    #[must_use]
    pub fn buffer_flush_interval(&self) -> Duration {
        Duration::from_millis(self.buffer_flush_interval_ms)
    }

    /// The timeout-sweep cadence.
    #[must_use]
    pub fn timeout_tick(&self) -> Duration {
        Duration::from_millis(self.timeout_tick_ms)
    }

    /// The notify-sweep cadence.
    #[must_use]
    pub fn notify_tick(&self) -> Duration {
        Duration::from_millis(self.notify_tick_ms)
    }

    /// The re-notify interval.
    #[must_use]
    pub fn renotify_interval(&self) -> Duration {
        Duration::from_secs(self.renotify_interval_secs)
    }

    /// The membership poll cadence.
    #[must_use]
    pub fn observer_poll_interval(&self) -> Duration {
        Duration::from_millis(self.observer_poll_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_json_fills_defaults() {
        let config: NodeConfig = serde_json::from_str(
            r#"{"name": "node-0", "listen_address": "127.0.0.1:4278"}"#,
        )
        .unwrap();

        assert_eq!(config.name, "node-0");
        assert_eq!(config.buffer_max_len, 256);
        assert_eq!(config.renotify_interval_secs, 3 * 60 * 60);
        assert_eq!(config.election_timeout_min_ms, 300);
        assert!(config.seed_peers.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn full_json_overrides_defaults() {
        let config: NodeConfig = serde_json::from_str(
            r#"{
                "name": "node-1",
                "listen_address": "0.0.0.0:4278",
                "seed_peers": [
                    {"name": "node-0", "address": "10.0.0.1:4278"},
                    {"name": "node-1", "address": "10.0.0.2:4278"}
                ],
                "shard_labels": ["service"],
                "buffer_max_len": 64,
                "notify_tick_ms": 500,
                "snapshot_threshold": 1024
            }"#,
        )
        .unwrap();

        assert_eq!(config.seed_peers.len(), 2);
        assert_eq!(config.shard_labels, vec!["service"]);
        assert_eq!(config.buffer_max_len, 64);
        assert_eq!(config.notify_tick_ms, 500);
        assert_eq!(config.snapshot_threshold, 1024);
        // Unspecified fields still default.
        assert_eq!(config.heartbeat_interval_ms, 100);
    }

    #[test]
    fn empty_name_is_rejected() {
        let config = NodeConfig::new("", "127.0.0.1:4278");
        assert!(matches!(
            config.validate(),
            Err(NodeError::Config { .. })
        ));
    }

    #[test]
    fn inverted_election_window_is_rejected() {
        let mut config = NodeConfig::new("node-0", "127.0.0.1:4278");
        config.election_timeout_min_ms = 800;
        assert!(config.validate().is_err());
    }
}
