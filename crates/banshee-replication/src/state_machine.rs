//! The state machine that committed log entries are applied to.

use std::sync::Arc;

use banshee_model::{Alert, Silence};
use banshee_pipeline::{BufferedStore, EventDelegate};
use banshee_store::filter::{AllAlerts, AllSilences};
use banshee_store::{MemoryStore, Store};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ReplicationError, Result};

/// What the replicated log drives.
///
/// `apply` receives the raw bytes of a committed entry, in commit
/// order, exactly once per entry on a given node. Any error it
/// returns is fatal to the node: by the time an entry is applied it
/// is committed on a majority, so failure here means this replica can
/// no longer follow the cluster.
pub trait StateMachine: Send + Sync {
    /// Applies one committed entry.
    fn apply(&self, data: &[u8]) -> Result<()>;

    /// Serializes the full state for log compaction.
    fn snapshot(&self) -> Result<Vec<u8>>;

    /// Replaces the full state from a snapshot.
    fn restore(&self, data: &[u8]) -> Result<()>;
}

/// The JSON shape of a state snapshot.
#[derive(Debug, Serialize, Deserialize)]
struct SnapshotData {
    alerts: Vec<Alert>,
    silences: Vec<Silence>,
}

/// The alert-state [`StateMachine`]: decodes [`LogEntry`] frames and
/// hands them to the event delegate.
///
/// [`LogEntry`]: banshee_proto::LogEntry
pub struct AlertStateMachine {
    delegate: Arc<dyn EventDelegate>,
    store: Arc<MemoryStore>,
    buffer: Arc<BufferedStore>,
}

impl AlertStateMachine {
    /// Creates a state machine over the given delegate. The store and
    /// buffer must be the same ones the delegate writes through; the
    /// state machine reads them for snapshots.
    #[must_use]
    pub fn new(
        delegate: Arc<dyn EventDelegate>,
        store: Arc<MemoryStore>,
        buffer: Arc<BufferedStore>,
    ) -> Self {
        Self {
            delegate,
            store,
            buffer,
        }
    }

    fn fatal(error: impl std::fmt::Display) -> ReplicationError {
        ReplicationError::FatalApply {
            reason: error.to_string(),
        }
    }
}

impl StateMachine for AlertStateMachine {
    fn apply(&self, data: &[u8]) -> Result<()> {
        use banshee_proto::{LogEntry, Payload};

        let entry = LogEntry::decode_frame(data).map_err(Self::fatal)?;
        let Some(payload) = entry.payload else {
            return Err(ReplicationError::FatalApply {
                reason: "log entry carries no payload".to_string(),
            });
        };

        match payload {
            Payload::PostAlerts(batch) => {
                for alert in batch.alerts {
                    let alert = alert.into_model().map_err(Self::fatal)?;
                    self.delegate.process_alert(alert).map_err(Self::fatal)?;
                }
            }
            Payload::PostSilences(batch) => {
                for silence in batch.silences {
                    let silence = silence.into_model().map_err(Self::fatal)?;
                    self.delegate.process_silence(silence).map_err(Self::fatal)?;
                }
            }
            Payload::PostAck(post) => {
                let Some(ack) = post.ack else {
                    return Err(ReplicationError::FatalApply {
                        reason: "acknowledgement entry carries no acknowledgement".to_string(),
                    });
                };
                self.delegate
                    .process_acknowledgement(&post.alert_id, ack.into())
                    .map_err(Self::fatal)?;
            }
        }

        Ok(())
    }

    fn snapshot(&self) -> Result<Vec<u8>> {
        // Unflushed writes must land before the store is serialized,
        // or the snapshot would silently drop them.
        self.buffer.flush()?;

        let data = SnapshotData {
            alerts: self.store.query_alerts(&AllAlerts),
            silences: self.store.query_silences(&AllSilences),
        };
        debug!(
            alerts = data.alerts.len(),
            silences = data.silences.len(),
            "serialized state snapshot"
        );
        Ok(serde_json::to_vec(&data)?)
    }

    fn restore(&self, data: &[u8]) -> Result<()> {
        let data: SnapshotData = serde_json::from_slice(data)?;
        debug!(
            alerts = data.alerts.len(),
            silences = data.silences.len(),
            "restoring state snapshot"
        );
        self.store.replace_all(data.alerts, data.silences);
        Ok(())
    }
}
