//! The [`Broadcaster`] implementation over the replicated log.

use banshee_cluster::{Broadcaster, ClusterError};
use banshee_model::{Acknowledgement, Alert, Silence};
use banshee_proto::{LogEntry, WireAck, WireAlert, WireSilence};
use futures::future::BoxFuture;

use crate::core::RaftHandle;

/// Broadcasts mutations by proposing them to the replicated log.
///
/// Every broadcast resolves only once the entry has committed and
/// been applied locally, so a caller observing `Ok` can immediately
/// read its own write (after a buffer flush).
pub struct RaftBroadcaster {
    handle: RaftHandle,
    origin: String,
}

impl RaftBroadcaster {
    /// Creates a broadcaster proposing through the given handle,
    /// stamping entries with this node's name.
    #[must_use]
    pub fn new(handle: RaftHandle, origin: impl Into<String>) -> Self {
        Self {
            handle,
            origin: origin.into(),
        }
    }

    async fn propose(&self, entry: LogEntry) -> banshee_cluster::Result<()> {
        self.handle
            .propose(entry)
            .await
            .map_err(|error| ClusterError::Broadcast {
                reason: error.to_string(),
            })
    }
}

impl Broadcaster for RaftBroadcaster {
    fn broadcast_alerts<'a>(
        &'a self,
        alerts: &'a [Alert],
    ) -> BoxFuture<'a, banshee_cluster::Result<()>> {
        Box::pin(async move {
            let wire = alerts.iter().map(WireAlert::from_model).collect();
            self.propose(LogEntry::post_alerts(&self.origin, wire)).await
        })
    }

    fn broadcast_silences<'a>(
        &'a self,
        silences: &'a [Silence],
    ) -> BoxFuture<'a, banshee_cluster::Result<()>> {
        Box::pin(async move {
            let wire = silences.iter().map(WireSilence::from_model).collect();
            self.propose(LogEntry::post_silences(&self.origin, wire))
                .await
        })
    }

    fn broadcast_acknowledgement<'a>(
        &'a self,
        alert_id: &'a str,
        ack: Acknowledgement,
    ) -> BoxFuture<'a, banshee_cluster::Result<()>> {
        Box::pin(async move {
            let entry = LogEntry::post_ack(&self.origin, alert_id, WireAck::from(&ack));
            self.propose(entry).await
        })
    }
}
