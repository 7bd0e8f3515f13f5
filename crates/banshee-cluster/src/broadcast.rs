//! The broadcast contract between the core and the replicated log.

use banshee_model::{Acknowledgement, Alert, Silence};
use futures::future::BoxFuture;

use crate::error::Result;

/// Routes mutations into the replicated log so every node observes
/// them.
///
/// The edge layer broadcasts ingested alerts and silences; the
/// background services re-broadcast alerts whose state they change
/// (timeouts, notify-time updates) so the transition is agreed
/// cluster-wide rather than drifting locally.
pub trait Broadcaster: Send + Sync {
    /// Broadcasts alert observations.
    fn broadcast_alerts<'a>(&'a self, alerts: &'a [Alert]) -> BoxFuture<'a, Result<()>>;

    /// Broadcasts silences.
    fn broadcast_silences<'a>(&'a self, silences: &'a [Silence]) -> BoxFuture<'a, Result<()>>;

    /// Broadcasts an acknowledgement for the alert with the given ID.
    fn broadcast_acknowledgement<'a>(
        &'a self,
        alert_id: &'a str,
        ack: Acknowledgement,
    ) -> BoxFuture<'a, Result<()>>;
}
