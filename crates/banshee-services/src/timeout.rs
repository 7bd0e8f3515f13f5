//! The timeout sweep: firing alerts past their deadline time out.

use std::sync::Arc;
use std::time::Duration;

use banshee_cluster::Broadcaster;
use banshee_model::{Alert, AlertStatus};
use banshee_store::Store;
use banshee_store::filter::StatusIs;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use tracing::{info, warn};

use crate::error::Result;
use crate::service::{Service, ShutdownRx};

/// Flips firing alerts whose timeout deadline has passed to
/// [`AlertStatus::TimedOut`] and re-broadcasts the transition so it
/// is agreed cluster-wide.
///
/// A failed broadcast is not fatal: the alert stays `Firing` in the
/// store, so the next sweep picks it up again.
pub struct TimeoutService {
    store: Arc<dyn Store>,
    broadcaster: Arc<dyn Broadcaster>,
    tick: Duration,
}

impl TimeoutService {
    /// Default sweep cadence.
    pub const DEFAULT_TICK: Duration = Duration::from_secs(1);

    /// Creates a timeout service over the given store and broadcaster.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, broadcaster: Arc<dyn Broadcaster>) -> Self {
        Self {
            store,
            broadcaster,
            tick: Self::DEFAULT_TICK,
        }
    }

    /// Sets the sweep interval.
    #[must_use]
    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// Runs one sweep at the given time.
    pub async fn sweep(&self, now: DateTime<Utc>) {
        let timed_out: Vec<Alert> = self
            .store
            .query_alerts(&StatusIs(AlertStatus::Firing))
            .into_iter()
            .filter(|alert| alert.is_past_deadline(now))
            .map(|mut alert| {
                alert.status = AlertStatus::TimedOut;
                alert
            })
            .collect();

        if timed_out.is_empty() {
            return;
        }

        info!(count = timed_out.len(), "timing out alerts past their deadline");
        if let Err(error) = self.broadcaster.broadcast_alerts(&timed_out).await {
            warn!(%error, "failed to broadcast timed out alerts; retrying next sweep");
        }
    }
}

impl Service for TimeoutService {
    fn name(&self) -> &str {
        "timeout"
    }

    fn run(&self, mut shutdown: ShutdownRx) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let mut ticker = tokio::time::interval(self.tick);
            loop {
                tokio::select! {
                    _ = ticker.tick() => self.sweep(Utc::now()).await,
                    _ = shutdown.recv() => {
                        // One last sweep so a transition observed just
                        // before shutdown is not lost.
                        self.sweep(Utc::now()).await;
                        return Ok(());
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use banshee_cluster::ClusterError;
    use banshee_model::{Acknowledgement, Labels, Silence};
    use banshee_store::MemoryStore;
    use chrono::Duration as ChronoDuration;
    use parking_lot::Mutex;
    use test_case::test_case;

    #[derive(Default)]
    struct RecordingBroadcaster {
        alerts: Mutex<Vec<Alert>>,
        fail: Mutex<bool>,
    }

    impl Broadcaster for RecordingBroadcaster {
        fn broadcast_alerts<'a>(
            &'a self,
            alerts: &'a [Alert],
        ) -> BoxFuture<'a, banshee_cluster::Result<()>> {
            Box::pin(async move {
                if *self.fail.lock() {
                    return Err(ClusterError::Broadcast {
                        reason: "log unavailable".to_string(),
                    });
                }
                self.alerts.lock().extend_from_slice(alerts);
                Ok(())
            })
        }

        fn broadcast_silences<'a>(
            &'a self,
            _silences: &'a [Silence],
        ) -> BoxFuture<'a, banshee_cluster::Result<()>> {
            Box::pin(async { Ok(()) })
        }

        fn broadcast_acknowledgement<'a>(
            &'a self,
            _alert_id: &'a str,
            _ack: Acknowledgement,
        ) -> BoxFuture<'a, banshee_cluster::Result<()>> {
            Box::pin(async { Ok(()) })
        }
    }

    fn alert_with(status: AlertStatus, deadline_offset: ChronoDuration) -> Alert {
        let mut alert =
            Alert::new(Labels::from([("alertname", "test")])).with_status(status);
        alert.timeout_deadline = Utc::now() + deadline_offset;
        alert
    }

    #[test_case(AlertStatus::Firing, ChronoDuration::hours(-1), true; "firing past deadline times out")]
    #[test_case(AlertStatus::Firing, ChronoDuration::hours(1), false; "firing before deadline stays")]
    #[test_case(AlertStatus::Resolved, ChronoDuration::hours(-1), false; "resolved never times out")]
    #[test_case(AlertStatus::Silenced, ChronoDuration::hours(-1), false; "silenced never times out")]
    #[tokio::test]
    async fn sweep_table(status: AlertStatus, offset: ChronoDuration, expect_broadcast: bool) {
        let store = Arc::new(MemoryStore::new());
        store.store_alerts(vec![alert_with(status, offset)]).unwrap();
        let broadcaster = Arc::new(RecordingBroadcaster::default());
        let service = TimeoutService::new(store, broadcaster.clone());

        service.sweep(Utc::now()).await;

        let broadcast = broadcaster.alerts.lock();
        if expect_broadcast {
            assert_eq!(broadcast.len(), 1);
            assert_eq!(broadcast[0].status, AlertStatus::TimedOut);
        } else {
            assert!(broadcast.is_empty());
        }
    }

    #[tokio::test]
    async fn failed_broadcast_is_retried_next_sweep() {
        let store = Arc::new(MemoryStore::new());
        store
            .store_alerts(vec![alert_with(
                AlertStatus::Firing,
                ChronoDuration::hours(-1),
            )])
            .unwrap();
        let broadcaster = Arc::new(RecordingBroadcaster::default());
        let service = TimeoutService::new(store, broadcaster.clone());

        *broadcaster.fail.lock() = true;
        service.sweep(Utc::now()).await;
        assert!(broadcaster.alerts.lock().is_empty());

        // The store still holds the alert as Firing, so the next
        // sweep retries the transition.
        *broadcaster.fail.lock() = false;
        service.sweep(Utc::now()).await;
        assert_eq!(broadcaster.alerts.lock().len(), 1);
    }
}
