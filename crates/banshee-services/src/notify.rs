//! The notify sweep: deciding when and where to deliver notifications.
//!
//! Every node runs this service and every node sees every alert, so
//! the first gate is the hash ring: a node only ever notifies for
//! alerts it is authoritative for. Past the gate, delivery is either
//! immediate or batched into a pending group per notifier, keyed by
//! the notifier's group-label values.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use banshee_cluster::{Broadcaster, RingClusterer};
use banshee_model::{Alert, AlertStatus, Labels};
use banshee_store::Store;
use banshee_store::filter::AlertFilterFn;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{Result, ServiceError};
use crate::notifier::{Notifier, NotifierRegistry};
use crate::service::{Service, ShutdownRx};

/// Alerts held back so related ones batch into one notification.
struct PendingGroup {
    key: Labels,
    deadline: Instant,
    alerts: Vec<Alert>,
}

/// Scans for alerts due a notification and delivers them through the
/// registered notifiers.
///
/// Candidates are newly `Processing` alerts, plus `Firing` alerts
/// whose last notification is older than the notifier's re-notify
/// interval. After delivery the alert is re-broadcast as `Firing`
/// with a fresh notify time, so every replica agrees on the cadence.
pub struct NotifyService {
    store: Arc<dyn Store>,
    broadcaster: Arc<dyn Broadcaster>,
    clusterer: Arc<RingClusterer>,
    registry: Arc<NotifierRegistry>,
    tick: Duration,
    // Keyed by notifier name; each notifier groups independently.
    pending: Mutex<HashMap<String, Vec<PendingGroup>>>,
}

impl NotifyService {
    /// Default sweep cadence.
    pub const DEFAULT_TICK: Duration = Duration::from_secs(1);

    /// Creates a notify service.
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        broadcaster: Arc<dyn Broadcaster>,
        clusterer: Arc<RingClusterer>,
        registry: Arc<NotifierRegistry>,
    ) -> Self {
        Self {
            store,
            broadcaster,
            clusterer,
            registry,
            tick: Self::DEFAULT_TICK,
            pending: Mutex::new(HashMap::new()),
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
        let candidates = self.store.query_alerts(&AlertFilterFn(|alert: &Alert| {
            matches!(alert.status, AlertStatus::Processing | AlertStatus::Firing)
        }));

        for alert in candidates {
            if !self.clusterer.is_authoritative_for(&alert) {
                continue;
            }
            self.notify_alert(alert, now).await;
        }

        self.deliver_due_groups(false).await;
    }

    /// Delivers an alert through every notifier it is due for.
    async fn notify_alert(&self, alert: Alert, now: DateTime<Utc>) {
        let due: Vec<_> = self
            .registry
            .entries()
            .iter()
            .filter(|entry| {
                alert.status == AlertStatus::Processing
                    || alert.last_notified_at.is_none_or(|at| {
                        (now - at)
                            .to_std()
                            .is_ok_and(|since| since >= entry.settings.renotify_interval)
                    })
            })
            .collect();
        if due.is_empty() {
            return;
        }

        let mut updated = alert;
        updated.status = AlertStatus::Firing;
        updated.last_notified_at = Some(now);
        updated.authority_hint = Some(self.clusterer.local().name.clone());

        let mut failures = Vec::new();
        for entry in due {
            if entry.settings.group_wait > Duration::ZERO {
                self.enqueue_group(entry.notifier.name(), &entry.settings.group_labels,
                    entry.settings.group_wait, updated.clone());
                continue;
            }
            if let Err(error) = entry.notifier.notify(std::slice::from_ref(&updated)).await {
                failures.push(format!("{}: {error}", entry.notifier.name()));
            }
        }

        // Failed notifiers never block the others or the broadcast;
        // one aggregated report covers the pass.
        if !failures.is_empty() {
            let error = ServiceError::Notify { failures };
            warn!(%error, alert_id = %updated.id(), "notification delivery failed");
        }

        // The notify-time update has to replicate even when delivery
        // partially failed, or every node would retry forever.
        if let Err(error) = self.broadcaster.broadcast_alerts(&[updated]).await {
            warn!(%error, "failed to broadcast notify-time update; retrying next sweep");
        }
    }

    fn enqueue_group(&self, notifier: &str, group_labels: &[String], wait: Duration, alert: Alert) {
        let key = alert.labels.subset(group_labels);
        let mut pending = self.pending.lock();
        let groups = pending.entry(notifier.to_string()).or_default();

        if let Some(group) = groups.iter_mut().find(|g| g.key == key) {
            group.alerts.push(alert);
        } else {
            debug!(notifier, key = ?key, "opening a notification group");
            groups.push(PendingGroup {
                key,
                deadline: Instant::now() + wait,
                alerts: vec![alert],
            });
        }
    }

    /// Delivers every group past its window; `drain` delivers all of
    /// them regardless, for the final sweep at shutdown.
    async fn deliver_due_groups(&self, drain: bool) {
        let now = Instant::now();

        // Collect under the lock, deliver outside it.
        let due: Vec<(Arc<dyn Notifier>, Vec<Alert>)> = {
            let mut pending = self.pending.lock();
            let mut due = Vec::new();
            for entry in self.registry.entries() {
                let Some(groups) = pending.get_mut(entry.notifier.name()) else {
                    continue;
                };
                let mut waiting = Vec::new();
                for group in groups.drain(..) {
                    if drain || group.deadline <= now {
                        due.push((Arc::clone(&entry.notifier), group.alerts));
                    } else {
                        waiting.push(group);
                    }
                }
                *groups = waiting;
            }
            pending.retain(|_, groups| !groups.is_empty());
            due
        };

        for (notifier, alerts) in due {
            if let Err(error) = notifier.notify(&alerts).await {
                warn!(%error, notifier = notifier.name(), "grouped notification failed");
            }
        }
    }
}

impl Service for NotifyService {
    fn name(&self) -> &str {
        "notify"
    }

    fn run(&self, mut shutdown: ShutdownRx) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let mut ticker = tokio::time::interval(self.tick);
            loop {
                tokio::select! {
                    _ = ticker.tick() => self.sweep(Utc::now()).await,
                    _ = shutdown.recv() => {
                        // Flush pending groups rather than drop them.
                        self.deliver_due_groups(true).await;
                        return Ok(());
                    }
                }
            }
        })
    }
}
