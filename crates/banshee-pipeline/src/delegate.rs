//! The lifecycle delegate: where committed events become stored state.
//!
//! Every mutation that comes off the replicated log lands here. The
//! delegate merges an incoming observation with whatever is already
//! stored for the same identity, so that repeated observations of one
//! alert evolve a single record instead of stomping on it.

use std::sync::Arc;

use banshee_model::{Acknowledgement, Alert, AlertStatus, Silence};
use banshee_store::Store;
use banshee_store::filter::{
    ActiveAt, AlertFilterFn, AlertId, ExactLabels, MatchingLabels, SilenceId, and_all_silences,
};
use chrono::Utc;
use tracing::{debug, warn};

use crate::buffer::BufferedStore;
use crate::error::Result;

/// Receives committed events and evolves stored state.
///
/// Implementations must be deterministic: every node applies the same
/// committed events in the same order and must end up with the same
/// stored state.
pub trait EventDelegate: Send + Sync {
    /// Merges an incoming alert observation into the store.
    fn process_alert(&self, alert: Alert) -> Result<()>;

    /// Attaches an acknowledgement to the alert with the given ID.
    fn process_acknowledgement(&self, alert_id: &str, ack: Acknowledgement) -> Result<()>;

    /// Stores a silence, sweeping already-firing alerts it matches.
    fn process_silence(&self, silence: Silence) -> Result<()>;
}

/// The standard [`EventDelegate`]: merge rules over a [`Store`], with
/// writes going through a [`BufferedStore`].
///
/// Reads go to the backing store directly; only the sweep in
/// [`process_silence`](EventDelegate::process_silence) writes alerts
/// directly, because those transitions must be visible to the very
/// next alert that arrives, before any buffer flush.
pub struct StoreEventDelegate {
    store: Arc<dyn Store>,
    buffer: Arc<BufferedStore>,
}

impl StoreEventDelegate {
    /// Creates a delegate over the given store and write buffer. The
    /// buffer must wrap the same store.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, buffer: Arc<BufferedStore>) -> Self {
        Self { store, buffer }
    }
}

impl EventDelegate for StoreEventDelegate {
    fn process_alert(&self, mut alert: Alert) -> Result<()> {
        let existing = self
            .store
            .query_alerts(&ExactLabels::new(alert.labels.clone()));

        if let Some(current) = existing.first() {
            // An unresolved repeat observation keeps its notify
            // cadence: carry the stored notify time forward unless the
            // sender supplied one.
            if alert.status != AlertStatus::Resolved
                && alert.status != AlertStatus::TimedOut
                && alert.last_notified_at.is_none()
            {
                alert.last_notified_at = current.last_notified_at;
            }

            // Resolved/TimedOut coming back to Firing is a new
            // episode; it must notify fresh.
            if matches!(
                current.status,
                AlertStatus::Resolved | AlertStatus::TimedOut
            ) && alert.status == AlertStatus::Firing
            {
                alert.last_notified_at = None;
            }

            if current.acknowledgement.is_some() {
                alert.acknowledgement = current.acknowledgement.clone();
            }
        }

        // This check has to happen inline, not in a background sweep:
        // otherwise an alert could notify in the window between being
        // stored Firing and the sweep observing the silence. It also
        // makes silences sticky across repeat firings: a silenced
        // alert re-observed as Firing lands here and is re-silenced
        // for as long as a matching silence stays active. Once the
        // silence lapses, the next Firing observation passes through.
        if alert.status == AlertStatus::Firing {
            let silences = self.store.query_silences(&and_all_silences(vec![
                Box::new(MatchingLabels(alert.labels.clone())),
                Box::new(ActiveAt(Utc::now())),
            ]));
            if !silences.is_empty() {
                alert.status = AlertStatus::Silenced;
            }
        }

        self.buffer.store_alerts(vec![alert])?;
        Ok(())
    }

    fn process_acknowledgement(&self, alert_id: &str, ack: Acknowledgement) -> Result<()> {
        let alerts = self.store.query_alerts(&AlertId::new(alert_id));
        let Some(mut alert) = alerts.into_iter().next() else {
            warn!(alert_id, "acknowledgement for unknown alert; ignoring");
            return Ok(());
        };

        alert.acknowledgement = Some(ack);
        if alert.status == AlertStatus::Firing {
            alert.status = AlertStatus::Acked;
        }

        self.buffer.store_alerts(vec![alert])?;
        Ok(())
    }

    fn process_silence(&self, silence: Silence) -> Result<()> {
        silence.validate()?;

        let now = Utc::now();
        let already_active = !self
            .store
            .query_silences(&and_all_silences(vec![
                Box::new(SilenceId(silence.id.clone())),
                Box::new(ActiveAt(now)),
            ]))
            .is_empty();

        if !already_active && silence.is_active_at(now) {
            // A newly-active silence sweeps everything it matches that
            // is currently making noise.
            let matching = self.store.query_alerts(&AlertFilterFn(|alert: &Alert| {
                matches!(alert.status, AlertStatus::Firing | AlertStatus::Acked)
                    && silence.matches(&alert.labels)
            }));

            debug!(
                silence_id = %silence.id,
                alerts = matching.len(),
                "newly active silence sweeping firing alerts"
            );

            for mut alert in matching {
                alert.status = AlertStatus::Silenced;
                self.store.store_alerts(vec![alert])?;
            }
        }

        self.buffer.store_silences(vec![silence])?;
        Ok(())
    }
}
