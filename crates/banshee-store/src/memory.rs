//! The in-memory store backing a single node.

use std::collections::HashMap;

use banshee_model::{Alert, Silence};
use parking_lot::RwLock;
use tracing::debug;

use crate::error::Result;
use crate::filter::{AlertFilter, SilenceFilter};
use crate::store::Store;

/// A thread-safe in-memory [`Store`].
///
/// Alerts are keyed by their label fingerprint, so storing an alert
/// whose labels match an existing one replaces it in place: identity
/// uniqueness holds by construction. Nothing is ever deleted; resolved
/// and timed-out alerts stay queryable, and expired silences simply
/// stop matching activity filters.
#[derive(Debug, Default)]
pub struct MemoryStore {
    alerts: RwLock<HashMap<u64, Alert>>,
    silences: RwLock<HashMap<String, Silence>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct alert identities currently held.
    #[must_use]
    pub fn alert_count(&self) -> usize {
        self.alerts.read().len()
    }

    /// Number of silences currently held.
    #[must_use]
    pub fn silence_count(&self) -> usize {
        self.silences.read().len()
    }

    /// Replaces the entire contents of the store.
    ///
    /// Used when restoring from a replication snapshot.
    pub fn replace_all(&self, alerts: Vec<Alert>, silences: Vec<Silence>) {
        debug!(
            alerts = alerts.len(),
            silences = silences.len(),
            "replacing store contents"
        );
        *self.alerts.write() = alerts
            .into_iter()
            .map(|a| (a.labels.fingerprint().0, a))
            .collect();
        *self.silences.write() = silences.into_iter().map(|s| (s.id.clone(), s)).collect();
    }
}

impl Store for MemoryStore {
    fn store_alerts(&self, alerts: Vec<Alert>) -> Result<()> {
        let mut map = self.alerts.write();
        for alert in alerts {
            map.insert(alert.labels.fingerprint().0, alert);
        }
        Ok(())
    }

    fn store_silences(&self, silences: Vec<Silence>) -> Result<()> {
        let mut map = self.silences.write();
        for silence in silences {
            map.insert(silence.id.clone(), silence);
        }
        Ok(())
    }

    fn query_alerts(&self, filter: &dyn AlertFilter) -> Vec<Alert> {
        let map = self.alerts.read();

        // A filter pinned to one identity is a keyed lookup, not a scan.
        if let Some(fingerprint) = filter.exact_fingerprint() {
            return map
                .get(&fingerprint.0)
                .filter(|a| filter.matches(a))
                .cloned()
                .into_iter()
                .collect();
        }

        map.values().filter(|a| filter.matches(a)).cloned().collect()
    }

    fn query_silences(&self, filter: &dyn SilenceFilter) -> Vec<Silence> {
        self.silences
            .read()
            .values()
            .filter(|s| filter.matches(s))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{
        ActiveAt, AlertId, AllAlerts, AllSilences, ExactLabels, StatusIs, and_all,
    };
    use banshee_model::{AlertStatus, Labels, Matcher};
    use chrono::{Duration, Utc};

    fn firing(name: &str) -> Alert {
        Alert::new(Labels::from([("alertname", name)])).with_status(AlertStatus::Firing)
    }

    #[test]
    fn stores_and_queries_alerts() {
        let store = MemoryStore::new();
        store
            .store_alerts(vec![firing("foo"), firing("bar")])
            .unwrap();

        assert_eq!(store.query_alerts(&AllAlerts).len(), 2);
    }

    #[test]
    fn identical_labels_merge_into_one_identity() {
        let store = MemoryStore::new();
        store.store_alerts(vec![firing("foo")]).unwrap();
        store
            .store_alerts(vec![firing("foo").with_status(AlertStatus::Resolved)])
            .unwrap();

        let alerts = store.query_alerts(&AllAlerts);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].status, AlertStatus::Resolved);
    }

    #[test]
    fn exact_label_query_uses_keyed_lookup() {
        let store = MemoryStore::new();
        let alert = firing("foo");
        let labels = alert.labels.clone();
        store.store_alerts(vec![alert, firing("bar")]).unwrap();

        let hits = store.query_alerts(&ExactLabels::new(labels));
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].labels.get("alertname"), Some("foo"));
    }

    #[test]
    fn keyed_lookup_still_honors_conjunction() {
        let store = MemoryStore::new();
        let alert = firing("foo");
        let labels = alert.labels.clone();
        store.store_alerts(vec![alert]).unwrap();

        // Keyed shortcut finds the alert, but the status leg rejects it.
        let filter = and_all(vec![
            Box::new(ExactLabels::new(labels)),
            Box::new(StatusIs(AlertStatus::Acked)),
        ]);
        assert!(store.query_alerts(&filter).is_empty());
    }

    #[test]
    fn query_by_id() {
        let store = MemoryStore::new();
        let alert = firing("foo");
        let id = alert.id();
        store.store_alerts(vec![alert]).unwrap();

        assert_eq!(store.query_alerts(&AlertId::new(id)).len(), 1);
        assert!(store.query_alerts(&AlertId::new("ffffffffffffffff")).is_empty());
    }

    #[test]
    fn stores_and_queries_silences() {
        let store = MemoryStore::new();
        let silence = Silence::new(
            "ops",
            "test",
            Some(Utc::now() + Duration::hours(1)),
            vec![Matcher::equal("alertname", "foo")],
        );
        let expired = Silence::new(
            "ops",
            "old",
            Some(Utc::now() + Duration::hours(1)),
            vec![Matcher::equal("alertname", "bar")],
        );
        let mut expired = expired;
        expired.starts_at = Utc::now() - Duration::hours(2);
        expired.ends_at = Some(Utc::now() - Duration::hours(1));

        store.store_silences(vec![silence, expired]).unwrap();

        assert_eq!(store.query_silences(&AllSilences).len(), 2);
        assert_eq!(store.query_silences(&ActiveAt(Utc::now())).len(), 1);
    }

    #[test]
    fn silences_update_by_id() {
        let store = MemoryStore::new();
        let mut silence = Silence::new(
            "ops",
            "test",
            Some(Utc::now() + Duration::hours(1)),
            vec![Matcher::equal("alertname", "foo")],
        );
        store.store_silences(vec![silence.clone()]).unwrap();

        silence.comment = "extended".to_string();
        store.store_silences(vec![silence]).unwrap();

        let silences = store.query_silences(&AllSilences);
        assert_eq!(silences.len(), 1);
        assert_eq!(silences[0].comment, "extended");
    }

    #[test]
    fn replace_all_swaps_contents() {
        let store = MemoryStore::new();
        store
            .store_alerts(vec![firing("foo"), firing("bar")])
            .unwrap();

        store.replace_all(vec![firing("baz")], vec![]);

        let alerts = store.query_alerts(&AllAlerts);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].labels.get("alertname"), Some("baz"));
        assert_eq!(store.silence_count(), 0);
    }
}
