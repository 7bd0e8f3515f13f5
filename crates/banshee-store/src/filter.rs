//! Composable query filters for alerts and silences.
//!
//! Filters are object-safe predicates passed to
//! [`Store::query_alerts`](crate::Store::query_alerts) and
//! [`Store::query_silences`](crate::Store::query_silences). A filter
//! that pins down a single alert identity can advertise it through
//! [`AlertFilter::exact_fingerprint`], letting a keyed store answer
//! with one lookup instead of a scan.

use banshee_model::{Alert, AlertStatus, LabelFingerprint, Labels, Silence};
use chrono::{DateTime, Utc};

/// A predicate over alerts.
pub trait AlertFilter: Send + Sync {
    /// Returns true if the alert passes this filter.
    fn matches(&self, alert: &Alert) -> bool;

    /// If this filter can only ever match the alert with one exact
    /// label fingerprint, returns it. Stores use this to short-circuit
    /// a full scan into a keyed lookup; `matches` is still consulted
    /// on the result.
    fn exact_fingerprint(&self) -> Option<LabelFingerprint> {
        None
    }
}

/// A predicate over silences.
pub trait SilenceFilter: Send + Sync {
    /// Returns true if the silence passes this filter.
    fn matches(&self, silence: &Silence) -> bool;
}

/// Matches every alert.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllAlerts;

impl AlertFilter for AllAlerts {
    fn matches(&self, _alert: &Alert) -> bool {
        true
    }
}

/// Matches the single alert whose label set equals `labels` exactly.
#[derive(Debug, Clone)]
pub struct ExactLabels {
    labels: Labels,
    fingerprint: LabelFingerprint,
}

impl ExactLabels {
    /// Creates a filter for the alert identified by `labels`.
    #[must_use]
    pub fn new(labels: Labels) -> Self {
        let fingerprint = labels.fingerprint();
        Self {
            labels,
            fingerprint,
        }
    }
}

impl AlertFilter for ExactLabels {
    fn matches(&self, alert: &Alert) -> bool {
        alert.labels == self.labels
    }

    fn exact_fingerprint(&self) -> Option<LabelFingerprint> {
        Some(self.fingerprint)
    }
}

/// Matches alerts carrying at least the given labels (extras allowed).
#[derive(Debug, Clone)]
pub struct PartialLabels {
    labels: Labels,
}

impl PartialLabels {
    /// Creates a partial-match filter.
    #[must_use]
    pub fn new(labels: Labels) -> Self {
        Self { labels }
    }
}

impl AlertFilter for PartialLabels {
    fn matches(&self, alert: &Alert) -> bool {
        alert.labels.contains(&self.labels)
    }
}

/// Matches the alert with the given ID (the rendered fingerprint).
#[derive(Debug, Clone)]
pub struct AlertId {
    id: String,
    fingerprint: Option<LabelFingerprint>,
}

impl AlertId {
    /// Creates a filter for the alert with the given ID. An ID that is
    /// not a valid fingerprint rendering simply matches nothing.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        let fingerprint = u64::from_str_radix(&id, 16).ok().map(LabelFingerprint);
        Self { id, fingerprint }
    }
}

impl AlertFilter for AlertId {
    fn matches(&self, alert: &Alert) -> bool {
        alert.id() == self.id
    }

    fn exact_fingerprint(&self) -> Option<LabelFingerprint> {
        self.fingerprint
    }
}

/// Matches alerts in the given status.
#[derive(Debug, Clone, Copy)]
pub struct StatusIs(pub AlertStatus);

impl AlertFilter for StatusIs {
    fn matches(&self, alert: &Alert) -> bool {
        alert.status == self.0
    }
}

/// Matches alerts last notified before the cutoff, including alerts
/// never notified at all.
#[derive(Debug, Clone, Copy)]
pub struct LastNotifiedBefore(pub DateTime<Utc>);

impl AlertFilter for LastNotifiedBefore {
    fn matches(&self, alert: &Alert) -> bool {
        alert.last_notified_at.is_none_or(|at| at < self.0)
    }
}

/// Adapts a closure into an [`AlertFilter`].
pub struct AlertFilterFn<F>(pub F);

impl<F: Fn(&Alert) -> bool + Send + Sync> AlertFilter for AlertFilterFn<F> {
    fn matches(&self, alert: &Alert) -> bool {
        (self.0)(alert)
    }
}

/// The conjunction of several alert filters.
pub struct AllOf {
    filters: Vec<Box<dyn AlertFilter>>,
}

/// Combines alert filters; an alert must pass every one.
#[must_use]
pub fn and_all(filters: Vec<Box<dyn AlertFilter>>) -> AllOf {
    AllOf { filters }
}

impl AlertFilter for AllOf {
    fn matches(&self, alert: &Alert) -> bool {
        self.filters.iter().all(|f| f.matches(alert))
    }

    fn exact_fingerprint(&self) -> Option<LabelFingerprint> {
        self.filters.iter().find_map(|f| f.exact_fingerprint())
    }
}

/// Matches every silence.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllSilences;

impl SilenceFilter for AllSilences {
    fn matches(&self, _silence: &Silence) -> bool {
        true
    }
}

/// Matches the silence with the given ID.
#[derive(Debug, Clone)]
pub struct SilenceId(pub String);

impl SilenceFilter for SilenceId {
    fn matches(&self, silence: &Silence) -> bool {
        silence.id == self.0
    }
}

/// Matches silences active at the given instant.
#[derive(Debug, Clone, Copy)]
pub struct ActiveAt(pub DateTime<Utc>);

impl SilenceFilter for ActiveAt {
    fn matches(&self, silence: &Silence) -> bool {
        silence.is_active_at(self.0)
    }
}

/// Matches silences whose matchers all match the given label set.
#[derive(Debug, Clone)]
pub struct MatchingLabels(pub Labels);

impl SilenceFilter for MatchingLabels {
    fn matches(&self, silence: &Silence) -> bool {
        silence.matches(&self.0)
    }
}

/// Adapts a closure into a [`SilenceFilter`].
pub struct SilenceFilterFn<F>(pub F);

impl<F: Fn(&Silence) -> bool + Send + Sync> SilenceFilter for SilenceFilterFn<F> {
    fn matches(&self, silence: &Silence) -> bool {
        (self.0)(silence)
    }
}

/// The conjunction of several silence filters.
pub struct AllSilencesOf {
    filters: Vec<Box<dyn SilenceFilter>>,
}

/// Combines silence filters; a silence must pass every one.
#[must_use]
pub fn and_all_silences(filters: Vec<Box<dyn SilenceFilter>>) -> AllSilencesOf {
    AllSilencesOf { filters }
}

impl SilenceFilter for AllSilencesOf {
    fn matches(&self, silence: &Silence) -> bool {
        self.filters.iter().all(|f| f.matches(silence))
    }
}
