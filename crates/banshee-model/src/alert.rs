//! Alerts and their lifecycle states.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::labels::Labels;

/// The current status of an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    /// Just ingested; not yet evaluated by the notify pipeline.
    Processing,
    /// The alert is actively firing.
    Firing,
    /// Firing, but an operator has acknowledged it.
    Acked,
    /// Firing, but suppressed by a matching silence.
    Silenced,
    /// The sender told us the alert is over.
    Resolved,
    /// We never got a resolve, but the alert hit its timeout deadline.
    TimedOut,
}

impl AlertStatus {
    /// Returns the status as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Processing => "processing",
            Self::Firing => "firing",
            Self::Acked => "acked",
            Self::Silenced => "silenced",
            Self::Resolved => "resolved",
            Self::TimedOut => "timedout",
        }
    }

    /// Returns true if the alert is still live (not resolved or timed out).
    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(
            self,
            Self::Processing | Self::Firing | Self::Acked | Self::Silenced
        )
    }
}

impl std::fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Operator metadata attached to an alert when it is acknowledged.
///
/// Carried forward across state merges as long as the alert identity
/// persists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Acknowledgement {
    /// Who acknowledged the alert.
    pub acked_by: String,
    /// Why.
    pub comment: String,
}

/// The operational state of an alert.
///
/// The labels are the identity: two alerts with identical label sets
/// are the same logical alert and are merged, never duplicated, in
/// the store. Everything else is mutable state evolved by the
/// lifecycle delegate and the background services.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    /// Identity labels, used for deduplication and sharding.
    pub labels: Labels,
    /// Non-identity metadata (links, descriptions).
    pub annotations: Labels,
    /// Current lifecycle status.
    pub status: AlertStatus,
    /// When the alert first started firing.
    pub started_at: DateTime<Utc>,
    /// When the alert should be marked timed out, absent further updates.
    pub timeout_deadline: DateTime<Utc>,
    /// When a notification was last sent for this alert.
    pub last_notified_at: Option<DateTime<Utc>>,
    /// The operator acknowledgement, if any.
    pub acknowledgement: Option<Acknowledgement>,
    /// Name of the cluster member that last claimed authority for this
    /// alert, as a debugging hint. Not used for any decision making.
    pub authority_hint: Option<String>,
}

impl Alert {
    /// How long after its start time an alert times out when the
    /// sender provided no explicit deadline.
    #[must_use]
    pub fn default_timeout() -> Duration {
        Duration::hours(12)
    }

    /// Creates a freshly ingested alert in [`AlertStatus::Processing`],
    /// with the default timeout deadline.
    #[must_use]
    pub fn new(labels: Labels) -> Self {
        let now = Utc::now();
        Self {
            labels,
            annotations: Labels::new(),
            status: AlertStatus::Processing,
            started_at: now,
            timeout_deadline: now + Self::default_timeout(),
            last_notified_at: None,
            acknowledgement: None,
            authority_hint: None,
        }
    }

    /// Sets the annotations.
    #[must_use]
    pub fn with_annotations(mut self, annotations: Labels) -> Self {
        self.annotations = annotations;
        self
    }

    /// Sets the status.
    #[must_use]
    pub const fn with_status(mut self, status: AlertStatus) -> Self {
        self.status = status;
        self
    }

    /// The alert's identity, rendered as a 16-hex-digit string.
    ///
    /// This is the ID used by acknowledgement and query-by-ID paths.
    #[must_use]
    pub fn id(&self) -> String {
        self.labels.fingerprint().to_string()
    }

    /// Returns true if the timeout deadline has passed.
    #[must_use]
    pub fn is_past_deadline(&self, now: DateTime<Utc>) -> bool {
        self.timeout_deadline < now
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_alert() -> Alert {
        Alert::new(Labels::from([("alertname", "foo")]))
    }

    mod status_tests {
        use super::*;

        #[test]
        fn status_as_str() {
            assert_eq!(AlertStatus::Processing.as_str(), "processing");
            assert_eq!(AlertStatus::Firing.as_str(), "firing");
            assert_eq!(AlertStatus::Acked.as_str(), "acked");
            assert_eq!(AlertStatus::Silenced.as_str(), "silenced");
            assert_eq!(AlertStatus::Resolved.as_str(), "resolved");
            assert_eq!(AlertStatus::TimedOut.as_str(), "timedout");
        }

        #[test]
        fn status_is_active() {
            assert!(AlertStatus::Processing.is_active());
            assert!(AlertStatus::Firing.is_active());
            assert!(AlertStatus::Acked.is_active());
            assert!(AlertStatus::Silenced.is_active());
            assert!(!AlertStatus::Resolved.is_active());
            assert!(!AlertStatus::TimedOut.is_active());
        }

        #[test]
        fn status_serde_roundtrip() {
            for status in [
                AlertStatus::Processing,
                AlertStatus::Firing,
                AlertStatus::Acked,
                AlertStatus::Silenced,
                AlertStatus::Resolved,
                AlertStatus::TimedOut,
            ] {
                let json = serde_json::to_string(&status).unwrap();
                let parsed: AlertStatus = serde_json::from_str(&json).unwrap();
                assert_eq!(parsed, status);
            }
        }
    }

    mod alert_tests {
        use super::*;

        #[test]
        fn new_alert_is_processing() {
            let alert = test_alert();
            assert_eq!(alert.status, AlertStatus::Processing);
            assert!(alert.last_notified_at.is_none());
            assert!(alert.acknowledgement.is_none());
        }

        #[test]
        fn new_alert_has_default_deadline() {
            let alert = test_alert();
            assert_eq!(
                alert.timeout_deadline - alert.started_at,
                Alert::default_timeout()
            );
        }

        #[test]
        fn id_matches_label_fingerprint() {
            let alert = test_alert();
            assert_eq!(alert.id(), alert.labels.fingerprint().to_string());
        }

        #[test]
        fn same_labels_same_id() {
            let a = Alert::new(Labels::from([("alertname", "foo"), ("env", "prod")]));
            let b = Alert::new(Labels::from([("env", "prod"), ("alertname", "foo")]));
            assert_eq!(a.id(), b.id());
        }

        #[test]
        fn past_deadline() {
            let mut alert = test_alert();
            alert.timeout_deadline = Utc::now() - Duration::minutes(1);
            assert!(alert.is_past_deadline(Utc::now()));

            alert.timeout_deadline = Utc::now() + Duration::minutes(1);
            assert!(!alert.is_past_deadline(Utc::now()));
        }

        #[test]
        fn serde_roundtrip() {
            let alert = test_alert()
                .with_annotations(Labels::from([("summary", "something is wrong")]))
                .with_status(AlertStatus::Firing);
            let json = serde_json::to_string(&alert).unwrap();
            let parsed: Alert = serde_json::from_str(&json).unwrap();
            assert_eq!(parsed, alert);
        }
    }
}
