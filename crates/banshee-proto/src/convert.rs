//! Conversions between wire types and the in-memory model.
//!
//! Decoding is strict: unknown status values and unrepresentable
//! timestamps are errors, because a frame that decodes differently on
//! different nodes would silently fork replicated state.

use banshee_model::{Acknowledgement, Alert, AlertStatus, Labels, Matcher, Silence};
use chrono::{DateTime, Utc};

use crate::error::{ProtoError, Result};
use crate::wire::{WireAck, WireAlert, WireAlertStatus, WireMatcher, WireSilence};

fn millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn datetime(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).ok_or(ProtoError::BadTimestamp { millis: ms })
}

fn wire_labels(labels: &Labels) -> std::collections::BTreeMap<String, String> {
    labels
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

impl From<AlertStatus> for WireAlertStatus {
    fn from(status: AlertStatus) -> Self {
        match status {
            AlertStatus::Processing => Self::Processing,
            AlertStatus::Firing => Self::Firing,
            AlertStatus::Acked => Self::Acked,
            AlertStatus::Silenced => Self::Silenced,
            AlertStatus::Resolved => Self::Resolved,
            AlertStatus::TimedOut => Self::TimedOut,
        }
    }
}

impl From<WireAlertStatus> for AlertStatus {
    fn from(status: WireAlertStatus) -> Self {
        match status {
            WireAlertStatus::Processing => Self::Processing,
            WireAlertStatus::Firing => Self::Firing,
            WireAlertStatus::Acked => Self::Acked,
            WireAlertStatus::Silenced => Self::Silenced,
            WireAlertStatus::Resolved => Self::Resolved,
            WireAlertStatus::TimedOut => Self::TimedOut,
        }
    }
}

impl From<&Acknowledgement> for WireAck {
    fn from(ack: &Acknowledgement) -> Self {
        Self {
            acked_by: ack.acked_by.clone(),
            comment: ack.comment.clone(),
        }
    }
}

impl From<WireAck> for Acknowledgement {
    fn from(ack: WireAck) -> Self {
        Self {
            acked_by: ack.acked_by,
            comment: ack.comment,
        }
    }
}

impl WireAlert {
    /// Encodes a model alert for the log.
    #[must_use]
    pub fn from_model(alert: &Alert) -> Self {
        Self {
            labels: wire_labels(&alert.labels),
            annotations: wire_labels(&alert.annotations),
            status: WireAlertStatus::from(alert.status) as i32,
            started_at_ms: millis(alert.started_at),
            timeout_deadline_ms: millis(alert.timeout_deadline),
            last_notified_at_ms: alert.last_notified_at.map_or(0, millis),
            acknowledgement: alert.acknowledgement.as_ref().map(WireAck::from),
            authority_hint: alert.authority_hint.clone().unwrap_or_default(),
        }
    }

    /// Decodes into a model alert.
    ///
    /// A zero deadline decodes to the default timeout past the start
    /// time, so senders never have to compute one.
    pub fn into_model(self) -> Result<Alert> {
        let status = WireAlertStatus::try_from(self.status)
            .map_err(|_| ProtoError::UnknownStatus { value: self.status })?;

        let started_at = datetime(self.started_at_ms)?;
        let timeout_deadline = if self.timeout_deadline_ms == 0 {
            started_at + Alert::default_timeout()
        } else {
            datetime(self.timeout_deadline_ms)?
        };
        let last_notified_at = if self.last_notified_at_ms == 0 {
            None
        } else {
            Some(datetime(self.last_notified_at_ms)?)
        };

        Ok(Alert {
            labels: self.labels.into_iter().collect(),
            annotations: self.annotations.into_iter().collect(),
            status: status.into(),
            started_at,
            timeout_deadline,
            last_notified_at,
            acknowledgement: self.acknowledgement.map(Acknowledgement::from),
            authority_hint: (!self.authority_hint.is_empty()).then_some(self.authority_hint),
        })
    }
}

impl WireMatcher {
    /// Encodes a model matcher.
    #[must_use]
    pub fn from_model(matcher: &Matcher) -> Self {
        Self {
            label: matcher.label.clone(),
            value: matcher.value.clone(),
            is_regex: matcher.is_regex,
            is_negative: matcher.is_negative,
        }
    }

    /// Decodes into a model matcher. Patterns are not recompiled
    /// here; an uncompilable regex surfaces when the silence is
    /// validated or matched.
    #[must_use]
    pub fn into_model(self) -> Matcher {
        let mut matcher = Matcher::equal(self.label, self.value);
        matcher.is_regex = self.is_regex;
        matcher.is_negative = self.is_negative;
        matcher
    }
}

impl WireSilence {
    /// Encodes a model silence.
    #[must_use]
    pub fn from_model(silence: &Silence) -> Self {
        Self {
            id: silence.id.clone(),
            created_by: silence.created_by.clone(),
            comment: silence.comment.clone(),
            starts_at_ms: millis(silence.starts_at),
            ends_at_ms: silence.ends_at.map_or(0, millis),
            matchers: silence.matchers.iter().map(WireMatcher::from_model).collect(),
        }
    }

    /// Decodes into a model silence. A zero end time means open-ended.
    pub fn into_model(self) -> Result<Silence> {
        let ends_at = if self.ends_at_ms == 0 {
            None
        } else {
            Some(datetime(self.ends_at_ms)?)
        };

        Ok(Silence {
            id: self.id,
            created_by: self.created_by,
            comment: self.comment,
            starts_at: datetime(self.starts_at_ms)?,
            ends_at,
            matchers: self.matchers.into_iter().map(WireMatcher::into_model).collect(),
        })
    }
}
