//! Prost message definitions for the replicated log.
//!
//! Every mutation that replicates between nodes travels as one
//! [`LogEntry`]: a discriminated union of alert batches, silence
//! batches, and acknowledgements, tagged with the node that proposed
//! it. Frames on the wire are length-delimited.

use std::collections::BTreeMap;

use prost::Message;

use crate::error::Result;

/// Alert status values on the wire. Closed enum: unknown values are a
/// decode error, never coerced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, prost::Enumeration)]
#[repr(i32)]
pub enum WireAlertStatus {
    /// Newly ingested.
    Processing = 0,
    /// Actively firing.
    Firing = 1,
    /// Acknowledged by an operator.
    Acked = 2,
    /// Suppressed by a silence.
    Silenced = 3,
    /// Resolved by the sender.
    Resolved = 4,
    /// Timed out waiting for a resolve.
    TimedOut = 5,
}

/// An alert as it travels in the log.
///
/// Timestamps are milliseconds since the Unix epoch; a zero
/// `timeout_deadline_ms` means "no explicit deadline" and decodes to
/// the default timeout past the start time. A zero
/// `last_notified_at_ms` means never notified.
#[derive(Clone, PartialEq, Message)]
pub struct WireAlert {
    /// Identity labels.
    #[prost(btree_map = "string, string", tag = "1")]
    pub labels: BTreeMap<String, String>,
    /// Non-identity annotations.
    #[prost(btree_map = "string, string", tag = "2")]
    pub annotations: BTreeMap<String, String>,
    /// Lifecycle status, as a [`WireAlertStatus`] value.
    #[prost(enumeration = "WireAlertStatus", tag = "3")]
    pub status: i32,
    /// When the alert started firing.
    #[prost(int64, tag = "4")]
    pub started_at_ms: i64,
    /// Timeout deadline; 0 means unset.
    #[prost(int64, tag = "5")]
    pub timeout_deadline_ms: i64,
    /// Last notification time; 0 means never.
    #[prost(int64, tag = "6")]
    pub last_notified_at_ms: i64,
    /// Operator acknowledgement, if any.
    #[prost(message, optional, tag = "7")]
    pub acknowledgement: Option<WireAck>,
    /// Debugging hint: the member that last claimed authority.
    /// Empty means unset.
    #[prost(string, tag = "8")]
    pub authority_hint: String,
}

/// An acknowledgement on the wire.
#[derive(Clone, PartialEq, Message)]
pub struct WireAck {
    /// Who acknowledged.
    #[prost(string, tag = "1")]
    pub acked_by: String,
    /// Why.
    #[prost(string, tag = "2")]
    pub comment: String,
}

/// A matcher on the wire.
#[derive(Clone, PartialEq, Message)]
pub struct WireMatcher {
    /// Label name.
    #[prost(string, tag = "1")]
    pub label: String,
    /// Literal value or regex pattern.
    #[prost(string, tag = "2")]
    pub value: String,
    /// Interpret the value as a regex.
    #[prost(bool, tag = "3")]
    pub is_regex: bool,
    /// Invert the comparison.
    #[prost(bool, tag = "4")]
    pub is_negative: bool,
}

/// A silence on the wire. A zero `ends_at_ms` means open-ended.
#[derive(Clone, PartialEq, Message)]
pub struct WireSilence {
    /// Silence ID.
    #[prost(string, tag = "1")]
    pub id: String,
    /// Creator.
    #[prost(string, tag = "2")]
    pub created_by: String,
    /// Comment.
    #[prost(string, tag = "3")]
    pub comment: String,
    /// Window start.
    #[prost(int64, tag = "4")]
    pub starts_at_ms: i64,
    /// Window end; 0 means open-ended.
    #[prost(int64, tag = "5")]
    pub ends_at_ms: i64,
    /// Label predicates.
    #[prost(message, repeated, tag = "6")]
    pub matchers: Vec<WireMatcher>,
}

/// A batch of alerts to merge.
#[derive(Clone, PartialEq, Message)]
pub struct PostAlerts {
    /// The alerts.
    #[prost(message, repeated, tag = "1")]
    pub alerts: Vec<WireAlert>,
}

/// A batch of silences to store.
#[derive(Clone, PartialEq, Message)]
pub struct PostSilences {
    /// The silences.
    #[prost(message, repeated, tag = "1")]
    pub silences: Vec<WireSilence>,
}

/// An acknowledgement for one alert.
#[derive(Clone, PartialEq, Message)]
pub struct PostAck {
    /// The target alert's ID (its rendered fingerprint).
    #[prost(string, tag = "1")]
    pub alert_id: String,
    /// The acknowledgement.
    #[prost(message, optional, tag = "2")]
    pub ack: Option<WireAck>,
}

/// The payload union of a log entry.
#[derive(Clone, PartialEq, prost::Oneof)]
pub enum Payload {
    /// Alert observations.
    #[prost(message, tag = "2")]
    PostAlerts(PostAlerts),
    /// Silences.
    #[prost(message, tag = "3")]
    PostSilences(PostSilences),
    /// An acknowledgement.
    #[prost(message, tag = "4")]
    PostAck(PostAck),
}

/// One replicated mutation.
#[derive(Clone, PartialEq, Message)]
pub struct LogEntry {
    /// Name of the node that proposed this entry.
    #[prost(string, tag = "1")]
    pub origin_node: String,
    /// The mutation itself.
    #[prost(oneof = "Payload", tags = "2, 3, 4")]
    pub payload: Option<Payload>,
}

impl LogEntry {
    /// Creates an entry carrying alerts.
    #[must_use]
    pub fn post_alerts(origin_node: impl Into<String>, alerts: Vec<WireAlert>) -> Self {
        Self {
            origin_node: origin_node.into(),
            payload: Some(Payload::PostAlerts(PostAlerts { alerts })),
        }
    }

    /// Creates an entry carrying silences.
    #[must_use]
    pub fn post_silences(origin_node: impl Into<String>, silences: Vec<WireSilence>) -> Self {
        Self {
            origin_node: origin_node.into(),
            payload: Some(Payload::PostSilences(PostSilences { silences })),
        }
    }

    /// Creates an entry carrying an acknowledgement.
    #[must_use]
    pub fn post_ack(origin_node: impl Into<String>, alert_id: impl Into<String>, ack: WireAck) -> Self {
        Self {
            origin_node: origin_node.into(),
            payload: Some(Payload::PostAck(PostAck {
                alert_id: alert_id.into(),
                ack: Some(ack),
            })),
        }
    }

    /// Encodes the entry as one length-delimited frame.
    #[must_use]
    pub fn encode_frame(&self) -> Vec<u8> {
        self.encode_length_delimited_to_vec()
    }

    /// Decodes one length-delimited frame.
    pub fn decode_frame(buf: &[u8]) -> Result<Self> {
        Ok(Self::decode_length_delimited(buf)?)
    }
}
