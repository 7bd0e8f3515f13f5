//! Core value types for the Banshee alert-management cluster.
//!
//! This crate provides the data model shared by every other Banshee
//! crate:
//!
//! - [`Labels`]: an order-independent label set with a stable identity
//!   fingerprint — the deduplication key for alerts
//! - [`Alert`]: the operational state of an alert as it moves through
//!   its lifecycle ([`AlertStatus`])
//! - [`Silence`] and [`Matcher`]: suppression rules that match alerts
//!   by label
//! - [`Acknowledgement`]: operator metadata attached to an alert
//!
//! Two alerts with identical label sets are the *same* logical alert;
//! everything downstream (storage, replication, sharding) keys off
//! [`Labels::fingerprint`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod alert;
pub mod error;
pub mod labels;
pub mod matcher;
pub mod silence;

pub use alert::{Acknowledgement, Alert, AlertStatus};
pub use error::{ModelError, Result};
pub use labels::{LabelFingerprint, Labels};
pub use matcher::Matcher;
pub use silence::Silence;
