//! Background services that drive Banshee alert state forward.
//!
//! Two sweeps run on every node: the [`TimeoutService`] times out
//! firing alerts past their deadline, and the [`NotifyService`]
//! delivers notifications for alerts this node is authoritative for.
//! Both re-broadcast the transitions they make through the replicated
//! log. The [`ServiceSet`] supervises them with stop-the-world
//! semantics: one dead sweep stops the node.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod notifier;
pub mod notify;
pub mod service;
pub mod timeout;

pub use error::{Result, ServiceError};
pub use notifier::{LogNotifier, Notifier, NotifierEntry, NotifierRegistry, NotifierSettings};
pub use notify::NotifyService;
pub use service::{Service, ServiceSet, ShutdownRx};
pub use timeout::TimeoutService;
