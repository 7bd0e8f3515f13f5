//! Notifier contracts and the registration table.

use std::sync::Arc;
use std::time::Duration;

use banshee_model::Alert;
use futures::future::BoxFuture;
use tracing::info;

use crate::error::Result;

/// Something that can deliver a notification about alerts.
pub trait Notifier: Send + Sync {
    /// The notifier's name, for failure reports.
    fn name(&self) -> &str;

    /// Delivers a notification for the given alerts.
    fn notify<'a>(&'a self, alerts: &'a [Alert]) -> BoxFuture<'a, Result<()>>;
}

/// Per-notifier delivery tuning.
#[derive(Debug, Clone)]
pub struct NotifierSettings {
    /// How long to hold alerts so related ones batch into one
    /// notification. Zero delivers immediately.
    pub group_wait: Duration,
    /// The labels whose values key a pending group.
    pub group_labels: Vec<String>,
    /// How long after a notification a still-firing alert notifies
    /// again.
    pub renotify_interval: Duration,
}

impl Default for NotifierSettings {
    fn default() -> Self {
        Self {
            group_wait: Duration::ZERO,
            group_labels: Vec::new(),
            renotify_interval: Duration::from_secs(3 * 60 * 60),
        }
    }
}

/// One registered notifier with its settings.
pub struct NotifierEntry {
    /// The notifier.
    pub notifier: Arc<dyn Notifier>,
    /// Its delivery tuning.
    pub settings: NotifierSettings,
}

/// The set of notifiers a node delivers through.
///
/// Built explicitly at startup and passed by reference to the notify
/// service; there is no global registry to mutate at runtime.
#[derive(Default)]
pub struct NotifierRegistry {
    entries: Vec<NotifierEntry>,
}

impl NotifierRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a notifier with its settings.
    pub fn register(&mut self, notifier: Arc<dyn Notifier>, settings: NotifierSettings) {
        self.entries.push(NotifierEntry { notifier, settings });
    }

    /// The registered entries.
    #[must_use]
    pub fn entries(&self) -> &[NotifierEntry] {
        &self.entries
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A notifier that writes notifications to the log. The default when
/// nothing else is configured; also the visible side effect the
/// end-to-end tests assert on.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    fn notify<'a>(&'a self, alerts: &'a [Alert]) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            for alert in alerts {
                info!(
                    alert_id = %alert.id(),
                    labels = ?alert.labels,
                    status = %alert.status,
                    "alert notification"
                );
            }
            Ok(())
        })
    }
}
