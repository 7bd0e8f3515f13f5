//! Membership polling and change notification.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::error::Result;
use crate::member::Member;

/// Receives membership changes from a [`StateObserver`].
pub trait ClusterObserver: Send + Sync {
    /// A member joined the roster.
    fn server_added(&self, member: &Member);

    /// A member left the roster.
    fn server_removed(&self, member: &Member);
}

/// A poll-only view of the cluster roster. The replication layer
/// implements this over its configuration; no push interface exists,
/// so the [`StateObserver`] diffs successive polls instead.
pub trait MembershipSource: Send + Sync {
    /// The current roster.
    fn members(&self) -> BoxFuture<'_, Result<Vec<Member>>>;
}

/// Opaque registration token for deregistering an observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u32);

/// Polls a [`MembershipSource`] and fans deltas out to observers.
///
/// Only changes propagate: a member present in consecutive polls is
/// never replayed to observers. Poll failures are logged and the
/// previous roster is kept until the next tick.
pub struct StateObserver {
    source: Arc<dyn MembershipSource>,
    poll_interval: Duration,
    previous: Mutex<HashMap<String, Member>>,
    observers: Mutex<HashMap<ObserverId, Arc<dyn ClusterObserver>>>,
}

impl StateObserver {
    /// Default roster poll cadence.
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

    /// Creates an observer over the given source with the default
    /// poll interval.
    #[must_use]
    pub fn new(source: Arc<dyn MembershipSource>) -> Self {
        Self {
            source,
            poll_interval: Self::DEFAULT_POLL_INTERVAL,
            previous: Mutex::new(HashMap::new()),
            observers: Mutex::new(HashMap::new()),
        }
    }

    /// Sets the poll interval.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Registers an observer. The returned token deregisters it.
    pub fn add_observer(&self, observer: Arc<dyn ClusterObserver>) -> ObserverId {
        let id = ObserverId(rand::random());
        self.observers.lock().insert(id, observer);
        id
    }

    /// Deregisters an observer. Unknown tokens are ignored.
    pub fn remove_observer(&self, id: ObserverId) {
        self.observers.lock().remove(&id);
    }

    /// Polls the source once and notifies observers of the delta.
    pub async fn observe(&self) {
        let members = match self.source.members().await {
            Ok(members) => members,
            Err(error) => {
                warn!(%error, "failed to poll cluster membership");
                return;
            }
        };

        let current: HashMap<String, Member> = members
            .into_iter()
            .map(|m| (m.name.clone(), m))
            .collect();

        let (added, removed) = {
            let mut previous = self.previous.lock();

            let removed: Vec<Member> = previous
                .values()
                .filter(|m| !current.contains_key(&m.name))
                .cloned()
                .collect();
            let added: Vec<Member> = current
                .values()
                .filter(|m| !previous.contains_key(&m.name))
                .cloned()
                .collect();

            *previous = current;
            (added, removed)
        };

        if added.is_empty() && removed.is_empty() {
            return;
        }

        debug!(
            added = added.len(),
            removed = removed.len(),
            "cluster membership changed"
        );

        let observers: Vec<Arc<dyn ClusterObserver>> =
            self.observers.lock().values().cloned().collect();
        for observer in &observers {
            for member in &removed {
                observer.server_removed(member);
            }
            for member in &added {
                observer.server_added(member);
            }
        }
    }

    /// Polls on the configured interval until shutdown.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.observe().await,
                _ = shutdown.recv() => return,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::RwLock;

    struct FakeSource {
        roster: RwLock<Vec<Member>>,
        fail: RwLock<bool>,
    }

    impl FakeSource {
        fn new(names: &[&str]) -> Self {
            Self {
                roster: RwLock::new(
                    names
                        .iter()
                        .map(|n| Member::new(*n, "127.0.0.1:4000"))
                        .collect(),
                ),
                fail: RwLock::new(false),
            }
        }

        fn set_roster(&self, names: &[&str]) {
            *self.roster.write() = names
                .iter()
                .map(|n| Member::new(*n, "127.0.0.1:4000"))
                .collect();
        }
    }

    impl MembershipSource for FakeSource {
        fn members(&self) -> BoxFuture<'_, Result<Vec<Member>>> {
            Box::pin(async {
                if *self.fail.read() {
                    Err(crate::error::ClusterError::Membership {
                        reason: "backend down".to_string(),
                    })
                } else {
                    Ok(self.roster.read().clone())
                }
            })
        }
    }

    #[derive(Default)]
    struct RecordingObserver {
        added: Mutex<Vec<String>>,
        removed: Mutex<Vec<String>>,
    }

    impl ClusterObserver for RecordingObserver {
        fn server_added(&self, member: &Member) {
            self.added.lock().push(member.name.clone());
        }

        fn server_removed(&self, member: &Member) {
            self.removed.lock().push(member.name.clone());
        }
    }

    #[tokio::test]
    async fn first_poll_reports_everyone_as_added() {
        let source = Arc::new(FakeSource::new(&["node-0", "node-1"]));
        let observer = StateObserver::new(source);
        let recorder = Arc::new(RecordingObserver::default());
        observer.add_observer(recorder.clone());

        observer.observe().await;

        let mut added = recorder.added.lock().clone();
        added.sort();
        assert_eq!(added, vec!["node-0", "node-1"]);
        assert!(recorder.removed.lock().is_empty());
    }

    #[tokio::test]
    async fn unchanged_roster_is_not_replayed() {
        let source = Arc::new(FakeSource::new(&["node-0"]));
        let observer = StateObserver::new(source);
        let recorder = Arc::new(RecordingObserver::default());
        observer.add_observer(recorder.clone());

        observer.observe().await;
        observer.observe().await;
        observer.observe().await;

        assert_eq!(recorder.added.lock().len(), 1);
    }

    #[tokio::test]
    async fn only_the_delta_propagates() {
        let source = Arc::new(FakeSource::new(&["node-0", "node-1"]));
        let observer = StateObserver::new(source.clone());
        let recorder = Arc::new(RecordingObserver::default());
        observer.add_observer(recorder.clone());

        observer.observe().await;
        recorder.added.lock().clear();

        source.set_roster(&["node-0", "node-2"]);
        observer.observe().await;

        assert_eq!(recorder.added.lock().clone(), vec!["node-2"]);
        assert_eq!(recorder.removed.lock().clone(), vec!["node-1"]);
    }

    #[tokio::test]
    async fn poll_failure_keeps_previous_roster() {
        let source = Arc::new(FakeSource::new(&["node-0"]));
        let observer = StateObserver::new(source.clone());
        let recorder = Arc::new(RecordingObserver::default());
        observer.add_observer(recorder.clone());

        observer.observe().await;

        // A failed poll must not look like everyone left.
        *source.fail.write() = true;
        observer.observe().await;
        assert!(recorder.removed.lock().is_empty());

        *source.fail.write() = false;
        observer.observe().await;
        assert_eq!(recorder.added.lock().len(), 1);
    }

    #[tokio::test]
    async fn removed_observers_stop_receiving() {
        let source = Arc::new(FakeSource::new(&["node-0"]));
        let observer = StateObserver::new(source.clone());
        let recorder = Arc::new(RecordingObserver::default());
        let id = observer.add_observer(recorder.clone());

        observer.remove_observer(id);

        observer.observe().await;
        assert!(recorder.added.lock().is_empty());
    }
}
