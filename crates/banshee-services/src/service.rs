//! The service contract and the stop-the-world supervisor.

use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::error::{Result, ServiceError};

/// The shutdown signal handed to every service.
pub type ShutdownRx = broadcast::Receiver<()>;

/// A long-running background task of the node.
///
/// A service runs until the shutdown signal fires, performing any
/// final best-effort work (a last sweep, a buffer flush) before
/// returning.
pub trait Service: Send + Sync {
    /// The service's name, for logs and failure reports.
    fn name(&self) -> &str;

    /// Runs the service until shutdown.
    fn run(&self, shutdown: ShutdownRx) -> BoxFuture<'_, Result<()>>;
}

/// Supervises a set of services, stopping the world when any one of
/// them exits unexpectedly.
///
/// Every service is spawned on its own task. If one exits (with or
/// without an error) while the shutdown signal has not fired, the
/// supervisor fires it for everyone and reports the first failure. A
/// stalled or dead sweep silently leaking alerts in one state is the
/// failure mode this guards against.
pub struct ServiceSet {
    services: Vec<Arc<dyn Service>>,
    shutdown: broadcast::Sender<()>,
}

impl ServiceSet {
    /// Creates an empty set wired to the given shutdown signal.
    #[must_use]
    pub fn new(shutdown: broadcast::Sender<()>) -> Self {
        Self {
            services: Vec::new(),
            shutdown,
        }
    }

    /// Adds a service to supervise.
    pub fn register(&mut self, service: Arc<dyn Service>) {
        self.services.push(service);
    }

    /// Runs every service until shutdown or the first unexpected exit.
    pub async fn run(mut self) -> Result<()> {
        let mut tasks: JoinSet<(String, Result<()>)> = JoinSet::new();
        for service in self.services.drain(..) {
            let rx = self.shutdown.subscribe();
            tasks.spawn(async move {
                let name = service.name().to_string();
                let result = service.run(rx).await;
                (name, result)
            });
        }

        let mut signal = self.shutdown.subscribe();
        let mut outcome = Ok(());
        let mut stopping = false;

        while let Some(joined) = tasks.join_next().await {
            // The signal may have fired between spawns and this join;
            // an exit after it is a normal shutdown.
            let shutting_down = !matches!(
                signal.try_recv(),
                Err(broadcast::error::TryRecvError::Empty)
            );

            let (name, result) = match joined {
                Ok(pair) => pair,
                Err(join_error) => {
                    error!(%join_error, "a service task aborted");
                    ("service task".to_string(), Ok(()))
                }
            };

            match result {
                Ok(()) if shutting_down => debug!(service = %name, "service stopped"),
                result => {
                    if let Err(error) = &result {
                        error!(service = %name, %error, "service failed");
                    } else {
                        warn!(service = %name, "service exited unexpectedly");
                    }
                    if outcome.is_ok() {
                        outcome = result.and(Err(ServiceError::Stopped {
                            service: name.clone(),
                        }));
                    }
                    if !stopping {
                        stopping = true;
                        let _ = self.shutdown.send(());
                    }
                }
            }
        }

        info!("background services shut down");
        outcome
    }
}
