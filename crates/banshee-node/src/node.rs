//! Composing one full Banshee node.

use std::sync::Arc;

use banshee_cluster::{Broadcaster, Member, RingClusterer, StateObserver};
use banshee_model::{Acknowledgement, Alert, Silence};
use banshee_pipeline::{BufferedStore, StoreEventDelegate};
use banshee_replication::core::RaftConfig;
use banshee_replication::{AlertStateMachine, RaftBroadcaster, RaftHandle, RpcServer, TcpTransport};
use banshee_services::{
    LogNotifier, NotifierRegistry, NotifierSettings, NotifyService, Service, ServiceError,
    ServiceSet, ShutdownRx, TimeoutService,
};
use banshee_store::MemoryStore;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::NodeConfig;
use crate::error::Result;

/// One Banshee node, built from a [`NodeConfig`].
///
/// The wiring, bottom up: a [`MemoryStore`] wrapped by a
/// [`BufferedStore`], fed by the [`StoreEventDelegate`] inside the
/// [`AlertStateMachine`]; the replication driver applying the log to
/// that machine; a [`RingClusterer`] kept current by a
/// [`StateObserver`] polling the replication roster; and the notify
/// and timeout sweeps on top, all under one stop-the-world
/// [`ServiceSet`].
pub struct Node {
    config: NodeConfig,
    shutdown: broadcast::Sender<()>,
}

impl Node {
    /// Creates a node from a validated config.
    pub fn new(config: NodeConfig) -> Result<Self> {
        config.validate()?;
        let (shutdown, _) = broadcast::channel(1);
        Ok(Self { config, shutdown })
    }

    /// A handle that shuts the node down when signalled.
    #[must_use]
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown.clone()
    }

    /// Builds and starts every component, returning a running node.
    pub fn start(&self) -> Result<NodeRuntime> {
        let config = &self.config;
        info!(name = %config.name, address = %config.listen_address, "starting node");

        let store = Arc::new(MemoryStore::new());
        let buffer = Arc::new(BufferedStore::new(
            store.clone(),
            config.buffer_max_len,
            config.buffer_flush_interval(),
        ));
        let delegate = Arc::new(StoreEventDelegate::new(store.clone(), buffer.clone()));
        let machine = Arc::new(AlertStateMachine::new(
            delegate,
            store.clone(),
            buffer.clone(),
        ));

        let raft_config = RaftConfig {
            id: config.name.clone(),
            address: config.listen_address.clone(),
            peers: config.seed_peers.clone(),
            election_timeout_min: std::time::Duration::from_millis(config.election_timeout_min_ms),
            election_timeout_max: std::time::Duration::from_millis(config.election_timeout_max_ms),
            heartbeat_interval: std::time::Duration::from_millis(config.heartbeat_interval_ms),
            snapshot_threshold: config.snapshot_threshold,
            proposal_queue_capacity: config.proposal_queue_capacity,
        };
        let (raft, driver) = banshee_replication::spawn(
            raft_config,
            machine,
            Arc::new(TcpTransport::new()),
            &self.shutdown,
        );

        let broadcaster: Arc<dyn Broadcaster> =
            Arc::new(RaftBroadcaster::new(raft.clone(), &config.name));

        let clusterer = Arc::new(RingClusterer::new(Member::new(
            &config.name,
            &config.listen_address,
        )));
        clusterer.set_shard_labels(config.shard_labels.clone());

        let observer = Arc::new(
            StateObserver::new(Arc::new(raft.clone()))
                .with_poll_interval(config.observer_poll_interval()),
        );
        observer.add_observer(clusterer.clone());

        let mut registry = NotifierRegistry::new();
        registry.register(
            Arc::new(LogNotifier),
            NotifierSettings {
                renotify_interval: config.renotify_interval(),
                ..NotifierSettings::default()
            },
        );

        let mut services = ServiceSet::new(self.shutdown.clone());
        services.register(Arc::new(ReplicationServer {
            server: RpcServer::new(raft.clone(), config.listen_address.clone()),
        }));
        services.register(Arc::new(DriverWatch {
            driver: Mutex::new(Some(driver)),
        }));
        services.register(Arc::new(BufferFlusher {
            buffer: buffer.clone(),
        }));
        services.register(Arc::new(MembershipPoller {
            observer: observer.clone(),
        }));
        services.register(Arc::new(
            TimeoutService::new(store.clone(), broadcaster.clone())
                .with_tick(config.timeout_tick()),
        ));
        services.register(Arc::new(
            NotifyService::new(
                store.clone(),
                broadcaster.clone(),
                clusterer.clone(),
                Arc::new(registry),
            )
            .with_tick(config.notify_tick()),
        ));

        let supervisor = tokio::spawn(services.run());

        Ok(NodeRuntime {
            raft,
            broadcaster,
            store,
            buffer,
            clusterer,
            supervisor,
        })
    }

    /// Runs the node until shutdown or stop-the-world.
    pub async fn run(&self) -> Result<()> {
        self.start()?.join().await
    }
}

/// A running node's components.
pub struct NodeRuntime {
    raft: RaftHandle,
    broadcaster: Arc<dyn Broadcaster>,
    store: Arc<MemoryStore>,
    buffer: Arc<BufferedStore>,
    clusterer: Arc<RingClusterer>,
    supervisor: JoinHandle<banshee_services::Result<()>>,
}

impl NodeRuntime {
    /// Ingests alert observations into the replicated log.
    pub async fn ingest_alerts(&self, alerts: &[Alert]) -> Result<()> {
        Ok(self.broadcaster.broadcast_alerts(alerts).await?)
    }

    /// Ingests silences into the replicated log.
    pub async fn ingest_silences(&self, silences: &[Silence]) -> Result<()> {
        Ok(self.broadcaster.broadcast_silences(silences).await?)
    }

    /// Acknowledges the alert with the given ID.
    pub async fn acknowledge(&self, alert_id: &str, ack: Acknowledgement) -> Result<()> {
        Ok(self
            .broadcaster
            .broadcast_acknowledgement(alert_id, ack)
            .await?)
    }

    /// The replication handle.
    #[must_use]
    pub fn raft(&self) -> &RaftHandle {
        &self.raft
    }

    /// The node-local store.
    #[must_use]
    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    /// The write buffer over the store.
    #[must_use]
    pub fn buffer(&self) -> &Arc<BufferedStore> {
        &self.buffer
    }

    /// The hash ring.
    #[must_use]
    pub fn clusterer(&self) -> &Arc<RingClusterer> {
        &self.clusterer
    }

    /// Waits until the node stops, surfacing whatever stopped it.
    pub async fn join(self) -> Result<()> {
        match self.supervisor.await {
            Ok(outcome) => Ok(outcome?),
            Err(join_error) => Err(ServiceError::Failed {
                service: "supervisor".to_string(),
                reason: join_error.to_string(),
            }
            .into()),
        }
    }
}

// Adapters putting the non-Service background loops under the same
// stop-the-world supervision as the sweeps.

struct ReplicationServer {
    server: RpcServer,
}

impl Service for ReplicationServer {
    fn name(&self) -> &str {
        "replication-server"
    }

    fn run(&self, shutdown: ShutdownRx) -> BoxFuture<'_, banshee_services::Result<()>> {
        Box::pin(async move {
            self.server
                .run(shutdown)
                .await
                .map_err(|error| ServiceError::Failed {
                    service: "replication-server".to_string(),
                    reason: error.to_string(),
                })
        })
    }
}

struct DriverWatch {
    driver: Mutex<Option<JoinHandle<banshee_replication::Result<()>>>>,
}

impl Service for DriverWatch {
    fn name(&self) -> &str {
        "replication-driver"
    }

    fn run(&self, _shutdown: ShutdownRx) -> BoxFuture<'_, banshee_services::Result<()>> {
        let driver = self.driver.lock().take();
        Box::pin(async move {
            let Some(driver) = driver else {
                return Err(ServiceError::Failed {
                    service: "replication-driver".to_string(),
                    reason: "driver watched twice".to_string(),
                });
            };
            // The driver observes the shutdown signal itself; a fatal
            // apply error lands here and stops the world.
            match driver.await {
                Ok(outcome) => outcome.map_err(|error| ServiceError::Failed {
                    service: "replication-driver".to_string(),
                    reason: error.to_string(),
                }),
                Err(join_error) => Err(ServiceError::Failed {
                    service: "replication-driver".to_string(),
                    reason: join_error.to_string(),
                }),
            }
        })
    }
}

struct BufferFlusher {
    buffer: Arc<BufferedStore>,
}

impl Service for BufferFlusher {
    fn name(&self) -> &str {
        "buffer-flush"
    }

    fn run(&self, shutdown: ShutdownRx) -> BoxFuture<'_, banshee_services::Result<()>> {
        Box::pin(async move {
            self.buffer
                .run(shutdown)
                .await
                .map_err(|error| ServiceError::Failed {
                    service: "buffer-flush".to_string(),
                    reason: error.to_string(),
                })
        })
    }
}

struct MembershipPoller {
    observer: Arc<StateObserver>,
}

impl Service for MembershipPoller {
    fn name(&self) -> &str {
        "membership-observer"
    }

    fn run(&self, shutdown: ShutdownRx) -> BoxFuture<'_, banshee_services::Result<()>> {
        Box::pin(async move {
            self.observer.run(shutdown).await;
            Ok(())
        })
    }
}
