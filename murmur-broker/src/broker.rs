//! Core broker implementation.
//!
//! [`Broker`] owns one node's state: identity, clock, subscription registry,
//! peer transport and cluster coordinator. [`Broker::start`] binds the
//! listener and spawns the background tasks; the returned [`BrokerHandle`]
//! observes the running broker and shuts it down.

use crate::config::BrokerConfig;
use crate::error::{Error, Result};
use crate::network::{ConnectionManager, Listener};
use crate::processor::CommandProcessor;
use crate::registry::SubscriptionRegistry;
use murmur_cluster::{ClusterNode, ElectionState, SubscriptionDirectory, TcpTransport, Transport};
use murmur_core::{BrokerIdentity, LamportClock};
use parking_lot::Mutex;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Main broker instance.
#[derive(Debug)]
pub struct Broker {
    config: BrokerConfig,
    identity: BrokerIdentity,
    clock: Arc<LamportClock>,
    registry: Arc<SubscriptionRegistry>,
    transport: Arc<TcpTransport>,
    cluster: Arc<ClusterNode>,
    processor: Arc<CommandProcessor>,
    manager: Arc<ConnectionManager>,
}

impl Broker {
    /// Create a broker with the given configuration.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid.
    pub fn new(config: BrokerConfig) -> Result<Self> {
        config.validate_config()?;
        let identity = config.identity();
        let clock = Arc::new(LamportClock::new());
        let registry = Arc::new(SubscriptionRegistry::new());
        let transport = Arc::new(TcpTransport::from_config(&config.cluster));
        let cluster = ClusterNode::new(
            identity.clone(),
            config.cluster.clone(),
            Arc::clone(&clock),
            Arc::clone(&transport) as Arc<dyn Transport>,
            Arc::clone(&registry) as Arc<dyn SubscriptionDirectory>,
        );
        let processor =
            Arc::new(CommandProcessor::new(Arc::clone(&clock), Arc::clone(&registry), Arc::clone(&cluster)));
        let manager = Arc::new(ConnectionManager::new(config.network.max_connections));

        Ok(Self { config, identity, clock, registry, transport, cluster, processor, manager })
    }

    /// This broker's identity
    #[must_use]
    pub const fn identity(&self) -> &BrokerIdentity {
        &self.identity
    }

    /// Bind the configured address and start.
    ///
    /// # Errors
    /// Returns an error if the address cannot be bound.
    pub async fn start(self) -> Result<BrokerHandle> {
        let address = self.config.listen_address();
        let listener = TcpListener::bind(&address).await.map_err(|source| Error::Bind { address, source })?;
        self.start_with_listener(listener).await
    }

    /// Start on an already bound listener.
    ///
    /// Spawns the accept loop, the election control loop, the failure
    /// detector, the gossip/heartbeat loop and the startup task that
    /// connects to peers and runs the first election.
    ///
    /// # Errors
    /// Returns an error if the listener's address cannot be read.
    pub async fn start_with_listener(self, listener: TcpListener) -> Result<BrokerHandle> {
        let local_addr = listener.local_addr()?;
        let (shutdown_tx, _) = broadcast::channel(16);

        let accept = Listener::new(
            listener,
            self.config.network.clone(),
            self.config.cluster.write_timeout(),
            Arc::clone(&self.manager),
            Arc::clone(&self.processor),
            shutdown_tx.clone(),
        );
        let tasks = vec![
            tokio::spawn(accept.run()),
            self.cluster.spawn_control_loop(shutdown_tx.subscribe())?,
            self.cluster.spawn_failure_detector(shutdown_tx.subscribe()),
            self.spawn_cluster_setup(shutdown_tx.subscribe()),
            self.spawn_gossip_loop(shutdown_tx.subscribe()),
        ];

        info!(identity = %self.identity, %local_addr, peers = self.config.peers().len(), "broker started");
        Ok(BrokerHandle { broker: Arc::new(self), local_addr, shutdown_tx, tasks: Mutex::new(tasks) })
    }

    /// Connect to every peer with bounded retry, then hold the first election.
    fn spawn_cluster_setup(&self, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        let transport = Arc::clone(&self.transport);
        let cluster = Arc::clone(&self.cluster);
        let peers = self.config.peers();
        let attempts = self.config.cluster.connect_attempts;
        let delay = self.config.cluster.connect_retry_delay();

        tokio::spawn(async move {
            let setup = async {
                let connected = transport.connect_all(&peers, attempts, delay).await;
                info!(connected, configured = peers.len(), "peer connections established");
                cluster.start_election().await;
            };
            tokio::select! {
                () = setup => {},
                _ = shutdown.recv() => debug!("cluster setup cancelled"),
            }
        })
    }

    /// Gossip to one random peer per tick; heartbeat subscribers while leader.
    fn spawn_gossip_loop(&self, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        let cluster = Arc::clone(&self.cluster);
        let processor = Arc::clone(&self.processor);
        let period = self.config.cluster.gossip_interval();

        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        cluster.gossip_round().await;
                        if cluster.is_leader() {
                            let sent = processor.send_heartbeats().await;
                            debug!(sent, "heartbeat round");
                        }
                    },
                    _ = shutdown.recv() => break,
                }
            }
            debug!("gossip loop stopped");
        })
    }

    /// Current runtime statistics.
    #[must_use]
    pub fn stats(&self) -> BrokerStats {
        BrokerStats {
            active_connections: self.manager.connection_count(),
            total_connections: self.manager.total_connections(),
            topics: self.registry.topic_count(),
            subscriptions: self.registry.subscription_count(),
            messages_published: self.processor.messages_published(),
            deliveries: self.processor.deliveries(),
            lamport_time: self.clock.now(),
            is_leader: self.cluster.is_leader(),
            current_leader: self.cluster.current_leader(),
        }
    }
}

/// Handle for interacting with a running broker.
#[derive(Debug)]
pub struct BrokerHandle {
    broker: Arc<Broker>,
    local_addr: SocketAddr,
    shutdown_tx: broadcast::Sender<()>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl BrokerHandle {
    /// Address the listener is bound to
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// This broker's identity
    #[must_use]
    pub fn identity(&self) -> &BrokerIdentity {
        self.broker.identity()
    }

    /// Whether this broker is leader
    #[must_use]
    pub fn is_leader(&self) -> bool {
        self.broker.cluster.is_leader()
    }

    /// Leader this broker believes in
    #[must_use]
    pub fn current_leader(&self) -> Option<BrokerIdentity> {
        self.broker.cluster.current_leader()
    }

    /// Election state snapshot
    #[must_use]
    pub fn election_state(&self) -> ElectionState {
        self.broker.cluster.election_state()
    }

    /// The subscription registry
    #[must_use]
    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.broker.registry
    }

    /// The cluster coordinator
    #[must_use]
    pub fn cluster(&self) -> &Arc<ClusterNode> {
        &self.broker.cluster
    }

    /// Get broker statistics.
    #[must_use]
    pub fn stats(&self) -> BrokerStats {
        self.broker.stats()
    }

    /// Stop every task, close client connections and peer sockets.
    pub async fn shutdown(self) {
        info!(identity = %self.broker.identity, "shutting down broker");
        let _ = self.shutdown_tx.send(());
        self.broker.cluster.shutdown().await;

        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if timeout(Duration::from_secs(5), task).await.is_err() {
                warn!("background task did not stop in time");
            }
        }
    }
}

/// Broker runtime statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BrokerStats {
    /// Open client and peer connections
    pub active_connections: usize,
    /// Connections accepted since start
    pub total_connections: u64,
    /// Topics with local subscribers
    pub topics: usize,
    /// Subscription handles across topics
    pub subscriptions: usize,
    /// PUBLISH commands processed
    pub messages_published: u64,
    /// Payloads written to subscribers
    pub deliveries: u64,
    /// Current Lamport clock value
    pub lamport_time: u64,
    /// Whether this broker leads
    pub is_leader: bool,
    /// Leader this broker believes in
    pub current_leader: Option<BrokerIdentity>,
}
