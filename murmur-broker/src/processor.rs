//! Command dispatch for every inbound line.
//!
//! Client commands (SUBSCRIBE, PUBLISH, GET_LEADER_ADDRESS) are served from
//! the subscription registry; cluster commands are handed to the
//! [`ClusterNode`] after the connection is tagged with the sender's identity.

use crate::network::ClientConnection;
use crate::registry::SubscriptionRegistry;
use murmur_cluster::ClusterNode;
use murmur_core::protocol::{Command, LeaderReply, Notification};
use murmur_core::LamportClock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Outcome of one publish fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanOut {
    /// Subscribers that received the payload
    pub delivered: usize,
    /// Subscribers removed after a failed send
    pub pruned: usize,
}

/// Executes parsed commands against broker state.
#[derive(Debug)]
pub struct CommandProcessor {
    clock: Arc<LamportClock>,
    registry: Arc<SubscriptionRegistry>,
    cluster: Arc<ClusterNode>,
    messages_published: AtomicU64,
    deliveries: AtomicU64,
}

impl CommandProcessor {
    /// Create a processor over shared broker state.
    #[must_use]
    pub fn new(clock: Arc<LamportClock>, registry: Arc<SubscriptionRegistry>, cluster: Arc<ClusterNode>) -> Self {
        Self { clock, registry, cluster, messages_published: AtomicU64::new(0), deliveries: AtomicU64::new(0) }
    }

    /// Handle one command received on `connection`.
    pub async fn dispatch(&self, connection: &Arc<ClientConnection>, command: Command) {
        trace!(connection = %connection.id(), command = command.name(), "dispatching");
        if let Some(sender) = command.sender() {
            connection.tag_peer(sender);
        }
        match command {
            Command::Subscribe { topic, timestamp } => {
                self.clock.observe_opt(timestamp);
                let count = self.registry.subscribe(&topic, connection);
                debug!(connection = %connection.id(), %topic, count, "subscribed");
            },
            Command::Publish { topic, payload, timestamp } => {
                self.clock.observe_opt(timestamp);
                self.publish(&topic, &payload).await;
            },
            Command::GetLeaderAddress { timestamp } => {
                self.clock.observe_opt(timestamp);
                self.reply_leader(connection).await;
            },
            Command::Election { candidate, timestamp } => {
                self.cluster.handle_election(candidate, timestamp).await;
            },
            Command::ElectionAck { responder, timestamp } => {
                self.cluster.handle_election_ack(&responder, timestamp);
            },
            Command::Victory { leader, timestamp } => {
                self.cluster.handle_victory(leader, timestamp);
            },
            Command::Gossip(digest) => {
                self.cluster.handle_gossip(&digest);
            },
        }
    }

    /// Send `payload` to every subscriber of `topic`, then prune the ones
    /// whose send failed.
    pub async fn publish(&self, topic: &str, payload: &str) -> FanOut {
        self.messages_published.fetch_add(1, Ordering::Relaxed);
        let subscribers = self.registry.subscribers(topic);

        let mut failed = Vec::new();
        let mut delivered = 0;
        for subscriber in &subscribers {
            let delivery = Notification::Delivery { payload: payload.to_string(), timestamp: self.clock.tick() };
            match subscriber.send_line(&delivery.to_line()).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    debug!(connection = %subscriber.id(), %topic, error = %e, "delivery failed");
                    failed.push(subscriber.id());
                },
            }
        }

        let pruned = self.registry.prune(topic, &failed);
        if pruned > 0 {
            warn!(%topic, pruned, "removed unreachable subscribers");
        }
        self.deliveries.fetch_add(delivered as u64, Ordering::Relaxed);
        trace!(%topic, delivered, "published");
        FanOut { delivered, pruned }
    }

    async fn reply_leader(&self, connection: &ClientConnection) {
        let reply = LeaderReply::from_leader(self.cluster.current_leader(), self.clock.tick());
        if let Err(e) = connection.send_line(&reply.to_line()).await {
            debug!(connection = %connection.id(), error = %e, "leader reply not delivered");
        }
    }

    /// Send a heartbeat to each distinct subscriber; failed ones are
    /// removed from every topic. Returns the number delivered.
    pub async fn send_heartbeats(&self) -> usize {
        let mut delivered = 0;
        for subscriber in self.registry.distinct_subscribers() {
            let heartbeat = Notification::Heartbeat { timestamp: self.clock.tick() };
            if subscriber.send_line(&heartbeat.to_line()).await.is_ok() {
                delivered += 1;
            } else {
                let topics = self.registry.remove_connection(subscriber.id());
                warn!(connection = %subscriber.id(), topics = topics.len(), "heartbeat failed, subscriber removed");
            }
        }
        delivered
    }

    /// Clean up after a connection closed.
    pub async fn connection_closed(&self, connection: &ClientConnection) {
        let topics = self.registry.remove_connection(connection.id());
        if !topics.is_empty() {
            debug!(connection = %connection.id(), topics = topics.len(), "subscriber disconnected");
        }
        if let Some(peer) = connection.peer() {
            self.cluster.peer_disconnected(&peer).await;
        }
    }

    /// Publish commands processed
    #[must_use]
    pub fn messages_published(&self) -> u64 {
        self.messages_published.load(Ordering::Relaxed)
    }

    /// Successful deliveries to subscribers
    #[must_use]
    pub fn deliveries(&self) -> u64 {
        self.deliveries.load(Ordering::Relaxed)
    }
}
