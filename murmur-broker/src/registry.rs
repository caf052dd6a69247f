//! Topic subscriptions held by a broker.
//!
//! Two maps sit behind one lock: live connection handles per topic, used for
//! fan-out, and address strings per topic, the only part peers can see. The
//! address view also absorbs what gossip reports from other brokers.

use crate::network::{ClientConnection, ConnectionId};
use murmur_cluster::{merge_topic_addresses, SubscriptionDirectory};
use murmur_core::protocol::TopicAddresses;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Default)]
struct Subscriptions {
    /// Subscribe order is kept; a connection subscribing twice appears twice
    subscribers: HashMap<String, Vec<Arc<ClientConnection>>>,
    addresses: TopicAddresses,
}

/// Subscription registry guarded by a single lock.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    inner: Mutex<Subscriptions>,
}

impl SubscriptionRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `connection` for `topic`. Returns the topic's handle count.
    pub fn subscribe(&self, topic: &str, connection: &Arc<ClientConnection>) -> usize {
        let mut inner = self.inner.lock();
        let handles = inner.subscribers.entry(topic.to_string()).or_default();
        handles.push(Arc::clone(connection));
        let count = handles.len();
        inner.addresses.entry(topic.to_string()).or_default().insert(connection.address());
        count
    }

    /// Snapshot of the handles subscribed to `topic`.
    #[must_use]
    pub fn subscribers(&self, topic: &str) -> Vec<Arc<ClientConnection>> {
        self.inner.lock().subscribers.get(topic).cloned().unwrap_or_default()
    }

    /// Drop the failed connections from one topic. Returns handles removed.
    pub fn prune(&self, topic: &str, failed: &[ConnectionId]) -> usize {
        if failed.is_empty() {
            return 0;
        }
        let mut inner = self.inner.lock();
        let Subscriptions { subscribers, addresses } = &mut *inner;
        let Some(handles) = subscribers.get_mut(topic) else {
            return 0;
        };

        let before = handles.len();
        let mut dropped = HashSet::new();
        handles.retain(|connection| {
            let keep = !failed.contains(&connection.id());
            if !keep {
                dropped.insert(connection.address());
            }
            keep
        });
        let removed = before - handles.len();
        if handles.is_empty() {
            subscribers.remove(topic);
        }
        if let Some(topic_addresses) = addresses.get_mut(topic) {
            topic_addresses.retain(|address| !dropped.contains(address));
            if topic_addresses.is_empty() {
                addresses.remove(topic);
            }
        }
        debug!(%topic, removed, "pruned dead subscribers");
        removed
    }

    /// Remove a connection from every topic. Returns the topics it left.
    pub fn remove_connection(&self, id: ConnectionId) -> Vec<String> {
        let topics: Vec<String> = {
            let inner = self.inner.lock();
            inner
                .subscribers
                .iter()
                .filter(|(_, handles)| handles.iter().any(|connection| connection.id() == id))
                .map(|(topic, _)| topic.clone())
                .collect()
        };
        for topic in &topics {
            self.prune(topic, &[id]);
        }
        topics
    }

    /// Every subscribed connection once, however many topics it is on.
    #[must_use]
    pub fn distinct_subscribers(&self) -> Vec<Arc<ClientConnection>> {
        let inner = self.inner.lock();
        let mut seen = HashSet::new();
        inner
            .subscribers
            .values()
            .flatten()
            .filter(|connection| seen.insert(connection.id()))
            .cloned()
            .collect()
    }

    /// Topics with at least one local subscriber
    #[must_use]
    pub fn topic_count(&self) -> usize {
        self.inner.lock().subscribers.len()
    }

    /// Subscription handles across all topics
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.inner.lock().subscribers.values().map(Vec::len).sum()
    }
}

impl SubscriptionDirectory for SubscriptionRegistry {
    fn topic_addresses(&self) -> TopicAddresses {
        self.inner.lock().addresses.clone()
    }

    fn merge_remote(&self, remote: &TopicAddresses) -> usize {
        merge_topic_addresses(&mut self.inner.lock().addresses, remote)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::connection::test_support::connected_pair;
    use std::collections::BTreeSet;

    #[tokio::test]
    async fn test_subscribe_records_handle_and_address() {
        let registry = SubscriptionRegistry::new();
        let (connection, _client) = connected_pair().await;

        assert_eq!(registry.subscribe("Napa", &connection), 1);
        assert_eq!(registry.subscribers("Napa").len(), 1);
        assert_eq!(
            registry.topic_addresses()["Napa"],
            BTreeSet::from([connection.address()])
        );
        assert!(registry.subscribers("Solano").is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_subscribe_is_permissive() {
        let registry = SubscriptionRegistry::new();
        let (connection, _client) = connected_pair().await;

        registry.subscribe("Napa", &connection);
        assert_eq!(registry.subscribe("Napa", &connection), 2);
        assert_eq!(registry.topic_addresses()["Napa"].len(), 1);
        assert_eq!(registry.distinct_subscribers().len(), 1);
    }

    #[tokio::test]
    async fn test_prune_removes_only_failed() {
        let registry = SubscriptionRegistry::new();
        let (alive, _c1) = connected_pair().await;
        let (dead, _c2) = connected_pair().await;
        registry.subscribe("Napa", &alive);
        registry.subscribe("Napa", &dead);

        assert_eq!(registry.prune("Napa", &[dead.id()]), 1);
        let remaining = registry.subscribers("Napa");
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id(), alive.id());
        assert!(!registry.topic_addresses()["Napa"].contains(&dead.address()));
    }

    #[tokio::test]
    async fn test_remove_connection_from_every_topic() {
        let registry = SubscriptionRegistry::new();
        let (connection, _client) = connected_pair().await;
        registry.subscribe("Napa", &connection);
        registry.subscribe("Solano", &connection);

        let mut left = registry.remove_connection(connection.id());
        left.sort();
        assert_eq!(left, vec!["Napa".to_string(), "Solano".to_string()]);
        assert_eq!(registry.topic_count(), 0);
        assert!(registry.topic_addresses().is_empty());
    }

    #[tokio::test]
    async fn test_merge_remote_is_union() {
        let registry = SubscriptionRegistry::new();
        let (connection, _client) = connected_pair().await;
        registry.subscribe("Napa", &connection);

        let mut remote = TopicAddresses::new();
        remote.entry("Napa".into()).or_default().insert("ip2".into());
        remote.entry("Solano".into()).or_default().insert("ip3".into());
        assert_eq!(registry.merge_remote(&remote), 2);

        let view = registry.topic_addresses();
        assert_eq!(view["Napa"].len(), 2);
        assert!(view["Solano"].contains("ip3"));
        // gossiped addresses never become fan-out targets
        assert_eq!(registry.subscription_count(), 1);
    }
}
