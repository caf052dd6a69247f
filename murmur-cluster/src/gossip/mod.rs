//! # Gossip Module
//!
//! Periodic exchange of subscription state. Every round one connected peer
//! is picked uniformly at random and sent this broker's topic to
//! subscriber-address view. Received views are merged by per-topic set
//! union: entries are only ever added, never removed.

use murmur_core::protocol::TopicAddresses;
use murmur_core::BrokerIdentity;
use rand::seq::SliceRandom;
use rand::thread_rng;
use std::fmt;

/// Source and sink of the subscription view that gossip carries.
///
/// The broker's subscription registry implements this; the cluster node only
/// sees addresses, never connection handles.
pub trait SubscriptionDirectory: Send + Sync + fmt::Debug {
    /// Current topic to subscriber-address view.
    fn topic_addresses(&self) -> TopicAddresses;

    /// Union a peer's view into the local one under the registry lock.
    /// Returns the number of addresses that were new.
    fn merge_remote(&self, remote: &TopicAddresses) -> usize;
}

/// Monotone union of `remote` into `local`. Returns the number of addresses
/// added.
pub fn merge_topic_addresses(local: &mut TopicAddresses, remote: &TopicAddresses) -> usize {
    let mut added = 0;
    for (topic, addresses) in remote {
        let entry = local.entry(topic.clone()).or_default();
        for address in addresses {
            if entry.insert(address.clone()) {
                added += 1;
            }
        }
    }
    added
}

/// Pick a gossip target uniformly at random.
#[must_use]
pub fn choose_target(peers: &[BrokerIdentity]) -> Option<&BrokerIdentity> {
    peers.choose(&mut thread_rng())
}
