//! Gossip snapshot exchanged between brokers.

use crate::identity::BrokerIdentity;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Per-topic set of subscriber address strings, as carried in gossip.
pub type TopicAddresses = BTreeMap<String, BTreeSet<String>>;

/// Liveness of a broker as seen by a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum PeerStatus {
    /// Reachable and gossiping
    #[default]
    Up,
    /// Declared failed by the failure detector
    Down,
}

impl fmt::Display for PeerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Up => write!(f, "UP"),
            Self::Down => write!(f, "DOWN"),
        }
    }
}

/// A broker's view of itself, sent as the body of a `GOSSIP` line.
///
/// ```json
/// {"addr": ["localhost", 8889], "status": "UP",
///  "topic_subscribers": {"Napa": ["10.0.0.7:51234"]}, "timestamp": 42}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GossipDigest {
    /// Sender identity
    pub addr: BrokerIdentity,
    /// Sender status, always `UP` when sent
    #[serde(default)]
    pub status: PeerStatus,
    /// Sender's topic to subscriber-address view
    #[serde(default)]
    pub topic_subscribers: TopicAddresses,
    /// Sender's Lamport timestamp when the snapshot was taken
    pub timestamp: u64,
}

impl GossipDigest {
    /// Build a digest for a live broker.
    #[must_use]
    pub fn new(addr: BrokerIdentity, topic_subscribers: TopicAddresses, timestamp: u64) -> Self {
        Self { addr, status: PeerStatus::Up, topic_subscribers, timestamp }
    }
}
