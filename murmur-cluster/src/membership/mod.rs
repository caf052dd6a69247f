//! # Membership Module
//!
//! What this broker knows about its peers: the last gossip snapshot from each
//! ([`ClusterView`]) and when each was last heard from ([`FailureDetector`]).

use chrono::{DateTime, Utc};
use murmur_core::protocol::{GossipDigest, PeerStatus, TopicAddresses};
use murmur_core::BrokerIdentity;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::debug;

/// Last-known-good state of one peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerSnapshot {
    /// Liveness as last determined
    pub status: PeerStatus,
    /// Topic subscriptions the peer reported
    pub topic_subscribers: TopicAddresses,
    /// Peer's Lamport timestamp for the snapshot
    pub timestamp: u64,
    /// Local wall-clock time the snapshot arrived
    pub received_at: DateTime<Utc>,
}

/// Per-peer cache of gossip snapshots.
#[derive(Debug, Default, Clone)]
pub struct ClusterView {
    peers: HashMap<BrokerIdentity, PeerSnapshot>,
}

impl ClusterView {
    /// Create an empty view
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the sender's entry with a freshly received snapshot.
    pub fn record(&mut self, digest: &GossipDigest) {
        let snapshot = PeerSnapshot {
            status: digest.status,
            topic_subscribers: digest.topic_subscribers.clone(),
            timestamp: digest.timestamp,
            received_at: Utc::now(),
        };
        self.peers.insert(digest.addr.clone(), snapshot);
    }

    /// Mark a peer down, keeping its last snapshot. Creates an entry if the
    /// peer never gossiped.
    pub fn mark_down(&mut self, peer: &BrokerIdentity) {
        let entry = self.peers.entry(peer.clone()).or_insert_with(|| PeerSnapshot {
            status: PeerStatus::Down,
            topic_subscribers: TopicAddresses::new(),
            timestamp: 0,
            received_at: Utc::now(),
        });
        entry.status = PeerStatus::Down;
        debug!(%peer, "peer marked DOWN");
    }

    /// Snapshot for a peer
    #[must_use]
    pub fn get(&self, peer: &BrokerIdentity) -> Option<&PeerSnapshot> {
        self.peers.get(peer)
    }

    /// Status of a peer, if it has ever been seen
    #[must_use]
    pub fn status(&self, peer: &BrokerIdentity) -> Option<PeerStatus> {
        self.peers.get(peer).map(|snapshot| snapshot.status)
    }

    /// Peers currently considered up
    #[must_use]
    pub fn live_peers(&self) -> Vec<BrokerIdentity> {
        let mut live: Vec<BrokerIdentity> = self
            .peers
            .iter()
            .filter(|(_, snapshot)| snapshot.status == PeerStatus::Up)
            .map(|(peer, _)| peer.clone())
            .collect();
        live.sort();
        live
    }

    /// Number of peers in the view
    #[must_use]
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// Whether no peer has been seen
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

/// Last-contact tracking for passive failure detection.
///
/// A peer is only tracked once something has been heard from it; peers that
/// never made contact are never timed out.
#[derive(Debug, Default)]
pub struct FailureDetector {
    last_contact: HashMap<BrokerIdentity, Instant>,
}

impl FailureDetector {
    /// Create an empty detector
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Note that `peer` was heard from now.
    pub fn record_contact(&mut self, peer: &BrokerIdentity) {
        self.record_contact_at(peer, Instant::now());
    }

    /// Note that `peer` was heard from at `at`.
    pub fn record_contact_at(&mut self, peer: &BrokerIdentity, at: Instant) {
        self.last_contact.insert(peer.clone(), at);
    }

    /// Time of last contact
    #[must_use]
    pub fn last_contact(&self, peer: &BrokerIdentity) -> Option<Instant> {
        self.last_contact.get(peer).copied()
    }

    /// Peers silent for longer than `timeout` as of `now`.
    #[must_use]
    pub fn expired(&self, now: Instant, timeout: Duration) -> Vec<BrokerIdentity> {
        let mut expired: Vec<BrokerIdentity> = self
            .last_contact
            .iter()
            .filter(|(_, seen)| now.saturating_duration_since(**seen) > timeout)
            .map(|(peer, _)| peer.clone())
            .collect();
        expired.sort();
        expired
    }

    /// Stop tracking a peer.
    pub fn forget(&mut self, peer: &BrokerIdentity) -> bool {
        self.last_contact.remove(peer).is_some()
    }

    /// Number of tracked peers
    #[must_use]
    pub fn tracked(&self) -> usize {
        self.last_contact.len()
    }
}
