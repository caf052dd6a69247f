//! # murmur cluster
//!
//! Cluster coordination for murmur brokers: bully leader election, gossip of
//! subscription state, failure detection and the peer transport that carries
//! them. Brokers are ordered by `(port, host)`; the highest live broker wins
//! every election.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

/// Peer list and protocol timings
pub mod config;

/// Outbound peer sockets
pub mod communication;

/// Bully election state machine
pub mod election;

/// Cluster error types
pub mod error;

/// Subscription gossip
pub mod gossip;

/// Cluster view and failure detection
pub mod membership;

/// The per-broker cluster coordinator
pub mod node;

#[cfg(test)]
pub(crate) mod test_utils;

pub use crate::{
    communication::{ConnectionInfo, TcpTransport, Transport},
    config::{ClusterConfig, ClusterConfigBuilder},
    election::{BullyElection, ElectionPhase, ElectionStart, ElectionState},
    error::{Error, Result},
    gossip::{choose_target, merge_topic_addresses, SubscriptionDirectory},
    membership::{ClusterView, FailureDetector, PeerSnapshot},
    node::{ClusterNode, ControlEvent},
};
pub use murmur_core::time::LamportClock;
