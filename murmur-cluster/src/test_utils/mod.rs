//! In-memory stand-ins for the network, used by cluster node tests.

use crate::communication::Transport;
use crate::config::ClusterConfig;
use crate::error::{Error, Result};
use crate::gossip::{merge_topic_addresses, SubscriptionDirectory};
use crate::node::ClusterNode;
use async_trait::async_trait;
use murmur_core::protocol::{Command, TopicAddresses};
use murmur_core::{BrokerIdentity, LamportClock};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};
use std::io;
use std::sync::Arc;
use std::time::Duration;

/// A message captured by [`MockTransport`].
#[derive(Debug, Clone)]
pub(crate) struct Envelope {
    pub from: BrokerIdentity,
    pub to: BrokerIdentity,
    pub command: Command,
}

pub(crate) type Mailbox = Arc<Mutex<VecDeque<Envelope>>>;

/// Transport that appends to a shared mailbox instead of writing sockets.
#[derive(Debug)]
pub(crate) struct MockTransport {
    owner: BrokerIdentity,
    connected: Mutex<BTreeSet<BrokerIdentity>>,
    failing: Mutex<HashSet<BrokerIdentity>>,
    mailbox: Mailbox,
}

impl MockTransport {
    pub fn new(owner: BrokerIdentity, peers: impl IntoIterator<Item = BrokerIdentity>, mailbox: Mailbox) -> Self {
        Self {
            owner,
            connected: Mutex::new(peers.into_iter().collect()),
            failing: Mutex::new(HashSet::new()),
            mailbox,
        }
    }

    /// Make every later send to `peer` fail like a broken socket.
    pub fn fail_peer(&self, peer: &BrokerIdentity) {
        self.failing.lock().insert(peer.clone());
    }

    pub fn is_connected(&self, peer: &BrokerIdentity) -> bool {
        self.connected.lock().contains(peer)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, peer: &BrokerIdentity, command: &Command) -> Result<()> {
        if !self.connected.lock().contains(peer) {
            return Err(Error::NotConnected { peer: peer.clone() });
        }
        if self.failing.lock().contains(peer) {
            return Err(Error::Io(io::Error::new(io::ErrorKind::BrokenPipe, "peer gone")));
        }
        self.mailbox.lock().push_back(Envelope {
            from: self.owner.clone(),
            to: peer.clone(),
            command: command.clone(),
        });
        Ok(())
    }

    async fn disconnect(&self, peer: &BrokerIdentity) -> bool {
        self.connected.lock().remove(peer)
    }

    async fn connected_peers(&self) -> Vec<BrokerIdentity> {
        self.connected.lock().iter().cloned().collect()
    }
}

/// Subscription directory backed by a plain map.
#[derive(Debug, Default)]
pub(crate) struct MemoryDirectory {
    view: Mutex<TopicAddresses>,
}

impl MemoryDirectory {
    pub fn add(&self, topic: &str, address: &str) {
        self.view.lock().entry(topic.to_string()).or_default().insert(address.to_string());
    }
}

impl SubscriptionDirectory for MemoryDirectory {
    fn topic_addresses(&self) -> TopicAddresses {
        self.view.lock().clone()
    }

    fn merge_remote(&self, remote: &TopicAddresses) -> usize {
        merge_topic_addresses(&mut self.view.lock(), remote)
    }
}

pub(crate) fn local(port: u16) -> BrokerIdentity {
    BrokerIdentity::new("127.0.0.1", port)
}

/// One simulated broker.
#[derive(Debug)]
pub(crate) struct SimNode {
    pub node: Arc<ClusterNode>,
    pub transport: Arc<MockTransport>,
    pub directory: Arc<MemoryDirectory>,
}

/// A full mesh of cluster nodes exchanging messages through one FIFO mailbox.
///
/// Nothing moves until [`SimCluster::deliver_all`] is called, so tests decide
/// exactly which events interleave.
#[derive(Debug)]
pub(crate) struct SimCluster {
    pub nodes: BTreeMap<BrokerIdentity, SimNode>,
    pub mailbox: Mailbox,
    /// Every envelope delivered so far, in delivery order
    pub delivered: Vec<Envelope>,
    crashed: HashSet<BrokerIdentity>,
}

impl SimCluster {
    /// Election timers run a full minute so only explicit expiry fires them.
    pub fn new(ports: &[u16]) -> Self {
        let mailbox: Mailbox = Arc::default();
        let identities: Vec<BrokerIdentity> = ports.iter().copied().map(local).collect();
        let mut nodes = BTreeMap::new();

        for identity in &identities {
            let config = ClusterConfig::builder()
                .peers(identities.iter().cloned())
                .election_timeout(Duration::from_secs(60))
                .build()
                .expect("valid test config");
            let peers = config.peers_excluding(identity);
            let transport = Arc::new(MockTransport::new(identity.clone(), peers, Arc::clone(&mailbox)));
            let directory = Arc::new(MemoryDirectory::default());
            let node = ClusterNode::new(
                identity.clone(),
                config,
                Arc::new(LamportClock::new()),
                Arc::clone(&transport) as Arc<dyn Transport>,
                Arc::clone(&directory) as Arc<dyn SubscriptionDirectory>,
            );
            nodes.insert(identity.clone(), SimNode { node, transport, directory });
        }

        Self { nodes, mailbox, delivered: Vec::new(), crashed: HashSet::new() }
    }

    pub fn get(&self, port: u16) -> &SimNode {
        &self.nodes[&local(port)]
    }

    pub fn node(&self, port: u16) -> &Arc<ClusterNode> {
        &self.get(port).node
    }

    /// Stop delivering to `port` and make every other node's sends to it fail.
    pub fn crash(&mut self, port: u16) {
        let dead = local(port);
        for (identity, sim) in &self.nodes {
            if *identity != dead {
                sim.transport.fail_peer(&dead);
            }
        }
        self.crashed.insert(dead);
    }

    /// Deliver queued messages until the mailbox stays empty.
    pub async fn deliver_all(&mut self) -> usize {
        let mut count = 0;
        loop {
            let next = self.mailbox.lock().pop_front();
            let Some(envelope) = next else { break };
            assert!(count < 10_000, "message storm: cluster never quiesced");
            count += 1;

            if self.crashed.contains(&envelope.to) {
                continue;
            }
            let node = Arc::clone(&self.nodes[&envelope.to].node);
            match envelope.command.clone() {
                Command::Election { candidate, timestamp } => node.handle_election(candidate, timestamp).await,
                Command::ElectionAck { responder, timestamp } => node.handle_election_ack(&responder, timestamp),
                Command::Victory { leader, timestamp } => node.handle_victory(leader, timestamp),
                Command::Gossip(digest) => node.handle_gossip(&digest),
                other => panic!("unexpected peer command {other}"),
            }
            self.delivered.push(envelope);
        }
        count
    }

    /// Identities of live nodes that consider themselves leader.
    pub fn leaders(&self) -> Vec<BrokerIdentity> {
        self.nodes
            .iter()
            .filter(|(identity, sim)| !self.crashed.contains(*identity) && sim.node.is_leader())
            .map(|(identity, _)| identity.clone())
            .collect()
    }

    /// Assert every live node agrees that `port` leads and nobody is mid-election.
    pub fn assert_converged_on(&self, port: u16) {
        let expected = local(port);
        assert_eq!(self.leaders(), vec![expected.clone()]);
        for (identity, sim) in &self.nodes {
            if self.crashed.contains(identity) {
                continue;
            }
            let state = sim.node.election_state();
            assert_eq!(state.current_leader.as_ref(), Some(&expected), "{identity} disagrees");
            assert!(!state.election_in_progress, "{identity} still electing");
        }
    }
}
