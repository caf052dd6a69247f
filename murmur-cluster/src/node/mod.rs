//! # Cluster Node
//!
//! [`ClusterNode`] owns a broker's cluster-facing state: the active peer set,
//! the election state machine, the cluster view and the failure detector. It
//! handles inbound ELECTION, ELECTION_ACK, VICTORY and GOSSIP messages and
//! drives the outbound side of each protocol through a [`Transport`].
//!
//! Work that must happen "later" (an election after a leader failure, an
//! election timeout) goes through an internal control channel drained by
//! [`ClusterNode::spawn_control_loop`], so failure handling never calls back
//! into the code that is currently sending.

use crate::communication::Transport;
use crate::config::{describe, ClusterConfig};
use crate::election::{BullyElection, ElectionStart, ElectionState};
use crate::error::{Error, Result};
use crate::gossip::{choose_target, SubscriptionDirectory};
use crate::membership::{ClusterView, FailureDetector};
use murmur_core::protocol::{Command, GossipDigest, PeerStatus};
use murmur_core::{BrokerIdentity, LamportClock};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, info, trace, warn};


/// Deferred work for the control loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlEvent {
    /// Run `start_election`
    StartElection,
    /// An election timer for `round` expired
    ElectionTimeout {
        /// Round the timer was armed for
        round: u64,
    },
    /// No VICTORY followed the ELECTION_ACK we yielded to in `round`
    VictoryTimeout {
        /// Round the timer was armed for
        round: u64,
    },
}

/// Cluster coordination for one broker.
#[derive(Debug)]
pub struct ClusterNode {
    identity: BrokerIdentity,
    config: ClusterConfig,
    clock: Arc<LamportClock>,
    transport: Arc<dyn Transport>,
    directory: Arc<dyn SubscriptionDirectory>,
    /// Configured peers not yet declared failed
    members: RwLock<BTreeSet<BrokerIdentity>>,
    election: Mutex<BullyElection>,
    view: Mutex<ClusterView>,
    detector: Mutex<FailureDetector>,
    control_tx: mpsc::UnboundedSender<ControlEvent>,
    control_rx: Mutex<Option<mpsc::UnboundedReceiver<ControlEvent>>>,
}

impl ClusterNode {
    /// Create a node. Peers equal to `identity` are dropped from the member set.
    pub fn new(
        identity: BrokerIdentity,
        config: ClusterConfig,
        clock: Arc<LamportClock>,
        transport: Arc<dyn Transport>,
        directory: Arc<dyn SubscriptionDirectory>,
    ) -> Arc<Self> {
        let members: BTreeSet<BrokerIdentity> = config.peers_excluding(&identity).into_iter().collect();
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        info!(%identity, "cluster node configured: {}", describe(&config));

        Arc::new(Self {
            election: Mutex::new(BullyElection::new(identity.clone())),
            identity,
            config,
            clock,
            transport,
            directory,
            members: RwLock::new(members),
            view: Mutex::new(ClusterView::new()),
            detector: Mutex::new(FailureDetector::new()),
            control_tx,
            control_rx: Mutex::new(Some(control_rx)),
        })
    }

    /// This broker's identity
    #[must_use]
    pub const fn identity(&self) -> &BrokerIdentity {
        &self.identity
    }

    /// Cluster settings
    #[must_use]
    pub const fn config(&self) -> &ClusterConfig {
        &self.config
    }

    /// Shared Lamport clock
    #[must_use]
    pub const fn clock(&self) -> &Arc<LamportClock> {
        &self.clock
    }

    /// Active peers, sorted
    #[must_use]
    pub fn members(&self) -> Vec<BrokerIdentity> {
        self.members.read().iter().cloned().collect()
    }

    /// Whether this broker is leader
    #[must_use]
    pub fn is_leader(&self) -> bool {
        self.election.lock().is_leader()
    }

    /// Leader this broker believes in
    #[must_use]
    pub fn current_leader(&self) -> Option<BrokerIdentity> {
        self.election.lock().current_leader().cloned()
    }

    /// Election state snapshot
    #[must_use]
    pub fn election_state(&self) -> ElectionState {
        self.election.lock().state()
    }

    /// Copy of the cluster view
    #[must_use]
    pub fn cluster_view(&self) -> ClusterView {
        self.view.lock().clone()
    }

    /// Status of a peer in the cluster view
    #[must_use]
    pub fn peer_status(&self, peer: &BrokerIdentity) -> Option<PeerStatus> {
        self.view.lock().status(peer)
    }

    /// When a peer was last heard from
    #[must_use]
    pub fn last_contact(&self, peer: &BrokerIdentity) -> Option<Instant> {
        self.detector.lock().last_contact(peer)
    }

    /// Queue an election for the control loop.
    pub fn request_election(&self) {
        if self.control_tx.send(ControlEvent::StartElection).is_err() {
            warn!("control channel closed, election request dropped");
        }
    }

    /// Spawn the task that runs queued elections and election timeouts.
    ///
    /// # Errors
    /// Returns an error if the loop has already been started.
    pub fn spawn_control_loop(self: &Arc<Self>, mut shutdown: broadcast::Receiver<()>) -> Result<JoinHandle<()>> {
        let mut events = self
            .control_rx
            .lock()
            .take()
            .ok_or_else(|| Error::configuration("control loop already running"))?;
        let node = Arc::clone(self);

        Ok(tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = events.recv() => match event {
                        Some(event) => node.handle_control(event).await,
                        None => break,
                    },
                    _ = shutdown.recv() => break,
                }
            }
            node.election.lock().cancel_timers();
            debug!("control loop stopped");
        }))
    }

    /// Spawn the loop that declares silent peers failed.
    pub fn spawn_failure_detector(self: &Arc<Self>, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        let node = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = interval(node.config.failure_check_interval());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        node.check_peer_timeouts().await;
                    },
                    _ = shutdown.recv() => break,
                }
            }
            debug!("failure detector stopped");
        })
    }

    async fn handle_control(&self, event: ControlEvent) {
        match event {
            ControlEvent::StartElection => self.start_election().await,
            ControlEvent::ElectionTimeout { round } => self.on_election_timeout(round).await,
            ControlEvent::VictoryTimeout { round } => self.on_victory_timeout(round).await,
        }
    }

    /// Start a bully election unless one is running or this broker leads.
    pub async fn start_election(&self) {
        let members = self.members();
        let (start, higher, announce) = {
            let mut election = self.election.lock();
            let higher = election.higher_peers(&members);
            let start = election.begin(!higher.is_empty());
            let announce = start == ElectionStart::Uncontested && election.claim_leadership();
            (start, higher, announce)
        };

        match start {
            ElectionStart::Skipped => {},
            ElectionStart::Uncontested => {
                if announce {
                    self.broadcast_victory().await;
                }
            },
            ElectionStart::Contested { round } => {
                info!(round, challenged = higher.len(), "starting election");
                for peer in &higher {
                    let challenge =
                        Command::Election { candidate: self.identity.clone(), timestamp: self.clock.tick() };
                    self.send_to(peer, &challenge).await;
                    self.arm_timer(ControlEvent::ElectionTimeout { round }, round);
                }
            },
        }
    }

    /// Become leader and announce it, unless already leader.
    pub async fn announce_leader(&self) {
        let announce = self.election.lock().claim_leadership();
        if announce {
            self.broadcast_victory().await;
        }
    }

    /// Deliver `event` to the control loop after the election timeout.
    fn arm_timer(&self, event: ControlEvent, round: u64) {
        let control = self.control_tx.clone();
        let delay = self.config.election_timeout();
        let timer = tokio::spawn(async move {
            sleep(delay).await;
            let _ = control.send(event);
        });
        self.election.lock().track_timer(round, timer.abort_handle());
    }

    pub(crate) async fn on_election_timeout(&self, round: u64) {
        let announce = {
            let mut election = self.election.lock();
            election.timeout_elapsed(round) && election.claim_leadership()
        };
        if announce {
            warn!(round, "no answer from higher brokers, claiming leadership");
            self.broadcast_victory().await;
        }
    }

    pub(crate) async fn on_victory_timeout(&self, round: u64) {
        let overdue = self.election.lock().victory_overdue(round);
        if overdue {
            warn!(round, "no VICTORY after yielding, restarting election");
            self.start_election().await;
        }
    }

    async fn broadcast_victory(&self) {
        for peer in self.members() {
            let victory = Command::Victory { leader: self.identity.clone(), timestamp: self.clock.tick() };
            self.send_to(&peer, &victory).await;
        }
    }

    /// Handle `ELECTION` from a lower broker.
    pub async fn handle_election(&self, candidate: BrokerIdentity, timestamp: u64) {
        self.clock.observe(timestamp);
        self.note_contact(&candidate);
        debug!(%candidate, "received ELECTION");

        let ack = Command::ElectionAck { responder: self.identity.clone(), timestamp: self.clock.tick() };
        self.send_to(&candidate, &ack).await;

        if self.is_leader() {
            if candidate < self.identity {
                let victory = Command::Victory { leader: self.identity.clone(), timestamp: self.clock.tick() };
                self.send_to(&candidate, &victory).await;
            }
        } else {
            if let Some(leader) = self.live_leader_above(&candidate) {
                debug!(%candidate, %leader, "relaying known leader to challenger");
                let victory = Command::Victory { leader, timestamp: self.clock.tick() };
                self.send_to(&candidate, &victory).await;
            }
            self.start_election().await;
        }
    }

    /// The current leader when it outranks `candidate` and is still a live
    /// member here. A challenger that lost its link to the leader can only
    /// learn about it this way.
    fn live_leader_above(&self, candidate: &BrokerIdentity) -> Option<BrokerIdentity> {
        let leader = self.current_leader()?;
        (leader > *candidate && self.members.read().contains(&leader)).then_some(leader)
    }

    /// Handle `ELECTION_ACK`: a higher broker took over.
    pub fn handle_election_ack(&self, responder: &BrokerIdentity, timestamp: u64) {
        self.clock.observe(timestamp);
        self.note_contact(responder);
        let wait = self.election.lock().yield_to(responder);
        if let Some(round) = wait {
            self.arm_timer(ControlEvent::VictoryTimeout { round }, round);
        }
    }

    /// Handle `VICTORY`.
    pub fn handle_victory(&self, leader: BrokerIdentity, timestamp: u64) {
        self.clock.observe(timestamp);
        self.note_contact(&leader);
        self.election.lock().accept_victory(leader);
    }

    /// Handle `GOSSIP`: merge subscriptions unless leader, refresh the view.
    pub fn handle_gossip(&self, digest: &GossipDigest) {
        self.clock.observe(digest.timestamp);
        self.note_contact(&digest.addr);

        if !self.is_leader() {
            let added = self.directory.merge_remote(&digest.topic_subscribers);
            if added > 0 {
                debug!(peer = %digest.addr, added, "merged gossiped subscriptions");
            }
        }
        self.view.lock().record(digest);
        trace!(peer = %digest.addr, timestamp = digest.timestamp, "gossip received");
    }

    /// Send this broker's view to one random connected peer.
    ///
    /// Returns the peer gossiped to, if the send succeeded.
    pub async fn gossip_round(&self) -> Option<BrokerIdentity> {
        let peers = self.transport.connected_peers().await;
        let Some(target) = choose_target(&peers).cloned() else {
            trace!("no connected peers, skipping gossip");
            return None;
        };

        let digest = GossipDigest::new(self.identity.clone(), self.directory.topic_addresses(), self.clock.tick());
        self.send_to(&target, &Command::Gossip(digest)).await.then_some(target)
    }

    /// Declare every peer silent for longer than the failure timeout failed.
    pub async fn check_peer_timeouts(&self) -> Vec<BrokerIdentity> {
        self.check_peer_timeouts_at(Instant::now()).await
    }

    /// [`Self::check_peer_timeouts`] against an explicit clock reading.
    pub async fn check_peer_timeouts_at(&self, now: Instant) -> Vec<BrokerIdentity> {
        let timeout = self.config.failure_timeout();
        let expired = self.detector.lock().expired(now, timeout);
        for peer in &expired {
            warn!(%peer, ?timeout, "no contact from peer within timeout");
            self.handle_peer_failure(peer).await;
        }
        expired
    }

    /// Failure path shared by timeouts and send errors: mark the peer down,
    /// drop its socket, membership and contact record, and re-elect if it
    /// was the leader.
    pub async fn handle_peer_failure(&self, peer: &BrokerIdentity) {
        let was_member = self.members.write().remove(peer);
        self.view.lock().mark_down(peer);
        self.detector.lock().forget(peer);
        self.transport.disconnect(peer).await;
        let leader_lost = self.election.lock().forget_leader(peer);

        if was_member {
            warn!(%peer, "peer declared failed");
        }
        if leader_lost {
            info!(%peer, "leader failed, requesting new election");
            self.request_election();
        }
    }

    /// An inbound connection from `peer` closed; drop its outbound entry.
    pub async fn peer_disconnected(&self, peer: &BrokerIdentity) {
        if self.transport.disconnect(peer).await {
            debug!(%peer, "removed transport entry after inbound disconnect");
        }
    }

    /// Abort election timers and close every peer socket.
    pub async fn shutdown(&self) {
        self.election.lock().cancel_timers();
        for peer in self.transport.connected_peers().await {
            self.transport.disconnect(&peer).await;
        }
    }

    /// Send to a peer; socket failures run the failure path.
    async fn send_to(&self, peer: &BrokerIdentity, command: &Command) -> bool {
        match self.transport.send(peer, command).await {
            Ok(()) => true,
            Err(e) if e.is_peer_failure() => {
                warn!(%peer, command = command.name(), error = %e, "send to peer failed");
                self.handle_peer_failure(peer).await;
                false
            },
            Err(e) => {
                debug!(%peer, command = command.name(), error = %e, "peer not reachable");
                false
            },
        }
    }

    fn note_contact(&self, peer: &BrokerIdentity) {
        if self.members.read().contains(peer) {
            self.detector.lock().record_contact(peer);
        }
    }

    #[cfg(test)]
    pub(crate) fn election_round(&self) -> u64 {
        self.election.lock().round()
    }

    #[cfg(test)]
    pub(crate) async fn drain_control_events(&self) -> usize {
        let events: Vec<ControlEvent> = {
            let mut guard = self.control_rx.lock();
            let Some(rx) = guard.as_mut() else { return 0 };
            std::iter::from_fn(|| rx.try_recv().ok()).collect()
        };
        for event in &events {
            self.handle_control(*event).await;
        }
        events.len()
    }
}
