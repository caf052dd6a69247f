//! # Election Module
//!
//! Bully leader election. [`BullyElection`] is the state machine only: it
//! decides transitions and tells the caller whom to message, but performs no
//! I/O itself. The cluster node keeps it behind a single lock so that
//! starting an election, announcing leadership and processing ELECTION,
//! ELECTION_ACK and VICTORY are atomic with respect to each other.
//!
//! Each election gets a round number. Timeout timers carry the round they
//! were armed for, their abort handles are stored here, and every transition
//! that concludes an election bumps the round and aborts them. A timer that
//! slips through still finds a round mismatch and does nothing, so a late
//! timeout can never overwrite a VICTORY that already arrived.
//!
//! Yielding to a higher broker's ELECTION_ACK arms one more timer for the
//! new round. If no VICTORY arrives before it fires, the broker challenges
//! again instead of waiting forever.

use murmur_core::BrokerIdentity;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::task::AbortHandle;
use tracing::{debug, info};

/// Election phase of a broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ElectionPhase {
    /// Not competing; may or may not know a leader
    #[default]
    Idle,
    /// ELECTION sent to higher peers, waiting for ACK or VICTORY
    InProgress,
    /// This broker is leader
    Leader,
}

impl fmt::Display for ElectionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "IDLE"),
            Self::InProgress => write!(f, "ELECTION_IN_PROGRESS"),
            Self::Leader => write!(f, "LEADER"),
        }
    }
}

/// Snapshot of election state as seen by readers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectionState {
    /// Whether this broker is the leader
    pub is_leader: bool,
    /// Leader this broker believes in
    pub current_leader: Option<BrokerIdentity>,
    /// Whether an election started here is unresolved
    pub election_in_progress: bool,
}

/// Result of asking to start an election.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElectionStart {
    /// Already competing or already leader; nothing to do.
    Skipped,
    /// No higher peer exists; claim leadership now.
    Uncontested,
    /// Challenge the higher peers and arm timeouts for this round.
    Contested {
        /// Round the timeouts belong to
        round: u64,
    },
}

/// Bully election state machine.
#[derive(Debug)]
pub struct BullyElection {
    identity: BrokerIdentity,
    phase: ElectionPhase,
    current_leader: Option<BrokerIdentity>,
    round: u64,
    awaiting_victory: bool,
    timers: Vec<AbortHandle>,
}

impl BullyElection {
    /// Create an idle state machine for this broker.
    #[must_use]
    pub fn new(identity: BrokerIdentity) -> Self {
        Self { identity, phase: ElectionPhase::Idle, current_leader: None, round: 0, awaiting_victory: false, timers: Vec::new() }
    }

    /// This broker's identity.
    #[must_use]
    pub const fn identity(&self) -> &BrokerIdentity {
        &self.identity
    }

    /// Current phase.
    #[must_use]
    pub const fn phase(&self) -> ElectionPhase {
        self.phase
    }

    /// Current round number.
    #[must_use]
    pub const fn round(&self) -> u64 {
        self.round
    }

    /// Whether this broker is leader.
    #[must_use]
    pub fn is_leader(&self) -> bool {
        self.phase == ElectionPhase::Leader
    }

    /// Whether an election is unresolved.
    #[must_use]
    pub fn in_progress(&self) -> bool {
        self.phase == ElectionPhase::InProgress
    }

    /// Leader this broker believes in.
    #[must_use]
    pub const fn current_leader(&self) -> Option<&BrokerIdentity> {
        self.current_leader.as_ref()
    }

    /// Number of live timeout timers.
    #[must_use]
    pub fn pending_timers(&self) -> usize {
        self.timers.len()
    }

    /// Reader snapshot.
    #[must_use]
    pub fn state(&self) -> ElectionState {
        ElectionState {
            is_leader: self.is_leader(),
            current_leader: self.current_leader.clone(),
            election_in_progress: self.in_progress(),
        }
    }

    /// Select the peers that outrank this broker.
    pub fn higher_peers<'a>(&self, peers: impl IntoIterator<Item = &'a BrokerIdentity>) -> Vec<BrokerIdentity> {
        peers.into_iter().filter(|peer| **peer > self.identity).cloned().collect()
    }

    /// Begin an election if idle.
    pub fn begin(&mut self, has_higher_peers: bool) -> ElectionStart {
        if self.phase != ElectionPhase::Idle {
            debug!(phase = %self.phase, "election start skipped");
            return ElectionStart::Skipped;
        }
        self.cancel_timers();
        self.round += 1;
        self.awaiting_victory = false;
        self.phase = ElectionPhase::InProgress;
        if has_higher_peers {
            ElectionStart::Contested { round: self.round }
        } else {
            ElectionStart::Uncontested
        }
    }

    /// Keep a timer's abort handle, or abort it at once if its round is over.
    pub fn track_timer(&mut self, round: u64, timer: AbortHandle) {
        if round == self.round && (self.in_progress() || self.awaiting_victory) {
            self.timers.push(timer);
        } else {
            timer.abort();
        }
    }

    /// A timer for `round` fired. Returns true when this broker should claim
    /// leadership.
    #[must_use]
    pub fn timeout_elapsed(&self, round: u64) -> bool {
        round == self.round && self.in_progress()
    }

    /// Become leader. Returns true if leadership is new and VICTORY must be
    /// announced.
    pub fn claim_leadership(&mut self) -> bool {
        if self.is_leader() {
            return false;
        }
        self.conclude();
        self.phase = ElectionPhase::Leader;
        self.current_leader = Some(self.identity.clone());
        info!(leader = %self.identity, "assuming leadership");
        true
    }

    /// A higher broker acknowledged our challenge; stand down and wait for
    /// its VICTORY. Returns the round to arm the wait timer for, or `None`
    /// if the responder does not outrank us.
    pub fn yield_to(&mut self, responder: &BrokerIdentity) -> Option<u64> {
        if *responder <= self.identity {
            debug!(%responder, "ignoring ELECTION_ACK from lower broker");
            return None;
        }
        self.conclude();
        self.phase = ElectionPhase::Idle;
        self.awaiting_victory = true;
        if self.current_leader.as_ref() == Some(&self.identity) {
            self.current_leader = None;
        }
        debug!(%responder, round = self.round, "yielding to higher broker");
        Some(self.round)
    }

    /// The wait timer armed by [`Self::yield_to`] fired. Returns true when
    /// no VICTORY arrived in the meantime and a new election is due.
    pub fn victory_overdue(&mut self, round: u64) -> bool {
        if round != self.round || !self.awaiting_victory || self.phase != ElectionPhase::Idle {
            return false;
        }
        self.conclude();
        true
    }

    /// Accept a VICTORY announcement.
    pub fn accept_victory(&mut self, leader: BrokerIdentity) {
        self.conclude();
        self.phase = if leader == self.identity { ElectionPhase::Leader } else { ElectionPhase::Idle };
        if self.current_leader.as_ref() != Some(&leader) {
            info!(%leader, "leader elected");
        }
        self.current_leader = Some(leader);
    }

    /// Forget `peer` as leader after it failed. Returns true if it was the
    /// leader, in which case a new election is needed.
    pub fn forget_leader(&mut self, peer: &BrokerIdentity) -> bool {
        if self.current_leader.as_ref() == Some(peer) {
            self.current_leader = None;
            true
        } else {
            false
        }
    }

    /// Abort every outstanding timer; used on shutdown.
    pub fn cancel_timers(&mut self) {
        for timer in self.timers.drain(..) {
            timer.abort();
        }
    }

    fn conclude(&mut self) {
        self.round += 1;
        self.awaiting_victory = false;
        self.cancel_timers();
    }
}

impl Drop for BullyElection {
    fn drop(&mut self) {
        self.cancel_timers();
    }
}
