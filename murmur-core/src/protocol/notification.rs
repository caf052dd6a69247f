//! Lines a broker sends back to clients.

use super::keywords;
use super::{parse_timestamp, ProtocolError, ProtocolResult, DELIMITER};
use crate::identity::BrokerIdentity;
use std::fmt;

/// Pushed to subscriber connections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// A published payload; the topic is not repeated.
    Delivery {
        /// Opaque payload as published
        payload: String,
        /// Broker clock at send
        timestamp: u64,
    },
    /// Leader liveness signal.
    Heartbeat {
        /// Broker clock at send
        timestamp: u64,
    },
}

impl Notification {
    /// Parse a line received on a subscriber connection.
    ///
    /// # Errors
    /// Returns an error when the line has no trailing timestamp.
    pub fn parse(line: &str) -> ProtocolResult<Self> {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() {
            return Err(ProtocolError::EmptyLine);
        }
        let (body, ts) = line.rsplit_once(DELIMITER).ok_or(ProtocolError::MissingField {
            command: "DELIVERY",
            field: "timestamp",
        })?;
        let timestamp = parse_timestamp(ts)?;
        if body == keywords::HEARTBEAT {
            Ok(Self::Heartbeat { timestamp })
        } else {
            Ok(Self::Delivery { payload: body.to_string(), timestamp })
        }
    }

    /// Lamport timestamp of the notification.
    #[must_use]
    pub const fn timestamp(&self) -> u64 {
        match self {
            Self::Delivery { timestamp, .. } | Self::Heartbeat { timestamp } => *timestamp,
        }
    }

    /// Encode as a terminated line.
    #[must_use]
    pub fn to_line(&self) -> String {
        format!("{self}\n")
    }
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Delivery { payload, timestamp } => write!(f, "{payload}{DELIMITER}{timestamp}"),
            Self::Heartbeat { timestamp } => {
                write!(f, "{}{DELIMITER}{timestamp}", keywords::HEARTBEAT)
            },
        }
    }
}

/// Answer to `GET_LEADER_ADDRESS`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaderReply {
    /// `host:port*ts`
    Leader {
        /// Current leader
        leader: BrokerIdentity,
        /// Broker clock at reply
        timestamp: u64,
    },
    /// `NO_LEADER*ts`, sent before any election has concluded.
    NoLeader {
        /// Broker clock at reply
        timestamp: u64,
    },
}

impl LeaderReply {
    /// Build a reply from an optional leader.
    #[must_use]
    pub fn from_leader(leader: Option<BrokerIdentity>, timestamp: u64) -> Self {
        match leader {
            Some(leader) => Self::Leader { leader, timestamp },
            None => Self::NoLeader { timestamp },
        }
    }

    /// Parse a reply line.
    ///
    /// # Errors
    /// Returns an error for anything other than `host:port*ts` or `NO_LEADER*ts`.
    pub fn parse(line: &str) -> ProtocolResult<Self> {
        let line = line.trim_end_matches(['\r', '\n']).trim();
        if line.is_empty() {
            return Err(ProtocolError::EmptyLine);
        }
        // Older brokers reply with a bare `host:port`.
        let (body, timestamp) = match line.rsplit_once(DELIMITER) {
            Some((body, ts)) => (body, parse_timestamp(ts)?),
            None => (line, 0),
        };
        if body == keywords::NO_LEADER {
            return Ok(Self::NoLeader { timestamp });
        }
        Ok(Self::Leader { leader: body.parse()?, timestamp })
    }

    /// The leader, if one is known.
    #[must_use]
    pub const fn leader(&self) -> Option<&BrokerIdentity> {
        match self {
            Self::Leader { leader, .. } => Some(leader),
            Self::NoLeader { .. } => None,
        }
    }

    /// Lamport timestamp of the reply.
    #[must_use]
    pub const fn timestamp(&self) -> u64 {
        match self {
            Self::Leader { timestamp, .. } | Self::NoLeader { timestamp } => *timestamp,
        }
    }

    /// Encode as a terminated line.
    #[must_use]
    pub fn to_line(&self) -> String {
        format!("{self}\n")
    }
}

impl fmt::Display for LeaderReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Leader { leader, timestamp } => write!(f, "{leader}{DELIMITER}{timestamp}"),
            Self::NoLeader { timestamp } => {
                write!(f, "{}{DELIMITER}{timestamp}", keywords::NO_LEADER)
            },
        }
    }
}
