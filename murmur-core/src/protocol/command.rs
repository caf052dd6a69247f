//! Typed commands received by a broker.

use super::keywords;
use super::{parse_timestamp, GossipDigest, ProtocolError, ProtocolResult, DELIMITER};
use crate::identity::BrokerIdentity;
use std::fmt;
use std::str::FromStr;

/// One decoded inbound line.
///
/// Client-originated commands tolerate a missing trailing timestamp since
/// simple producers often omit it; cluster commands always carry one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Register the sending connection for a topic.
    Subscribe {
        /// Topic name
        topic: String,
        /// Sender clock
        timestamp: Option<u64>,
    },
    /// Fan a payload out to every subscriber of a topic.
    Publish {
        /// Topic name
        topic: String,
        /// Opaque payload, normally JSON
        payload: String,
        /// Sender clock
        timestamp: Option<u64>,
    },
    /// Ask for the current leader address.
    GetLeaderAddress {
        /// Sender clock
        timestamp: Option<u64>,
    },
    /// A lower broker challenges for leadership.
    Election {
        /// Challenger
        candidate: BrokerIdentity,
        /// Sender clock
        timestamp: u64,
    },
    /// A higher broker acknowledges a challenge and takes over.
    ElectionAck {
        /// Acknowledging broker
        responder: BrokerIdentity,
        /// Sender clock
        timestamp: u64,
    },
    /// A broker announces itself as leader.
    Victory {
        /// New leader
        leader: BrokerIdentity,
        /// Sender clock
        timestamp: u64,
    },
    /// Periodic state snapshot from a peer.
    Gossip(GossipDigest),
}

impl Command {
    /// Parse one line (without its terminator).
    ///
    /// # Errors
    /// Returns a [`ProtocolError`] describing why the line was rejected.
    pub fn parse(line: &str) -> ProtocolResult<Self> {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() {
            return Err(ProtocolError::EmptyLine);
        }

        let (name, rest) = match line.split_once(DELIMITER) {
            Some((name, rest)) => (name, Some(rest)),
            None => (line, None),
        };
        let fields: Vec<&str> = rest.map(|r| r.split(DELIMITER).collect()).unwrap_or_default();

        match name.trim() {
            keywords::SUBSCRIBE => {
                let topic = required(&fields, 0, keywords::SUBSCRIBE, "topic")?;
                let timestamp = optional_timestamp(fields.get(1).copied())?;
                Ok(Self::Subscribe { topic: topic.to_string(), timestamp })
            },
            keywords::PUBLISH => Self::parse_publish(&fields),
            keywords::GET_LEADER_ADDRESS => {
                Ok(Self::GetLeaderAddress { timestamp: optional_timestamp(fields.first().copied())? })
            },
            keywords::ELECTION => {
                let (candidate, timestamp) = identity_and_timestamp(&fields, keywords::ELECTION)?;
                Ok(Self::Election { candidate, timestamp })
            },
            keywords::ELECTION_ACK => {
                let (responder, timestamp) = identity_and_timestamp(&fields, keywords::ELECTION_ACK)?;
                Ok(Self::ElectionAck { responder, timestamp })
            },
            keywords::VICTORY => {
                let (leader, timestamp) = identity_and_timestamp(&fields, keywords::VICTORY)?;
                Ok(Self::Victory { leader, timestamp })
            },
            keywords::GOSSIP => {
                let body = rest.filter(|b| !b.trim().is_empty()).ok_or(ProtocolError::MissingField {
                    command: keywords::GOSSIP,
                    field: "snapshot",
                })?;
                serde_json::from_str(body)
                    .map(Self::Gossip)
                    .map_err(|e| ProtocolError::InvalidGossip { reason: e.to_string() })
            },
            other => Err(ProtocolError::UnknownCommand { name: other.to_string() }),
        }
    }

    /// `PUBLISH*topic*payload[*ts]`; a payload containing the delimiter is re-joined.
    fn parse_publish(fields: &[&str]) -> ProtocolResult<Self> {
        let topic = required(fields, 0, keywords::PUBLISH, "topic")?;
        let body = fields.get(1..).unwrap_or_default();
        if body.is_empty() {
            return Err(ProtocolError::MissingField { command: keywords::PUBLISH, field: "payload" });
        }

        let (payload_fields, timestamp) = match body.split_last() {
            Some((last, init)) if !init.is_empty() => match last.trim().parse::<u64>() {
                Ok(_) => (init, Some(parse_timestamp(last)?)),
                Err(_) => (body, None),
            },
            _ => (body, None),
        };

        let mut delimiter = [0_u8; 4];
        let payload = payload_fields.join(&*DELIMITER.encode_utf8(&mut delimiter));
        Ok(Self::Publish { topic: topic.to_string(), payload, timestamp })
    }

    /// Keyword of this command.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Subscribe { .. } => keywords::SUBSCRIBE,
            Self::Publish { .. } => keywords::PUBLISH,
            Self::GetLeaderAddress { .. } => keywords::GET_LEADER_ADDRESS,
            Self::Election { .. } => keywords::ELECTION,
            Self::ElectionAck { .. } => keywords::ELECTION_ACK,
            Self::Victory { .. } => keywords::VICTORY,
            Self::Gossip(_) => keywords::GOSSIP,
        }
    }

    /// Lamport timestamp carried by the command, if any.
    #[must_use]
    pub const fn timestamp(&self) -> Option<u64> {
        match self {
            Self::Subscribe { timestamp, .. }
            | Self::Publish { timestamp, .. }
            | Self::GetLeaderAddress { timestamp } => *timestamp,
            Self::Election { timestamp, .. }
            | Self::ElectionAck { timestamp, .. }
            | Self::Victory { timestamp, .. } => Some(*timestamp),
            Self::Gossip(digest) => Some(digest.timestamp),
        }
    }

    /// Broker named by a cluster command.
    #[must_use]
    pub const fn sender(&self) -> Option<&BrokerIdentity> {
        match self {
            Self::Election { candidate, .. } => Some(candidate),
            Self::ElectionAck { responder, .. } => Some(responder),
            Self::Victory { leader, .. } => Some(leader),
            Self::Gossip(digest) => Some(&digest.addr),
            _ => None,
        }
    }

    /// Encode as a terminated line ready for the socket.
    #[must_use]
    pub fn to_line(&self) -> String {
        format!("{self}\n")
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let d = DELIMITER;
        match self {
            Self::Subscribe { topic, timestamp } => {
                write!(f, "{}{d}{topic}", keywords::SUBSCRIBE)?;
                write_timestamp(f, *timestamp)
            },
            Self::Publish { topic, payload, timestamp } => {
                write!(f, "{}{d}{topic}{d}{payload}", keywords::PUBLISH)?;
                write_timestamp(f, *timestamp)
            },
            Self::GetLeaderAddress { timestamp } => {
                write!(f, "{}", keywords::GET_LEADER_ADDRESS)?;
                write_timestamp(f, *timestamp)
            },
            Self::Election { candidate, timestamp } => {
                write!(f, "{}{d}{candidate}{d}{timestamp}", keywords::ELECTION)
            },
            Self::ElectionAck { responder, timestamp } => {
                write!(f, "{}{d}{responder}{d}{timestamp}", keywords::ELECTION_ACK)
            },
            Self::Victory { leader, timestamp } => {
                write!(f, "{}{d}{leader}{d}{timestamp}", keywords::VICTORY)
            },
            Self::Gossip(digest) => {
                let json = serde_json::to_string(digest).map_err(|_| fmt::Error)?;
                write!(f, "{}{d}{json}", keywords::GOSSIP)
            },
        }
    }
}

impl FromStr for Command {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn write_timestamp(f: &mut fmt::Formatter<'_>, timestamp: Option<u64>) -> fmt::Result {
    match timestamp {
        Some(ts) => write!(f, "{DELIMITER}{ts}"),
        None => Ok(()),
    }
}

fn required<'a>(
    fields: &[&'a str],
    index: usize,
    command: &'static str,
    field: &'static str,
) -> ProtocolResult<&'a str> {
    fields
        .get(index)
        .copied()
        .filter(|value| !value.trim().is_empty())
        .ok_or(ProtocolError::MissingField { command, field })
}

fn optional_timestamp(field: Option<&str>) -> ProtocolResult<Option<u64>> {
    match field {
        Some(value) if !value.trim().is_empty() => parse_timestamp(value).map(Some),
        _ => Ok(None),
    }
}

fn identity_and_timestamp(
    fields: &[&str],
    command: &'static str,
) -> ProtocolResult<(BrokerIdentity, u64)> {
    let identity = required(fields, 0, command, "identity")?.parse()?;
    let timestamp = parse_timestamp(required(fields, 1, command, "timestamp")?)?;
    Ok((identity, timestamp))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::PeerStatus;
    use std::collections::BTreeMap;

    #[test]
    fn test_parse_subscribe() {
        let cmd = Command::parse("SUBSCRIBE*Napa*12").unwrap();
        assert_eq!(cmd, Command::Subscribe { topic: "Napa".into(), timestamp: Some(12) });
        assert_eq!(cmd.to_line(), "SUBSCRIBE*Napa*12\n");
    }

    #[test]
    fn test_parse_subscribe_without_topic_fails() {
        assert_eq!(
            Command::parse("SUBSCRIBE"),
            Err(ProtocolError::MissingField { command: "SUBSCRIBE", field: "topic" })
        );
    }

    #[test]
    fn test_parse_publish_with_timestamp() {
        let cmd = Command::parse(r#"PUBLISH*Napa*{"event_id":"511.org/1"}*7"#).unwrap();
        assert_eq!(
            cmd,
            Command::Publish {
                topic: "Napa".into(),
                payload: r#"{"event_id":"511.org/1"}"#.into(),
                timestamp: Some(7),
            }
        );
    }

    #[test]
    fn test_parse_publish_without_timestamp() {
        let cmd = Command::parse(r#"PUBLISH*Solano*{"a":1}"#).unwrap();
        assert_eq!(
            cmd,
            Command::Publish { topic: "Solano".into(), payload: r#"{"a":1}"#.into(), timestamp: None }
        );
    }

    #[test]
    fn test_parse_publish_rejoins_delimited_payload() {
        let cmd = Command::parse("PUBLISH*Marin*a*b*c*99").unwrap();
        assert_eq!(
            cmd,
            Command::Publish { topic: "Marin".into(), payload: "a*b*c".into(), timestamp: Some(99) }
        );
    }

    #[test]
    fn test_parse_publish_numeric_payload_without_timestamp() {
        let cmd = Command::parse("PUBLISH*Marin*42").unwrap();
        assert_eq!(
            cmd,
            Command::Publish { topic: "Marin".into(), payload: "42".into(), timestamp: None }
        );
    }

    #[test]
    fn test_parse_election_messages() {
        assert_eq!(
            Command::parse("ELECTION*localhost:8888*3").unwrap(),
            Command::Election { candidate: BrokerIdentity::new("localhost", 8888), timestamp: 3 }
        );
        assert_eq!(
            Command::parse("ELECTION_ACK*broker2:8889*4").unwrap(),
            Command::ElectionAck { responder: BrokerIdentity::new("broker2", 8889), timestamp: 4 }
        );
        assert_eq!(
            Command::parse("VICTORY*broker3:8890*5\r").unwrap(),
            Command::Victory { leader: BrokerIdentity::new("broker3", 8890), timestamp: 5 }
        );
    }

    #[test]
    fn test_election_requires_timestamp() {
        assert!(matches!(
            Command::parse("ELECTION*localhost:8888"),
            Err(ProtocolError::MissingField { field: "timestamp", .. })
        ));
        assert!(matches!(
            Command::parse("VICTORY*localhost:8888*soon"),
            Err(ProtocolError::InvalidTimestamp { .. })
        ));
        assert!(matches!(
            Command::parse("ELECTION*localhost*1"),
            Err(ProtocolError::InvalidIdentity { .. })
        ));
    }

    #[test]
    fn test_timestamps_near_overflow_are_rejected() {
        let huge = u64::MAX.to_string();
        for line in [
            format!("SUBSCRIBE*Napa*{huge}"),
            format!("PUBLISH*Napa*{{\"id\":1}}*{huge}"),
            format!("GET_LEADER_ADDRESS*{huge}"),
            format!("VICTORY*localhost:8890*{huge}"),
        ] {
            assert!(
                matches!(Command::parse(&line), Err(ProtocolError::InvalidTimestamp { .. })),
                "{line} was accepted"
            );
        }
        assert_eq!(
            Command::parse(&format!("SUBSCRIBE*Napa*{}", crate::time::MAX_TIMESTAMP)).unwrap().timestamp(),
            Some(crate::time::MAX_TIMESTAMP)
        );
    }

    #[test]
    fn test_leader_query_variants() {
        assert_eq!(
            Command::parse("GET_LEADER_ADDRESS").unwrap(),
            Command::GetLeaderAddress { timestamp: None }
        );
        assert_eq!(
            Command::parse("GET_LEADER_ADDRESS*8").unwrap(),
            Command::GetLeaderAddress { timestamp: Some(8) }
        );
    }

    #[test]
    fn test_gossip_line() {
        let mut subs = BTreeMap::new();
        subs.insert("Napa".to_string(), ["ip1".to_string()].into_iter().collect());
        let digest = GossipDigest::new(BrokerIdentity::new("localhost", 8889), subs, 21);
        let line = Command::Gossip(digest.clone()).to_string();
        assert!(line.starts_with("GOSSIP*{"));

        let parsed = Command::parse(&line).unwrap();
        assert_eq!(parsed, Command::Gossip(digest));
        assert_eq!(parsed.timestamp(), Some(21));
        assert_eq!(parsed.sender(), Some(&BrokerIdentity::new("localhost", 8889)));
    }

    #[test]
    fn test_gossip_with_bad_json() {
        assert!(matches!(Command::parse("GOSSIP*{not json"), Err(ProtocolError::InvalidGossip { .. })));
        assert!(matches!(Command::parse("GOSSIP"), Err(ProtocolError::MissingField { .. })));
    }

    #[test]
    fn test_gossip_status_defaults_to_up() {
        let cmd = Command::parse(r#"GOSSIP*{"addr":["h",1],"timestamp":2}"#).unwrap();
        match cmd {
            Command::Gossip(d) => {
                assert_eq!(d.status, PeerStatus::Up);
                assert!(d.topic_subscribers.is_empty());
            },
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_unknown_and_empty() {
        assert_eq!(
            Command::parse("FROBNICATE*x"),
            Err(ProtocolError::UnknownCommand { name: "FROBNICATE".into() })
        );
        assert_eq!(Command::parse("   "), Err(ProtocolError::EmptyLine));
    }
}
