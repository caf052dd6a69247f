//! Newline-framed, `*`-delimited text protocol spoken between brokers and
//! clients.
//!
//! ```text
//! SUBSCRIBE*<topic>*<ts>
//! PUBLISH*<topic>*<json_payload>*<ts>
//! GET_LEADER_ADDRESS*<ts>
//! ELECTION*<host>:<port>*<ts>
//! ELECTION_ACK*<host>:<port>*<ts>
//! VICTORY*<host>:<port>*<ts>
//! GOSSIP*<json_cluster_snapshot>
//! ```
//!
//! Brokers answer clients with [`Notification`]s (`<payload>*<ts>` deliveries
//! and `HEARTBEAT*<ts>`) and leader queries with a [`LeaderReply`].

pub mod codec;
pub mod command;
pub mod digest;
pub mod error;
pub mod notification;

pub use codec::{DecoderStats, LineDecoder};
pub use command::Command;
pub use digest::{GossipDigest, PeerStatus, TopicAddresses};
pub use error::{ProtocolError, ProtocolResult};
pub use notification::{LeaderReply, Notification};

/// Field delimiter inside a line.
pub const DELIMITER: char = '*';

/// Line terminator.
pub const TERMINATOR: char = '\n';

/// Longest line a decoder buffers before discarding it.
pub const DEFAULT_MAX_LINE_LENGTH: usize = 1024 * 1024;

/// Command and reply keywords.
pub mod keywords {
    /// Subscribe to a topic.
    pub const SUBSCRIBE: &str = "SUBSCRIBE";
    /// Publish to a topic.
    pub const PUBLISH: &str = "PUBLISH";
    /// Ask which broker is leader.
    pub const GET_LEADER_ADDRESS: &str = "GET_LEADER_ADDRESS";
    /// Bully election challenge.
    pub const ELECTION: &str = "ELECTION";
    /// Answer to a challenge from a lower broker.
    pub const ELECTION_ACK: &str = "ELECTION_ACK";
    /// Leadership announcement.
    pub const VICTORY: &str = "VICTORY";
    /// Cluster state snapshot.
    pub const GOSSIP: &str = "GOSSIP";
    /// Leader liveness signal to subscribers.
    pub const HEARTBEAT: &str = "HEARTBEAT";
    /// Leader query answer when no leader is known.
    pub const NO_LEADER: &str = "NO_LEADER";
}

/// Parse a trailing timestamp field. Values beyond
/// [`MAX_TIMESTAMP`](crate::time::MAX_TIMESTAMP) are rejected.
pub(crate) fn parse_timestamp(field: &str) -> ProtocolResult<u64> {
    match field.trim().parse::<u64>() {
        Ok(ts) if ts <= crate::time::MAX_TIMESTAMP => Ok(ts),
        _ => Err(ProtocolError::InvalidTimestamp { value: field.to_string() }),
    }
}
