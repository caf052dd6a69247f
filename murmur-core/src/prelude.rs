//! Common imports for murmur crates.

pub use crate::error::{Error, Result};
pub use crate::identity::BrokerIdentity;
pub use crate::message::Event;
pub use crate::protocol::{
    Command, GossipDigest, LeaderReply, LineDecoder, Notification, PeerStatus, ProtocolError,
    TopicAddresses,
};
pub use crate::time::LamportClock;
