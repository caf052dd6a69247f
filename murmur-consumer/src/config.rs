//! Subscriber configuration types.

use murmur_core::BrokerIdentity;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the subscriber client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    /// Brokers asked for the leader, in order
    pub brokers: Vec<BrokerIdentity>,

    /// Topics subscribed on every (re)connect
    pub topics: Vec<String>,

    /// Silence after which the leader is presumed dead
    pub heartbeat_timeout_ms: u64,

    /// Bound on connecting to a broker and on a leader query
    pub connect_timeout_ms: u64,

    /// Pause between failed leader lookups
    pub reconnect_delay_ms: u64,

    /// Leader lookups per failover before giving up
    pub max_reconnect_attempts: u32,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            brokers: vec![BrokerIdentity::new("127.0.0.1", 8888)],
            topics: Vec::new(),
            heartbeat_timeout_ms: 10_000,
            connect_timeout_ms: 2000,
            reconnect_delay_ms: 1000,
            max_reconnect_attempts: 10,
        }
    }
}

impl ConsumerConfig {
    /// Configuration for the given brokers and topics with default timings.
    #[must_use]
    pub fn new(
        brokers: impl IntoIterator<Item = BrokerIdentity>,
        topics: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            brokers: brokers.into_iter().collect(),
            topics: topics.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Heartbeat deadline
    #[must_use]
    pub const fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    /// Connect and query timeout
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Delay between lookups
    #[must_use]
    pub const fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}
