//! Publisher configuration types.

use murmur_core::BrokerIdentity;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the publisher client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublisherConfig {
    /// Brokers asked for the leader, in order
    pub brokers: Vec<BrokerIdentity>,

    /// Bound on connecting to a broker and on a leader query
    pub connect_timeout_ms: u64,

    /// Pause between events in [`crate::Publisher::publish_all`]
    pub publish_delay_ms: u64,

    /// Attempts per event, re-resolving the leader between attempts
    pub retry_attempts: u32,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            brokers: vec![BrokerIdentity::new("127.0.0.1", 8888)],
            connect_timeout_ms: 2000,
            publish_delay_ms: 100,
            retry_attempts: 3,
        }
    }
}

impl PublisherConfig {
    /// Configuration for the given brokers with default timings.
    #[must_use]
    pub fn with_brokers(brokers: impl IntoIterator<Item = BrokerIdentity>) -> Self {
        Self { brokers: brokers.into_iter().collect(), ..Self::default() }
    }

    /// Connect and query timeout
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Delay between published events
    #[must_use]
    pub const fn publish_delay(&self) -> Duration {
        Duration::from_millis(self.publish_delay_ms)
    }
}
