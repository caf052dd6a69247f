//! # Cluster Configuration
//!
//! Peer list and protocol timings for a broker's cluster coordination.

use crate::error::Result;
use murmur_core::BrokerIdentity;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use validator::{Validate, ValidationError};

/// Cluster coordination settings.
///
/// Millisecond fields keep the TOML representation flat; the accessor
/// methods return [`Duration`]s.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(default)]
#[validate(schema(function = "validate_timings"))]
pub struct ClusterConfig {
    /// Every other broker in the cluster, fixed at launch, as `host:port`
    #[serde(with = "peer_list")]
    pub peers: Vec<BrokerIdentity>,

    /// How long a challenger waits for ELECTION_ACK or VICTORY
    #[validate(range(min = 10, max = 60000))]
    pub election_timeout_ms: u64,

    /// Gossip and heartbeat cadence
    #[validate(range(min = 10, max = 60000))]
    pub gossip_interval_ms: u64,

    /// Silence after which a peer is declared failed
    #[validate(range(min = 50, max = 600_000))]
    pub failure_timeout_ms: u64,

    /// How often last-contact times are scanned
    #[validate(range(min = 10, max = 60000))]
    pub failure_check_interval_ms: u64,

    /// Connection attempts per peer at startup
    #[validate(range(min = 1, max = 20))]
    pub connect_attempts: u32,

    /// Delay between connection attempts
    #[validate(range(min = 0, max = 60000))]
    pub connect_retry_delay_ms: u64,

    /// Upper bound on a single peer write
    #[validate(range(min = 10, max = 60000))]
    pub write_timeout_ms: u64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            peers: Vec::new(),
            election_timeout_ms: 2000,
            gossip_interval_ms: 3000,
            failure_timeout_ms: 30000,
            failure_check_interval_ms: 5000,
            connect_attempts: 3,
            connect_retry_delay_ms: 2000,
            write_timeout_ms: 5000,
        }
    }
}

fn validate_timings(config: &ClusterConfig) -> std::result::Result<(), ValidationError> {
    if config.failure_timeout_ms <= config.gossip_interval_ms {
        let mut err = ValidationError::new("failure_timeout");
        err.message = Some("failure_timeout_ms must exceed gossip_interval_ms".into());
        return Err(err);
    }
    Ok(())
}

impl ClusterConfig {
    /// Create a new configuration builder
    #[must_use]
    pub fn builder() -> ClusterConfigBuilder {
        ClusterConfigBuilder::default()
    }

    /// Election acknowledgement timeout
    #[must_use]
    pub const fn election_timeout(&self) -> Duration {
        Duration::from_millis(self.election_timeout_ms)
    }

    /// Gossip round interval
    #[must_use]
    pub const fn gossip_interval(&self) -> Duration {
        Duration::from_millis(self.gossip_interval_ms)
    }

    /// Peer silence threshold
    #[must_use]
    pub const fn failure_timeout(&self) -> Duration {
        Duration::from_millis(self.failure_timeout_ms)
    }

    /// Failure scan interval
    #[must_use]
    pub const fn failure_check_interval(&self) -> Duration {
        Duration::from_millis(self.failure_check_interval_ms)
    }

    /// Delay between startup connection attempts
    #[must_use]
    pub const fn connect_retry_delay(&self) -> Duration {
        Duration::from_millis(self.connect_retry_delay_ms)
    }

    /// Peer write timeout
    #[must_use]
    pub const fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    /// Peers other than `own`, deduplicated and sorted.
    #[must_use]
    pub fn peers_excluding(&self, own: &BrokerIdentity) -> Vec<BrokerIdentity> {
        let mut peers: Vec<BrokerIdentity> =
            self.peers.iter().filter(|peer| *peer != own).cloned().collect();
        peers.sort();
        peers.dedup();
        peers
    }

    /// Validate the configuration
    ///
    /// # Errors
    /// Returns an error describing the first rule that failed.
    pub fn validate_config(&self) -> Result<()> {
        self.validate()?;
        Ok(())
    }
}

/// Builder for [`ClusterConfig`].
#[derive(Debug, Default)]
pub struct ClusterConfigBuilder {
    config: ClusterConfig,
}

impl ClusterConfigBuilder {
    /// Add a peer
    #[must_use]
    pub fn peer(mut self, peer: BrokerIdentity) -> Self {
        self.config.peers.push(peer);
        self
    }

    /// Replace the peer list
    #[must_use]
    pub fn peers(mut self, peers: impl IntoIterator<Item = BrokerIdentity>) -> Self {
        self.config.peers = peers.into_iter().collect();
        self
    }

    /// Set the election timeout
    #[must_use]
    pub fn election_timeout(mut self, timeout: Duration) -> Self {
        self.config.election_timeout_ms = duration_ms(timeout);
        self
    }

    /// Set the gossip interval
    #[must_use]
    pub fn gossip_interval(mut self, interval: Duration) -> Self {
        self.config.gossip_interval_ms = duration_ms(interval);
        self
    }

    /// Set the failure timeout
    #[must_use]
    pub fn failure_timeout(mut self, timeout: Duration) -> Self {
        self.config.failure_timeout_ms = duration_ms(timeout);
        self
    }

    /// Set the failure scan interval
    #[must_use]
    pub fn failure_check_interval(mut self, interval: Duration) -> Self {
        self.config.failure_check_interval_ms = duration_ms(interval);
        self
    }

    /// Set startup connection attempts and delay
    #[must_use]
    pub fn connect_retry(mut self, attempts: u32, delay: Duration) -> Self {
        self.config.connect_attempts = attempts;
        self.config.connect_retry_delay_ms = duration_ms(delay);
        self
    }

    /// Build and validate
    ///
    /// # Errors
    /// Returns an error if the resulting configuration is invalid.
    pub fn build(self) -> Result<ClusterConfig> {
        self.config.validate_config()?;
        Ok(self.config)
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

mod peer_list {
    use murmur_core::BrokerIdentity;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(peers: &[BrokerIdentity], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(peers.iter().map(ToString::to_string))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<BrokerIdentity>, D::Error> {
        Vec::<String>::deserialize(deserializer)?
            .iter()
            .map(|peer| peer.parse().map_err(serde::de::Error::custom))
            .collect()
    }
}

/// One-line summary for startup logs.
pub(crate) fn describe(config: &ClusterConfig) -> String {
    format!(
        "{} peers, election {}ms, gossip {}ms, failure {}ms",
        config.peers.len(),
        config.election_timeout_ms,
        config.gossip_interval_ms,
        config.failure_timeout_ms
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn test_defaults_are_valid() {
        let config = ClusterConfig::default();
        assert!(config.validate_config().is_ok());
        assert_eq!(config.election_timeout(), Duration::from_secs(2));
        assert_eq!(config.gossip_interval(), Duration::from_secs(3));
        assert_eq!(config.failure_timeout(), Duration::from_secs(30));
        assert_eq!(config.connect_attempts, 3);
    }

    #[test]
    fn test_failure_timeout_must_exceed_gossip_interval() {
        let result = ClusterConfig::builder()
            .gossip_interval(Duration::from_secs(5))
            .failure_timeout(Duration::from_secs(5))
            .build();
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[test]
    fn test_out_of_range_attempts() {
        let result = ClusterConfig::builder().connect_retry(0, Duration::ZERO).build();
        assert!(result.is_err());
    }

    #[test]
    fn test_peers_excluding_self() {
        let own = BrokerIdentity::new("broker2", 8889);
        let config = ClusterConfig::builder()
            .peers([
                BrokerIdentity::new("broker3", 8890),
                own.clone(),
                BrokerIdentity::new("broker1", 8888),
                BrokerIdentity::new("broker3", 8890),
            ])
            .build()
            .unwrap();
        let peers = config.peers_excluding(&own);
        assert_eq!(
            peers,
            vec![BrokerIdentity::new("broker1", 8888), BrokerIdentity::new("broker3", 8890)]
        );
    }

    #[test]
    fn test_peers_serialize_as_host_port_strings() {
        let config = ClusterConfig::builder().peer(BrokerIdentity::new("broker1", 8888)).build().unwrap();
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["peers"], serde_json::json!(["broker1:8888"]));

        let back: ClusterConfig =
            serde_json::from_str(r#"{"peers":["broker3:8890"],"gossip_interval_ms":500}"#).unwrap();
        assert_eq!(back.peers, vec![BrokerIdentity::new("broker3", 8890)]);
        assert_eq!(back.gossip_interval_ms, 500);
        assert_eq!(back.election_timeout_ms, 2000);

        assert!(serde_json::from_str::<ClusterConfig>(r#"{"peers":["nonsense"]}"#).is_err());
    }

    #[test]
    fn test_describe() {
        assert_eq!(
            describe(&ClusterConfig::default()),
            "0 peers, election 2000ms, gossip 3000ms, failure 30000ms"
        );
    }
}
