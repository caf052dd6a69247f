//! Broker configuration types and utilities.
//!
//! Settings come from an optional TOML file, then `MURMUR_*` environment
//! variables, then command-line flags, each layer overriding the last.

use crate::error::{Error, Result};
use murmur_cluster::ClusterConfig;
use murmur_core::protocol::DEFAULT_MAX_LINE_LENGTH;
use murmur_core::telemetry::LoggingConfig;
use murmur_core::BrokerIdentity;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use validator::Validate;

/// Environment variable overriding the advertised host.
pub const ENV_HOST: &str = "MURMUR_HOST";
/// Environment variable overriding the port.
pub const ENV_PORT: &str = "MURMUR_PORT";
/// Environment variable holding a comma-separated peer list.
pub const ENV_PEERS: &str = "MURMUR_PEERS";

/// Configuration for the broker instance.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct BrokerConfig {
    /// This broker's identity
    #[validate]
    pub node: NodeConfig,

    /// Client listener settings
    #[validate]
    pub network: NetworkConfig,

    /// Peers and protocol timings
    #[validate]
    pub cluster: ClusterConfig,

    /// Log output
    pub logging: LoggingConfig,
}

/// The `(host, port)` this broker is known by.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct NodeConfig {
    /// Host advertised to peers and clients
    #[validate(length(min = 1))]
    pub host: String,

    /// Listening port
    #[validate(range(min = 1))]
    pub port: u16,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self { host: "127.0.0.1".to_string(), port: 8888 }
    }
}

/// Network configuration for client connections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address to bind; defaults to the node's `host:port`
    pub bind_address: Option<SocketAddr>,

    /// Maximum number of concurrent connections
    #[validate(range(min = 1, max = 100_000))]
    pub max_connections: usize,

    /// Longest accepted protocol line in bytes
    #[validate(range(min = 64))]
    pub max_line_length: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self { bind_address: None, max_connections: 10_000, max_line_length: DEFAULT_MAX_LINE_LENGTH }
    }
}

impl BrokerConfig {
    /// Load and validate a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::configuration(format!("cannot read {}: {e}", path.display())))?;
        let config: Self = toml::from_str(&text)?;
        config.validate_config()?;
        Ok(config)
    }

    /// Apply `MURMUR_HOST`, `MURMUR_PORT` and `MURMUR_PEERS` if set.
    ///
    /// # Errors
    /// Returns an error if a variable holds an unparsable value.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(host) = lookup(ENV_HOST) {
            self.node.host = host;
        }
        if let Some(port) = lookup(ENV_PORT) {
            self.node.port = port.trim().parse().map_err(|_| Error::configuration(format!("{ENV_PORT}={port}")))?;
        }
        if let Some(peers) = lookup(ENV_PEERS) {
            self.cluster.peers = parse_peer_list(&peers)?;
        }
        Ok(())
    }

    /// Validate every section.
    ///
    /// # Errors
    /// Returns the first set of validation failures.
    pub fn validate_config(&self) -> Result<()> {
        self.validate()?;
        Ok(())
    }

    /// This broker's identity
    #[must_use]
    pub fn identity(&self) -> BrokerIdentity {
        BrokerIdentity::new(self.node.host.clone(), self.node.port)
    }

    /// Address the listener binds to.
    #[must_use]
    pub fn listen_address(&self) -> String {
        self.network
            .bind_address
            .map_or_else(|| self.identity().socket_address(), |address| address.to_string())
    }

    /// Configured peers, excluding this broker.
    #[must_use]
    pub fn peers(&self) -> Vec<BrokerIdentity> {
        self.cluster.peers_excluding(&self.identity())
    }
}

/// Parse `host:port[,host:port...]`.
///
/// # Errors
/// Returns an error naming the first malformed entry.
pub fn parse_peer_list(value: &str) -> Result<Vec<BrokerIdentity>> {
    value
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.parse().map_err(|e| Error::configuration(format!("peer '{entry}': {e}"))))
        .collect()
}
