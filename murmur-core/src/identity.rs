//! Broker identity: the `(host, port)` pair naming a cluster member.

use crate::protocol::ProtocolError;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Identity of a broker in the cluster.
///
/// Identities are ordered by port first; the host string only breaks ties
/// between brokers that listen on the same port. The bully election uses this
/// ordering everywhere it needs to decide which broker is "higher".
///
/// On the wire an identity is written as `host:port`; inside gossip JSON it is
/// a two-element array `["host", port]`.
///
/// ```rust
/// use murmur_core::BrokerIdentity;
///
/// let a: BrokerIdentity = "broker1:8888".parse().unwrap();
/// let c = BrokerIdentity::new("broker3", 8890);
/// assert!(c > a);
/// assert_eq!(c.to_string(), "broker3:8890");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "(String, u16)", into = "(String, u16)")]
pub struct BrokerIdentity {
    host: String,
    port: u16,
}

impl BrokerIdentity {
    /// Create a new identity.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self { host: host.into(), port }
    }

    /// Advertised host name or address.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Listening port.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// `host:port` form suitable for `TcpStream::connect`.
    #[must_use]
    pub fn socket_address(&self) -> String {
        self.to_string()
    }
}

impl Ord for BrokerIdentity {
    fn cmp(&self, other: &Self) -> Ordering {
        self.port.cmp(&other.port).then_with(|| self.host.cmp(&other.host))
    }
}

impl PartialOrd for BrokerIdentity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for BrokerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for BrokerIdentity {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ProtocolError::InvalidIdentity { value: s.to_string() };
        let (host, port) = s.trim().rsplit_once(':').ok_or_else(invalid)?;
        if host.is_empty() {
            return Err(invalid());
        }
        let port = port.parse::<u16>().map_err(|_| invalid())?;
        Ok(Self::new(host, port))
    }
}

impl From<(String, u16)> for BrokerIdentity {
    fn from((host, port): (String, u16)) -> Self {
        Self { host, port }
    }
}

impl From<BrokerIdentity> for (String, u16) {
    fn from(identity: BrokerIdentity) -> Self {
        (identity.host, identity.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let identity: BrokerIdentity = "localhost:8889".parse().unwrap();
        assert_eq!(identity.host(), "localhost");
        assert_eq!(identity.port(), 8889);
        assert_eq!(identity.to_string(), "localhost:8889");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("localhost".parse::<BrokerIdentity>().is_err());
        assert!(":8888".parse::<BrokerIdentity>().is_err());
        assert!("host:notaport".parse::<BrokerIdentity>().is_err());
        assert!("host:70000".parse::<BrokerIdentity>().is_err());
    }

    #[test]
    fn test_port_dominates_ordering() {
        // Lexically "zeta" > "alpha", but the port decides.
        let low = BrokerIdentity::new("zeta", 8888);
        let high = BrokerIdentity::new("alpha", 8890);
        assert!(high > low);

        let mut brokers = vec![
            BrokerIdentity::new("broker3", 8890),
            BrokerIdentity::new("broker1", 8888),
            BrokerIdentity::new("broker2", 8889),
        ];
        brokers.sort();
        let ports: Vec<u16> = brokers.iter().map(BrokerIdentity::port).collect();
        assert_eq!(ports, vec![8888, 8889, 8890]);
    }

    #[test]
    fn test_host_breaks_port_ties() {
        let a = BrokerIdentity::new("broker-a", 8888);
        let b = BrokerIdentity::new("broker-b", 8888);
        assert!(b > a);
        assert_ne!(a, b);
    }

    #[test]
    fn test_json_form_is_host_port_array() {
        let identity = BrokerIdentity::new("localhost", 8888);
        let json = serde_json::to_string(&identity).unwrap();
        assert_eq!(json, r#"["localhost",8888]"#);
        let back: BrokerIdentity = serde_json::from_str(&json).unwrap();
        assert_eq!(back, identity);
    }
}
