//! Error types for the murmur core library.

use crate::protocol::ProtocolError;
use thiserror::Error;

/// Main error type for murmur core operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Wire protocol violations
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Socket level failures
    #[error("Network error: {message}")]
    Network {
        /// Description of the failure
        message: String,
    },

    /// Serialization/deserialization errors
    #[error("Serialization error: {message}")]
    Serialization {
        /// Description of the failure
        message: String,
    },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration {
        /// Description of the failure
        message: String,
    },

    /// None of the configured brokers knows a leader
    #[error("No leader available (queried {queried} brokers)")]
    NoLeader {
        /// Number of brokers that were asked
        queried: usize,
    },

    /// An operation did not complete in time
    #[error("Operation timed out: {operation}")]
    Timeout {
        /// Operation that timed out
        operation: String,
    },
}

/// Result type alias for murmur core operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a network error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network { message: message.into() }
    }

    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout { operation: operation.into() }
    }

    /// Whether retrying against another broker or after a delay may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Network { .. } | Self::NoLeader { .. } | Self::Timeout { .. })
    }

    /// Short category label used in log fields.
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match self {
            Self::Protocol(_) => "protocol",
            Self::Network { .. } => "network",
            Self::Serialization { .. } => "serialization",
            Self::Configuration { .. } => "configuration",
            Self::NoLeader { .. } => "no_leader",
            Self::Timeout { .. } => "timeout",
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Network { message: err.to_string() }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization { message: err.to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_errors_are_retryable() {
        let err: Error = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused").into();
        assert!(err.is_retryable());
        assert_eq!(err.category(), "network");
    }

    #[test]
    fn test_configuration_errors_are_fatal() {
        let err = Error::configuration("missing host");
        assert!(!err.is_retryable());
        assert_eq!(err.to_string(), "Configuration error: missing host");
    }
}
