//! # Cluster Error Handling
//!
//! Errors raised by peer transport, election and gossip operations.

use murmur_core::BrokerIdentity;
use thiserror::Error;

/// Cluster-specific error types.
#[derive(Error, Debug)]
pub enum Error {
    /// Inter-node communication failures
    #[error("Communication error: {0}")]
    Communication(String),

    /// No outbound socket exists for the peer
    #[error("Not connected to peer {peer}")]
    NotConnected {
        /// Peer that was addressed
        peer: BrokerIdentity,
    },

    /// Cluster configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Configuration rejected by validation rules
    #[error("Validation error: {0}")]
    Validation(#[from] validator::ValidationErrors),

    /// Cluster operation timeout
    #[error("Operation '{operation}' timed out after {timeout_ms}ms")]
    ClusterTimeout {
        /// Operation that timed out
        operation: String,
        /// Timeout in milliseconds
        timeout_ms: u64,
    },

    /// Wire protocol violation
    #[error("Protocol error: {0}")]
    Protocol(#[from] murmur_core::protocol::ProtocolError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for cluster operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a communication error
    pub fn communication<T: std::fmt::Display>(message: T) -> Self {
        Self::Communication(message.to_string())
    }

    /// Create a configuration error
    pub fn configuration<T: std::fmt::Display>(message: T) -> Self {
        Self::Configuration(message.to_string())
    }

    /// Create a timeout error
    pub fn cluster_timeout<T: std::fmt::Display>(operation: T, timeout_ms: u64) -> Self {
        Self::ClusterTimeout { operation: operation.to_string(), timeout_ms }
    }

    /// Check if the error is retryable
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Communication(_) | Self::ClusterTimeout { .. } | Self::Io(_))
    }

    /// Whether the error means the peer is unreachable and should go through
    /// failure handling. A missing table entry is not a fresh failure.
    #[must_use]
    pub const fn is_peer_failure(&self) -> bool {
        matches!(self, Self::Communication(_) | Self::ClusterTimeout { .. } | Self::Io(_))
    }

    /// Get the error category for logging
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match self {
            Self::Communication(_) | Self::NotConnected { .. } | Self::Io(_) => "communication",
            Self::Configuration(_) | Self::Validation(_) => "configuration",
            Self::ClusterTimeout { .. } => "timeout",
            Self::Protocol(_) | Self::Json(_) => "protocol",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_connected_is_not_a_peer_failure() {
        let err = Error::NotConnected { peer: BrokerIdentity::new("localhost", 8889) };
        assert!(!err.is_peer_failure());
        assert_eq!(err.category(), "communication");
        assert_eq!(err.to_string(), "Not connected to peer localhost:8889");
    }

    #[test]
    fn test_io_errors_trigger_failure_handling() {
        let err: Error = std::io::Error::from(std::io::ErrorKind::BrokenPipe).into();
        assert!(err.is_peer_failure());
        assert!(err.is_retryable());
    }
}
