//! Broker error types.

use thiserror::Error;

/// Errors raised while configuring or running a broker.
#[derive(Error, Debug)]
pub enum Error {
    /// Shared protocol, network or configuration failure
    #[error(transparent)]
    Core(#[from] murmur_core::Error),

    /// Cluster coordination failure
    #[error(transparent)]
    Cluster(#[from] murmur_cluster::Error),

    /// The listening socket could not be bound
    #[error("Failed to bind {address}: {source}")]
    Bind {
        /// Address that was requested
        address: String,
        /// Underlying socket error
        #[source]
        source: std::io::Error,
    },

    /// Write attempted on a connection that is closing or closed
    #[error("Connection {0} is closed")]
    ConnectionClosed(String),

    /// A client write did not finish in time
    #[error("Write to {0} timed out")]
    WriteTimeout(String),

    /// Connection limit reached
    #[error("Maximum connections exceeded ({0})")]
    CapacityExceeded(usize),

    /// Invalid broker configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Malformed TOML configuration file
    #[error("Invalid configuration file: {0}")]
    Toml(#[from] toml::de::Error),

    /// Configuration rejected by validation rules
    #[error("Validation error: {0}")]
    Validation(#[from] validator::ValidationErrors),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for broker operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a configuration error
    pub fn configuration<T: std::fmt::Display>(message: T) -> Self {
        Self::Configuration(message.to_string())
    }

    /// Whether the error ends only the affected connection rather than the broker.
    #[must_use]
    pub const fn is_connection_local(&self) -> bool {
        matches!(self, Self::ConnectionClosed(_) | Self::WriteTimeout(_) | Self::Io(_))
    }
}
