//! Protocol-specific error types.

use thiserror::Error;

/// Errors raised while framing or parsing protocol lines.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The line was empty after trimming.
    #[error("Empty line")]
    EmptyLine,

    /// The first field is not a known command keyword.
    #[error("Unknown command: {name}")]
    UnknownCommand {
        /// Keyword that was received.
        name: String,
    },

    /// A required positional field is absent or empty.
    #[error("{command} is missing field `{field}`")]
    MissingField {
        /// Command being parsed.
        command: &'static str,
        /// Name of the missing field.
        field: &'static str,
    },

    /// A `host:port` field did not parse.
    #[error("Invalid broker identity: {value:?}")]
    InvalidIdentity {
        /// Offending text.
        value: String,
    },

    /// A timestamp field is not an unsigned integer.
    #[error("Invalid timestamp: {value:?}")]
    InvalidTimestamp {
        /// Offending text.
        value: String,
    },

    /// The gossip payload is not a valid snapshot.
    #[error("Invalid gossip payload: {reason}")]
    InvalidGossip {
        /// Parser message.
        reason: String,
    },

    /// A buffered line exceeded the decoder limit and was dropped.
    #[error("Line of {actual} bytes exceeds maximum {max}")]
    LineTooLong {
        /// Bytes buffered without a terminator.
        actual: usize,
        /// Configured limit.
        max: usize,
    },

    /// A line was not valid UTF-8 and was dropped.
    #[error("Line is not valid UTF-8")]
    InvalidUtf8,
}

impl ProtocolError {
    /// Whether the error concerns a single line only, leaving the stream usable.
    #[must_use]
    pub const fn is_line_local(&self) -> bool {
        !matches!(self, Self::LineTooLong { .. })
    }
}

/// Result type alias for protocol operations.
pub type ProtocolResult<T> = std::result::Result<T, ProtocolError>;
