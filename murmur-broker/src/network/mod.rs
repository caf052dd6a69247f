//! Network handling for client and peer connections.
//!
//! ## Key Components
//! - [`Listener`] - accept loop with graceful shutdown
//! - [`ConnectionHandler`] - per-socket framing and dispatch
//! - [`ClientConnection`] - write side and bookkeeping of one socket
//! - [`ConnectionManager`] - registry of live connections

pub mod connection;
pub mod handler;
pub mod listener;

pub use connection::{ClientConnection, ConnectionId, ConnectionManager, ConnectionState, ConnectionStats};
pub use handler::ConnectionHandler;
pub use listener::Listener;
