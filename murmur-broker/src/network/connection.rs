//! Connection state for clients and peers attached to a broker.
//!
//! Every accepted socket becomes a [`ClientConnection`], whether it belongs
//! to a producer, a subscriber or another broker. The read half is owned by
//! the connection's handler task; the write half lives here so that fan-out,
//! heartbeats and replies can write from any task.

use crate::error::{Error, Result};
use murmur_core::BrokerIdentity;
use parking_lot::Mutex;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Unique identifier for a client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Create a new unique connection ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Current state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Connection is active and ready for data
    Active,
    /// Connection is being gracefully closed
    Closing,
    /// Connection has been terminated
    Closed,
    /// A write failed; the connection is unusable
    Error,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Closing => write!(f, "closing"),
            Self::Closed => write!(f, "closed"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Statistics for a connection.
#[derive(Debug, Clone)]
pub struct ConnectionStats {
    /// Number of bytes received
    pub bytes_received: u64,
    /// Number of bytes sent
    pub bytes_sent: u64,
    /// Number of lines received
    pub messages_received: u64,
    /// Number of lines sent
    pub messages_sent: u64,
    /// Connection established timestamp
    pub connected_at: Instant,
    /// Last activity timestamp
    pub last_activity: Instant,
}

impl ConnectionStats {
    /// Create new connection statistics.
    #[must_use]
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            bytes_received: 0,
            bytes_sent: 0,
            messages_received: 0,
            messages_sent: 0,
            connected_at: now,
            last_activity: now,
        }
    }

    /// Update bytes received counter.
    pub fn add_bytes_received(&mut self, bytes: u64) {
        self.bytes_received = self.bytes_received.saturating_add(bytes);
        self.last_activity = Instant::now();
    }

    /// Count one received line.
    pub fn add_message_received(&mut self) {
        self.messages_received = self.messages_received.saturating_add(1);
    }

    /// Count one sent line of `bytes` length.
    pub fn add_message_sent(&mut self, bytes: u64) {
        self.bytes_sent = self.bytes_sent.saturating_add(bytes);
        self.messages_sent = self.messages_sent.saturating_add(1);
        self.last_activity = Instant::now();
    }

    /// Get connection duration.
    #[must_use]
    pub fn connection_duration(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

impl Default for ConnectionStats {
    fn default() -> Self {
        Self::new()
    }
}

/// An accepted socket's write side plus bookkeeping.
#[derive(Debug)]
pub struct ClientConnection {
    id: ConnectionId,
    remote_addr: SocketAddr,
    state: Mutex<ConnectionState>,
    stats: Mutex<ConnectionStats>,
    writer: tokio::sync::Mutex<OwnedWriteHalf>,
    /// Set once a cluster message reveals the connection belongs to a peer
    peer: Mutex<Option<BrokerIdentity>>,
    write_timeout: Duration,
}

impl ClientConnection {
    /// Wrap the write half of an accepted socket.
    #[must_use]
    pub fn new(remote_addr: SocketAddr, writer: OwnedWriteHalf, write_timeout: Duration) -> Self {
        Self {
            id: ConnectionId::new(),
            remote_addr,
            state: Mutex::new(ConnectionState::Active),
            stats: Mutex::new(ConnectionStats::new()),
            writer: tokio::sync::Mutex::new(writer),
            peer: Mutex::new(None),
            write_timeout,
        }
    }

    /// Get the connection ID.
    #[must_use]
    pub const fn id(&self) -> ConnectionId {
        self.id
    }

    /// Get the remote socket address.
    #[must_use]
    pub const fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Address string published in gossip.
    #[must_use]
    pub fn address(&self) -> String {
        self.remote_addr.to_string()
    }

    /// Get the current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    /// Whether writes are still attempted.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state() == ConnectionState::Active
    }

    /// Get connection statistics.
    #[must_use]
    pub fn stats(&self) -> ConnectionStats {
        self.stats.lock().clone()
    }

    /// Update statistics for `bytes` read from the socket.
    pub fn record_bytes_received(&self, bytes: u64) {
        self.stats.lock().add_bytes_received(bytes);
    }

    /// Update statistics for one decoded line.
    pub fn record_message_received(&self) {
        self.stats.lock().add_message_received();
    }

    /// Remember that this connection belongs to `peer`. Returns false if it
    /// was already tagged.
    pub fn tag_peer(&self, peer: &BrokerIdentity) -> bool {
        let mut tag = self.peer.lock();
        if tag.is_some() {
            return false;
        }
        debug!(connection = %self.id, %peer, "connection identified as peer");
        *tag = Some(peer.clone());
        true
    }

    /// Peer identity, if this is a broker-to-broker connection.
    #[must_use]
    pub fn peer(&self) -> Option<BrokerIdentity> {
        self.peer.lock().clone()
    }

    /// Write one complete protocol line.
    ///
    /// # Errors
    /// Returns an error if the connection is no longer active or the write
    /// fails or stalls; the connection is then marked [`ConnectionState::Error`].
    pub async fn send_line(&self, line: &str) -> Result<()> {
        if !self.is_active() {
            return Err(Error::ConnectionClosed(self.id.to_string()));
        }

        let outcome = {
            let mut writer = self.writer.lock().await;
            timeout(self.write_timeout, writer.write_all(line.as_bytes())).await
        };

        match outcome {
            Ok(Ok(())) => {
                self.stats.lock().add_message_sent(line.len() as u64);
                Ok(())
            },
            Ok(Err(e)) => {
                *self.state.lock() = ConnectionState::Error;
                Err(Error::Io(e))
            },
            Err(_) => {
                *self.state.lock() = ConnectionState::Error;
                Err(Error::WriteTimeout(self.id.to_string()))
            },
        }
    }

    /// Shut down the write side.
    pub async fn close(&self) {
        {
            let mut state = self.state.lock();
            if *state == ConnectionState::Closed {
                return;
            }
            *state = ConnectionState::Closing;
        }
        if let Err(e) = self.writer.lock().await.shutdown().await {
            debug!(connection = %self.id, error = %e, "error during connection shutdown");
        }
        *self.state.lock() = ConnectionState::Closed;
    }
}

impl PartialEq for ClientConnection {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ClientConnection {}

/// Tracks every live connection of a broker.
#[derive(Debug)]
pub struct ConnectionManager {
    /// Active connections mapped by ID
    connections: dashmap::DashMap<ConnectionId, Arc<ClientConnection>>,
    /// Maximum number of concurrent connections
    max_connections: usize,
    /// Connections ever registered
    connection_counter: AtomicU64,
}

impl ConnectionManager {
    /// Create a new connection manager.
    #[must_use]
    pub fn new(max_connections: usize) -> Self {
        Self { connections: dashmap::DashMap::new(), max_connections, connection_counter: AtomicU64::new(0) }
    }

    /// Register a connection.
    ///
    /// # Errors
    /// Returns an error if the connection limit is reached.
    pub fn add_connection(&self, connection: Arc<ClientConnection>) -> Result<()> {
        if self.connections.len() >= self.max_connections {
            warn!(remote = %connection.remote_addr(), limit = self.max_connections, "connection limit reached");
            return Err(Error::CapacityExceeded(self.max_connections));
        }

        let id = connection.id();
        info!(connection = %id, remote = %connection.remote_addr(), "accepted connection");
        self.connections.insert(id, connection);
        self.connection_counter.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Remove a connection from the manager.
    pub fn remove_connection(&self, id: ConnectionId) -> Option<Arc<ClientConnection>> {
        let removed = self.connections.remove(&id).map(|(_, connection)| connection);
        if let Some(connection) = &removed {
            debug!(connection = %id, remote = %connection.remote_addr(), "removed connection");
        }
        removed
    }

    /// Get the current number of active connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Get the total number of connections ever registered.
    #[must_use]
    pub fn total_connections(&self) -> u64 {
        self.connection_counter.load(Ordering::Relaxed)
    }

    /// Check if the manager can accept new connections.
    #[must_use]
    pub fn can_accept_connection(&self) -> bool {
        self.connections.len() < self.max_connections
    }

    /// Close and forget every connection.
    pub async fn close_all(&self) -> usize {
        let connections: Vec<Arc<ClientConnection>> =
            self.connections.iter().map(|entry| Arc::clone(entry.value())).collect();
        self.connections.clear();
        for connection in &connections {
            connection.close().await;
        }
        if !connections.is_empty() {
            info!(count = connections.len(), "closed all connections");
        }
        connections.len()
    }
}
