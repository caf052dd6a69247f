//! # Communication Module
//!
//! Outbound peer sockets: one per configured peer, opened at startup with a
//! bounded number of attempts and never redialed afterwards. Election,
//! victory and gossip messages all leave through this table.

use crate::config::ClusterConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use murmur_core::protocol::Command;
use murmur_core::BrokerIdentity;
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, RwLock};
use tokio::time::{sleep, timeout};
use tracing::{debug, info, trace, warn};

/// Peer transport used by the cluster node.
///
/// Implementations must be cheap to share behind an `Arc`; the TCP version
/// holds a lock per peer so concurrent sends to one peer never interleave
/// bytes.
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// Write one command to a peer.
    ///
    /// # Errors
    /// [`Error::NotConnected`] if the peer has no table entry; any other
    /// error means the socket failed.
    async fn send(&self, peer: &BrokerIdentity, command: &Command) -> Result<()>;

    /// Close and remove a peer's entry. Returns whether one existed.
    async fn disconnect(&self, peer: &BrokerIdentity) -> bool;

    /// Peers that currently have an open outbound socket.
    async fn connected_peers(&self) -> Vec<BrokerIdentity>;
}

/// Connection information
#[derive(Debug)]
pub struct ConnectionInfo {
    /// Remote broker
    pub peer: BrokerIdentity,
    /// Resolved remote address
    pub address: SocketAddr,
    /// Connection established timestamp
    pub established_at: DateTime<Utc>,
    /// Bytes sent counter
    pub bytes_sent: AtomicU64,
    /// Messages sent counter
    pub messages_sent: AtomicU64,
}

impl Clone for ConnectionInfo {
    fn clone(&self) -> Self {
        Self {
            peer: self.peer.clone(),
            address: self.address,
            established_at: self.established_at,
            bytes_sent: AtomicU64::new(self.bytes_sent.load(Ordering::Relaxed)),
            messages_sent: AtomicU64::new(self.messages_sent.load(Ordering::Relaxed)),
        }
    }
}

impl ConnectionInfo {
    /// Create new connection info
    #[must_use]
    pub fn new(peer: BrokerIdentity, address: SocketAddr) -> Self {
        Self {
            peer,
            address,
            established_at: Utc::now(),
            bytes_sent: AtomicU64::new(0),
            messages_sent: AtomicU64::new(0),
        }
    }

    /// Record a written message
    pub fn record_sent(&self, bytes: u64) {
        self.bytes_sent.fetch_add(bytes, Ordering::Relaxed);
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Get total bytes sent
    pub fn total_bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    /// Get total messages sent
    pub fn total_messages_sent(&self) -> u64 {
        self.messages_sent.load(Ordering::Relaxed)
    }
}

#[derive(Debug)]
struct PeerLink {
    info: ConnectionInfo,
    stream: Mutex<TcpStream>,
}

/// TCP transport implementation
#[derive(Debug)]
pub struct TcpTransport {
    /// Active outbound connections
    connections: RwLock<HashMap<BrokerIdentity, Arc<PeerLink>>>,
    /// Upper bound on one write
    write_timeout: Duration,
}

impl TcpTransport {
    /// Create a transport with the given write timeout
    #[must_use]
    pub fn new(write_timeout: Duration) -> Self {
        Self { connections: RwLock::new(HashMap::new()), write_timeout }
    }

    /// Create a transport from cluster settings
    #[must_use]
    pub fn from_config(config: &ClusterConfig) -> Self {
        Self::new(config.write_timeout())
    }

    /// Open one outbound socket to a peer, replacing any existing entry.
    ///
    /// # Errors
    /// Returns an error if the TCP connection cannot be established.
    pub async fn connect(&self, peer: &BrokerIdentity) -> Result<()> {
        let stream = TcpStream::connect(peer.socket_address())
            .await
            .map_err(|e| Error::communication(format!("Failed to connect to {peer}: {e}")))?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!(%peer, error = %e, "could not set TCP_NODELAY");
        }
        let address = stream.peer_addr()?;

        let link = PeerLink { info: ConnectionInfo::new(peer.clone(), address), stream: Mutex::new(stream) };
        self.connections.write().await.insert(peer.clone(), Arc::new(link));

        info!(%peer, %address, "connected to peer");
        Ok(())
    }

    /// Connect with a bounded number of attempts and a fixed delay between
    /// them.
    ///
    /// # Errors
    /// Returns the last connection error once all attempts are exhausted.
    pub async fn connect_with_retry(
        &self,
        peer: &BrokerIdentity,
        attempts: u32,
        delay: Duration,
    ) -> Result<()> {
        let attempts = attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.connect(peer).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < attempts => {
                    debug!(%peer, attempt, attempts, error = %e, "peer connect failed, retrying");
                    attempt += 1;
                    sleep(delay).await;
                },
                Err(e) => return Err(e),
            }
        }
    }

    /// Connect to every peer, skipping those that stay unreachable.
    ///
    /// Returns the number of peers connected.
    pub async fn connect_all(&self, peers: &[BrokerIdentity], attempts: u32, delay: Duration) -> usize {
        let mut connected = 0;
        for peer in peers {
            match self.connect_with_retry(peer, attempts, delay).await {
                Ok(()) => connected += 1,
                Err(e) => warn!(%peer, attempts, error = %e, "giving up on peer"),
            }
        }
        connected
    }

    /// Snapshot of a peer's connection counters
    pub async fn connection_info(&self, peer: &BrokerIdentity) -> Option<ConnectionInfo> {
        self.connections.read().await.get(peer).map(|link| link.info.clone())
    }

    /// Number of open peer sockets
    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    async fn link(&self, peer: &BrokerIdentity) -> Option<Arc<PeerLink>> {
        self.connections.read().await.get(peer).cloned()
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn send(&self, peer: &BrokerIdentity, command: &Command) -> Result<()> {
        let link = self.link(peer).await.ok_or_else(|| Error::NotConnected { peer: peer.clone() })?;
        let line = command.to_line();

        let write = async {
            let mut stream = link.stream.lock().await;
            stream.write_all(line.as_bytes()).await?;
            stream.flush().await
        };
        let limit_ms = u64::try_from(self.write_timeout.as_millis()).unwrap_or(u64::MAX);
        timeout(self.write_timeout, write)
            .await
            .map_err(|_| Error::cluster_timeout(format!("send {} to {peer}", command.name()), limit_ms))??;

        link.info.record_sent(line.len() as u64);
        trace!(%peer, command = command.name(), "sent to peer");
        Ok(())
    }

    async fn disconnect(&self, peer: &BrokerIdentity) -> bool {
        let removed = self.connections.write().await.remove(peer);
        match removed {
            Some(link) => {
                let mut stream = link.stream.lock().await;
                if let Err(e) = stream.shutdown().await {
                    debug!(%peer, error = %e, "error closing peer socket");
                }
                info!(%peer, "disconnected from peer");
                true
            },
            None => false,
        }
    }

    async fn connected_peers(&self) -> Vec<BrokerIdentity> {
        let mut peers: Vec<BrokerIdentity> = self.connections.read().await.keys().cloned().collect();
        peers.sort();
        peers
    }
}
