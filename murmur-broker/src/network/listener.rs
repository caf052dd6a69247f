//! Accept loop with graceful shutdown.

use crate::config::NetworkConfig;
use crate::network::{ClientConnection, ConnectionHandler, ConnectionManager};
use crate::processor::CommandProcessor;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// Accepts sockets and spawns a [`ConnectionHandler`] for each.
#[derive(Debug)]
pub struct Listener {
    listener: TcpListener,
    config: NetworkConfig,
    write_timeout: Duration,
    manager: Arc<ConnectionManager>,
    processor: Arc<CommandProcessor>,
    shutdown: broadcast::Sender<()>,
}

impl Listener {
    /// Wrap a bound listener.
    #[must_use]
    pub fn new(
        listener: TcpListener,
        config: NetworkConfig,
        write_timeout: Duration,
        manager: Arc<ConnectionManager>,
        processor: Arc<CommandProcessor>,
        shutdown: broadcast::Sender<()>,
    ) -> Self {
        Self { listener, config, write_timeout, manager, processor, shutdown }
    }

    /// Accept until shutdown, then close every connection.
    pub async fn run(self) {
        let mut shutdown_rx = self.shutdown.subscribe();
        if let Ok(address) = self.listener.local_addr() {
            info!(%address, max_connections = self.config.max_connections, "listening");
        }

        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, remote)) => self.admit(stream, remote),
                    Err(e) => {
                        error!(error = %e, "error accepting connection");
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    },
                },
                _ = shutdown_rx.recv() => {
                    info!("received shutdown signal, stopping listener");
                    break;
                },
            }
        }

        self.manager.close_all().await;
    }

    fn admit(&self, stream: TcpStream, remote: SocketAddr) {
        if !self.manager.can_accept_connection() {
            warn!(%remote, limit = self.config.max_connections, "rejecting connection at capacity");
            return;
        }
        if let Err(e) = stream.set_nodelay(true) {
            warn!(%remote, error = %e, "failed to set TCP_NODELAY");
        }

        let (reader, writer) = stream.into_split();
        let connection = Arc::new(ClientConnection::new(remote, writer, self.write_timeout));
        if self.manager.add_connection(Arc::clone(&connection)).is_err() {
            return;
        }

        let handler = ConnectionHandler::new(
            connection,
            reader,
            self.config.max_line_length,
            Arc::clone(&self.processor),
            Arc::clone(&self.manager),
        );
        tokio::spawn(handler.run(self.shutdown.subscribe()));
    }
}
