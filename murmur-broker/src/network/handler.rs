//! Per-connection read loop.

use crate::network::{ClientConnection, ConnectionManager};
use crate::processor::CommandProcessor;
use murmur_core::protocol::{Command, LineDecoder, ProtocolError};
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::net::tcp::OwnedReadHalf;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Reads lines from one socket and dispatches them in arrival order.
#[derive(Debug)]
pub struct ConnectionHandler {
    connection: Arc<ClientConnection>,
    reader: OwnedReadHalf,
    decoder: LineDecoder,
    processor: Arc<CommandProcessor>,
    manager: Arc<ConnectionManager>,
}

impl ConnectionHandler {
    /// Create a handler for an accepted connection.
    #[must_use]
    pub fn new(
        connection: Arc<ClientConnection>,
        reader: OwnedReadHalf,
        max_line_length: usize,
        processor: Arc<CommandProcessor>,
        manager: Arc<ConnectionManager>,
    ) -> Self {
        Self { connection, reader, decoder: LineDecoder::with_max_line_length(max_line_length), processor, manager }
    }

    /// Run until the peer disconnects, a read fails or shutdown is signalled,
    /// then remove the connection from all broker state.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        let id = self.connection.id();
        loop {
            tokio::select! {
                read = self.reader.read_buf(self.decoder.buffer_mut()) => match read {
                    Ok(0) => {
                        debug!(connection = %id, "peer closed connection");
                        break;
                    },
                    Ok(n) => {
                        self.decoder.note_read(n);
                        self.connection.record_bytes_received(n as u64);
                        self.drain_lines().await;
                    },
                    Err(e) => {
                        debug!(connection = %id, error = %e, "read failed");
                        break;
                    },
                },
                _ = shutdown.recv() => break,
            }
        }

        self.processor.connection_closed(&self.connection).await;
        let _ = self.manager.remove_connection(id);
        self.connection.close().await;
        debug!(connection = %id, stats = ?self.decoder.stats(), "connection handler finished");
    }

    async fn drain_lines(&mut self) {
        loop {
            match self.decoder.next_line() {
                Ok(Some(line)) => {
                    self.connection.record_message_received();
                    match Command::parse(&line) {
                        Ok(command) => self.processor.dispatch(&self.connection, command).await,
                        Err(ProtocolError::EmptyLine) => {},
                        Err(e) => warn!(connection = %self.connection.id(), error = %e, "ignoring malformed command"),
                    }
                },
                Ok(None) => break,
                Err(e) => warn!(connection = %self.connection.id(), error = %e, "discarding unreadable line"),
            }
        }
    }
}
