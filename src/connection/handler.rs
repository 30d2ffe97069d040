//! Connection Session
//!
//! Each client gets its own handler task that runs in a loop, reading
//! frames and writing replies.
//!
//! ## Connection Lifecycle
//!
//! ```text
//! 1. Client connects, ConnectionHandler spawned
//!        │
//!        ▼
//! 2. ┌──────────────────────────────┐
//!    │  Main Loop                   │
//!    │   read bytes ─> parse frame  │
//!    │        ▲            │        │
//!    │        │            ▼        │
//!    │   send reply <─ dispatch     │
//!    └──────────────────────────────┘
//!        │
//!        ▼
//! 3. Client disconnects, protocol error, or server shutdown
//! ```
//!
//! ## Error Policy
//!
//! - Unknown commands and bad arguments are answered with `-ERR ...` and
//!   the connection stays open.
//! - A malformed frame is answered with `-ERR Protocol error: ...` and the
//!   connection is closed; nothing in that frame runs.
//!
//! Commands from one connection run strictly in order: a command's reply is
//! written and flushed before the next frame is parsed.

use crate::commands::Dispatcher;
use crate::error::Error;
use crate::protocol::{parse_frame, Command, ParseError, MAX_FRAME_SIZE};
use bytes::{Bytes, BytesMut};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::{debug, error, info, trace, warn};

/// Maximum size for the read buffer: one maximal frame plus slack for the
/// header the parser has not finished reading yet.
const MAX_BUFFER_SIZE: usize = MAX_FRAME_SIZE + 64 * 1024;

/// Initial buffer capacity
const INITIAL_BUFFER_SIZE: usize = 4096;

/// Statistics for connection handling
#[derive(Debug, Default)]
pub struct ConnectionStats {
    /// Total number of connections accepted
    pub connections_accepted: AtomicU64,
    /// Currently active connections
    pub active_connections: AtomicU64,
    /// Total commands processed
    pub commands_processed: AtomicU64,
    /// Commands answered with an error reply
    pub command_errors: AtomicU64,
    /// Total bytes read
    pub bytes_read: AtomicU64,
    /// Total bytes written
    pub bytes_written: AtomicU64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn command_processed(&self) {
        self.commands_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn command_failed(&self) {
        self.command_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bytes_read(&self, count: usize) {
        self.bytes_read.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn bytes_written(&self, count: usize) {
        self.bytes_written.fetch_add(count as u64, Ordering::Relaxed);
    }
}

/// Handles a single client connection.
pub struct ConnectionHandler {
    stream: BufWriter<TcpStream>,

    /// Client's address (for logging)
    addr: SocketAddr,

    /// Bytes received but not yet parsed
    buffer: BytesMut,

    dispatcher: Dispatcher,

    /// Flips to `true` when the server shuts down
    shutdown: watch::Receiver<bool>,

    stats: Arc<ConnectionStats>,
}

impl ConnectionHandler {
    pub fn new(
        stream: TcpStream,
        addr: SocketAddr,
        dispatcher: Dispatcher,
        stats: Arc<ConnectionStats>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        stats.connection_opened();

        Self {
            stream: BufWriter::new(stream),
            addr,
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            dispatcher,
            shutdown,
            stats,
        }
    }

    /// Runs the connection until the client leaves, a protocol error
    /// occurs, or the server shuts down.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        debug!(client = %self.addr, "Client connected");

        let result = self.main_loop().await;

        match &result {
            Ok(()) => debug!(client = %self.addr, "Client disconnected gracefully"),
            Err(ConnectionError::ClientDisconnected) => {
                debug!(client = %self.addr, "Client disconnected")
            }
            Err(ConnectionError::ServerShutdown) => {
                debug!(client = %self.addr, "Connection closed for shutdown")
            }
            Err(ConnectionError::IoError(io_err))
                if io_err.kind() == std::io::ErrorKind::ConnectionReset =>
            {
                debug!(client = %self.addr, "Connection reset by client")
            }
            Err(e) => warn!(client = %self.addr, error = %e, "Connection error"),
        }

        let _ = self.stream.shutdown().await;
        result
    }

    /// The read-execute-respond loop.
    async fn main_loop(&mut self) -> Result<(), ConnectionError> {
        loop {
            let command = match self.try_parse_command() {
                Ok(Some(command)) => command,
                Ok(None) => {
                    match self.read_more_data().await {
                        Err(ConnectionError::BufferFull) => {
                            let size = self.buffer.len();
                            let e = ParseError::FrameTooLarge {
                                size,
                                max: MAX_FRAME_SIZE,
                            };
                            return self.reject_frame(e).await;
                        }
                        result => result?,
                    }
                    continue;
                }
                Err(e) => return self.reject_frame(e).await,
            };

            let reply = self.execute(&command);
            self.send_response(&reply).await?;
        }
    }

    /// Answers a malformed frame with a protocol error, then ends the session.
    async fn reject_frame(&mut self, e: ParseError) -> Result<(), ConnectionError> {
        warn!(client = %self.addr, error = %e, "Malformed frame");
        let reply = Error::MalformedFrame(e.clone()).to_resp().serialize();
        self.send_response(&reply).await?;
        Err(ConnectionError::ParseError(e))
    }

    /// Dispatches one command, turning recoverable errors into error replies.
    fn execute(&self, command: &Command) -> Bytes {
        trace!(client = %self.addr, command = %command, "Executing command");
        self.stats.command_processed();

        match self.dispatcher.handle(command) {
            Ok(reply) => reply,
            Err(e) => {
                debug!(client = %self.addr, error = %e, "Command failed");
                self.stats.command_failed();
                e.to_resp().serialize()
            }
        }
    }

    /// Attempts to parse a command from the buffer.
    fn try_parse_command(&mut self) -> Result<Option<Command>, ParseError> {
        match parse_frame(&self.buffer)? {
            Some((command, consumed)) => {
                let _ = self.buffer.split_to(consumed);
                trace!(
                    client = %self.addr,
                    consumed = consumed,
                    remaining = self.buffer.len(),
                    "Parsed command"
                );
                Ok(Some(command))
            }
            None => Ok(None),
        }
    }

    /// Reads more data from the socket into the buffer, or returns early if
    /// the server is shutting down.
    async fn read_more_data(&mut self) -> Result<(), ConnectionError> {
        if *self.shutdown.borrow() {
            return Err(ConnectionError::ServerShutdown);
        }

        if self.buffer.len() >= MAX_BUFFER_SIZE {
            error!(
                client = %self.addr,
                size = self.buffer.len(),
                "Buffer size limit exceeded"
            );
            return Err(ConnectionError::BufferFull);
        }

        if self.buffer.capacity() - self.buffer.len() < 1024 {
            self.buffer.reserve(4096);
        }

        let n = tokio::select! {
            result = self.stream.get_mut().read_buf(&mut self.buffer) => result?,
            _ = self.shutdown.changed() => return Err(ConnectionError::ServerShutdown),
        };

        if n == 0 {
            return if self.buffer.is_empty() {
                Err(ConnectionError::ClientDisconnected)
            } else {
                // The client hung up in the middle of a frame.
                Err(ConnectionError::UnexpectedEof)
            };
        }

        self.stats.bytes_read(n);
        trace!(client = %self.addr, bytes = n, "Read data");

        Ok(())
    }

    async fn send_response(&mut self, reply: &[u8]) -> Result<(), ConnectionError> {
        self.stream.write_all(reply).await?;
        self.stream.flush().await?;
        self.stats.bytes_written(reply.len());
        trace!(client = %self.addr, bytes = reply.len(), "Sent response");
        Ok(())
    }
}

impl Drop for ConnectionHandler {
    // Runs on a normal exit and when the server aborts the session task.
    fn drop(&mut self) {
        self.stats.connection_closed();
    }
}

/// Errors that can occur while handling a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// The client sent a malformed frame
    #[error("Parse error: {0}")]
    ParseError(#[from] ParseError),

    #[error("Client disconnected")]
    ClientDisconnected,

    /// Unexpected end of stream (partial frame)
    #[error("Unexpected end of stream")]
    UnexpectedEof,

    #[error("Buffer size limit exceeded")]
    BufferFull,

    #[error("Server shutting down")]
    ServerShutdown,
}

/// Handles a client connection.
///
/// Creates a ConnectionHandler and runs it to completion.
pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    dispatcher: Dispatcher,
    stats: Arc<ConnectionStats>,
    shutdown: watch::Receiver<bool>,
) {
    let handler = ConnectionHandler::new(stream, addr, dispatcher, stats, shutdown);
    if let Err(e) = handler.run().await {
        trace!(client = %addr, error = %e, "Connection ended");
    }
}

/// Logs that a connection was accepted.
pub(crate) fn log_accepted(addr: SocketAddr, stats: &ConnectionStats) {
    info!(
        client = %addr,
        active = stats.active_connections.load(Ordering::Relaxed) + 1,
        "Accepted connection"
    );
}
