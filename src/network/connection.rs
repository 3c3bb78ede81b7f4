//! Connection Handler
//!
//! Handles individual client connections.

use std::io::{self, BufReader, BufWriter};
use std::net::{IpAddr, TcpStream};
use std::sync::Arc;
use std::time::Duration;

use super::Service;
use crate::engine::CancelToken;
use crate::error::{Result, VaultError};
use crate::protocol::{encode_walk_item, read_command, write_response, Command, Response};

/// Handles a single client connection
pub struct Connection {
    /// TCP stream reader (buffered for efficiency)
    reader: BufReader<TcpStream>,

    /// TCP stream writer (buffered for efficiency)
    writer: BufWriter<TcpStream>,

    service: Arc<Service>,

    /// Fires on server shutdown; also stops in-flight walks
    shutdown: CancelToken,

    peer_ip: Option<IpAddr>,

    /// Peer address for logging
    peer_addr: String,
}

/// Errors that just mean the client went away
fn is_disconnect(err: &VaultError) -> bool {
    match err {
        VaultError::Io(e) => matches!(
            e.kind(),
            io::ErrorKind::UnexpectedEof
                | io::ErrorKind::ConnectionReset
                | io::ErrorKind::ConnectionAborted
                | io::ErrorKind::BrokenPipe
        ),
        _ => false,
    }
}

/// Read timeouts surface as WouldBlock on unix and TimedOut on windows
fn is_timeout(err: &VaultError) -> bool {
    match err {
        VaultError::Io(e) => matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut),
        _ => false,
    }
}

impl Connection {
    /// Create a new connection handler
    pub fn new(stream: TcpStream, service: Arc<Service>, shutdown: CancelToken) -> Result<Self> {
        let peer = stream.peer_addr().ok();
        let peer_addr = peer.map_or_else(|| "unknown".to_string(), |a| a.to_string());

        // Disable Nagle's algorithm for low latency
        stream.set_nodelay(true)?;

        let read_stream = stream.try_clone()?;
        let write_stream = stream;

        Ok(Self {
            reader: BufReader::new(read_stream),
            writer: BufWriter::new(write_stream),
            service,
            shutdown,
            peer_ip: peer.map(|a| a.ip()),
            peer_addr,
        })
    }

    /// Configure connection timeouts (0 disables)
    pub fn set_timeouts(&mut self, read_ms: u64, write_ms: u64) -> Result<()> {
        if read_ms > 0 {
            self.reader
                .get_ref()
                .set_read_timeout(Some(Duration::from_millis(read_ms)))?;
        }
        if write_ms > 0 {
            self.writer
                .get_ref()
                .set_write_timeout(Some(Duration::from_millis(write_ms)))?;
        }
        Ok(())
    }

    /// Handle the connection (blocking until closed)
    ///
    /// Reads commands in a loop and sends responses. Returns when the client
    /// disconnects, goes idle past the read timeout, or the server shuts down.
    pub fn handle(&mut self) -> Result<()> {
        tracing::debug!("Connection established from {}", self.peer_addr);

        while !self.shutdown.is_cancelled() {
            let command = match read_command(&mut self.reader) {
                Ok(cmd) => cmd,
                Err(ref e) if is_disconnect(e) => {
                    tracing::debug!("Client {} disconnected", self.peer_addr);
                    return Ok(());
                }
                Err(ref e) if is_timeout(e) => {
                    tracing::debug!("Read timeout for client {}", self.peer_addr);
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!("Error reading from {}: {}", self.peer_addr, e);
                    let _ = self.send_response(&Response::from_error(&e));
                    return Err(e);
                }
            };

            tracing::trace!("Received command from {}: {:?}", self.peer_addr, command.command_type());

            let result = match command {
                Command::Walk {
                    want_blocks,
                    pattern,
                } => self.stream_walk(want_blocks, pattern),
                command => {
                    let response = self.service.execute(self.peer_ip, command);
                    self.send_response(&response)
                }
            };

            if let Err(e) = result {
                if is_disconnect(&e) {
                    tracing::debug!(
                        "Client {} disconnected before response could be sent: {}",
                        self.peer_addr,
                        e
                    );
                    return Ok(());
                }
                tracing::warn!("Error writing to {}: {}", self.peer_addr, e);
                return Err(e);
            }
        }

        tracing::debug!("Closing {} for shutdown", self.peer_addr);
        Ok(())
    }

    /// Send one OK frame per item followed by END
    ///
    /// A failure frame in place of END terminates the stream early.
    fn stream_walk(&mut self, want_blocks: bool, pattern: Vec<u8>) -> Result<()> {
        let service = Arc::clone(&self.service);
        let walk = match service.walk(self.peer_ip, want_blocks, pattern, self.shutdown.clone()) {
            Ok(walk) => walk,
            Err(e) => return self.send_response(&Response::from_error(&e)),
        };

        let mut sent = 0u64;
        for item in walk {
            match item {
                Ok(item) => {
                    self.send_response(&Response::ok(Some(encode_walk_item(&item))))?;
                    sent += 1;
                }
                Err(e) => {
                    tracing::debug!("walk for {} stopped after {} items: {}", self.peer_addr, sent, e);
                    return self.send_response(&Response::from_error(&e));
                }
            }
        }
        tracing::debug!("walk for {} sent {} items", self.peer_addr, sent);
        self.send_response(&Response::end())
    }

    /// Send a response to the client
    fn send_response(&mut self, response: &Response) -> Result<()> {
        write_response(&mut self.writer, response)
    }

    /// Get the peer address string
    pub fn peer_addr(&self) -> &str {
        &self.peer_addr
    }
}
