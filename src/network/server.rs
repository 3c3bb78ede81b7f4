//! TCP Server
//!
//! Accepts connections and dispatches to worker threads.
//!
//! The acceptor polls a non-blocking listener so it can notice shutdown.
//! Accepted streams are queued on a bounded channel; when the queue is full
//! the connection is refused with an error frame instead of waiting.

use std::collections::HashMap;
use std::io::{self, BufWriter};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam::channel::{self, Receiver, TrySendError};
use parking_lot::Mutex;

use super::{Connection, Service};
use crate::config::Config;
use crate::engine::CancelToken;
use crate::error::{Result, VaultError};
use crate::protocol::{write_response, Response, Status};

/// How long the acceptor sleeps when no connection is pending
const ACCEPT_POLL: Duration = Duration::from_millis(20);

/// Streams currently being served, so shutdown can unblock their reads
type ActiveStreams = Arc<Mutex<HashMap<u64, TcpStream>>>;

/// Stops a running [`Server`] from another thread
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    token: CancelToken,
    active: ActiveStreams,
}

impl ShutdownHandle {
    /// Stop accepting, cancel walks and close open connections
    pub fn shutdown(&self) {
        self.token.cancel();
        for stream in self.active.lock().values() {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// TCP server for BlockVault
pub struct Server {
    listener: TcpListener,
    service: Arc<Service>,
    workers: usize,
    queue_depth: usize,
    read_timeout_ms: u64,
    write_timeout_ms: u64,
    handle: ShutdownHandle,
}

impl Server {
    /// Bind the listen address from `config`
    pub fn bind(config: &Config, service: Arc<Service>) -> Result<Self> {
        if config.workers == 0 {
            return Err(VaultError::Config("workers must be at least 1".to_string()));
        }
        let listener = TcpListener::bind(&config.listen_addr)?;
        listener.set_nonblocking(true)?;
        tracing::info!("Listening on {}", listener.local_addr()?);

        Ok(Self {
            listener,
            service,
            workers: config.workers,
            queue_depth: config.max_connections.max(1),
            read_timeout_ms: config.read_timeout_ms,
            write_timeout_ms: config.write_timeout_ms,
            handle: ShutdownHandle {
                token: CancelToken::new(),
                active: Arc::new(Mutex::new(HashMap::new())),
            },
        })
    }

    /// Address actually bound (useful with port 0)
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.handle.clone()
    }

    /// Signal the server to shutdown gracefully
    pub fn shutdown(&self) {
        self.handle.shutdown();
    }

    /// Start the server (blocking until shutdown)
    pub fn run(&self) -> Result<()> {
        let (tx, rx) = channel::bounded::<TcpStream>(self.queue_depth);
        let next_id = Arc::new(AtomicU64::new(0));

        let workers = (0..self.workers)
            .map(|i| {
                let worker = Worker {
                    rx: rx.clone(),
                    service: Arc::clone(&self.service),
                    handle: self.handle.clone(),
                    next_id: Arc::clone(&next_id),
                    read_timeout_ms: self.read_timeout_ms,
                    write_timeout_ms: self.write_timeout_ms,
                };
                thread::Builder::new()
                    .name(format!("blockvault-worker-{}", i))
                    .spawn(move || worker.run())
            })
            .collect::<io::Result<Vec<_>>>()?;
        drop(rx);

        let result = self.accept_loop(&tx);
        if result.is_err() {
            self.handle.shutdown();
        }
        drop(tx);

        for worker in workers {
            if worker.join().is_err() {
                tracing::error!("worker thread panicked");
            }
        }
        tracing::info!("Server stopped");
        result
    }

    fn accept_loop(&self, tx: &channel::Sender<TcpStream>) -> Result<()> {
        while !self.handle.is_shutdown() {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    stream.set_nonblocking(false)?;
                    match tx.try_send(stream) {
                        Ok(()) => tracing::trace!("queued connection from {}", peer),
                        Err(TrySendError::Full(stream)) => {
                            tracing::warn!("connection queue full, refusing {}", peer);
                            refuse(stream);
                        }
                        Err(TrySendError::Disconnected(_)) => break,
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    tracing::warn!("accept failed: {}", e);
                    thread::sleep(ACCEPT_POLL);
                }
            }
        }
        Ok(())
    }
}

/// Tell an over-limit client to retry later
fn refuse(stream: TcpStream) {
    let _ = stream.set_write_timeout(Some(Duration::from_millis(100)));
    let mut writer = BufWriter::new(stream);
    let _ = write_response(&mut writer, &Response::failure(Status::Error, "server busy"));
}

struct Worker {
    rx: Receiver<TcpStream>,
    service: Arc<Service>,
    handle: ShutdownHandle,
    next_id: Arc<AtomicU64>,
    read_timeout_ms: u64,
    write_timeout_ms: u64,
}

impl Worker {
    fn run(self) {
        while let Ok(stream) = self.rx.recv() {
            if self.handle.is_shutdown() {
                continue;
            }
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            if let Err(e) = self.serve(id, stream) {
                tracing::debug!("connection ended with error: {}", e);
            }
            self.handle.active.lock().remove(&id);
        }
    }

    fn serve(&self, id: u64, stream: TcpStream) -> Result<()> {
        self.handle.active.lock().insert(id, stream.try_clone()?);
        if self.handle.is_shutdown() {
            return Ok(());
        }

        let mut conn = Connection::new(stream, Arc::clone(&self.service), self.handle.token.clone())?;
        conn.set_timeouts(self.read_timeout_ms, self.write_timeout_ms)?;
        conn.handle()
    }
}
