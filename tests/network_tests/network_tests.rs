//! Network Tests
//!
//! End-to-end tests: a server on an ephemeral port and blocking clients.

use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use blockvault::address::{Address, Block};
use blockvault::auth::{AllowAll, Authorizer, ReadOnly, WriterAcl};
use blockvault::backend::Backend;
use blockvault::config::Config;
use blockvault::engine::Engine;
use blockvault::network::{Client, Server, Service, ShutdownHandle};
use blockvault::protocol::Status;
use blockvault::VaultError;
use tempfile::TempDir;

const BLOCK_SIZE: usize = 128;

// =============================================================================
// Helper Functions
// =============================================================================

struct TestServer {
    _temp: TempDir,
    addr: SocketAddr,
    handle: ShutdownHandle,
    thread: Option<JoinHandle<blockvault::Result<()>>>,
    backend: Arc<dyn Backend>,
}

impl TestServer {
    fn start(authorizer: Arc<dyn Authorizer>) -> Self {
        let temp = TempDir::new().unwrap();
        let config = Config::builder()
            .data_dir(temp.path())
            .block_size(BLOCK_SIZE)
            .num_total(100)
            .max_slots_log2(8)
            .listen_addr("127.0.0.1:0")
            .workers(2)
            .build();

        let backend: Arc<dyn Backend> = Arc::new(Engine::open(config.clone()).unwrap());
        let service = Arc::new(Service::new(Arc::clone(&backend), authorizer));
        let server = Server::bind(&config, service).unwrap();
        let addr = server.local_addr().unwrap();
        let handle = server.shutdown_handle();
        let thread = thread::spawn(move || server.run());

        Self {
            _temp: temp,
            addr,
            handle,
            thread: Some(thread),
            backend,
        }
    }

    fn client(&self) -> Client {
        let client = Client::connect(self.addr).unwrap();
        client.set_timeout(Some(Duration::from_secs(5))).unwrap();
        client
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.shutdown();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn remote_status(err: VaultError) -> Status {
    match err {
        VaultError::Remote { status, .. } => status,
        other => panic!("expected remote error, got {:?}", other),
    }
}

// =============================================================================
// Round Trip Tests
// =============================================================================

#[test]
fn test_ping() {
    let server = TestServer::start(Arc::new(AllowAll));
    server.client().ping().unwrap();
}

#[test]
fn test_put_get_remove() {
    let server = TestServer::start(Arc::new(AllowAll));
    let mut client = server.client();

    let (address, inserted) = client.put(b"over the wire", None).unwrap();
    assert!(inserted);
    assert_eq!(address, Block::pad(b"over the wire", BLOCK_SIZE).unwrap().address());

    let block = client.get(&address).unwrap().unwrap();
    assert_eq!(block.trimmed(), b"over the wire");
    assert!(client.contains(&address).unwrap());

    let (_, inserted) = client.put(b"over the wire", None).unwrap();
    assert!(!inserted);

    assert!(client.remove(&address, false).unwrap());
    assert!(!client.remove(&address, false).unwrap());
    assert_eq!(client.get(&address).unwrap(), None);
}

#[test]
fn test_stat() {
    let server = TestServer::start(Arc::new(AllowAll));
    let mut client = server.client();

    client.put(b"a", None).unwrap();
    client.put(b"b", None).unwrap();

    let stat = client.stat().unwrap();
    assert_eq!(stat.used, 2);
    assert_eq!(stat.total, 100);
}

#[test]
fn test_walk() {
    let server = TestServer::start(Arc::new(AllowAll));
    let mut client = server.client();

    for word in ["red fish", "blue fish", "one bird"] {
        client.put(word.as_bytes(), None).unwrap();
    }

    let all = client.walk(false, b"").unwrap();
    assert_eq!(all.len(), 3);
    assert!(all.iter().all(|i| i.block.is_none()));

    let fish = client.walk(true, b"fish").unwrap();
    assert_eq!(fish.len(), 2);
    for item in fish {
        assert_eq!(item.block.unwrap().address(), item.address);
    }

    // The connection is still usable after a stream
    client.ping().unwrap();
}

// =============================================================================
// Error Mapping Tests
// =============================================================================

#[test]
fn test_integrity_error_status() {
    let server = TestServer::start(Arc::new(AllowAll));
    let mut client = server.client();

    let err = client
        .put(b"payload", Some(&Address::hash(b"not it")))
        .unwrap_err();
    assert_eq!(remote_status(err), Status::Integrity);
}

#[test]
fn test_too_large_status() {
    let server = TestServer::start(Arc::new(AllowAll));
    let mut client = server.client();

    let err = client.put(&vec![1u8; BLOCK_SIZE + 1], None).unwrap_err();
    assert_eq!(remote_status(err), Status::Invalid);
    assert_eq!(server.backend.stat().unwrap().used, 0);
}

// =============================================================================
// Authorization Tests
// =============================================================================

#[test]
fn test_read_only_authorizer() {
    let server = TestServer::start(Arc::new(ReadOnly));
    let (address, _) = server.backend.put(b"preloaded", None).unwrap();
    let mut client = server.client();

    assert!(client.get(&address).unwrap().is_some());
    assert!(client.walk(false, b"").is_ok());

    let err = client.put(b"denied", None).unwrap_err();
    assert_eq!(remote_status(err), Status::Denied);
    let err = client.remove(&address, false).unwrap_err();
    assert_eq!(remote_status(err), Status::Denied);

    // Nothing was changed
    assert_eq!(server.backend.stat().unwrap().used, 1);
}

#[test]
fn test_writer_acl() {
    let allowed = TestServer::start(Arc::new(WriterAcl::new(["127.0.0.1".parse().unwrap()])));
    assert!(allowed.client().put(b"local writer", None).is_ok());

    let denied = TestServer::start(Arc::new(WriterAcl::new(["10.1.2.3".parse().unwrap()])));
    let mut client = denied.client();
    let err = client.put(b"stranger", None).unwrap_err();
    assert_eq!(remote_status(err), Status::Denied);
    assert!(client.stat().is_ok());
}

// =============================================================================
// Concurrency Tests
// =============================================================================

#[test]
fn test_many_clients() {
    let server = TestServer::start(Arc::new(AllowAll));
    let addr = server.addr;

    let handles: Vec<_> = (0..4)
        .map(|t| {
            thread::spawn(move || {
                let mut client = Client::connect(addr).unwrap();
                for i in 0..10 {
                    let data = format!("client {} block {}", t, i);
                    let (address, _) = client.put(data.as_bytes(), None).unwrap();
                    let block = client.get(&address).unwrap().unwrap();
                    assert_eq!(block.trimmed(), data.as_bytes());
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(server.backend.stat().unwrap().used, 40);
}

#[test]
fn test_shutdown_stops_server() {
    let mut server = TestServer::start(Arc::new(AllowAll));
    let mut client = server.client();
    client.ping().unwrap();

    server.handle.shutdown();
    let result = server.thread.take().unwrap().join().unwrap();
    assert!(result.is_ok());

    assert!(client.ping().is_err());
}
