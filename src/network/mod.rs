//! Network Module
//!
//! TCP server and client handling.
//!
//! ## Architecture
//! - Single acceptor thread
//! - Worker thread pool for connections, fed by a bounded queue
//! - Commands authorized and routed through a [`Service`] to a backend

mod client;
mod connection;
mod server;
mod service;

pub use client::Client;
pub use connection::Connection;
pub use server::{Server, ShutdownHandle};
pub use service::Service;
