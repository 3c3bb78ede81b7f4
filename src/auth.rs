//! Authorization
//!
//! Consulted before every request reaches a backend. A denial never
//! touches the store.

use std::collections::HashSet;
use std::fmt;
use std::net::IpAddr;

/// Operations subject to authorization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Get,
    Put,
    Remove,
    Stat,
    Walk,
}

impl Operation {
    /// Whether the operation can change stored data
    pub fn is_write(self) -> bool {
        matches!(self, Operation::Put | Operation::Remove)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Get => "get",
            Operation::Put => "put",
            Operation::Remove => "remove",
            Operation::Stat => "stat",
            Operation::Walk => "walk",
        };
        f.write_str(name)
    }
}

/// Decides whether a peer may perform an operation
pub trait Authorizer: Send + Sync {
    fn authorize(&self, peer: Option<IpAddr>, op: Operation) -> bool;
}

/// Permits everything
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl Authorizer for AllowAll {
    fn authorize(&self, _peer: Option<IpAddr>, _op: Operation) -> bool {
        true
    }
}

/// Permits reads only
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadOnly;

impl Authorizer for ReadOnly {
    fn authorize(&self, _peer: Option<IpAddr>, op: Operation) -> bool {
        !op.is_write()
    }
}

/// Reads for everyone, writes only from listed addresses
#[derive(Debug, Clone, Default)]
pub struct WriterAcl {
    writers: HashSet<IpAddr>,
}

impl WriterAcl {
    pub fn new(writers: impl IntoIterator<Item = IpAddr>) -> Self {
        Self {
            writers: writers.into_iter().collect(),
        }
    }
}

impl Authorizer for WriterAcl {
    fn authorize(&self, peer: Option<IpAddr>, op: Operation) -> bool {
        if !op.is_write() {
            return true;
        }
        peer.is_some_and(|ip| self.writers.contains(&ip))
    }
}
