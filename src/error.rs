//! Error types for BlockVault
//!
//! Provides a unified error type for all operations. Every variant maps to
//! a stable wire [`Status`] so clients can tell a transient failure apart
//! from one where retrying is pointless.

use thiserror::Error;

use crate::address::Address;
use crate::protocol::Status;

/// Result type alias using VaultError
pub type Result<T> = std::result::Result<T, VaultError>;

/// Unified error type for BlockVault operations
#[derive(Debug, Error)]
pub enum VaultError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Validation Errors
    // -------------------------------------------------------------------------
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Block too large: {len} bytes (block size is {max})")]
    BlockTooLarge { len: usize, max: usize },

    // -------------------------------------------------------------------------
    // Integrity Errors
    // -------------------------------------------------------------------------
    #[error("Integrity error: expected address {expected}, content hashes to {actual}")]
    Integrity { expected: Address, actual: Address },

    // -------------------------------------------------------------------------
    // Capacity Errors
    // -------------------------------------------------------------------------
    #[error("Store is full: all {total} blocks are in use")]
    CapacityExhausted { total: u32 },

    #[error("Bucket {bucket} has no free slots")]
    BucketExhausted { bucket: String },

    // -------------------------------------------------------------------------
    // Metadata Errors
    // -------------------------------------------------------------------------
    #[error("Metadata corruption detected: {0}")]
    Corrupted(String),

    // -------------------------------------------------------------------------
    // Erase Errors
    // -------------------------------------------------------------------------
    /// The removal is committed; only the secure wipe of the slot failed
    #[error("Block {address} was removed but slot {slot} was not securely erased: {reason}")]
    EraseIncomplete {
        address: Address,
        slot: u32,
        reason: String,
    },

    // -------------------------------------------------------------------------
    // Access Errors
    // -------------------------------------------------------------------------
    #[error("Store is open read-only")]
    ReadOnly,

    #[error("Store is locked by another process: {0}")]
    Locked(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Operation cancelled")]
    Cancelled,

    // -------------------------------------------------------------------------
    // Network Errors
    // -------------------------------------------------------------------------
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Remote error ({status:?}): {message}")]
    Remote { status: Status, message: String },

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl VaultError {
    /// Wire status reported to clients for this error
    ///
    /// `EraseIncomplete` is reported as `Integrity`: the block is already
    /// gone from the index, so repeating the remove answers `deleted=false`.
    pub fn status(&self) -> Status {
        match self {
            VaultError::Io(_) | VaultError::Corrupted(_) | VaultError::Locked(_) => Status::Error,
            VaultError::EraseIncomplete { .. } => Status::Integrity,
            VaultError::InvalidAddress(_)
            | VaultError::BlockTooLarge { .. }
            | VaultError::Protocol(_)
            | VaultError::Config(_) => Status::Invalid,
            VaultError::Integrity { .. } => Status::Integrity,
            VaultError::CapacityExhausted { .. } | VaultError::BucketExhausted { .. } => {
                Status::Exhausted
            }
            VaultError::ReadOnly | VaultError::PermissionDenied(_) => Status::Denied,
            VaultError::Cancelled => Status::Cancelled,
            VaultError::Remote { status, .. } => *status,
        }
    }

    /// True for both the global and the per-bucket exhaustion conditions
    pub fn is_exhausted(&self) -> bool {
        self.status() == Status::Exhausted
    }

    /// Whether a client may reasonably retry the same request
    pub fn is_retryable(&self) -> bool {
        self.status().is_retryable()
    }
}
