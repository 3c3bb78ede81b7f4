//! Addresses and Blocks
//!
//! An [`Address`] is the SHA-1 hash of a block's full padded contents. A
//! [`Block`] is always exactly `block_size` bytes; shorter input is
//! zero-padded, so the block size is a hard upper bound on object size.
//!
//! Addresses order lexicographically byte-by-byte. The index relies on this
//! ordering for binary search, and the bucket router relies on it to group
//! addresses sharing a prefix.

use std::fmt;
use std::str::FromStr;

use bytes::{Bytes, BytesMut};
use sha1::{Digest, Sha1};

use crate::error::{Result, VaultError};

/// Length of an address in bytes
pub const ADDRESS_LEN: usize = 20;

/// Length of an address in hex characters
pub const ADDRESS_HEX_LEN: usize = ADDRESS_LEN * 2;

/// Content hash identifying a block
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Address([u8; ADDRESS_LEN]);

impl Address {
    pub const fn from_bytes(bytes: [u8; ADDRESS_LEN]) -> Self {
        Self(bytes)
    }

    /// Build an address from a slice that must be exactly 20 bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let raw: [u8; ADDRESS_LEN] = bytes.try_into().map_err(|_| {
            VaultError::InvalidAddress(format!(
                "expected {} bytes, got {}",
                ADDRESS_LEN,
                bytes.len()
            ))
        })?;
        Ok(Self(raw))
    }

    /// Parse a 40-character hex string
    pub fn parse(hex_str: &str) -> Result<Self> {
        if hex_str.len() != ADDRESS_HEX_LEN {
            return Err(VaultError::InvalidAddress(format!(
                "expected {} hex characters, got {}",
                ADDRESS_HEX_LEN,
                hex_str.len()
            )));
        }
        let mut raw = [0u8; ADDRESS_LEN];
        hex::decode_to_slice(hex_str, &mut raw)
            .map_err(|e| VaultError::InvalidAddress(format!("{hex_str:?}: {e}")))?;
        Ok(Self(raw))
    }

    /// Hash arbitrary bytes
    pub fn hash(bytes: &[u8]) -> Self {
        let digest = Sha1::digest(bytes);
        let mut raw = [0u8; ADDRESS_LEN];
        raw.copy_from_slice(&digest);
        Self(raw)
    }

    pub fn as_bytes(&self) -> &[u8; ADDRESS_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl FromStr for Address {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.to_hex())
    }
}

/// A fixed-size block of data
///
/// Cloning is cheap: the contents are reference counted.
#[derive(Clone, PartialEq, Eq)]
pub struct Block(Bytes);

impl Block {
    /// Zero-pad `raw` up to `block_size` bytes
    ///
    /// Fails if `raw` is longer than the block size.
    pub fn pad(raw: &[u8], block_size: usize) -> Result<Self> {
        if raw.len() > block_size {
            return Err(VaultError::BlockTooLarge {
                len: raw.len(),
                max: block_size,
            });
        }
        let mut buf = BytesMut::zeroed(block_size);
        buf[..raw.len()].copy_from_slice(raw);
        Ok(Self(buf.freeze()))
    }

    /// Wrap bytes that are already exactly one block long
    pub fn from_bytes(bytes: Bytes) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_bytes(&self) -> Bytes {
        self.0.clone()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Address of this block's contents
    pub fn address(&self) -> Address {
        Address::hash(&self.0)
    }

    /// Contents with trailing zero bytes stripped
    ///
    /// Trailing zeros in the original payload are indistinguishable from
    /// padding, so this is a display convenience rather than an inverse
    /// of [`Block::pad`].
    pub fn trimmed(&self) -> &[u8] {
        let end = self.0.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
        &self.0[..end]
    }
}

impl fmt::Debug for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Block")
            .field("len", &self.0.len())
            .field("address", &self.address())
            .finish()
    }
}

impl AsRef<[u8]> for Block {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Check that a block read back under `expected` really hashes to it
pub fn verify(expected: &Address, actual: &Address) -> Result<()> {
    if expected != actual {
        return Err(VaultError::Integrity {
            expected: *expected,
            actual: *actual,
        });
    }
    Ok(())
}
