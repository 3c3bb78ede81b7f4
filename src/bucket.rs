//! Bucket Router
//!
//! Partitions the address space into buckets. The first `depth` address
//! bytes become nested two-hex-character directories, the next `width`
//! bytes become the bucket file name, and the rest of the address does not
//! influence placement.
//!
//! ```text
//! depth=2, width=1, address=3fa94c...
//!
//!   <root>/3f/a9/4c.data
//!
//! depth=1, width=0, address=3fa94c...
//!
//!   <root>/3f/data.data
//! ```

use std::fmt;
use std::path::{Path, PathBuf};

use crate::address::{Address, ADDRESS_LEN};
use crate::error::{Result, VaultError};

/// Extension of every bucket file
pub const BUCKET_FILE_EXT: &str = "data";

/// File stem used when `width == 0`
const DEFAULT_FILE_STEM: &str = "data";

/// Largest supported `max_slots_log2` (65536 slots per bucket)
pub const MAX_SLOTS_LOG2_LIMIT: u8 = 16;

/// Layout parameters fixed at store creation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    /// Address bytes consumed as directory levels
    pub depth: u8,

    /// Address bytes merged into the bucket file name
    pub width: u8,

    /// Slots per bucket file, as a power of two
    pub max_slots_log2: u8,
}

impl Geometry {
    pub fn new(depth: u8, width: u8, max_slots_log2: u8) -> Result<Self> {
        let geometry = Self {
            depth,
            width,
            max_slots_log2,
        };
        geometry.validate()?;
        Ok(geometry)
    }

    pub fn validate(&self) -> Result<()> {
        if self.prefix_len() > ADDRESS_LEN {
            return Err(VaultError::Config(format!(
                "depth ({}) + width ({}) exceeds the address length ({})",
                self.depth, self.width, ADDRESS_LEN
            )));
        }
        if self.max_slots_log2 > MAX_SLOTS_LOG2_LIMIT {
            return Err(VaultError::Config(format!(
                "slots per bucket must be a power of two in [1, {}], got 2^{}",
                1u32 << MAX_SLOTS_LOG2_LIMIT,
                self.max_slots_log2
            )));
        }
        Ok(())
    }

    /// Number of leading address bytes that select a bucket
    pub fn prefix_len(&self) -> usize {
        self.depth as usize + self.width as usize
    }

    /// Slots available in each bucket file
    pub fn slots_per_bucket(&self) -> u32 {
        1u32 << self.max_slots_log2
    }
}

/// Identifies a bucket: an address with every byte past the bucket prefix
/// zeroed
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BucketKey([u8; ADDRESS_LEN]);

impl BucketKey {
    /// Reinterpret a stored partial address, zeroing anything past the prefix
    pub fn from_partial(bytes: [u8; ADDRESS_LEN], prefix_len: usize) -> Self {
        let mut raw = bytes;
        raw[prefix_len.min(ADDRESS_LEN)..].fill(0);
        Self(raw)
    }

    pub fn as_bytes(&self) -> &[u8; ADDRESS_LEN] {
        &self.0
    }
}

impl fmt::Debug for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BucketKey({})", hex::encode(self.0))
    }
}

/// Maps addresses to bucket files
#[derive(Debug, Clone, Copy)]
pub struct BucketRouter {
    geometry: Geometry,
}

impl BucketRouter {
    pub fn new(geometry: Geometry) -> Self {
        Self { geometry }
    }

    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    /// Bucket an address belongs to
    pub fn bucket_of(&self, address: &Address) -> BucketKey {
        BucketKey::from_partial(*address.as_bytes(), self.geometry.prefix_len())
    }

    /// Relative path of the bucket file holding `address`
    pub fn block_path(&self, address: &Address) -> PathBuf {
        self.bucket_path(&self.bucket_of(address))
    }

    /// Relative path of a bucket's file
    pub fn bucket_path(&self, bucket: &BucketKey) -> PathBuf {
        let bytes = bucket.as_bytes();
        let depth = self.geometry.depth as usize;
        let prefix_len = self.geometry.prefix_len();

        let mut path = PathBuf::new();
        for byte in &bytes[..depth] {
            path.push(format!("{:02x}", byte));
        }

        let stem = if self.geometry.width == 0 {
            DEFAULT_FILE_STEM.to_string()
        } else {
            hex::encode(&bytes[depth..prefix_len])
        };
        path.push(format!("{}.{}", stem, BUCKET_FILE_EXT));
        path
    }

    /// Absolute path of a bucket's file under `root`
    pub fn bucket_file(&self, root: &Path, bucket: &BucketKey) -> PathBuf {
        root.join(self.bucket_path(bucket))
    }

    /// Human-readable bucket name for log and error messages
    pub fn bucket_name(&self, bucket: &BucketKey) -> String {
        self.bucket_path(bucket).display().to_string()
    }
}
