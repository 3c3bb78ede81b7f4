//! Index Persistence
//!
//! Binary encoding of the [`Index`] plus the two-generation commit that
//! keeps it crash safe.
//!
//! ## File Format (big-endian)
//! ```text
//! ┌──────────┬─────────┬───────┬───────┬──────────────┐
//! │Magic (4) │ Ver (1) │Depth 1│Width 1│MaxSlotsLog2 1│
//! ├──────────┴───┬─────┴───────┴─────┬─┴──────────────┤
//! │ NumTotal (4) │   NumUsed (4)     │  NumFree (4)   │
//! ├──────────────┴───────────────────┴────────────────┤
//! │ Used entries:  address (20) | slot (4)   ...      │
//! ├───────────────────────────────────────────────────┤
//! │ Free entries:  bucket key (20) | slot (4)   ...   │
//! └───────────────────────────────────────────────────┘
//! ```
//!
//! ## Commit
//! Two files hold the last two generations: `metadata` (current) and
//! `metadata.bak` (previous). A commit first rewrites the backup with the
//! bytes of the previous commit, then rewrites the primary with the new
//! bytes, syncing each. Whichever step a crash interrupts, at least one of
//! the two files holds a complete generation.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Serialize};

use crate::address::{Address, ADDRESS_LEN};
use crate::blockfile::AccessMode;
use crate::bucket::{BucketKey, Geometry};
use crate::error::{Result, VaultError};
use crate::index::{Index, Slot, UsedEntry};

/// Magic bytes at the start of every metadata file
pub const MAGIC: [u8; 4] = *b"BVIX";

/// Current metadata format version
pub const VERSION: u8 = 1;

/// Size of the fixed metadata header
pub const HEADER_SIZE: usize = 20;

/// Size of one used or free entry
pub const ENTRY_SIZE: usize = ADDRESS_LEN + 4;

/// Primary metadata file name
pub const METADATA_FILE: &str = "metadata";

/// Backup metadata file name
pub const BACKUP_FILE: &str = "metadata.bak";

/// Layout guard file name
pub const LAYOUT_FILE: &str = "layout";

// =============================================================================
// Encoding / Decoding
// =============================================================================

/// Serialize an index
pub fn encode(index: &Index) -> Vec<u8> {
    let geometry = index.geometry();
    let num_used = index.len();
    let num_free = index.free_len();

    let mut buf = BytesMut::with_capacity(HEADER_SIZE + (num_used + num_free) * ENTRY_SIZE);
    buf.put_slice(&MAGIC);
    buf.put_u8(VERSION);
    buf.put_u8(geometry.depth);
    buf.put_u8(geometry.width);
    buf.put_u8(geometry.max_slots_log2);
    buf.put_u32(index.num_total());
    buf.put_u32(num_used as u32);
    buf.put_u32(num_free as u32);

    for entry in index.used() {
        buf.put_slice(entry.address.as_bytes());
        buf.put_u32(entry.slot);
    }
    for (bucket, state) in index.buckets() {
        for slot in &state.free {
            buf.put_slice(bucket.as_bytes());
            buf.put_u32(*slot);
        }
    }

    buf.to_vec()
}

/// Deserialize an index
///
/// Every count is checked against the bytes actually present before
/// anything is allocated. Malformed input is an error, never a panic.
pub fn decode(raw: &[u8]) -> Result<Index> {
    let mut buf = raw;

    if buf.remaining() < HEADER_SIZE {
        return Err(VaultError::Corrupted(format!(
            "metadata header truncated: {} bytes",
            buf.remaining()
        )));
    }

    let mut magic = [0u8; 4];
    buf.copy_to_slice(&mut magic);
    if magic != MAGIC {
        return Err(VaultError::Corrupted(format!(
            "bad metadata magic {:02x?}",
            magic
        )));
    }

    let version = buf.get_u8();
    if version != VERSION {
        return Err(VaultError::Corrupted(format!(
            "unsupported metadata version {}",
            version
        )));
    }

    let depth = buf.get_u8();
    let width = buf.get_u8();
    let max_slots_log2 = buf.get_u8();
    let geometry = Geometry::new(depth, width, max_slots_log2)
        .map_err(|e| VaultError::Corrupted(format!("bad metadata geometry: {e}")))?;

    let num_total = buf.get_u32();
    let num_used = buf.get_u32() as usize;
    let num_free = buf.get_u32() as usize;

    let expected = num_used
        .checked_add(num_free)
        .and_then(|n| n.checked_mul(ENTRY_SIZE));
    if expected != Some(buf.remaining()) {
        return Err(VaultError::Corrupted(format!(
            "metadata body is {} bytes, header promises {} used and {} free entries",
            buf.remaining(),
            num_used,
            num_free
        )));
    }

    let mut used = Vec::with_capacity(num_used);
    for _ in 0..num_used {
        let (bytes, slot) = read_entry(&mut buf);
        used.push(UsedEntry {
            address: Address::from_bytes(bytes),
            slot,
        });
    }

    let prefix_len = geometry.prefix_len();
    let mut free = Vec::with_capacity(num_free);
    for _ in 0..num_free {
        let (bytes, slot) = read_entry(&mut buf);
        free.push((BucketKey::from_partial(bytes, prefix_len), slot));
    }

    Index::from_parts(geometry, num_total, used, free)
}

/// Caller guarantees `ENTRY_SIZE` bytes remain
fn read_entry(buf: &mut &[u8]) -> ([u8; ADDRESS_LEN], Slot) {
    let mut bytes = [0u8; ADDRESS_LEN];
    buf.copy_to_slice(&mut bytes);
    (bytes, buf.get_u32())
}

// =============================================================================
// Commit Protocol
// =============================================================================

/// Writes index generations to the primary and backup files
#[derive(Debug)]
pub struct Committer {
    primary: PathBuf,
    backup: PathBuf,

    /// Bytes of the last successful commit
    raw_prev: Vec<u8>,
}

impl Committer {
    /// `raw_prev` is the generation currently considered committed
    pub fn new(dir: &Path, raw_prev: Vec<u8>) -> Self {
        Self {
            primary: dir.join(METADATA_FILE),
            backup: dir.join(BACKUP_FILE),
            raw_prev,
        }
    }

    /// Commit a new generation
    pub fn commit(&mut self, raw: Vec<u8>) -> Result<()> {
        self.stage()?;
        self.publish(raw)
    }

    /// Step one: preserve the previous generation in the backup file
    pub fn stage(&self) -> Result<()> {
        write_synced(&self.backup, &self.raw_prev)
    }

    /// Step two: replace the primary with the new generation
    pub fn publish(&mut self, raw: Vec<u8>) -> Result<()> {
        write_synced(&self.primary, &raw)?;
        self.raw_prev = raw;
        Ok(())
    }

    /// Bytes of the last successful commit
    pub fn last_committed(&self) -> &[u8] {
        &self.raw_prev
    }
}

fn write_synced(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    Ok(())
}

// =============================================================================
// Loading
// =============================================================================

/// Where a loaded index came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadSource {
    Primary,
    Backup,
    Empty,
}

/// Result of loading the persisted index
#[derive(Debug)]
pub struct Loaded {
    pub index: Index,

    /// Exact bytes the index was decoded from (or its encoding if empty)
    pub raw: Vec<u8>,

    pub source: LoadSource,
}

/// Load the index from `dir`, falling back from primary to backup to empty
///
/// A file that decodes cleanly but describes a different geometry is a
/// configuration error: the store was created with other layout parameters.
/// So is a capacity below the number of blocks already stored.
pub fn load(dir: &Path, geometry: Geometry, num_total: u32) -> Result<Loaded> {
    let candidates = [
        (dir.join(METADATA_FILE), LoadSource::Primary),
        (dir.join(BACKUP_FILE), LoadSource::Backup),
    ];

    let mut saw_file = false;
    for (path, source) in candidates {
        let raw = match fs::read(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => {
                saw_file = true;
                tracing::warn!("failed to read {:?}: {}", path, e);
                continue;
            }
        };
        saw_file = true;

        match decode(&raw) {
            Ok(mut index) => {
                if index.geometry() != geometry {
                    return Err(VaultError::Config(format!(
                        "{:?} was written with {:?}, configured {:?}",
                        path,
                        index.geometry(),
                        geometry
                    )));
                }
                if index.num_total() != num_total {
                    tracing::info!(
                        "capacity changed from {} to {} blocks",
                        index.num_total(),
                        num_total
                    );
                    index.set_num_total(num_total)?;
                }
                if source == LoadSource::Backup {
                    tracing::warn!("primary metadata unusable, recovered from {:?}", path);
                }
                tracing::debug!("loaded {} index entries from {:?}", index.len(), path);
                return Ok(Loaded { index, raw, source });
            }
            Err(e) => {
                tracing::warn!("failed to decode {:?}: {}", path, e);
            }
        }
    }

    if saw_file {
        tracing::error!(
            "no usable metadata in {:?}, starting with an empty index; existing blocks are orphaned",
            dir
        );
    }

    let index = Index::new(geometry, num_total);
    let raw = encode(&index);
    Ok(Loaded {
        index,
        raw,
        source: LoadSource::Empty,
    })
}

// =============================================================================
// Layout Guard
// =============================================================================

/// Layout parameters recorded when a store is created
///
/// The metadata header carries the bucket geometry but not the block size;
/// this file pins both so a store is never reopened with different ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layout {
    pub block_size: u64,
    pub depth: u8,
    pub width: u8,
    pub max_slots_log2: u8,
}

impl Layout {
    pub fn new(block_size: usize, geometry: Geometry) -> Self {
        Self {
            block_size: block_size as u64,
            depth: geometry.depth,
            width: geometry.width,
            max_slots_log2: geometry.max_slots_log2,
        }
    }

    /// Serialize as bincode followed by a little-endian CRC32
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut bytes =
            bincode::serialize(self).map_err(|e| VaultError::Config(e.to_string()))?;
        let crc = crc32fast::hash(&bytes);
        bytes.extend_from_slice(&crc.to_le_bytes());
        Ok(bytes)
    }

    pub fn decode(raw: &[u8]) -> Result<Self> {
        if raw.len() < 4 {
            return Err(VaultError::Corrupted("layout file truncated".to_string()));
        }
        let (body, crc_bytes) = raw.split_at(raw.len() - 4);
        let mut crc = [0u8; 4];
        crc.copy_from_slice(crc_bytes);
        if crc32fast::hash(body) != u32::from_le_bytes(crc) {
            return Err(VaultError::Corrupted("layout checksum mismatch".to_string()));
        }
        bincode::deserialize(body).map_err(|e| VaultError::Corrupted(e.to_string()))
    }

    /// Compare against the stored layout, recording it on first use
    pub fn ensure(&self, dir: &Path, mode: AccessMode) -> Result<()> {
        let path = dir.join(LAYOUT_FILE);
        match fs::read(&path) {
            Ok(raw) => {
                let stored = Self::decode(&raw)?;
                if stored != *self {
                    return Err(VaultError::Config(format!(
                        "store was created with {:?}, configured {:?}",
                        stored, self
                    )));
                }
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                if mode.is_read_only() {
                    return Ok(());
                }
                tracing::info!("recording store layout {:?}", self);
                write_synced(&path, &self.encode()?)?;
                sync_dir(dir)
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Make newly created directory entries durable
fn sync_dir(dir: &Path) -> Result<()> {
    #[cfg(unix)]
    fs::File::open(dir)?.sync_all()?;
    #[cfg(not(unix))]
    let _ = dir;
    Ok(())
}
