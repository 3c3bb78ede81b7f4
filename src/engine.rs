//! Engine Module
//!
//! The storage engine that coordinates the index, the commit protocol and
//! the bucket files.
//!
//! ## Responsibilities
//! - Serialize mutations behind one reader/writer lock
//! - Allocate slots, write blocks, and commit the index
//! - Verify every block read against its address
//! - Snapshot the index for walks
//!
//! ## Ordering
//! - **Put**: allocate in memory → write block + fsync → commit index. A
//!   crash before the commit leaves a written but unindexed block in a slot
//!   the recovered index treats as free; it is overwritten on reuse.
//! - **Remove**: remove in memory → commit index → erase slot → truncate.
//!   A crash before the erase leaves stale bytes in a free slot.
//!
//! Any failure before the commit returns the in-memory index to the last
//! committed generation.

use std::collections::HashMap;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::address::{verify, Address, Block};
use crate::blockfile::{lock_file, AccessMode, BlockFile};
use crate::bucket::{BucketKey, BucketRouter, Geometry};
use crate::config::Config;
use crate::error::{Result, VaultError};
use crate::index::{Index, Slot, UsedEntry};
use crate::meta::{self, Committer, Layout};

/// Used and total block counts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Stat {
    pub used: u64,
    pub total: u64,
}

impl Stat {
    pub fn free(&self) -> u64 {
        self.total.saturating_sub(self.used)
    }
}

// =============================================================================
// Walk
// =============================================================================

/// Cooperative cancellation flag shared between a walk and its owner
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Decides whether a block is included in a walk
pub type WalkFilter = Arc<dyn Fn(&Address, &Block) -> bool + Send + Sync>;

/// Filter matching blocks whose contents contain `pattern`
pub fn content_filter(pattern: Vec<u8>) -> WalkFilter {
    Arc::new(move |_, block| {
        pattern.is_empty()
            || block
                .as_bytes()
                .windows(pattern.len())
                .any(|w| w == pattern.as_slice())
    })
}

/// Options for [`Engine::walk`]
#[derive(Clone, Default)]
pub struct WalkOptions {
    /// Include block contents in each item
    pub want_blocks: bool,

    /// Only yield blocks accepted by this predicate
    pub filter: Option<WalkFilter>,

    /// Stop early when this token fires
    pub cancel: Option<CancelToken>,
}

impl WalkOptions {
    fn needs_blocks(&self) -> bool {
        self.want_blocks || self.filter.is_some()
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|c| c.is_cancelled())
    }
}

/// One item produced by a walk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkItem {
    pub address: Address,
    pub block: Option<Block>,
}

/// Boxed walk iterator, as returned through the backend trait
pub type BoxWalk<'a> = Box<dyn Iterator<Item = Result<WalkItem>> + Send + 'a>;

/// Lazy iterator over a snapshot of the index
///
/// The address list is captured under the read lock; blocks are read one at
/// a time afterwards, so a long walk never holds the lock across items.
/// Addresses removed after the snapshot are skipped. When the cancel token
/// fires the walk yields a single `Cancelled` error and ends.
pub struct Walk<'a> {
    engine: &'a Engine,
    addresses: std::vec::IntoIter<Address>,
    options: WalkOptions,
    done: bool,
}

impl<'a> Iterator for Walk<'a> {
    type Item = Result<WalkItem>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.done {
                return None;
            }
            if self.options.is_cancelled() {
                self.done = true;
                return Some(Err(VaultError::Cancelled));
            }

            let address = self.addresses.next()?;

            if !self.options.needs_blocks() {
                return Some(Ok(WalkItem {
                    address,
                    block: None,
                }));
            }

            let block = match self.engine.get(&address) {
                Ok(Some(block)) => block,
                Ok(None) => continue,
                Err(e) => return Some(Err(e)),
            };

            if let Some(filter) = &self.options.filter {
                if !filter(&address, &block) {
                    continue;
                }
            }

            return Some(Ok(WalkItem {
                address,
                block: self.options.want_blocks.then_some(block),
            }));
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.addresses.len() + 1))
    }
}

// =============================================================================
// Engine
// =============================================================================

/// State guarded by the engine lock
struct State {
    index: Index,
    committer: Committer,
}

/// The main storage engine
///
/// ## Concurrency Model
///
/// One `RwLock` guards the index and all block I/O for the store:
/// - `put`/`remove` take it exclusively for the whole mutation, including
///   the block write or erase, so a freed slot cannot be reused before it
///   is wiped.
/// - `get`/`stat` share it.
/// - `walk` shares it only while taking its snapshot and while reading each
///   individual block.
pub struct Engine {
    /// Engine configuration
    config: Config,

    /// Address to bucket mapping
    router: BucketRouter,

    /// Read-write or read-only
    mode: AccessMode,

    /// Index and commit state
    state: RwLock<State>,

    /// Open bucket files, opened lazily
    files: Mutex<HashMap<BucketKey, Arc<BlockFile>>>,

    /// Advisory lock on the store directory, held for the engine's lifetime
    _lock: File,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("data_dir", &self.config.data_dir)
            .field("mode", &self.mode)
            .field("geometry", &self.router.geometry())
            .field("used", &self.state.read().index.len())
            .finish_non_exhaustive()
    }
}

impl Engine {
    // =========================================================================
    // Internal Path Constants
    // =========================================================================
    const LOCK_FILENAME: &'static str = "lock";

    /// Open or create a store with the given config
    ///
    /// On startup:
    /// 1. Validate the config and lock the data directory
    /// 2. Check the recorded layout against the configured one
    /// 3. Load the index (primary → backup → empty)
    /// 4. Ready to serve requests
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;
        let geometry = config.geometry()?;
        let mode = config.access_mode();
        let dir = config.data_dir.clone();

        // Step 1: Directory and store lock
        if !mode.is_read_only() {
            fs::create_dir_all(&dir)?;
        }
        let lock = Self::lock_store(&dir, mode)?;

        // Step 2: Layout is fixed at creation
        Layout::new(config.block_size, geometry).ensure(&dir, mode)?;

        // Step 3: Index
        let loaded = meta::load(&dir, geometry, config.num_total)?;
        tracing::info!(
            "opened store at {:?}: {} of {} blocks used ({:?}, index from {:?})",
            dir,
            loaded.index.len(),
            loaded.index.num_total(),
            mode,
            loaded.source
        );

        let state = State {
            committer: Committer::new(&dir, loaded.raw),
            index: loaded.index,
        };

        Ok(Self {
            router: BucketRouter::new(geometry),
            mode,
            state: RwLock::new(state),
            files: Mutex::new(HashMap::new()),
            _lock: lock,
            config,
        })
    }

    /// Open with a path (convenience method)
    ///
    /// Uses default config with the specified data directory
    pub fn open_path(path: &Path) -> Result<Self> {
        let mut config = Config::default();
        config.data_dir = path.to_path_buf();
        Self::open(config)
    }

    fn lock_store(dir: &Path, mode: AccessMode) -> Result<File> {
        let path = dir.join(Self::LOCK_FILENAME);
        let file = match mode {
            AccessMode::ReadWrite => OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .open(&path)?,
            AccessMode::ReadOnly => File::open(&path).map_err(|e| match e.kind() {
                io::ErrorKind::NotFound => {
                    VaultError::Config(format!("no store found at {:?}", dir))
                }
                _ => VaultError::Io(e),
            })?,
        };
        lock_file(&file, mode, &path)?;
        Ok(file)
    }

    // =========================================================================
    // Operations
    // =========================================================================

    /// Store a block
    ///
    /// Returns its address and whether it was newly inserted. Storing a
    /// block that is already present does no I/O. With `expected` set the
    /// computed address must match it.
    pub fn put(&self, data: &[u8], expected: Option<&Address>) -> Result<(Address, bool)> {
        // Validation happens before the lock
        let block = Block::pad(data, self.config.block_size)?;
        let address = block.address();
        if let Some(expected) = expected {
            verify(expected, &address)?;
        }

        let mut guard = self.state.write();
        let state = &mut *guard;

        if state.index.search(&address).is_some() {
            tracing::trace!("put {}: already present", address);
            return Ok((address, false));
        }
        if self.mode.is_read_only() {
            return Err(VaultError::ReadOnly);
        }

        // Step 1: Allocate. Failure leaves the index untouched.
        let slot = state.index.insert(&address)?;

        // Step 2: Write the block, then commit the index
        if let Err(e) = self.write_and_commit(state, &address, slot, &block) {
            state.index.remove(&address);
            tracing::warn!("put {} failed, allocation rolled back: {}", address, e);
            return Err(e);
        }

        tracing::debug!("stored {} in slot {}", address, slot);
        Ok((address, true))
    }

    fn write_and_commit(
        &self,
        state: &mut State,
        address: &Address,
        slot: Slot,
        block: &Block,
    ) -> Result<()> {
        let file = self.file_for(&self.router.bucket_of(address))?;
        file.write_block(slot, block)?;
        file.sync()?;
        state.committer.commit(meta::encode(&state.index))
    }

    /// Fetch a block by address, verifying its contents
    pub fn get(&self, address: &Address) -> Result<Option<Block>> {
        let block = {
            let state = self.state.read();
            let Some(slot) = state.index.search(address) else {
                return Ok(None);
            };
            let file = self.file_for(&self.router.bucket_of(address))?;
            file.read_block(slot)?
        };

        verify(address, &block.address())?;
        Ok(Some(block))
    }

    /// Whether `address` is present
    pub fn contains(&self, address: &Address) -> bool {
        self.state.read().index.search(address).is_some()
    }

    /// Delete a block
    ///
    /// Returns whether anything was deleted. With `secure` the slot is
    /// overwritten more than once before its space is released.
    pub fn remove(&self, address: &Address, secure: bool) -> Result<bool> {
        let mut guard = self.state.write();
        let state = &mut *guard;

        if state.index.search(address).is_none() {
            return Ok(false);
        }
        if self.mode.is_read_only() {
            return Err(VaultError::ReadOnly);
        }

        let bucket = self.router.bucket_of(address);
        let before = state.index.bucket(&bucket);

        // Step 1: Remove in memory and commit
        let Some(slot) = state.index.remove(address) else {
            return Ok(false);
        };
        if let Err(e) = state.committer.commit(meta::encode(&state.index)) {
            state.index.restore(
                UsedEntry {
                    address: *address,
                    slot,
                },
                before,
            );
            tracing::warn!("remove {} failed, index restored: {}", address, e);
            return Err(e);
        }

        // Step 2: Wipe the slot and shrink the file
        let min_unused = state.index.bucket(&bucket).min_unused;
        let shrink_to = (min_unused < before.min_unused).then_some(min_unused);
        if let Err(e) = self.erase(&bucket, slot, secure, shrink_to) {
            if secure {
                tracing::error!("removed {} but secure erase of slot {} failed: {}", address, slot, e);
                return Err(VaultError::EraseIncomplete {
                    address: *address,
                    slot,
                    reason: e.to_string(),
                });
            }
            tracing::warn!("removed {} but failed to erase slot {}: {}", address, slot, e);
        }

        tracing::debug!("removed {} from slot {}", address, slot);
        Ok(true)
    }

    fn erase(&self, bucket: &BucketKey, slot: Slot, secure: bool, shrink_to: Option<Slot>) -> Result<()> {
        let file = self.file_for(bucket)?;
        file.erase_block(slot, secure)?;
        if let Some(slots) = shrink_to.filter(|_| self.config.truncate_files) {
            file.truncate(slots)?;
        }
        Ok(())
    }

    /// Used and total block counts
    pub fn stat(&self) -> Stat {
        let state = self.state.read();
        Stat {
            used: state.index.len() as u64,
            total: u64::from(state.index.num_total()),
        }
    }

    /// Walk all blocks present when the walk starts
    pub fn walk(&self, options: WalkOptions) -> Walk<'_> {
        let addresses = self.state.read().index.addresses();
        tracing::trace!("walk over {} addresses", addresses.len());
        Walk {
            engine: self,
            addresses: addresses.into_iter(),
            options,
            done: false,
        }
    }

    /// Close the engine gracefully
    ///
    /// Syncs every open bucket file and releases the store lock
    pub fn close(self) -> Result<()> {
        let files: Vec<Arc<BlockFile>> = self.files.lock().drain().map(|(_, f)| f).collect();
        for file in files {
            file.sync()?;
        }
        tracing::info!("closed store at {:?}", self.config.data_dir);
        Ok(())
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    /// Open (or reuse) the file backing `bucket`
    fn file_for(&self, bucket: &BucketKey) -> Result<Arc<BlockFile>> {
        let mut files = self.files.lock();
        if let Some(file) = files.get(bucket) {
            return Ok(Arc::clone(file));
        }

        if files.len() >= self.config.max_open_files {
            // Handles still referenced elsewhere stay open, so a bucket file is
            // never opened (and locked) twice at once
            files.retain(|_, f| Arc::strong_count(f) > 1);
        }

        let path = self.router.bucket_file(&self.config.data_dir, bucket);
        let file = Arc::new(BlockFile::open(
            &path,
            self.config.block_size,
            self.router.geometry().slots_per_bucket(),
            self.mode,
        )?);
        files.insert(*bucket, Arc::clone(&file));
        Ok(file)
    }

    // =========================================================================
    // Accessors (for testing and debugging)
    // =========================================================================

    /// Get the data directory path
    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    /// Get the configured block size
    pub fn block_size(&self) -> usize {
        self.config.block_size
    }

    /// Get the bucket geometry
    pub fn geometry(&self) -> Geometry {
        self.router.geometry()
    }

    /// Get the bucket router
    pub fn router(&self) -> &BucketRouter {
        &self.router
    }

    /// Slot currently holding `address`
    pub fn slot_of(&self, address: &Address) -> Option<Slot> {
        self.state.read().index.search(address)
    }

    /// Copy of the in-memory index
    pub fn index_snapshot(&self) -> Index {
        self.state.read().index.clone()
    }

    /// Number of bucket files currently open
    pub fn open_file_count(&self) -> usize {
        self.files.lock().len()
    }

    pub fn is_read_only(&self) -> bool {
        self.mode.is_read_only()
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }
}
