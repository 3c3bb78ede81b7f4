//! Backend decorators
//!
//! Each decorator wraps one or more inner backends and implements the same
//! [`Backend`] operations on top of them.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;

use super::Backend;
use crate::address::{verify, Address, Block};
use crate::engine::{BoxWalk, Stat, WalkItem, WalkOptions};
use crate::error::{Result, VaultError};

/// Address `data` will be stored under in a backend of `block_size`
fn address_for(data: &[u8], block_size: usize) -> Result<Address> {
    Ok(Block::pad(data, block_size)?.address())
}

/// Stop a chained walk after the first cancellation error
fn stop_after_cancel<'a, I>(items: I) -> impl Iterator<Item = Result<WalkItem>> + Send + 'a
where
    I: Iterator<Item = Result<WalkItem>> + Send + 'a,
{
    items.scan(false, |stopped, item| {
        if *stopped {
            return None;
        }
        if matches!(item, Err(VaultError::Cancelled)) {
            *stopped = true;
        }
        Some(item)
    })
}

// =============================================================================
// Verify
// =============================================================================

/// Re-hashes every block read from the inner backend
pub struct Verify {
    inner: Arc<dyn Backend>,
}

impl Verify {
    pub fn new(inner: Arc<dyn Backend>) -> Self {
        Self { inner }
    }
}

impl Backend for Verify {
    fn block_size(&self) -> usize {
        self.inner.block_size()
    }

    fn get(&self, address: &Address) -> Result<Option<Block>> {
        let block = self.inner.get(address)?;
        if let Some(block) = &block {
            verify(address, &block.address())?;
        }
        Ok(block)
    }

    fn put(&self, data: &[u8], expected: Option<&Address>) -> Result<(Address, bool)> {
        let computed = address_for(data, self.block_size())?;
        if let Some(expected) = expected {
            verify(expected, &computed)?;
        }
        let (address, inserted) = self.inner.put(data, Some(&computed))?;
        verify(&computed, &address)?;
        Ok((address, inserted))
    }

    fn remove(&self, address: &Address, secure: bool) -> Result<bool> {
        self.inner.remove(address, secure)
    }

    fn stat(&self) -> Result<Stat> {
        self.inner.stat()
    }

    fn walk(&self, options: WalkOptions) -> Result<BoxWalk<'_>> {
        let items = self.inner.walk(options)?.map(|item| {
            let item = item?;
            if let Some(block) = &item.block {
                verify(&item.address, &block.address())?;
            }
            Ok(item)
        });
        Ok(Box::new(items))
    }

    fn contains(&self, address: &Address) -> Result<bool> {
        self.inner.contains(address)
    }
}

// =============================================================================
// Limit
// =============================================================================

/// Caps the number of blocks the inner backend may hold
pub struct Limit {
    inner: Arc<dyn Backend>,
    max_blocks: u64,

    /// Serializes the count check with the insert it guards
    put_lock: Mutex<()>,
}

impl Limit {
    pub fn new(inner: Arc<dyn Backend>, max_blocks: u64) -> Self {
        Self {
            inner,
            max_blocks,
            put_lock: Mutex::new(()),
        }
    }
}

impl Backend for Limit {
    fn block_size(&self) -> usize {
        self.inner.block_size()
    }

    fn get(&self, address: &Address) -> Result<Option<Block>> {
        self.inner.get(address)
    }

    fn put(&self, data: &[u8], expected: Option<&Address>) -> Result<(Address, bool)> {
        let address = address_for(data, self.block_size())?;
        if let Some(expected) = expected {
            verify(expected, &address)?;
        }

        let _guard = self.put_lock.lock();
        if self.inner.contains(&address)? {
            return Ok((address, false));
        }
        if self.inner.stat()?.used >= self.max_blocks {
            return Err(VaultError::CapacityExhausted {
                total: u32::try_from(self.max_blocks).unwrap_or(u32::MAX),
            });
        }
        self.inner.put(data, Some(&address))
    }

    fn remove(&self, address: &Address, secure: bool) -> Result<bool> {
        self.inner.remove(address, secure)
    }

    fn stat(&self) -> Result<Stat> {
        let stat = self.inner.stat()?;
        Ok(Stat {
            used: stat.used,
            total: stat.total.min(self.max_blocks),
        })
    }

    fn walk(&self, options: WalkOptions) -> Result<BoxWalk<'_>> {
        self.inner.walk(options)
    }

    fn contains(&self, address: &Address) -> Result<bool> {
        self.inner.contains(address)
    }
}

// =============================================================================
// Layered
// =============================================================================

/// A front store (`upper`) over an authoritative one (`lower`)
///
/// Reads try the upper store first and back-fill it from the lower one.
/// Writes go to the lower store first; upper-store failures on the write
/// path are logged, never returned.
pub struct Layered {
    upper: Arc<dyn Backend>,
    lower: Arc<dyn Backend>,
}

impl Layered {
    pub fn new(upper: Arc<dyn Backend>, lower: Arc<dyn Backend>) -> Result<Self> {
        if upper.block_size() != lower.block_size() {
            return Err(VaultError::Config(format!(
                "layered block sizes differ: {} over {}",
                upper.block_size(),
                lower.block_size()
            )));
        }
        Ok(Self { upper, lower })
    }
}

impl Backend for Layered {
    fn block_size(&self) -> usize {
        self.lower.block_size()
    }

    fn get(&self, address: &Address) -> Result<Option<Block>> {
        if let Some(block) = self.upper.get(address)? {
            return Ok(Some(block));
        }
        let block = self.lower.get(address)?;
        if let Some(block) = &block {
            if let Err(e) = self.upper.put(block.as_bytes(), Some(address)) {
                tracing::debug!("back-fill of {} into upper layer failed: {}", address, e);
            }
        }
        Ok(block)
    }

    fn put(&self, data: &[u8], expected: Option<&Address>) -> Result<(Address, bool)> {
        let (address, inserted) = self.lower.put(data, expected)?;
        if let Err(e) = self.upper.put(data, Some(&address)) {
            tracing::debug!("write-through of {} to upper layer failed: {}", address, e);
        }
        Ok((address, inserted))
    }

    fn remove(&self, address: &Address, secure: bool) -> Result<bool> {
        let lower = self.lower.remove(address, secure)?;
        let upper = self.upper.remove(address, secure)?;
        Ok(lower || upper)
    }

    fn stat(&self) -> Result<Stat> {
        self.lower.stat()
    }

    fn walk(&self, options: WalkOptions) -> Result<BoxWalk<'_>> {
        self.lower.walk(options)
    }

    fn contains(&self, address: &Address) -> Result<bool> {
        Ok(self.upper.contains(address)? || self.lower.contains(address)?)
    }
}

// =============================================================================
// Union
// =============================================================================

/// Several backends presented as one
///
/// Members are consulted in order. New blocks go to the first member that
/// still has room.
pub struct Union {
    members: Vec<Arc<dyn Backend>>,
}

impl Union {
    pub fn new(members: Vec<Arc<dyn Backend>>) -> Result<Self> {
        let Some(first) = members.first() else {
            return Err(VaultError::Config("union needs at least one member".to_string()));
        };
        let block_size = first.block_size();
        if members.iter().any(|m| m.block_size() != block_size) {
            return Err(VaultError::Config(
                "union members must share one block size".to_string(),
            ));
        }
        Ok(Self { members })
    }

    pub fn members(&self) -> &[Arc<dyn Backend>] {
        &self.members
    }
}

impl Backend for Union {
    fn block_size(&self) -> usize {
        self.members[0].block_size()
    }

    fn get(&self, address: &Address) -> Result<Option<Block>> {
        let mut last_err = None;
        for member in &self.members {
            match member.get(address) {
                Ok(Some(block)) => return Ok(Some(block)),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!("union member failed to read {}: {}", address, e);
                    last_err = Some(e);
                }
            }
        }
        match last_err {
            Some(e) => Err(e),
            None => Ok(None),
        }
    }

    fn put(&self, data: &[u8], expected: Option<&Address>) -> Result<(Address, bool)> {
        let address = address_for(data, self.block_size())?;
        if let Some(expected) = expected {
            verify(expected, &address)?;
        }

        for member in &self.members {
            if member.contains(&address)? {
                return Ok((address, false));
            }
        }

        let mut last_err = None;
        for member in &self.members {
            match member.put(data, Some(&address)) {
                Ok(res) => return Ok(res),
                Err(e) if e.is_exhausted() || matches!(e, VaultError::ReadOnly) => {
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap_or(VaultError::CapacityExhausted { total: 0 }))
    }

    fn remove(&self, address: &Address, secure: bool) -> Result<bool> {
        let mut deleted = false;
        let mut first_err = None;
        for member in &self.members {
            match member.remove(address, secure) {
                Ok(d) => deleted |= d,
                Err(e) => {
                    first_err.get_or_insert(e);
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(deleted),
        }
    }

    fn stat(&self) -> Result<Stat> {
        let mut total = Stat::default();
        for member in &self.members {
            let stat = member.stat()?;
            total.used += stat.used;
            total.total += stat.total;
        }
        Ok(total)
    }

    fn walk(&self, options: WalkOptions) -> Result<BoxWalk<'_>> {
        let walks = self
            .members
            .iter()
            .map(|m| m.walk(options.clone()))
            .collect::<Result<Vec<_>>>()?;

        let mut seen = HashSet::new();
        let items = walks.into_iter().flatten().filter(move |item| match item {
            Ok(item) => seen.insert(item.address),
            Err(_) => true,
        });
        Ok(Box::new(stop_after_cancel(items)))
    }

    fn contains(&self, address: &Address) -> Result<bool> {
        for member in &self.members {
            if member.contains(address)? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}
