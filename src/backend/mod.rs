//! Backend Module
//!
//! A common operation set for everything that stores blocks, so stores can
//! be composed.
//!
//! ## Variants
//! - [`Engine`]: the on-disk store
//! - [`Verify`]: re-hashes every block coming out of its inner backend
//! - [`Limit`]: caps the number of stored blocks
//! - [`Layered`]: a front store over an authoritative one
//! - [`Union`]: several stores presented as one
//!
//! Named instances live in a [`Registry`] owned by the server.

mod decorators;
mod registry;

pub use decorators::{Layered, Limit, Union, Verify};
pub use registry::Registry;

use crate::address::{Address, Block};
use crate::engine::{BoxWalk, Engine, Stat, WalkOptions};
use crate::error::Result;

/// Operations shared by every block store
pub trait Backend: Send + Sync {
    /// Size of every block held by this backend
    fn block_size(&self) -> usize;

    /// Fetch a block, `None` if absent
    fn get(&self, address: &Address) -> Result<Option<Block>>;

    /// Store `data`, returning its address and whether it was new
    fn put(&self, data: &[u8], expected: Option<&Address>) -> Result<(Address, bool)>;

    /// Delete a block, returning whether it was present
    fn remove(&self, address: &Address, secure: bool) -> Result<bool>;

    /// Used and total block counts
    fn stat(&self) -> Result<Stat>;

    /// Iterate over stored blocks
    fn walk(&self, options: WalkOptions) -> Result<BoxWalk<'_>>;

    /// Whether `address` is present
    fn contains(&self, address: &Address) -> Result<bool> {
        Ok(self.get(address)?.is_some())
    }
}

impl Backend for Engine {
    fn block_size(&self) -> usize {
        Engine::block_size(self)
    }

    fn get(&self, address: &Address) -> Result<Option<Block>> {
        Engine::get(self, address)
    }

    fn put(&self, data: &[u8], expected: Option<&Address>) -> Result<(Address, bool)> {
        Engine::put(self, data, expected)
    }

    fn remove(&self, address: &Address, secure: bool) -> Result<bool> {
        Engine::remove(self, address, secure)
    }

    fn stat(&self) -> Result<Stat> {
        Ok(Engine::stat(self))
    }

    fn walk(&self, options: WalkOptions) -> Result<BoxWalk<'_>> {
        Ok(Box::new(Engine::walk(self, options)))
    }

    fn contains(&self, address: &Address) -> Result<bool> {
        Ok(Engine::contains(self, address))
    }
}
