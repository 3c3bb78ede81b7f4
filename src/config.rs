//! Configuration for BlockVault
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;

use crate::blockfile::AccessMode;
use crate::bucket::Geometry;
use crate::error::{Result, VaultError};

/// Main configuration for a BlockVault instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Root directory for all store files
    /// Internal structure:
    ///   {data_dir}/
    ///     ├── lock             (advisory store lock)
    ///     ├── layout           (block size and geometry, fixed at creation)
    ///     ├── metadata         (current index generation)
    ///     ├── metadata.bak     (previous index generation)
    ///     └── ab/.../cd.data   (one file per bucket)
    pub data_dir: PathBuf,

    /// Size of every block in bytes
    pub block_size: usize,

    /// Maximum number of blocks stored across all buckets
    pub num_total: u32,

    /// Address bytes used as directory levels
    pub depth: u8,

    /// Address bytes merged into each bucket file name
    pub width: u8,

    /// Each bucket file holds 2^max_slots_log2 slots
    pub max_slots_log2: u8,

    /// Open files with shared locks and reject mutations
    pub read_only: bool,

    /// Shrink bucket files when their high-water mark drops
    pub truncate_files: bool,

    /// Bucket file handles kept open at once
    pub max_open_files: usize,

    // -------------------------------------------------------------------------
    // Network Configuration
    // -------------------------------------------------------------------------
    /// TCP listen address
    pub listen_addr: String,

    /// Max connections accepted but not yet picked up by a worker
    pub max_connections: usize,

    /// Threads serving connections
    pub workers: usize,

    /// Connection read timeout (milliseconds)
    pub read_timeout_ms: u64,

    /// Connection write timeout (milliseconds)
    pub write_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./blockvault_data"),
            block_size: 64 * 1024, // 64 KB
            num_total: 1_000_000,
            depth: 1,
            width: 0,
            max_slots_log2: 16,
            read_only: false,
            truncate_files: true,
            max_open_files: 1024,
            listen_addr: "127.0.0.1:7070".to_string(),
            max_connections: 1024,
            workers: 8,
            read_timeout_ms: 5000,
            write_timeout_ms: 5000,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.block_size == 0 {
            return Err(VaultError::Config("block size must be positive".to_string()));
        }
        if self.num_total == 0 {
            return Err(VaultError::Config("capacity must be positive".to_string()));
        }
        self.geometry()?;
        if self.max_open_files == 0 {
            return Err(VaultError::Config("max_open_files must be positive".to_string()));
        }
        if self.workers == 0 {
            return Err(VaultError::Config("workers must be positive".to_string()));
        }
        Ok(())
    }

    /// Validated bucket geometry
    pub fn geometry(&self) -> Result<Geometry> {
        Geometry::new(self.depth, self.width, self.max_slots_log2)
    }

    pub fn access_mode(&self) -> AccessMode {
        if self.read_only {
            AccessMode::ReadOnly
        } else {
            AccessMode::ReadWrite
        }
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data directory (root for all storage)
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Set the block size (in bytes)
    pub fn block_size(mut self, size: usize) -> Self {
        self.config.block_size = size;
        self
    }

    /// Set the global block capacity
    pub fn num_total(mut self, total: u32) -> Self {
        self.config.num_total = total;
        self
    }

    /// Set the directory depth (in address bytes)
    pub fn depth(mut self, depth: u8) -> Self {
        self.config.depth = depth;
        self
    }

    /// Set the file name width (in address bytes)
    pub fn width(mut self, width: u8) -> Self {
        self.config.width = width;
        self
    }

    /// Set the per-bucket slot count as a power of two
    pub fn max_slots_log2(mut self, log2: u8) -> Self {
        self.config.max_slots_log2 = log2;
        self
    }

    /// Open the store read-only
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.config.read_only = read_only;
        self
    }

    /// Enable or disable bucket file truncation
    pub fn truncate_files(mut self, truncate: bool) -> Self {
        self.config.truncate_files = truncate;
        self
    }

    /// Set the open bucket file limit
    pub fn max_open_files(mut self, count: usize) -> Self {
        self.config.max_open_files = count;
        self
    }

    /// Set the TCP listen address
    pub fn listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.listen_addr = addr.into();
        self
    }

    /// Set the maximum number of queued connections
    pub fn max_connections(mut self, count: usize) -> Self {
        self.config.max_connections = count;
        self
    }

    /// Set the number of connection worker threads
    pub fn workers(mut self, count: usize) -> Self {
        self.config.workers = count;
        self
    }

    /// Set the read timeout (in milliseconds)
    pub fn read_timeout_ms(mut self, ms: u64) -> Self {
        self.config.read_timeout_ms = ms;
        self
    }

    /// Set the write timeout (in milliseconds)
    pub fn write_timeout_ms(mut self, ms: u64) -> Self {
        self.config.write_timeout_ms = ms;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
