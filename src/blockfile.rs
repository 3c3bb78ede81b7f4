//! Block File I/O
//!
//! One file per bucket, divided into fixed-size slots. Slot `n` lives at
//! byte offset `n * block_size`. Files grow lazily as slots are written and
//! may be truncated when a bucket's high-water mark falls.
//!
//! Every file handle carries an advisory lock: exclusive for read-write
//! access, shared for read-only access. This guards against two processes
//! opening the same store, not against threads within one process.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use bytes::BytesMut;
use fs2::FileExt;

use crate::address::Block;
use crate::error::{Result, VaultError};
use crate::index::Slot;

/// How a store's files are opened and locked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    ReadWrite,
    ReadOnly,
}

impl AccessMode {
    pub fn is_read_only(self) -> bool {
        self == AccessMode::ReadOnly
    }
}

/// Take the advisory lock matching `mode` without blocking
pub fn lock_file(file: &File, mode: AccessMode, path: &Path) -> Result<()> {
    let res = match mode {
        AccessMode::ReadWrite => FileExt::try_lock_exclusive(file),
        AccessMode::ReadOnly => FileExt::try_lock_shared(file),
    };
    res.map_err(|e| match e.kind() {
        io::ErrorKind::WouldBlock => VaultError::Locked(path.display().to_string()),
        _ if e.raw_os_error() == fs2::lock_contended_error().raw_os_error() => {
            VaultError::Locked(path.display().to_string())
        }
        _ => VaultError::Io(e),
    })
}

/// A bucket's backing file
#[derive(Debug)]
pub struct BlockFile {
    file: File,
    path: PathBuf,
    block_size: usize,
    capacity: u32,
}

impl BlockFile {
    /// Open a bucket file
    ///
    /// In read-write mode missing parent directories and the file itself are
    /// created. In read-only mode a missing file is an I/O error.
    pub fn open(path: &Path, block_size: usize, capacity: u32, mode: AccessMode) -> Result<Self> {
        let mut opts = OpenOptions::new();
        opts.read(true);
        if !mode.is_read_only() {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            opts.write(true).create(true);
        }

        let file = opts.open(path)?;
        lock_file(&file, mode, path)?;

        tracing::trace!("opened bucket file {:?} ({:?})", path, mode);

        Ok(Self {
            file,
            path: path.to_path_buf(),
            block_size,
            capacity,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the block stored in `slot`
    ///
    /// Short reads are errors; a slot is never silently zero-filled.
    pub fn read_block(&self, slot: Slot) -> Result<Block> {
        self.check_slot(slot)?;
        let mut buf = BytesMut::zeroed(self.block_size);
        sys_io::read_exact_at(&self.file, &mut buf, self.offset(slot))?;
        Ok(Block::from_bytes(buf.freeze()))
    }

    /// Write `block` into `slot`
    ///
    /// The caller is responsible for calling [`BlockFile::sync`] before it
    /// considers the write durable.
    pub fn write_block(&self, slot: Slot, block: &Block) -> Result<()> {
        self.check_slot(slot)?;
        if block.len() != self.block_size {
            return Err(VaultError::BlockTooLarge {
                len: block.len(),
                max: self.block_size,
            });
        }
        sys_io::write_all_at(&self.file, block.as_bytes(), self.offset(slot))?;
        Ok(())
    }

    /// Zero a slot and release its disk space
    ///
    /// With `secure` set the slot is first overwritten with `0xff` and
    /// synced, so the original bytes are replaced on disk at least twice.
    pub fn erase_block(&self, slot: Slot, secure: bool) -> Result<()> {
        self.check_slot(slot)?;
        let offset = self.offset(slot);

        if secure {
            let ones = vec![0xffu8; self.block_size];
            sys_io::write_all_at(&self.file, &ones, offset)?;
            self.sync()?;
        }

        let zeros = vec![0u8; self.block_size];
        sys_io::write_all_at(&self.file, &zeros, offset)?;
        if secure {
            self.sync()?;
        }

        self.punch_hole(slot);
        Ok(())
    }

    /// Shrink the file so it holds exactly `slots` slots
    pub fn truncate(&self, slots: Slot) -> Result<()> {
        let len = self.offset(slots);
        if self.file.metadata()?.len() > len {
            tracing::debug!("truncating {:?} to {} slots", self.path, slots);
            self.file.set_len(len)?;
        }
        Ok(())
    }

    /// Flush data written to this file to stable storage
    pub fn sync(&self) -> Result<()> {
        self.file.sync_data()?;
        Ok(())
    }

    /// Current length of the file in bytes
    pub fn len(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    fn offset(&self, slot: Slot) -> u64 {
        u64::from(slot) * self.block_size as u64
    }

    fn check_slot(&self, slot: Slot) -> Result<()> {
        if slot >= self.capacity {
            return Err(VaultError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "slot {} out of range for {:?} ({} slots)",
                    slot, self.path, self.capacity
                ),
            )));
        }
        Ok(())
    }

    /// Ask the filesystem to deallocate a slot's space. Failures only cost
    /// disk space, so they are logged and hole punching is switched off.
    fn punch_hole(&self, #[allow(unused)] slot: Slot) {
        #[cfg(target_os = "linux")]
        {
            use std::os::unix::io::AsRawFd;
            use std::sync::atomic::{AtomicBool, Ordering::Relaxed};

            use libc::{fallocate, FALLOC_FL_KEEP_SIZE, FALLOC_FL_PUNCH_HOLE};

            static HOLE_PUNCHING_ENABLED: AtomicBool = AtomicBool::new(true);
            const MODE: i32 = FALLOC_FL_KEEP_SIZE | FALLOC_FL_PUNCH_HOLE;

            if !HOLE_PUNCHING_ENABLED.load(Relaxed) {
                return;
            }

            let (Ok(offset), Ok(len)) = (
                libc::off_t::try_from(self.offset(slot)),
                libc::off_t::try_from(self.block_size),
            ) else {
                return;
            };

            let ret = unsafe { fallocate(self.file.as_raw_fd(), MODE, offset, len) };

            if ret != 0 {
                let err = io::Error::last_os_error();
                tracing::warn!(
                    "failed to punch hole in {:?}: {}. disabling hole punching",
                    self.path,
                    err
                );
                HOLE_PUNCHING_ENABLED.store(false, Relaxed);
            }
        }
    }
}

#[cfg(unix)]
mod sys_io {
    use std::fs::File;
    use std::io;
    use std::os::unix::fs::FileExt;

    pub fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<()> {
        file.read_exact_at(buf, offset)
    }

    pub fn write_all_at(file: &File, buf: &[u8], offset: u64) -> io::Result<()> {
        file.write_all_at(buf, offset)
    }
}

#[cfg(windows)]
mod sys_io {
    use std::fs::File;
    use std::io;
    use std::os::windows::fs::FileExt;

    pub fn read_exact_at(file: &File, mut buf: &mut [u8], mut offset: u64) -> io::Result<()> {
        while !buf.is_empty() {
            match file.seek_read(buf, offset) {
                Ok(0) => break,
                Ok(n) => {
                    let tmp = buf;
                    buf = &mut tmp[n..];
                    offset += n as u64;
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        if !buf.is_empty() {
            Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "failed to fill whole buffer",
            ))
        } else {
            Ok(())
        }
    }

    pub fn write_all_at(file: &File, mut buf: &[u8], mut offset: u64) -> io::Result<()> {
        while !buf.is_empty() {
            match file.seek_write(buf, offset) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "failed to write whole buffer",
                    ));
                }
                Ok(n) => {
                    buf = &buf[n..];
                    offset += n as u64;
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}
