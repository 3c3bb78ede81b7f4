//! Block File Tests
//!
//! Tests for slot-addressed reads, writes, erasure and truncation.

use blockvault::address::Block;
use blockvault::blockfile::{AccessMode, BlockFile};
use blockvault::VaultError;
use tempfile::TempDir;

const BLOCK_SIZE: usize = 64;
const CAPACITY: u32 = 8;

// =============================================================================
// Helper Functions
// =============================================================================

fn open_temp(dir: &TempDir) -> BlockFile {
    let path = dir.path().join("ab").join("data.data");
    BlockFile::open(&path, BLOCK_SIZE, CAPACITY, AccessMode::ReadWrite).unwrap()
}

fn block(data: &[u8]) -> Block {
    Block::pad(data, BLOCK_SIZE).unwrap()
}

// =============================================================================
// Read/Write Tests
// =============================================================================

#[test]
fn test_open_creates_parent_directories() {
    let dir = TempDir::new().unwrap();
    let file = open_temp(&dir);

    assert!(file.path().exists());
    assert_eq!(file.len().unwrap(), 0);
}

#[test]
fn test_write_then_read() {
    let dir = TempDir::new().unwrap();
    let file = open_temp(&dir);

    file.write_block(3, &block(b"slot three")).unwrap();
    file.sync().unwrap();

    let read = file.read_block(3).unwrap();
    assert_eq!(read, block(b"slot three"));
    assert_eq!(file.len().unwrap(), 4 * BLOCK_SIZE as u64);
}

#[test]
fn test_slots_are_independent() {
    let dir = TempDir::new().unwrap();
    let file = open_temp(&dir);

    file.write_block(0, &block(b"zero")).unwrap();
    file.write_block(1, &block(b"one")).unwrap();

    assert_eq!(file.read_block(0).unwrap(), block(b"zero"));
    assert_eq!(file.read_block(1).unwrap(), block(b"one"));
}

#[test]
fn test_read_past_end_fails() {
    let dir = TempDir::new().unwrap();
    let file = open_temp(&dir);

    file.write_block(0, &block(b"zero")).unwrap();
    assert!(file.read_block(2).is_err());
}

#[test]
fn test_slot_beyond_capacity_rejected() {
    let dir = TempDir::new().unwrap();
    let file = open_temp(&dir);

    assert!(file.write_block(CAPACITY, &block(b"x")).is_err());
    assert!(file.read_block(CAPACITY).is_err());
}

#[test]
fn test_reopen_preserves_contents() {
    let dir = TempDir::new().unwrap();
    {
        let file = open_temp(&dir);
        file.write_block(5, &block(b"persistent")).unwrap();
        file.sync().unwrap();
    }

    let file = open_temp(&dir);
    assert_eq!(file.read_block(5).unwrap(), block(b"persistent"));
}

// =============================================================================
// Erase/Truncate Tests
// =============================================================================

#[test]
fn test_erase_zeroes_slot() {
    let dir = TempDir::new().unwrap();
    let file = open_temp(&dir);

    file.write_block(0, &block(b"secret")).unwrap();
    file.write_block(1, &block(b"neighbour")).unwrap();
    file.erase_block(0, false).unwrap();

    assert!(file.read_block(0).unwrap().as_bytes().iter().all(|&b| b == 0));
    assert_eq!(file.read_block(1).unwrap(), block(b"neighbour"));
}

#[test]
fn test_secure_erase_zeroes_slot() {
    let dir = TempDir::new().unwrap();
    let file = open_temp(&dir);

    file.write_block(2, &block(b"top secret")).unwrap();
    file.erase_block(2, true).unwrap();

    assert!(file.read_block(2).unwrap().as_bytes().iter().all(|&b| b == 0));
}

#[test]
fn test_truncate_shrinks_file() {
    let dir = TempDir::new().unwrap();
    let file = open_temp(&dir);

    for slot in 0..4 {
        file.write_block(slot, &block(&[slot as u8 + 1])).unwrap();
    }
    file.truncate(2).unwrap();

    assert_eq!(file.len().unwrap(), 2 * BLOCK_SIZE as u64);
    assert_eq!(file.read_block(1).unwrap(), block(&[2]));
}

#[test]
fn test_truncate_never_grows() {
    let dir = TempDir::new().unwrap();
    let file = open_temp(&dir);

    file.write_block(0, &block(b"only")).unwrap();
    file.truncate(4).unwrap();

    assert_eq!(file.len().unwrap(), BLOCK_SIZE as u64);
}

// =============================================================================
// Access Mode Tests
// =============================================================================

#[test]
fn test_read_only_open_of_missing_file_fails() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("missing.data");

    assert!(BlockFile::open(&path, BLOCK_SIZE, CAPACITY, AccessMode::ReadOnly).is_err());
    assert!(!path.exists());
}

#[test]
fn test_second_writer_is_locked_out() {
    let dir = TempDir::new().unwrap();
    let _first = open_temp(&dir);

    let path = dir.path().join("ab").join("data.data");
    let second = BlockFile::open(&path, BLOCK_SIZE, CAPACITY, AccessMode::ReadWrite);
    assert!(matches!(second, Err(VaultError::Locked(_))));
}

#[test]
fn test_shared_readers() {
    let dir = TempDir::new().unwrap();
    {
        let file = open_temp(&dir);
        file.write_block(0, &block(b"shared")).unwrap();
        file.sync().unwrap();
    }

    let path = dir.path().join("ab").join("data.data");
    let a = BlockFile::open(&path, BLOCK_SIZE, CAPACITY, AccessMode::ReadOnly).unwrap();
    let b = BlockFile::open(&path, BLOCK_SIZE, CAPACITY, AccessMode::ReadOnly).unwrap();

    assert_eq!(a.read_block(0).unwrap(), b.read_block(0).unwrap());
}
