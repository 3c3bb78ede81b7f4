//! Backend Tests
//!
//! Tests for the backend trait over the engine, the decorators and the
//! registry.

use std::sync::Arc;

use blockvault::address::{Address, Block};
use blockvault::backend::{Backend, Layered, Limit, Registry, Union, Verify};
use blockvault::config::Config;
use blockvault::engine::{Engine, WalkOptions};
use blockvault::VaultError;
use tempfile::TempDir;

const BLOCK_SIZE: usize = 128;

// =============================================================================
// Helper Functions
// =============================================================================

fn config_in(dir: &TempDir, name: &str, num_total: u32) -> Config {
    Config::builder()
        .data_dir(dir.path().join(name))
        .block_size(BLOCK_SIZE)
        .num_total(num_total)
        .max_slots_log2(8)
        .build()
}

fn open_backend(dir: &TempDir, name: &str, num_total: u32) -> Arc<dyn Backend> {
    Arc::new(Engine::open(config_in(dir, name, num_total)).unwrap())
}

fn address_of(data: &[u8]) -> Address {
    Block::pad(data, BLOCK_SIZE).unwrap().address()
}

// =============================================================================
// Engine as Backend
// =============================================================================

#[test]
fn test_engine_backend_roundtrip() {
    let dir = TempDir::new().unwrap();
    let backend = open_backend(&dir, "store", 100);

    let (address, inserted) = backend.put(b"via trait", None).unwrap();
    assert!(inserted);
    assert!(backend.contains(&address).unwrap());
    assert_eq!(backend.get(&address).unwrap().unwrap().trimmed(), b"via trait");
    assert_eq!(backend.stat().unwrap().used, 1);

    let walked: Vec<_> = backend
        .walk(WalkOptions::default())
        .unwrap()
        .map(|i| i.unwrap().address)
        .collect();
    assert_eq!(walked, vec![address]);

    assert!(backend.remove(&address, false).unwrap());
}

// =============================================================================
// Verify Tests
// =============================================================================

#[test]
fn test_verify_passes_good_blocks() {
    let dir = TempDir::new().unwrap();
    let verify = Verify::new(open_backend(&dir, "store", 100));

    let (address, _) = verify.put(b"checked", None).unwrap();
    assert!(verify.get(&address).unwrap().is_some());
}

#[test]
fn test_verify_rejects_wrong_expected_address() {
    let dir = TempDir::new().unwrap();
    let inner = open_backend(&dir, "store", 100);
    let verify = Verify::new(Arc::clone(&inner));

    let err = verify
        .put(b"payload", Some(&Address::hash(b"other")))
        .unwrap_err();
    assert!(matches!(err, VaultError::Integrity { .. }));
    assert_eq!(inner.stat().unwrap().used, 0);
}

// =============================================================================
// Limit Tests
// =============================================================================

#[test]
fn test_limit_caps_block_count() {
    let dir = TempDir::new().unwrap();
    let limit = Limit::new(open_backend(&dir, "store", 100), 2);

    limit.put(b"one", None).unwrap();
    limit.put(b"two", None).unwrap();

    let err = limit.put(b"three", None).unwrap_err();
    assert!(matches!(err, VaultError::CapacityExhausted { total: 2 }));

    // Existing blocks are still accepted
    assert!(!limit.put(b"one", None).unwrap().1);
    assert_eq!(limit.stat().unwrap().total, 2);
}

#[test]
fn test_limit_frees_on_remove() {
    let dir = TempDir::new().unwrap();
    let limit = Limit::new(open_backend(&dir, "store", 100), 1);

    let (address, _) = limit.put(b"one", None).unwrap();
    assert!(limit.put(b"two", None).is_err());

    limit.remove(&address, false).unwrap();
    assert!(limit.put(b"two", None).is_ok());
}

// =============================================================================
// Layered Tests
// =============================================================================

#[test]
fn test_layered_writes_through() {
    let dir = TempDir::new().unwrap();
    let upper = open_backend(&dir, "upper", 100);
    let lower = open_backend(&dir, "lower", 100);
    let layered = Layered::new(Arc::clone(&upper), Arc::clone(&lower)).unwrap();

    let (address, _) = layered.put(b"layered", None).unwrap();

    assert!(upper.contains(&address).unwrap());
    assert!(lower.contains(&address).unwrap());
}

#[test]
fn test_layered_backfills_upper() {
    let dir = TempDir::new().unwrap();
    let upper = open_backend(&dir, "upper", 100);
    let lower = open_backend(&dir, "lower", 100);

    let (address, _) = lower.put(b"only below", None).unwrap();
    let layered = Layered::new(Arc::clone(&upper), Arc::clone(&lower)).unwrap();

    assert!(!upper.contains(&address).unwrap());
    assert!(layered.get(&address).unwrap().is_some());
    assert!(upper.contains(&address).unwrap());
}

#[test]
fn test_layered_upper_full_is_not_an_error() {
    let dir = TempDir::new().unwrap();
    let upper = open_backend(&dir, "upper", 1);
    let lower = open_backend(&dir, "lower", 100);
    let layered = Layered::new(upper, Arc::clone(&lower)).unwrap();

    layered.put(b"first", None).unwrap();
    layered.put(b"second", None).unwrap();

    assert_eq!(lower.stat().unwrap().used, 2);
}

#[test]
fn test_layered_remove_clears_both() {
    let dir = TempDir::new().unwrap();
    let upper = open_backend(&dir, "upper", 100);
    let lower = open_backend(&dir, "lower", 100);
    let layered = Layered::new(Arc::clone(&upper), Arc::clone(&lower)).unwrap();

    let (address, _) = layered.put(b"gone", None).unwrap();
    assert!(layered.remove(&address, false).unwrap());

    assert!(!upper.contains(&address).unwrap());
    assert!(!lower.contains(&address).unwrap());
}

#[test]
fn test_layered_rejects_mismatched_block_sizes() {
    let dir = TempDir::new().unwrap();
    let upper = open_backend(&dir, "upper", 100);
    let config = Config::builder()
        .data_dir(dir.path().join("lower"))
        .block_size(BLOCK_SIZE * 2)
        .build();
    let lower: Arc<dyn Backend> = Arc::new(Engine::open(config).unwrap());

    assert!(matches!(Layered::new(upper, lower), Err(VaultError::Config(_))));
}

// =============================================================================
// Union Tests
// =============================================================================

#[test]
fn test_union_spills_to_next_member() {
    let dir = TempDir::new().unwrap();
    let a = open_backend(&dir, "a", 2);
    let b = open_backend(&dir, "b", 10);
    let union = Union::new(vec![Arc::clone(&a), Arc::clone(&b)]).unwrap();

    for i in 0..4 {
        union.put(format!("block {}", i).as_bytes(), None).unwrap();
    }

    assert_eq!(a.stat().unwrap().used, 2);
    assert_eq!(b.stat().unwrap().used, 2);

    let stat = union.stat().unwrap();
    assert_eq!(stat.used, 4);
    assert_eq!(stat.total, 12);
}

#[test]
fn test_union_get_from_any_member() {
    let dir = TempDir::new().unwrap();
    let a = open_backend(&dir, "a", 10);
    let b = open_backend(&dir, "b", 10);

    let (address, _) = b.put(b"in b", None).unwrap();
    let union = Union::new(vec![a, b]).unwrap();

    assert_eq!(union.get(&address).unwrap().unwrap().trimmed(), b"in b");
    assert_eq!(union.get(&address_of(b"nowhere")).unwrap(), None);
}

#[test]
fn test_union_dedups_existing_block() {
    let dir = TempDir::new().unwrap();
    let a = open_backend(&dir, "a", 10);
    let b = open_backend(&dir, "b", 10);

    b.put(b"shared", None).unwrap();
    let union = Union::new(vec![Arc::clone(&a), b]).unwrap();

    let (_, inserted) = union.put(b"shared", None).unwrap();
    assert!(!inserted);
    assert_eq!(a.stat().unwrap().used, 0);
}

#[test]
fn test_union_walk_dedups() {
    let dir = TempDir::new().unwrap();
    let a = open_backend(&dir, "a", 10);
    let b = open_backend(&dir, "b", 10);

    a.put(b"both", None).unwrap();
    b.put(b"both", None).unwrap();
    b.put(b"only b", None).unwrap();
    let union = Union::new(vec![a, b]).unwrap();

    let count = union
        .walk(WalkOptions::default())
        .unwrap()
        .filter(|i| i.is_ok())
        .count();
    assert_eq!(count, 2);
}

#[test]
fn test_union_all_full() {
    let dir = TempDir::new().unwrap();
    let union = Union::new(vec![open_backend(&dir, "a", 1), open_backend(&dir, "b", 1)]).unwrap();

    union.put(b"one", None).unwrap();
    union.put(b"two", None).unwrap();

    let err = union.put(b"three", None).unwrap_err();
    assert!(err.is_exhausted());
}

#[test]
fn test_union_requires_members() {
    assert!(Union::new(Vec::new()).is_err());
}

// =============================================================================
// Registry Tests
// =============================================================================

#[test]
fn test_registry_open_and_lookup() {
    let dir = TempDir::new().unwrap();
    let registry = Registry::new();

    let opened = registry
        .open_engine("main", config_in(&dir, "main", 10))
        .unwrap();
    let found = registry.require("main").unwrap();
    assert!(Arc::ptr_eq(&opened, &found));

    // Opening the same name again returns the registered instance
    let again = registry
        .open_engine("main", config_in(&dir, "main", 10))
        .unwrap();
    assert!(Arc::ptr_eq(&opened, &again));

    assert_eq!(registry.names(), vec!["main".to_string()]);
    assert!(registry.get("missing").is_none());
    assert!(matches!(registry.require("missing"), Err(VaultError::Config(_))));
}

#[test]
fn test_registry_rejects_duplicate_names() {
    let dir = TempDir::new().unwrap();
    let registry = Registry::new();

    registry.register("x", open_backend(&dir, "x", 10)).unwrap();
    let err = registry.register("x", open_backend(&dir, "y", 10)).unwrap_err();
    assert!(matches!(err, VaultError::Config(_)));
    assert_eq!(registry.len(), 1);
}

#[test]
fn test_registry_remove_releases_store() {
    let dir = TempDir::new().unwrap();
    let registry = Registry::new();

    registry
        .open_engine("main", config_in(&dir, "main", 10))
        .unwrap();
    assert!(registry.remove("main").is_some());
    assert!(registry.is_empty());

    // Lock released: the store can be opened again
    Engine::open(config_in(&dir, "main", 10)).unwrap();
}
