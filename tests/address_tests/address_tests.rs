//! Address Tests
//!
//! Tests for address parsing/formatting and block padding.

use blockvault::address::{verify, Address, Block, ADDRESS_HEX_LEN, ADDRESS_LEN};
use blockvault::VaultError;

// =============================================================================
// Address Tests
// =============================================================================

#[test]
fn test_hash_of_empty_input() {
    let address = Address::hash(b"");
    assert_eq!(address.to_hex(), "da39a3ee5e6b4b0d3255bfef95601890afd80709");
}

#[test]
fn test_hash_of_known_input() {
    let address = Address::hash(b"abc");
    assert_eq!(address.to_hex(), "a9993e364706816aba3e25717850c26c9cd0d89d");
}

#[test]
fn test_parse_and_display() {
    let hex = "a9993e364706816aba3e25717850c26c9cd0d89d";
    let address = Address::parse(hex).unwrap();

    assert_eq!(address.to_string(), hex);
    assert_eq!(address.to_hex().len(), ADDRESS_HEX_LEN);
    assert_eq!(address, Address::hash(b"abc"));
}

#[test]
fn test_parse_accepts_uppercase() {
    let lower = Address::parse("a9993e364706816aba3e25717850c26c9cd0d89d").unwrap();
    let upper = Address::parse("A9993E364706816ABA3E25717850C26C9CD0D89D").unwrap();
    assert_eq!(lower, upper);
}

#[test]
fn test_parse_rejects_wrong_length() {
    let err = Address::parse("a9993e36").unwrap_err();
    assert!(matches!(err, VaultError::InvalidAddress(_)));

    let too_long = "0".repeat(ADDRESS_HEX_LEN + 2);
    assert!(matches!(
        Address::parse(&too_long),
        Err(VaultError::InvalidAddress(_))
    ));
}

#[test]
fn test_parse_rejects_non_hex() {
    let bad = "zz993e364706816aba3e25717850c26c9cd0d89d";
    assert!(matches!(
        Address::parse(bad),
        Err(VaultError::InvalidAddress(_))
    ));
}

#[test]
fn test_from_str() {
    let address: Address = "a9993e364706816aba3e25717850c26c9cd0d89d".parse().unwrap();
    assert_eq!(address, Address::hash(b"abc"));
}

#[test]
fn test_from_slice() {
    let bytes = [7u8; ADDRESS_LEN];
    let address = Address::from_slice(&bytes).unwrap();
    assert_eq!(address.as_bytes(), &bytes);

    assert!(Address::from_slice(&bytes[..10]).is_err());
}

#[test]
fn test_addresses_order_bytewise() {
    let mut low = [0u8; ADDRESS_LEN];
    let mut high = [0u8; ADDRESS_LEN];
    low[0] = 0x01;
    high[0] = 0x02;
    assert!(Address::from_bytes(low) < Address::from_bytes(high));
}

// =============================================================================
// Block Tests
// =============================================================================

#[test]
fn test_pad_fills_with_zeros() {
    let block = Block::pad(b"hi", 8).unwrap();

    assert_eq!(block.len(), 8);
    assert_eq!(block.as_bytes(), b"hi\0\0\0\0\0\0");
    assert_eq!(block.trimmed(), b"hi");
}

#[test]
fn test_pad_exact_size() {
    let block = Block::pad(b"12345678", 8).unwrap();
    assert_eq!(block.as_bytes(), b"12345678");
}

#[test]
fn test_pad_too_large() {
    let err = Block::pad(b"123456789", 8).unwrap_err();
    assert!(matches!(err, VaultError::BlockTooLarge { len: 9, max: 8 }));
}

#[test]
fn test_block_address_covers_padding() {
    let block = Block::pad(b"abc", 16).unwrap();

    let mut padded = b"abc".to_vec();
    padded.resize(16, 0);
    assert_eq!(block.address(), Address::hash(&padded));
    assert_ne!(block.address(), Address::hash(b"abc"));
}

#[test]
fn test_short_inputs_differing_in_trailing_zeros_collide() {
    let a = Block::pad(b"x", 16).unwrap();
    let b = Block::pad(b"x\0\0", 16).unwrap();
    assert_eq!(a.address(), b.address());
}

#[test]
fn test_verify() {
    let a = Address::hash(b"a");
    let b = Address::hash(b"b");

    assert!(verify(&a, &a).is_ok());
    match verify(&a, &b) {
        Err(VaultError::Integrity { expected, actual }) => {
            assert_eq!(expected, a);
            assert_eq!(actual, b);
        }
        other => panic!("expected integrity error, got {:?}", other),
    }
}
