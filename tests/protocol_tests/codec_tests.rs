//! Codec Tests
//!
//! Tests for command and response encoding/decoding.

use std::io::Cursor;

use blockvault::address::{Address, Block};
use blockvault::engine::{Stat, WalkItem};
use blockvault::error::VaultError;
use blockvault::protocol::{
    decode_command, decode_put_reply, decode_remove_reply, decode_response, decode_stat_reply,
    decode_walk_item, encode_command, encode_put_reply, encode_remove_reply, encode_response,
    encode_stat_reply, encode_walk_item, read_command, read_response, write_command,
    write_response, Command, Response, Status,
};

fn sample_address() -> Address {
    Address::hash(b"sample")
}

// =============================================================================
// Command Encoding/Decoding Tests
// =============================================================================

#[test]
fn test_encode_decode_get() {
    let cmd = Command::Get {
        address: sample_address(),
        skip_payload: true,
    };
    assert_eq!(decode_command(&encode_command(&cmd)).unwrap(), cmd);
}

#[test]
fn test_encode_decode_put_with_expected() {
    let cmd = Command::Put {
        data: b"block data".to_vec(),
        expected: Some(sample_address()),
    };
    assert_eq!(decode_command(&encode_command(&cmd)).unwrap(), cmd);
}

#[test]
fn test_encode_decode_put_without_expected() {
    let cmd = Command::Put {
        data: Vec::new(),
        expected: None,
    };
    assert_eq!(decode_command(&encode_command(&cmd)).unwrap(), cmd);
}

#[test]
fn test_encode_decode_put_binary_data() {
    let data: Vec<u8> = (0..=255).collect();
    let cmd = Command::Put {
        data,
        expected: None,
    };
    assert_eq!(decode_command(&encode_command(&cmd)).unwrap(), cmd);
}

#[test]
fn test_encode_decode_remove() {
    let cmd = Command::Remove {
        address: sample_address(),
        secure: true,
    };
    assert_eq!(decode_command(&encode_command(&cmd)).unwrap(), cmd);
}

#[test]
fn test_encode_decode_walk() {
    let cmd = Command::Walk {
        want_blocks: false,
        pattern: b"needle".to_vec(),
    };
    assert_eq!(decode_command(&encode_command(&cmd)).unwrap(), cmd);
}

#[test]
fn test_encode_decode_stat_and_ping() {
    for cmd in [Command::Stat, Command::Ping] {
        let encoded = encode_command(&cmd);
        assert_eq!(encoded.len(), 5);
        assert_eq!(decode_command(&encoded).unwrap(), cmd);
    }
}

// =============================================================================
// Response Encoding/Decoding Tests
// =============================================================================

#[test]
fn test_encode_decode_response_ok() {
    let resp = Response::ok(Some(b"payload".to_vec()));
    assert_eq!(decode_response(&encode_response(&resp)).unwrap(), resp);
}

#[test]
fn test_encode_decode_response_ok_no_payload() {
    let resp = Response::ok(None);
    let decoded = decode_response(&encode_response(&resp)).unwrap();
    assert_eq!(decoded.status, Status::Ok);
    assert_eq!(decoded.payload, None);
}

#[test]
fn test_encode_decode_every_status() {
    for status in [
        Status::Ok,
        Status::NotFound,
        Status::Error,
        Status::Invalid,
        Status::Integrity,
        Status::Exhausted,
        Status::Denied,
        Status::Cancelled,
        Status::End,
    ] {
        let resp = Response {
            status,
            payload: None,
        };
        assert_eq!(decode_response(&encode_response(&resp)).unwrap().status, status);
    }
}

#[test]
fn test_error_response_maps_status() {
    let err = VaultError::CapacityExhausted { total: 4 };
    let resp = Response::from_error(&err);

    assert_eq!(resp.status, Status::Exhausted);
    assert!(!resp.status.is_retryable());

    match resp.into_error() {
        VaultError::Remote { status, message } => {
            assert_eq!(status, Status::Exhausted);
            assert!(message.contains('4'));
        }
        other => panic!("expected remote error, got {:?}", other),
    }
}

#[test]
fn test_status_retryable() {
    assert!(Status::Error.is_retryable());
    assert!(!Status::Invalid.is_retryable());
    assert!(!Status::Integrity.is_retryable());
    assert!(!Status::Denied.is_retryable());
}

// =============================================================================
// Reply Body Tests
// =============================================================================

#[test]
fn test_put_reply() {
    let body = encode_put_reply(&sample_address(), true);
    assert_eq!(body.len(), 21);
    assert_eq!(decode_put_reply(&body).unwrap(), (sample_address(), true));
}

#[test]
fn test_remove_reply() {
    assert!(decode_remove_reply(&encode_remove_reply(true)).unwrap());
    assert!(!decode_remove_reply(&encode_remove_reply(false)).unwrap());
    assert!(decode_remove_reply(&[]).is_err());
}

#[test]
fn test_stat_reply() {
    let stat = Stat {
        used: 3,
        total: 1 << 40,
    };
    assert_eq!(decode_stat_reply(&encode_stat_reply(&stat)).unwrap(), stat);
}

#[test]
fn test_walk_item_with_and_without_block() {
    let block = Block::pad(b"walked", 32).unwrap();
    let with = WalkItem {
        address: block.address(),
        block: Some(block),
    };
    assert_eq!(decode_walk_item(&encode_walk_item(&with)).unwrap(), with);

    let without = WalkItem {
        address: sample_address(),
        block: None,
    };
    assert_eq!(decode_walk_item(&encode_walk_item(&without)).unwrap(), without);
}

// =============================================================================
// Error Handling Tests
// =============================================================================

#[test]
fn test_incomplete_header() {
    let result = decode_command(&[0x01, 0x00]);
    assert!(matches!(result, Err(VaultError::Protocol(_))));
}

#[test]
fn test_incomplete_payload() {
    let mut encoded = encode_command(&Command::Get {
        address: sample_address(),
        skip_payload: false,
    });
    encoded.truncate(encoded.len() - 3);
    assert!(decode_command(&encoded).is_err());
}

#[test]
fn test_unknown_command_type() {
    let bytes = [0xFF, 0x00, 0x00, 0x00, 0x00];
    assert!(matches!(decode_command(&bytes), Err(VaultError::Protocol(_))));
}

#[test]
fn test_unknown_response_status() {
    let bytes = [0xFF, 0x00, 0x00, 0x00, 0x00];
    assert!(decode_response(&bytes).is_err());
}

#[test]
fn test_oversized_payload_rejected() {
    let bytes = [0x02, 0xFF, 0xFF, 0xFF, 0xFF];
    assert!(decode_command(&bytes).is_err());
    assert!(read_command(&mut Cursor::new(bytes.to_vec())).is_err());
}

#[test]
fn test_get_with_short_address() {
    let bytes = [0x01, 0x00, 0x00, 0x00, 0x03, 0x00, 0xAA, 0xBB];
    assert!(matches!(decode_command(&bytes), Err(VaultError::Protocol(_))));
}

#[test]
fn test_invalid_flag_byte() {
    let mut encoded = encode_command(&Command::Remove {
        address: sample_address(),
        secure: false,
    });
    encoded[5] = 2;
    assert!(decode_command(&encoded).is_err());
}

#[test]
fn test_put_flag_without_address() {
    let bytes = [0x02, 0x00, 0x00, 0x00, 0x02, 0x01, 0xAA];
    assert!(decode_command(&bytes).is_err());
}

#[test]
fn test_ping_with_unexpected_payload() {
    let bytes = [0x06, 0x00, 0x00, 0x00, 0x01, 0x00];
    assert!(decode_command(&bytes).is_err());
}

// =============================================================================
// Stream I/O Tests
// =============================================================================

#[test]
fn test_stream_multiple_commands() {
    let commands = vec![
        Command::Put {
            data: b"one".to_vec(),
            expected: None,
        },
        Command::Get {
            address: sample_address(),
            skip_payload: false,
        },
        Command::Stat,
        Command::Ping,
    ];

    let mut buffer = Vec::new();
    for cmd in &commands {
        write_command(&mut buffer, cmd).unwrap();
    }

    let mut cursor = Cursor::new(buffer);
    for cmd in &commands {
        assert_eq!(&read_command(&mut cursor).unwrap(), cmd);
    }
}

#[test]
fn test_stream_walk_frames() {
    let mut buffer = Vec::new();
    for i in 0..3u8 {
        let item = WalkItem {
            address: Address::hash(&[i]),
            block: None,
        };
        write_response(&mut buffer, &Response::ok(Some(encode_walk_item(&item)))).unwrap();
    }
    write_response(&mut buffer, &Response::end()).unwrap();

    let mut cursor = Cursor::new(buffer);
    let mut seen = 0;
    loop {
        let resp = read_response(&mut cursor).unwrap();
        if resp.status == Status::End {
            break;
        }
        let item = decode_walk_item(resp.payload.as_deref().unwrap()).unwrap();
        assert_eq!(item.address, Address::hash(&[seen]));
        seen += 1;
    }
    assert_eq!(seen, 3);
}

#[test]
fn test_stream_truncated_is_io_error() {
    let mut encoded = encode_response(&Response::ok(Some(b"cut short".to_vec())));
    encoded.truncate(8);
    let err = read_response(&mut Cursor::new(encoded)).unwrap_err();
    assert!(matches!(err, VaultError::Io(_)));
}

// =============================================================================
// Wire Format Tests
// =============================================================================

#[test]
fn test_wire_format_get() {
    let address = sample_address();
    let encoded = encode_command(&Command::Get {
        address,
        skip_payload: false,
    });

    assert_eq!(encoded[0], 0x01);
    assert_eq!(&encoded[1..5], &[0x00, 0x00, 0x00, 0x15]);
    assert_eq!(encoded[5], 0x00);
    assert_eq!(&encoded[6..], address.as_bytes());
}

#[test]
fn test_wire_format_response_ok() {
    let encoded = encode_response(&Response::ok(Some(b"PONG".to_vec())));
    assert_eq!(encoded, vec![0x00, 0x00, 0x00, 0x00, 0x04, b'P', b'O', b'N', b'G']);
}
