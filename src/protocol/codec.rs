//! Protocol codec
//!
//! Encoding and decoding functions for the wire protocol.
//!
//! ## Wire Format
//!
//! ### Request (Command) Format
//! ```text
//! ┌──────────┬──────────┬─────────────────────────────┐
//! │ Cmd (1)  │ Len (4)  │         Payload             │
//! └──────────┴──────────┴─────────────────────────────┘
//! ```
//!
//! ### Payload by Command Type
//! - GET:    skip_payload (1) + address (20)
//! - PUT:    has_expected (1) + [address (20)] + data
//! - REMOVE: secure (1) + address (20)
//! - STAT:   empty
//! - WALK:   want_blocks (1) + pattern
//! - PING:   empty
//!
//! ### Response Format
//! ```text
//! ┌──────────┬──────────┬─────────────────────────────┐
//! │Status(1) │ Len (4)  │         Payload             │
//! └──────────┴──────────┴─────────────────────────────┘
//! ```
//!
//! ### Reply Bodies (status OK)
//! - GET:    block bytes, or empty when `skip_payload` was set
//! - PUT:    address (20) + inserted (1)
//! - REMOVE: deleted (1)
//! - STAT:   used (8) + total (8)
//! - WALK:   one frame per block: address (20) + [block], then an END frame
//! - PING:   "PONG"

use std::io::{Read, Write};

use super::{Command, CommandType, Response, Status};
use crate::address::{Address, Block, ADDRESS_LEN};
use crate::engine::{Stat, WalkItem};
use crate::error::{Result, VaultError};

/// Header size: 1 byte command/status + 4 bytes length
pub const HEADER_SIZE: usize = 5;

/// Maximum payload size (16 MB)
pub const MAX_PAYLOAD_SIZE: u32 = 16 * 1024 * 1024;

/// Body of a ping reply
pub const PONG: &[u8] = b"PONG";

// =============================================================================
// Command Encoding/Decoding
// =============================================================================

/// Encode a command to bytes
///
/// Format: cmd_type (1) + payload_len (4) + payload
pub fn encode_command(command: &Command) -> Vec<u8> {
    let cmd_type = command.command_type() as u8;

    let payload = match command {
        Command::Get {
            address,
            skip_payload,
        } => {
            let mut payload = Vec::with_capacity(1 + ADDRESS_LEN);
            payload.push(*skip_payload as u8);
            payload.extend_from_slice(address.as_bytes());
            payload
        }
        Command::Put { data, expected } => {
            let mut payload = Vec::with_capacity(1 + ADDRESS_LEN + data.len());
            match expected {
                Some(address) => {
                    payload.push(1);
                    payload.extend_from_slice(address.as_bytes());
                }
                None => payload.push(0),
            }
            payload.extend_from_slice(data);
            payload
        }
        Command::Remove { address, secure } => {
            let mut payload = Vec::with_capacity(1 + ADDRESS_LEN);
            payload.push(*secure as u8);
            payload.extend_from_slice(address.as_bytes());
            payload
        }
        Command::Walk {
            want_blocks,
            pattern,
        } => {
            let mut payload = Vec::with_capacity(1 + pattern.len());
            payload.push(*want_blocks as u8);
            payload.extend_from_slice(pattern);
            payload
        }
        Command::Stat | Command::Ping => Vec::new(),
    };

    let mut message = Vec::with_capacity(HEADER_SIZE + payload.len());
    message.push(cmd_type);
    message.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    message.extend_from_slice(&payload);

    message
}

/// Decode a command from bytes
pub fn decode_command(bytes: &[u8]) -> Result<Command> {
    let (cmd_type, payload) = split_frame(bytes, "command")?;

    match cmd_type {
        x if x == CommandType::Get as u8 => decode_get_command(payload),
        x if x == CommandType::Put as u8 => decode_put_command(payload),
        x if x == CommandType::Remove as u8 => decode_remove_command(payload),
        x if x == CommandType::Stat as u8 => expect_empty(payload, "STAT").map(|_| Command::Stat),
        x if x == CommandType::Walk as u8 => decode_walk_command(payload),
        x if x == CommandType::Ping as u8 => expect_empty(payload, "PING").map(|_| Command::Ping),
        _ => Err(VaultError::Protocol(format!(
            "Unknown command type: 0x{:02x}",
            cmd_type
        ))),
    }
}

/// Validate the header and return (type byte, payload)
fn split_frame<'a>(bytes: &'a [u8], what: &str) -> Result<(u8, &'a [u8])> {
    if bytes.len() < HEADER_SIZE {
        return Err(VaultError::Protocol(format!(
            "Incomplete {} header: expected {} bytes, got {}",
            what,
            HEADER_SIZE,
            bytes.len()
        )));
    }

    let payload_len = u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]);
    check_payload_len(payload_len)?;

    let total_len = HEADER_SIZE + payload_len as usize;
    if bytes.len() < total_len {
        return Err(VaultError::Protocol(format!(
            "Incomplete {} payload: expected {} bytes, got {}",
            what,
            total_len,
            bytes.len()
        )));
    }

    Ok((bytes[0], &bytes[HEADER_SIZE..total_len]))
}

fn check_payload_len(payload_len: u32) -> Result<()> {
    if payload_len > MAX_PAYLOAD_SIZE {
        return Err(VaultError::Protocol(format!(
            "Payload too large: {} bytes (max {})",
            payload_len, MAX_PAYLOAD_SIZE
        )));
    }
    Ok(())
}

fn decode_flag(byte: u8, name: &str) -> Result<bool> {
    match byte {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(VaultError::Protocol(format!(
            "{}: invalid flag value {}",
            name, other
        ))),
    }
}

fn expect_empty(payload: &[u8], name: &str) -> Result<()> {
    if !payload.is_empty() {
        return Err(VaultError::Protocol(format!(
            "{} command: unexpected payload of {} bytes",
            name,
            payload.len()
        )));
    }
    Ok(())
}

/// Decode a flag byte followed by exactly one address
fn decode_flag_and_address(payload: &[u8], name: &str) -> Result<(bool, Address)> {
    if payload.len() != 1 + ADDRESS_LEN {
        return Err(VaultError::Protocol(format!(
            "{} command: expected {} bytes, got {}",
            name,
            1 + ADDRESS_LEN,
            payload.len()
        )));
    }
    let flag = decode_flag(payload[0], name)?;
    let address = Address::from_slice(&payload[1..])?;
    Ok((flag, address))
}

/// Decode GET command payload
fn decode_get_command(payload: &[u8]) -> Result<Command> {
    let (skip_payload, address) = decode_flag_and_address(payload, "GET")?;
    Ok(Command::Get {
        address,
        skip_payload,
    })
}

/// Decode PUT command payload
fn decode_put_command(payload: &[u8]) -> Result<Command> {
    let Some((&flag, rest)) = payload.split_first() else {
        return Err(VaultError::Protocol(
            "PUT command: missing expected-address flag".to_string(),
        ));
    };

    if !decode_flag(flag, "PUT")? {
        return Ok(Command::Put {
            data: rest.to_vec(),
            expected: None,
        });
    }

    if rest.len() < ADDRESS_LEN {
        return Err(VaultError::Protocol(format!(
            "PUT command: incomplete address (expected {}, got {})",
            ADDRESS_LEN,
            rest.len()
        )));
    }
    let expected = Address::from_slice(&rest[..ADDRESS_LEN])?;
    Ok(Command::Put {
        data: rest[ADDRESS_LEN..].to_vec(),
        expected: Some(expected),
    })
}

/// Decode REMOVE command payload
fn decode_remove_command(payload: &[u8]) -> Result<Command> {
    let (secure, address) = decode_flag_and_address(payload, "REMOVE")?;
    Ok(Command::Remove { address, secure })
}

/// Decode WALK command payload
fn decode_walk_command(payload: &[u8]) -> Result<Command> {
    let Some((&flag, pattern)) = payload.split_first() else {
        return Err(VaultError::Protocol(
            "WALK command: missing want-blocks flag".to_string(),
        ));
    };
    Ok(Command::Walk {
        want_blocks: decode_flag(flag, "WALK")?,
        pattern: pattern.to_vec(),
    })
}

// =============================================================================
// Response Encoding/Decoding
// =============================================================================

/// Encode a response to bytes
///
/// Format: status (1) + payload_len (4) + payload
pub fn encode_response(response: &Response) -> Vec<u8> {
    let payload = response.payload.as_deref().unwrap_or(&[]);
    let payload_len = payload.len() as u32;

    let mut message = Vec::with_capacity(HEADER_SIZE + payload.len());
    message.push(response.status as u8);
    message.extend_from_slice(&payload_len.to_be_bytes());
    message.extend_from_slice(payload);

    message
}

/// Decode a response from bytes
pub fn decode_response(bytes: &[u8]) -> Result<Response> {
    let (status_byte, payload) = split_frame(bytes, "response")?;

    let status = Status::from_u8(status_byte).ok_or_else(|| {
        VaultError::Protocol(format!("Unknown response status: 0x{:02x}", status_byte))
    })?;

    let payload = if payload.is_empty() {
        None
    } else {
        Some(payload.to_vec())
    };

    Ok(Response { status, payload })
}

// =============================================================================
// Reply Bodies
// =============================================================================

pub fn encode_put_reply(address: &Address, inserted: bool) -> Vec<u8> {
    let mut body = Vec::with_capacity(ADDRESS_LEN + 1);
    body.extend_from_slice(address.as_bytes());
    body.push(inserted as u8);
    body
}

pub fn decode_put_reply(body: &[u8]) -> Result<(Address, bool)> {
    if body.len() != ADDRESS_LEN + 1 {
        return Err(VaultError::Protocol(format!(
            "PUT reply: expected {} bytes, got {}",
            ADDRESS_LEN + 1,
            body.len()
        )));
    }
    let address = Address::from_slice(&body[..ADDRESS_LEN])?;
    Ok((address, decode_flag(body[ADDRESS_LEN], "PUT reply")?))
}

pub fn encode_remove_reply(deleted: bool) -> Vec<u8> {
    vec![deleted as u8]
}

pub fn decode_remove_reply(body: &[u8]) -> Result<bool> {
    match body {
        [flag] => decode_flag(*flag, "REMOVE reply"),
        _ => Err(VaultError::Protocol(format!(
            "REMOVE reply: expected 1 byte, got {}",
            body.len()
        ))),
    }
}

pub fn encode_stat_reply(stat: &Stat) -> Vec<u8> {
    let mut body = Vec::with_capacity(16);
    body.extend_from_slice(&stat.used.to_be_bytes());
    body.extend_from_slice(&stat.total.to_be_bytes());
    body
}

pub fn decode_stat_reply(body: &[u8]) -> Result<Stat> {
    if body.len() != 16 {
        return Err(VaultError::Protocol(format!(
            "STAT reply: expected 16 bytes, got {}",
            body.len()
        )));
    }
    let mut used = [0u8; 8];
    let mut total = [0u8; 8];
    used.copy_from_slice(&body[..8]);
    total.copy_from_slice(&body[8..]);
    Ok(Stat {
        used: u64::from_be_bytes(used),
        total: u64::from_be_bytes(total),
    })
}

pub fn encode_walk_item(item: &WalkItem) -> Vec<u8> {
    let block = item.block.as_ref().map(|b| b.as_bytes()).unwrap_or(&[]);
    let mut body = Vec::with_capacity(ADDRESS_LEN + block.len());
    body.extend_from_slice(item.address.as_bytes());
    body.extend_from_slice(block);
    body
}

pub fn decode_walk_item(body: &[u8]) -> Result<WalkItem> {
    if body.len() < ADDRESS_LEN {
        return Err(VaultError::Protocol(format!(
            "WALK frame: expected at least {} bytes, got {}",
            ADDRESS_LEN,
            body.len()
        )));
    }
    let address = Address::from_slice(&body[..ADDRESS_LEN])?;
    let block = if body.len() > ADDRESS_LEN {
        Some(Block::from_bytes(body[ADDRESS_LEN..].to_vec().into()))
    } else {
        None
    };
    Ok(WalkItem { address, block })
}

// =============================================================================
// Stream-based I/O helpers
// =============================================================================

/// Read one frame (header + payload) from a stream
fn read_frame<R: Read>(reader: &mut R) -> Result<Vec<u8>> {
    let mut header = [0u8; HEADER_SIZE];
    reader.read_exact(&mut header)?;

    let payload_len = u32::from_be_bytes([header[1], header[2], header[3], header[4]]);
    check_payload_len(payload_len)?;

    let mut frame = vec![0u8; HEADER_SIZE + payload_len as usize];
    frame[..HEADER_SIZE].copy_from_slice(&header);
    if payload_len > 0 {
        reader.read_exact(&mut frame[HEADER_SIZE..])?;
    }
    Ok(frame)
}

/// Read a complete command from a stream
///
/// Blocks until a complete command is received or an error occurs
pub fn read_command<R: Read>(reader: &mut R) -> Result<Command> {
    decode_command(&read_frame(reader)?)
}

/// Write a command to a stream
pub fn write_command<W: Write>(writer: &mut W, command: &Command) -> Result<()> {
    let bytes = encode_command(command);
    writer.write_all(&bytes)?;
    writer.flush()?;
    Ok(())
}

/// Read a complete response from a stream
pub fn read_response<R: Read>(reader: &mut R) -> Result<Response> {
    decode_response(&read_frame(reader)?)
}

/// Write a response to a stream
pub fn write_response<W: Write>(writer: &mut W, response: &Response) -> Result<()> {
    let bytes = encode_response(response);
    writer.write_all(&bytes)?;
    writer.flush()?;
    Ok(())
}
