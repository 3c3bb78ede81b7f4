//! Protocol Module
//!
//! Defines the wire protocol for client-server communication.
//!
//! ## Protocol Format (V1 - Simple Binary)
//!
//! ### Request Format
//! ```text
//! ┌──────────┬──────────┬─────────────────────────────┐
//! │ Cmd (1)  │ Len (4)  │         Payload             │
//! └──────────┴──────────┴─────────────────────────────┘
//! ```
//!
//! ### Commands
//! - 0x01: GET    - Payload: skip_payload (1) + address (20)
//! - 0x02: PUT    - Payload: has_expected (1) + [address (20)] + data
//! - 0x03: REMOVE - Payload: secure (1) + address (20)
//! - 0x04: STAT   - Payload: empty
//! - 0x05: WALK   - Payload: want_blocks (1) + pattern
//! - 0x06: PING   - Payload: empty
//!
//! ### Response Format
//! ```text
//! ┌──────────┬──────────┬─────────────────────────────┐
//! │Status(1) │ Len (4)  │         Payload             │
//! └──────────┴──────────┴─────────────────────────────┘
//! ```
//!
//! ### Status Codes
//! - 0x00: OK
//! - 0x01: NOT_FOUND
//! - 0x02: ERROR
//! - 0x03: INVALID
//! - 0x04: INTEGRITY
//! - 0x05: EXHAUSTED
//! - 0x06: DENIED
//! - 0x07: CANCELLED
//! - 0x08: END (walk stream terminator)

mod codec;
mod command;
mod response;

pub use codec::{
    decode_command, decode_put_reply, decode_remove_reply, decode_response, decode_stat_reply,
    decode_walk_item, encode_command, encode_put_reply, encode_remove_reply, encode_response,
    encode_stat_reply, encode_walk_item, read_command, read_response, write_command,
    write_response, HEADER_SIZE, MAX_PAYLOAD_SIZE, PONG,
};
pub use command::{Command, CommandType};
pub use response::{Response, Status};
