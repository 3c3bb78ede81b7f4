//! Command definitions
//!
//! Represents requests from clients.

use crate::address::Address;
use crate::auth::Operation;

/// Command types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CommandType {
    Get = 0x01,
    Put = 0x02,
    Remove = 0x03,
    Stat = 0x04,
    Walk = 0x05,
    Ping = 0x06,
}

/// A parsed command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Fetch a block; with `skip_payload` only report whether it exists
    Get { address: Address, skip_payload: bool },

    /// Store a block, optionally asserting the address it must hash to
    Put { data: Vec<u8>, expected: Option<Address> },

    /// Delete a block
    Remove { address: Address, secure: bool },

    /// Used and total block counts
    Stat,

    /// Stream every block, optionally only those containing `pattern`
    Walk { want_blocks: bool, pattern: Vec<u8> },

    /// Ping (health check)
    Ping,
}

impl Command {
    /// Get the command type
    pub fn command_type(&self) -> CommandType {
        match self {
            Command::Get { .. } => CommandType::Get,
            Command::Put { .. } => CommandType::Put,
            Command::Remove { .. } => CommandType::Remove,
            Command::Stat => CommandType::Stat,
            Command::Walk { .. } => CommandType::Walk,
            Command::Ping => CommandType::Ping,
        }
    }

    /// Operation checked against the authorizer; `None` for ping
    pub fn operation(&self) -> Option<Operation> {
        match self {
            Command::Get { .. } => Some(Operation::Get),
            Command::Put { .. } => Some(Operation::Put),
            Command::Remove { .. } => Some(Operation::Remove),
            Command::Stat => Some(Operation::Stat),
            Command::Walk { .. } => Some(Operation::Walk),
            Command::Ping => None,
        }
    }
}
