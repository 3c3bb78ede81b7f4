//! Response definitions
//!
//! Represents responses to clients.

use crate::error::VaultError;

/// Response status codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Status {
    Ok = 0x00,
    NotFound = 0x01,
    /// I/O or other transient failure; retrying may succeed
    Error = 0x02,
    /// Malformed request
    Invalid = 0x03,
    /// Stored or supplied content does not match its address
    Integrity = 0x04,
    /// Global or bucket capacity exhausted
    Exhausted = 0x05,
    /// Not authorized, or store is read-only
    Denied = 0x06,
    Cancelled = 0x07,
    /// Terminates a walk stream
    End = 0x08,
}

impl Status {
    pub fn from_u8(byte: u8) -> Option<Self> {
        let status = match byte {
            0x00 => Status::Ok,
            0x01 => Status::NotFound,
            0x02 => Status::Error,
            0x03 => Status::Invalid,
            0x04 => Status::Integrity,
            0x05 => Status::Exhausted,
            0x06 => Status::Denied,
            0x07 => Status::Cancelled,
            0x08 => Status::End,
            _ => return None,
        };
        Some(status)
    }

    /// Whether a client may retry a request that failed with this status
    pub fn is_retryable(self) -> bool {
        self == Status::Error
    }

    pub fn is_success(self) -> bool {
        matches!(self, Status::Ok | Status::NotFound | Status::End)
    }
}

/// A response to send to client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Status code
    pub status: Status,

    /// Optional payload (reply body, or error message for failures)
    pub payload: Option<Vec<u8>>,
}

impl Response {
    /// Create an OK response with optional payload
    pub fn ok(payload: Option<Vec<u8>>) -> Self {
        Self {
            status: Status::Ok,
            payload,
        }
    }

    /// Create a NOT_FOUND response
    pub fn not_found() -> Self {
        Self {
            status: Status::NotFound,
            payload: None,
        }
    }

    /// Create the frame that ends a walk
    pub fn end() -> Self {
        Self {
            status: Status::End,
            payload: None,
        }
    }

    /// Create an ERROR response with a message
    pub fn error(message: &str) -> Self {
        Self::failure(Status::Error, message)
    }

    /// Create a failure response with an explicit status
    pub fn failure(status: Status, message: &str) -> Self {
        Self {
            status,
            payload: Some(message.as_bytes().to_vec()),
        }
    }

    /// Map an engine error to its wire status
    pub fn from_error(err: &VaultError) -> Self {
        Self::failure(err.status(), &err.to_string())
    }

    /// Turn a failure response back into an error (client side)
    pub fn into_error(self) -> VaultError {
        let message = self
            .payload
            .map(|p| String::from_utf8_lossy(&p).into_owned())
            .unwrap_or_default();
        VaultError::Remote {
            status: self.status,
            message,
        }
    }
}
