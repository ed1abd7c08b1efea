//! # Error Types
//!
//! Comprehensive error handling for the object channel.
//!
//! This module defines all error variants that can occur while encoding object
//! graphs, framing blocks, correlating calls and managing sessions.
//!
//! ## Error Categories
//! - **I/O Errors**: stream failures, truncated input
//! - **Framing Errors**: malformed or oversized frames (fatal to a connection)
//! - **Data Integrity Errors**: bad payloads, unknown block kinds, null required members
//! - **Call Errors**: remote failures, timeouts, closed channels
//! - **Handshake Errors**: interface mismatch, rejected clients
//!
//! All errors implement `std::error::Error` for interoperability.
//!
//! ## Example Usage
//! ```rust
//! use objwire::error::{ProtocolError, Result};
//! use objwire::core::packer::Packer;
//!
//! fn first_word(bytes: &[u8]) -> Result<i32> {
//!     let mut packer = Packer::new(bytes);
//!     packer.read_i32()
//! }
//!
//! assert!(matches!(first_word(&[1, 0]), Err(ProtocolError::Io(_))));
//! ```

use serde::{Deserialize, Serialize};
use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Channel state errors
    pub const ERR_CHANNEL_CLOSED: &str = "Channel closed";
    pub const ERR_CHANNEL_DETACHED: &str = "Channel has no attached connection";
    pub const ERR_NO_RUNTIME: &str = "Data channel must be created inside a Tokio runtime";

    /// Framing errors
    pub const ERR_FRAME_LENGTH: &str = "Frame length must cover at least the block kind";
    pub const ERR_TRUNCATED_HEADER: &str = "Block header truncated";

    /// Graph codec errors
    pub const ERR_NEGATIVE_ID: &str = "Negative reference id";
    pub const ERR_NEGATIVE_LENGTH: &str = "Negative length prefix";
    pub const ERR_INVALID_UTF8: &str = "String payload is not valid UTF-8";
    pub const ERR_COUNT_EXCEEDS_INPUT: &str = "Element count exceeds remaining input";
    pub const ERR_CACHED_TYPE_MISMATCH: &str = "Cached reference has an unexpected type";
    pub const ERR_TRAILING_BYTES: &str = "Unexpected trailing bytes after payload";

    /// Handshake errors
    pub const ERR_NOT_AUTHENTICATED: &str = "Channel handshake has not completed";
    pub const ERR_ACCESS_DENIED: &str = "Client is not allowed to use this service";
    pub const ERR_NO_BOOTSTRAP: &str = "No bootstrap service exported";

    /// Session errors
    pub const ERR_SESSION_KEY: &str = "Invalid session key";
    pub const ERR_SESSIONS_FULL: &str = "Session capacity reached";

    /// Synchronization errors
    pub const ERR_LOCK_POISONED: &str = "Synchronization primitive poisoned";
}

// ProtocolError is the primary error type for all channel operations
#[derive(Error, Debug, Serialize, Deserialize)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    #[serde(skip_serializing, skip_deserializing)]
    Io(#[from] io::Error),

    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    #[error("Frame too large: {0} bytes")]
    OversizedFrame(usize),

    #[error("Unknown block kind: {0}")]
    UnknownBlockKind(u8),

    #[error("Data integrity error: {0}")]
    DataIntegrity(String),

    #[error("Unexpected null reference for non-nullable {0}")]
    UnexpectedNull(String),

    #[error("Required member '{type_name}.{member}' is null")]
    MissingRequiredMember { type_name: String, member: String },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Remote call failed: {0}")]
    RemoteCall(String),

    #[error("Unknown object id: {0}")]
    UnknownObject(i16),

    #[error("Unknown method id {method_id} on object {object_id}")]
    UnknownMethod { object_id: i16, method_id: i16 },

    #[error("Authentication failed: {0}")]
    AuthenticationError(String),

    #[error("Transport error: {0}")]
    TransportError(String),

    #[error("Channel closed")]
    ConnectionClosed,

    #[error("Timeout occurred")]
    Timeout,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Custom error: {0}")]
    Custom(String),
}

impl ProtocolError {
    /// True for errors that end the current connection rather than a single message.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ProtocolError::Io(_)
                | ProtocolError::InvalidFrame(_)
                | ProtocolError::OversizedFrame(_)
                | ProtocolError::ConnectionClosed
        )
    }
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_member_names_type_and_member() {
        let err = ProtocolError::MissingRequiredMember {
            type_name: "Person".into(),
            member: "name".into(),
        };
        assert_eq!(err.to_string(), "Required member 'Person.name' is null");
    }

    #[test]
    fn test_fatal_classification() {
        assert!(ProtocolError::OversizedFrame(10).is_fatal());
        assert!(ProtocolError::Io(io::ErrorKind::UnexpectedEof.into()).is_fatal());
        assert!(!ProtocolError::UnknownBlockKind(9).is_fatal());
        assert!(!ProtocolError::RemoteCall("boom".into()).is_fatal());
    }
}
