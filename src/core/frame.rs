//! # Frames
//!
//! Outer envelope shared by every block on the wire.
//!
//! ## Wire Format
//! ```text
//! [Length(4, i32 LE)] [Kind(1)] [Header + Payload(Length - 1)]
//! ```
//!
//! `Length` counts everything after itself, so the smallest legal frame has
//! length 1 (a kind byte and nothing else).

use bytes::Bytes;

/// Size of the length prefix.
pub const LENGTH_PREFIX: usize = 4;

/// Default maximum value of the length field (16 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Block kind bytes.
pub mod kind {
    pub const CALL: u8 = 3;
    pub const REPLY: u8 = 4;
    pub const EVENT: u8 = 5;
}

/// One frame with the length prefix stripped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    pub kind: u8,
    /// Kind-specific header followed by the payload.
    pub body: Bytes,
}

impl RawFrame {
    pub fn new(kind: u8, body: impl Into<Bytes>) -> Self {
        Self {
            kind,
            body: body.into(),
        }
    }

    /// Value of the length field for this frame.
    pub fn wire_len(&self) -> usize {
        1 + self.body.len()
    }
}
