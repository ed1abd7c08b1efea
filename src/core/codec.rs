//! # Frame Codec
//!
//! Tokio codec turning a byte stream into [`RawFrame`]s and back, for use with
//! `tokio_util::codec::{FramedRead, FramedWrite}`.
//!
//! Decoding validates the length before reserving space, so a hostile length
//! field cannot trigger a large allocation. Bodies are split off the read
//! buffer without copying.
//!
//! ```rust
//! use bytes::BytesMut;
//! use objwire::core::codec::FrameCodec;
//! use objwire::core::frame::{kind, RawFrame};
//! use tokio_util::codec::{Decoder, Encoder};
//!
//! let mut codec = FrameCodec::default();
//! let mut buf = BytesMut::new();
//! codec.encode(RawFrame::new(kind::EVENT, vec![1, 2]), &mut buf).unwrap();
//! assert_eq!(&buf[..], &[3, 0, 0, 0, 5, 1, 2]);
//!
//! let frame = codec.decode(&mut buf).unwrap().unwrap();
//! assert_eq!(frame.kind, kind::EVENT);
//! ```

use crate::core::frame::{RawFrame, DEFAULT_MAX_FRAME_SIZE, LENGTH_PREFIX};
use crate::error::{constants, ProtocolError};
use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Length-prefixed frame codec.
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    max_frame_size: usize,
}

impl FrameCodec {
    pub fn new(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}

impl Decoder for FrameCodec {
    type Item = RawFrame;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < LENGTH_PREFIX {
            return Ok(None);
        }

        let len = i32::from_le_bytes([src[0], src[1], src[2], src[3]]);
        if len < 1 {
            return Err(ProtocolError::InvalidFrame(format!(
                "{}: {len}",
                constants::ERR_FRAME_LENGTH
            )));
        }
        let len = len as usize;
        if len > self.max_frame_size {
            return Err(ProtocolError::OversizedFrame(len));
        }

        let total = LENGTH_PREFIX + len;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        src.advance(LENGTH_PREFIX);
        let mut frame = src.split_to(len);
        let kind = frame.get_u8();
        Ok(Some(RawFrame {
            kind,
            body: frame.freeze(),
        }))
    }
}

impl Encoder<RawFrame> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: RawFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let len = item.wire_len();
        if len > self.max_frame_size {
            return Err(ProtocolError::OversizedFrame(len));
        }

        dst.reserve(LENGTH_PREFIX + len);
        dst.put_i32_le(len as i32);
        dst.put_u8(item.kind);
        dst.extend_from_slice(&item.body);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::frame::kind;

    #[test]
    fn test_partial_frame_waits() {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::from(&[4u8, 0, 0, 0, kind::CALL, 1][..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 6);

        buf.extend_from_slice(&[2, 3]);
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.kind, kind::CALL);
        assert_eq!(&frame.body[..], &[1, 2, 3]);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_zero_length_rejected() {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::from(&[0u8, 0, 0, 0][..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(ProtocolError::InvalidFrame(_))
        ));
    }

    #[test]
    fn test_oversized_rejected_before_buffering() {
        let mut codec = FrameCodec::new(8);
        let mut buf = BytesMut::from(&[9u8, 0, 0, 0][..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(ProtocolError::OversizedFrame(9))
        ));

        let mut out = BytesMut::new();
        assert!(codec
            .encode(RawFrame::new(kind::REPLY, vec![0u8; 8]), &mut out)
            .is_err());
    }

    #[test]
    fn test_back_to_back_frames() {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::new();
        codec.encode(RawFrame::new(kind::CALL, vec![7]), &mut buf).unwrap();
        codec.encode(RawFrame::new(kind::REPLY, Vec::new()), &mut buf).unwrap();

        assert_eq!(codec.decode(&mut buf).unwrap().unwrap().kind, kind::CALL);
        let second = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(second.kind, kind::REPLY);
        assert!(second.body.is_empty());
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }
}
