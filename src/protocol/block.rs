//! # Blocks
//!
//! The three messages carried in frames.
//!
//! ## Headers
//! ```text
//! Call  (3): [RequestID(4)] [ObjectID(2)] [MethodID(2)] [Args...]
//! Reply (4): [RequestID(4)] [Success(1)]                [Result... | Error text]
//! Event (5): [ObjectID(2)]  [EventID(2)]                [Args...]
//! ```
//!
//! A failed reply carries the error message as raw UTF-8 in place of the
//! result payload.

use crate::core::frame::{kind, RawFrame};
use crate::core::packer::Packer;
use crate::error::{constants, ProtocolError, Result};
use bytes::{Bytes, BytesMut};

const CALL_HEADER: usize = 8;
const REPLY_HEADER: usize = 5;
const EVENT_HEADER: usize = 4;

/// Request for `method_id` on `object_id`, correlated by `request_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallBlock {
    pub request_id: i32,
    pub object_id: i16,
    pub method_id: i16,
    pub payload: Bytes,
}

/// Answer to the call with the same `request_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyBlock {
    pub request_id: i32,
    pub success: bool,
    pub payload: Bytes,
}

impl ReplyBlock {
    pub fn success(request_id: i32, payload: Bytes) -> Self {
        Self {
            request_id,
            success: true,
            payload,
        }
    }

    pub fn failure(request_id: i32, message: &str) -> Self {
        Self {
            request_id,
            success: false,
            payload: Bytes::copy_from_slice(message.as_bytes()),
        }
    }

    /// Error text of a failed reply (lossy for invalid UTF-8).
    pub fn error_text(&self) -> Option<String> {
        (!self.success).then(|| String::from_utf8_lossy(&self.payload).into_owned())
    }
}

/// One-way notification raised by `object_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventBlock {
    pub object_id: i16,
    pub event_id: i16,
    pub payload: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    Call(CallBlock),
    Reply(ReplyBlock),
    Event(EventBlock),
}

impl Block {
    pub fn kind(&self) -> u8 {
        match self {
            Block::Call(_) => kind::CALL,
            Block::Reply(_) => kind::REPLY,
            Block::Event(_) => kind::EVENT,
        }
    }

    /// Parse a frame body.
    ///
    /// # Errors
    /// `UnknownBlockKind` for an unrecognized kind byte and `DataIntegrity`
    /// for a body shorter than its header. Neither is fatal to the stream.
    pub fn decode(frame: RawFrame) -> Result<Block> {
        let header = match frame.kind {
            kind::CALL => CALL_HEADER,
            kind::REPLY => REPLY_HEADER,
            kind::EVENT => EVENT_HEADER,
            other => return Err(ProtocolError::UnknownBlockKind(other)),
        };
        if frame.body.len() < header {
            return Err(ProtocolError::DataIntegrity(format!(
                "{}: kind {} with {} bytes",
                constants::ERR_TRUNCATED_HEADER,
                frame.kind,
                frame.body.len()
            )));
        }

        let mut packer = Packer::new(frame.body);
        let block = match frame.kind {
            kind::CALL => Block::Call(CallBlock {
                request_id: packer.read_i32()?,
                object_id: packer.read_i16()?,
                method_id: packer.read_i16()?,
                payload: packer.read_rest(),
            }),
            kind::REPLY => Block::Reply(ReplyBlock {
                request_id: packer.read_i32()?,
                success: packer.read_bool()?,
                payload: packer.read_rest(),
            }),
            _ => Block::Event(EventBlock {
                object_id: packer.read_i16()?,
                event_id: packer.read_i16()?,
                payload: packer.read_rest(),
            }),
        };
        Ok(block)
    }

    pub fn into_frame(self) -> RawFrame {
        let kind = self.kind();
        let mut out = Packer::new(BytesMut::new());
        match self {
            Block::Call(call) => {
                out.get_mut().reserve(CALL_HEADER + call.payload.len());
                out.write_i32(call.request_id);
                out.write_i16(call.object_id);
                out.write_i16(call.method_id);
                out.write_raw(&call.payload);
            }
            Block::Reply(reply) => {
                out.get_mut().reserve(REPLY_HEADER + reply.payload.len());
                out.write_i32(reply.request_id);
                out.write_bool(reply.success);
                out.write_raw(&reply.payload);
            }
            Block::Event(event) => {
                out.get_mut().reserve(EVENT_HEADER + event.payload.len());
                out.write_i16(event.object_id);
                out.write_i16(event.event_id);
                out.write_raw(&event.payload);
            }
        }
        RawFrame::new(kind, out.into_inner().freeze())
    }
}

impl From<CallBlock> for Block {
    fn from(call: CallBlock) -> Self {
        Block::Call(call)
    }
}

impl From<ReplyBlock> for Block {
    fn from(reply: ReplyBlock) -> Self {
        Block::Reply(reply)
    }
}

impl From<EventBlock> for Block {
    fn from(event: EventBlock) -> Self {
        Block::Event(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_header_layout() {
        let frame = Block::from(CallBlock {
            request_id: 101,
            object_id: 0,
            method_id: 2,
            payload: Bytes::from_static(&[9]),
        })
        .into_frame();
        assert_eq!(frame.kind, kind::CALL);
        assert_eq!(&frame.body[..], &[101, 0, 0, 0, 0, 0, 2, 0, 9]);
    }

    #[test]
    fn test_failure_reply_carries_text() {
        let frame = Block::from(ReplyBlock::failure(7, "boom")).into_frame();
        assert_eq!(&frame.body[..], &[7, 0, 0, 0, 0, b'b', b'o', b'o', b'm']);

        match Block::decode(frame).unwrap() {
            Block::Reply(reply) => {
                assert!(!reply.success);
                assert_eq!(reply.error_text().as_deref(), Some("boom"));
            }
            other => panic!("expected reply, got {other:?}"),
        }
    }

    #[test]
    fn test_event_decodes() {
        let frame = RawFrame::new(kind::EVENT, vec![5, 0, 3, 0]);
        assert_eq!(
            Block::decode(frame).unwrap(),
            Block::Event(EventBlock {
                object_id: 5,
                event_id: 3,
                payload: Bytes::new(),
            })
        );
    }

    #[test]
    fn test_unknown_kind() {
        let frame = RawFrame::new(9, vec![0; 8]);
        assert!(matches!(
            Block::decode(frame),
            Err(ProtocolError::UnknownBlockKind(9))
        ));
    }

    #[test]
    fn test_truncated_header_is_data_integrity() {
        let frame = RawFrame::new(kind::CALL, vec![1, 0, 0]);
        assert!(matches!(
            Block::decode(frame),
            Err(ProtocolError::DataIntegrity(_))
        ));
    }
}
