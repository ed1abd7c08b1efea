#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! Edge-case tests for the wire layer and the channel's handling of bad input
//! Covers frame boundaries, malformed blocks, handshake limits and errors

use bytes::{BufMut, Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use objwire::config::ChannelConfig;
use objwire::core::codec::FrameCodec;
use objwire::core::frame::{kind, RawFrame, LENGTH_PREFIX};
use objwire::core::primitives::Timestamp;
use objwire::core::serialization::Serializer;
use objwire::error::ProtocolError;
use objwire::protocol::block::{Block, CallBlock, ReplyBlock};
use objwire::protocol::dispatcher::DispatchTable;
use objwire::protocol::interface::InterfaceDescriptor;
use objwire::service::{DataChannel, LinkState, Role};
use objwire::transport::{read_session_key, write_session_key};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio_util::codec::{Decoder, Encoder, Framed};

// ============================================================================
// FRAME CODEC EDGE CASES
// ============================================================================

#[test]
fn test_frame_with_empty_body() {
    let mut codec = FrameCodec::default();
    let mut buf = BytesMut::new();
    codec.encode(RawFrame::new(kind::EVENT, Bytes::new()), &mut buf).unwrap();
    assert_eq!(&buf[..], &[1, 0, 0, 0, kind::EVENT]);

    let frame = codec.decode(&mut buf).unwrap().expect("complete frame");
    assert_eq!(frame.kind, kind::EVENT);
    assert!(frame.body.is_empty());
}

#[test]
fn test_frame_exactly_at_limit() {
    let mut codec = FrameCodec::new(1024);
    let body = vec![7u8; 1023];
    let mut buf = BytesMut::new();
    codec.encode(RawFrame::new(kind::CALL, body), &mut buf).unwrap();
    assert_eq!(buf.len(), LENGTH_PREFIX + 1024);
    assert!(codec.decode(&mut buf).unwrap().is_some());
}

#[test]
fn test_frame_one_over_limit_rejected_both_ways() {
    let mut codec = FrameCodec::new(1024);
    let mut buf = BytesMut::new();
    let result = codec.encode(RawFrame::new(kind::CALL, vec![0u8; 1024]), &mut buf);
    assert!(matches!(result, Err(ProtocolError::OversizedFrame(1025))));
    assert!(buf.is_empty());

    buf.put_i32_le(1025);
    assert!(matches!(
        codec.decode(&mut buf),
        Err(ProtocolError::OversizedFrame(1025))
    ));
}

#[test]
fn test_negative_length_rejected() {
    let mut codec = FrameCodec::default();
    let mut buf = BytesMut::new();
    buf.put_i32_le(-4);
    buf.put_u8(kind::CALL);
    assert!(matches!(
        codec.decode(&mut buf),
        Err(ProtocolError::InvalidFrame(_))
    ));
}

#[test]
fn test_empty_buffer_waits() {
    let mut codec = FrameCodec::default();
    let mut buf = BytesMut::new();
    assert!(codec.decode(&mut buf).unwrap().is_none());
    buf.put_u8(9);
    assert!(codec.decode(&mut buf).unwrap().is_none());
}

// ============================================================================
// BLOCK EDGE CASES
// ============================================================================

#[test]
fn test_reply_failure_text_is_lossy_utf8() {
    let reply = ReplyBlock {
        request_id: 101,
        success: false,
        payload: Bytes::from_static(&[b'o', b'k', 0xff]),
    };
    let text = reply.error_text().unwrap();
    assert!(text.starts_with("ok"));
    assert!(ReplyBlock::success(101, Bytes::new()).error_text().is_none());
}

#[test]
fn test_call_block_keeps_payload_bytes() {
    let call = CallBlock {
        request_id: i32::MAX,
        object_id: i16::MIN,
        method_id: -1,
        payload: Bytes::from_static(b"\x00\x01\x02"),
    };
    let frame = Block::Call(call.clone()).into_frame();
    assert_eq!(frame.kind, kind::CALL);
    assert_eq!(Block::decode(frame).unwrap(), Block::Call(call));
}

#[test]
fn test_unknown_block_kind() {
    let result = Block::decode(RawFrame::new(42, Bytes::from_static(b"junk")));
    assert!(matches!(result, Err(ProtocolError::UnknownBlockKind(42))));
}

// ============================================================================
// CHANNEL INPUT EDGE CASES
// ============================================================================

struct Greeter;

async fn greeter_server() -> (DataChannel, Framed<tokio::io::DuplexStream, FrameCodec>) {
    let interface = Arc::new(
        InterfaceDescriptor::builder("IGreeter")
            .method("SayHello")
            .build()
            .unwrap(),
    );
    let table = Arc::new(
        DispatchTable::<Greeter>::builder(interface)
            .method("SayHello", |_g, (name,): (String,)| async move {
                Ok(format!("Hello {name}"))
            })
            .build()
            .unwrap(),
    );
    let config = ChannelConfig {
        require_handshake: false,
        ..ChannelConfig::default()
    };
    let server = DataChannel::new(Role::Server, config).unwrap();
    server.export(Arc::new(Greeter), table).unwrap();

    let (a, b) = tokio::io::duplex(16 * 1024);
    server.attach(a).await.unwrap();
    (server, Framed::new(b, FrameCodec::default()))
}

async fn say_hello(peer: &mut Framed<tokio::io::DuplexStream, FrameCodec>, request_id: i32) -> ReplyBlock {
    let payload = objwire::core::serialization::Serializer::new()
        .serialize_args(&("edge".to_string(),))
        .unwrap();
    let call = CallBlock {
        request_id,
        object_id: 0,
        method_id: 0,
        payload,
    };
    peer.send(Block::Call(call).into_frame()).await.unwrap();

    let frame = tokio::time::timeout(Duration::from_secs(1), peer.next())
        .await
        .expect("reply in time")
        .expect("stream open")
        .unwrap();
    match Block::decode(frame).unwrap() {
        Block::Reply(reply) => reply,
        other => panic!("expected reply, got {other:?}"),
    }
}

#[tokio::test]
async fn test_unknown_kind_is_discarded_and_channel_continues() {
    let (server, mut peer) = greeter_server().await;

    peer.send(RawFrame::new(42, Bytes::from_static(b"???"))).await.unwrap();
    peer.send(RawFrame::new(kind::CALL, Bytes::from_static(b"\x01"))).await.unwrap();

    let reply = say_hello(&mut peer, 7).await;
    assert!(reply.success);
    assert_eq!(reply.request_id, 7);
    assert_eq!(server.metrics().snapshot().frames_discarded, 2);
    assert_eq!(server.link_state(), LinkState::Attached);
}

#[tokio::test]
async fn test_reply_echoes_any_request_id() {
    let (_server, mut peer) = greeter_server().await;
    for request_id in [i32::MIN, -1, 0, i32::MAX] {
        let reply = say_hello(&mut peer, request_id).await;
        assert_eq!(reply.request_id, request_id);
    }
}

#[tokio::test]
async fn test_corrupt_length_drops_the_link() {
    let (server, peer) = greeter_server().await;
    let mut raw = peer.into_inner();
    raw.write_all(&(-1i32).to_le_bytes()).await.unwrap();

    let mut link = server.watch_link();
    tokio::time::timeout(Duration::from_secs(1), link.wait_for(|s| *s == LinkState::Lost))
        .await
        .expect("link lost in time")
        .unwrap();
    assert!(!server.is_closed());
}

#[tokio::test]
async fn test_reply_for_unknown_request_is_ignored() {
    let server = DataChannel::new(Role::Client, ChannelConfig::default()).unwrap();
    let (a, b) = tokio::io::duplex(4096);
    server.attach(a).await.unwrap();
    let mut peer = Framed::new(b, FrameCodec::default());

    peer.send(Block::Reply(ReplyBlock::success(5_000, Bytes::new())).into_frame())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(server.metrics().snapshot().replies_orphaned, 1);
    assert_eq!(server.link_state(), LinkState::Attached);
}

// ============================================================================
// TIMESTAMP EDGE CASES
// ============================================================================

#[test]
fn test_extreme_timestamps_decode_and_convert() {
    let s = Serializer::new();
    for ticks in [i64::MIN, i64::MAX] {
        let bytes = s.serialize(&Timestamp::from_ticks(ticks)).unwrap();
        let back: Timestamp = s.deserialize(bytes).unwrap();
        assert_eq!(back.ticks(), ticks);
        if let Some(time) = back.to_system_time() {
            assert_eq!(Timestamp::from_system_time(time), back);
        }
    }
}

// ============================================================================
// SESSION PREAMBLE EDGE CASES
// ============================================================================

#[tokio::test]
async fn test_session_key_limits() {
    let (mut a, mut b) = tokio::io::duplex(1024);
    assert!(matches!(
        write_session_key(&mut a, "").await,
        Err(ProtocolError::InvalidArgument(_))
    ));

    let longest = "k".repeat(256);
    write_session_key(&mut a, &longest).await.unwrap();
    assert_eq!(read_session_key(&mut b).await.unwrap(), longest);

    a.write_all(&257i32.to_le_bytes()).await.unwrap();
    assert!(matches!(
        read_session_key(&mut b).await,
        Err(ProtocolError::AuthenticationError(_))
    ));
}

#[tokio::test]
async fn test_session_key_must_be_utf8() {
    let (mut a, mut b) = tokio::io::duplex(1024);
    a.write_all(&2i32.to_le_bytes()).await.unwrap();
    a.write_all(&[0xc3, 0x28]).await.unwrap();
    assert!(matches!(
        read_session_key(&mut b).await,
        Err(ProtocolError::AuthenticationError(_))
    ));
}

// ============================================================================
// ERROR FORMATTING
// ============================================================================

#[test]
fn test_error_display_formatting() {
    let cases = [
        (ProtocolError::Timeout, "Timeout occurred"),
        (ProtocolError::ConnectionClosed, "Channel closed"),
        (ProtocolError::UnknownObject(55), "Unknown object id: 55"),
        (
            ProtocolError::UnknownMethod {
                object_id: 0,
                method_id: 50,
            },
            "Unknown method id 50 on object 0",
        ),
        (ProtocolError::OversizedFrame(9), "Frame too large: 9 bytes"),
    ];
    for (error, text) in cases {
        assert_eq!(error.to_string(), text);
    }
}
